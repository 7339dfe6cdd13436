//! Bounded worker pool for concurrent copy execution.
//!
//! Copy workers run as isolated tasks in a [`JoinSet`], capped at a fixed
//! ceiling of outstanding handles. Submission blocks once the ceiling is
//! reached and reaps opportunistically afterwards; a single failed or
//! panicked worker aborts the whole run without touching its siblings —
//! they are detached and left to finish on their own.

#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::task::{Id, JoinError, JoinSet};
use tracing::{debug, error, info};

use crate::copy::{CopyStats, CopyWorker};
use crate::store::StoreError;

/// Default ceiling on concurrently running copy workers.
pub const DEFAULT_WORKER_CEILING: usize = 25;

/// Lifecycle state of one worker handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerState {
    /// The worker task is still executing.
    Running,
    /// The worker finished and reported success.
    Succeeded,
    /// The worker finished and reported failure.
    Failed,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Bookkeeping for one launched worker; created at launch, destroyed at
/// reap.
#[derive(Debug, Clone)]
pub struct WorkerHandle {
    /// Task identifier assigned at spawn.
    pub id: Id,
    /// Source index being copied.
    pub source: String,
    /// Destination index being written.
    pub destination: String,
    /// Current lifecycle state.
    pub state: WorkerState,
}

/// The terminal report a worker task hands back through its join handle.
#[derive(Debug)]
pub struct WorkerOutcome {
    /// Source index of the pair.
    pub source: String,
    /// Destination index of the pair.
    pub destination: String,
    /// Success with transfer totals, or the error that stopped the worker.
    pub result: Result<CopyStats, StoreError>,
}

/// Fatal scheduler errors. Any of these terminates the migration run.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// A worker reported a failure outcome.
    #[error("copy worker {source} -> {destination} failed: {reason}")]
    WorkerFailed {
        /// Source index of the failed pair.
        source: String,
        /// Destination index of the failed pair.
        destination: String,
        /// The store error that stopped the worker.
        #[source]
        reason: StoreError,
    },
    /// A worker task panicked or was torn down before reporting.
    #[error("copy worker {source} -> {destination} did not complete: {reason}")]
    WorkerPanicked {
        /// Source index of the lost pair.
        source: String,
        /// Destination index of the lost pair.
        destination: String,
        /// Join-level description of what happened.
        reason: String,
    },
}

/// Aggregated totals across all reaped workers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    /// Workers launched over the pool's lifetime.
    pub workers_launched: u64,
    /// Workers reaped with a success outcome.
    pub workers_completed: u64,
    /// Documents copied across all completed workers.
    pub documents_copied: u64,
    /// Pages read across all completed workers.
    pub pages_read: u64,
}

/// Scheduler owning the outstanding worker handles of one migration run.
pub struct WorkerPool {
    ceiling: usize,
    tasks: JoinSet<WorkerOutcome>,
    handles: HashMap<Id, WorkerHandle>,
    stats: PoolStats,
}

impl WorkerPool {
    /// Create a pool that keeps at most `ceiling` workers outstanding.
    pub fn new(ceiling: usize) -> Self {
        Self {
            ceiling: ceiling.max(1),
            tasks: JoinSet::new(),
            handles: HashMap::new(),
            stats: PoolStats::default(),
        }
    }

    /// Number of outstanding (launched, not yet reaped) workers.
    pub fn outstanding(&self) -> usize {
        self.handles.len()
    }

    /// The outstanding handles, in no particular order.
    pub fn handles(&self) -> impl Iterator<Item = &WorkerHandle> {
        self.handles.values()
    }

    /// Launch `worker`. Blocks reaping one completion first if the pool is
    /// at its ceiling, and opportunistically reaps any already-finished
    /// workers after launching. Returns an error as soon as any reaped
    /// worker turns out to have failed.
    pub async fn submit(&mut self, worker: CopyWorker) -> Result<(), PoolError> {
        if self.outstanding() >= self.ceiling {
            debug!(
                outstanding = self.outstanding(),
                ceiling = self.ceiling,
                "worker ceiling reached, waiting for a completion"
            );
            if let Some(next) = self.tasks.join_next_with_id().await {
                self.settle(next)?;
            }
        }

        let source = worker.source().to_string();
        let destination = worker.destination().to_string();
        let abort = self.tasks.spawn(async move {
            let source = worker.source().to_string();
            let destination = worker.destination().to_string();
            let result = worker.run().await;
            WorkerOutcome {
                source,
                destination,
                result,
            }
        });
        let id = abort.id();
        info!(worker = %id, source = %source, destination = %destination, "worker launched");
        self.handles.insert(
            id,
            WorkerHandle {
                id,
                source,
                destination,
                state: WorkerState::Running,
            },
        );
        self.stats.workers_launched += 1;

        while let Some(next) = self.tasks.try_join_next_with_id() {
            self.settle(next)?;
        }
        Ok(())
    }

    /// Block until every outstanding worker has completed, then return the
    /// aggregated totals. Fails fast on the first failed worker.
    pub async fn drain(mut self) -> Result<PoolStats, PoolError> {
        while let Some(next) = self.tasks.join_next_with_id().await {
            self.settle(next)?;
        }
        Ok(self.stats)
    }

    fn settle(&mut self, next: Result<(Id, WorkerOutcome), JoinError>) -> Result<(), PoolError> {
        match next {
            Ok((id, outcome)) => {
                if let Some(mut handle) = self.handles.remove(&id) {
                    handle.state = match &outcome.result {
                        Ok(_) => WorkerState::Succeeded,
                        Err(_) => WorkerState::Failed,
                    };
                    debug!(worker = %id, state = %handle.state, "worker reaped");
                }
                match outcome.result {
                    Ok(stats) => {
                        self.stats.workers_completed += 1;
                        self.stats.documents_copied += stats.documents_copied;
                        self.stats.pages_read += stats.pages_read;
                        info!(
                            worker = %id,
                            source = %outcome.source,
                            documents = stats.documents_copied,
                            "worker succeeded"
                        );
                        Ok(())
                    }
                    Err(reason) => {
                        error!(
                            worker = %id,
                            source = %outcome.source,
                            destination = %outcome.destination,
                            error = %reason,
                            "worker failed, aborting run"
                        );
                        self.tasks.detach_all();
                        Err(PoolError::WorkerFailed {
                            source: outcome.source,
                            destination: outcome.destination,
                            reason,
                        })
                    }
                }
            }
            Err(join_err) => {
                let id = join_err.id();
                let (source, destination) = self
                    .handles
                    .remove(&id)
                    .map(|handle| (handle.source, handle.destination))
                    .unwrap_or_default();
                error!(
                    worker = %id,
                    source = %source,
                    error = %join_err,
                    "worker task lost, aborting run"
                );
                self.tasks.detach_all();
                Err(PoolError::WorkerPanicked {
                    source,
                    destination,
                    reason: join_err.to_string(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::RetryPolicy;
    use crate::store::{Document, InMemoryStore, StoreError};
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    fn docs(n: usize) -> Vec<Document> {
        (0..n)
            .map(|i| Document::new(format!("doc-{i}"), "event", json!({ "n": i })))
            .collect()
    }

    fn worker(store: &Arc<InMemoryStore>, source: &str, destination: &str) -> CopyWorker {
        CopyWorker::new(
            store.clone(),
            RetryPolicy {
                delay: Duration::from_millis(1),
            },
            source,
            destination,
            10,
            Duration::from_secs(300),
        )
    }

    fn seed_pairs(store: &Arc<InMemoryStore>, pairs: usize) -> Vec<(String, String)> {
        (0..pairs)
            .map(|i| {
                let source = format!("items_2024010100000{i}");
                let destination = format!("items_2024010101000{i}");
                store.seed_index(&source, docs(5));
                store.seed_index(&destination, Vec::new());
                (source, destination)
            })
            .collect()
    }

    #[tokio::test]
    async fn test_outstanding_never_exceeds_ceiling() {
        let store = Arc::new(InMemoryStore::new());
        store.set_fetch_latency(Duration::from_millis(20));
        let pairs = seed_pairs(&store, 6);
        let mut pool = WorkerPool::new(2);
        for (source, destination) in &pairs {
            pool.submit(worker(&store, source, destination)).await.unwrap();
            assert!(pool.outstanding() <= 2);
        }
        let stats = pool.drain().await.unwrap();
        assert_eq!(stats.workers_launched, 6);
        assert_eq!(stats.workers_completed, 6);
        assert_eq!(stats.documents_copied, 30);
    }

    #[tokio::test]
    async fn test_drain_aggregates_stats() {
        let store = Arc::new(InMemoryStore::new());
        let pairs = seed_pairs(&store, 3);
        let mut pool = WorkerPool::new(DEFAULT_WORKER_CEILING);
        for (source, destination) in &pairs {
            pool.submit(worker(&store, source, destination)).await.unwrap();
        }
        let stats = pool.drain().await.unwrap();
        assert_eq!(stats.workers_completed, 3);
        assert_eq!(stats.documents_copied, 15);
        for (source, _) in &pairs {
            assert!(store.documents(source).is_none());
        }
    }

    #[tokio::test]
    async fn test_worker_failure_fails_the_run() {
        let store = Arc::new(InMemoryStore::new());
        let pairs = seed_pairs(&store, 3);
        store.inject_error("bulk_write", StoreError::Rejected("mapping conflict".into()));
        let mut pool = WorkerPool::new(DEFAULT_WORKER_CEILING);
        let mut failed = false;
        for (source, destination) in &pairs {
            if pool.submit(worker(&store, source, destination)).await.is_err() {
                failed = true;
                break;
            }
        }
        if !failed {
            let err = pool.drain().await.unwrap_err();
            assert!(matches!(err, PoolError::WorkerFailed { .. }));
        }
    }

    #[tokio::test]
    async fn test_failure_at_ceiling_surfaces_in_submit() {
        let store = Arc::new(InMemoryStore::new());
        let pairs = seed_pairs(&store, 3);
        store.inject_error("open_cursor", StoreError::Rejected("index closed".into()));
        let mut pool = WorkerPool::new(1);
        let mut outcome = Ok(());
        for (source, destination) in &pairs {
            outcome = pool.submit(worker(&store, source, destination)).await;
            if outcome.is_err() {
                break;
            }
        }
        if outcome.is_ok() {
            outcome = pool.drain().await.map(|_| ());
        }
        assert!(matches!(outcome, Err(PoolError::WorkerFailed { .. })));
    }

    #[tokio::test]
    async fn test_handles_carry_pair_identity() {
        let store = Arc::new(InMemoryStore::new());
        store.set_fetch_latency(Duration::from_millis(20));
        let pairs = seed_pairs(&store, 1);
        let mut pool = WorkerPool::new(2);
        pool.submit(worker(&store, &pairs[0].0, &pairs[0].1)).await.unwrap();
        let handle = pool.handles().next().unwrap();
        assert_eq!(handle.source, pairs[0].0);
        assert_eq!(handle.state, WorkerState::Running);
        pool.drain().await.unwrap();
    }

    #[tokio::test]
    async fn test_empty_pool_drains_clean() {
        let pool = WorkerPool::new(DEFAULT_WORKER_CEILING);
        let stats = pool.drain().await.unwrap();
        assert_eq!(stats, PoolStats::default());
    }
}
