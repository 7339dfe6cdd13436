//! Migration orchestrator — the alias-swap cutover state machine.
//!
//! Sequences a full shard migration: redirect readers to an "old" alias,
//! create a fresh writer index for concurrent writes, resolve collision-free
//! destination names, create the destinations, copy every source under the
//! worker-pool ceiling, and rebind the canonical alias to the new set. At
//! every step boundary the canonical alias resolves to a non-empty set of
//! indexes, so readers never observe an empty dataset.
//!
//! Failures are terminal: the run aborts in place with no compensating
//! rollback — already-applied alias changes stay applied, and an operator
//! rerun is safe because every delete and bind is idempotent.

#![forbid(unsafe_code)]

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use uuid::Uuid;

use crate::alias::AliasManager;
use crate::config::MigrationConfig;
use crate::copy::CopyWorker;
use crate::naming::{resolve_destination, IndexName, NamingError};
use crate::pool::{PoolError, PoolStats, WorkerPool};
use crate::retry::RetryExecutor;
use crate::store::{IndexStore, RelationalCheckpoint, StoreError};

/// Current protocol step of a migration run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MigrationPhase {
    /// Listing the indexes bound to the canonical alias.
    Init,
    /// Binding the "old" alias so readers keep the full dataset.
    RedirectReads,
    /// Creating the writer index that absorbs concurrent writes.
    CreateWriter,
    /// Resolving a collision-free destination name per source.
    ResolveNames,
    /// Creating the destination indexes.
    CreateIndexes,
    /// Copying sources to destinations under the worker ceiling.
    CopyAndSwap,
    /// Swapping the canonical alias onto the new index set.
    RebindAliases,
    /// Migration completed successfully.
    Done,
    /// Migration aborted; no rollback was attempted.
    Failed,
}

impl fmt::Display for MigrationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Init => write!(f, "init"),
            Self::RedirectReads => write!(f, "redirect_reads"),
            Self::CreateWriter => write!(f, "create_writer"),
            Self::ResolveNames => write!(f, "resolve_names"),
            Self::CreateIndexes => write!(f, "create_indexes"),
            Self::CopyAndSwap => write!(f, "copy_and_swap"),
            Self::RebindAliases => write!(f, "rebind_aliases"),
            Self::Done => write!(f, "done"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// The (source, destination) pairing a run executes.
///
/// Position i of each list forms the pair copied by exactly one worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationPlan {
    old_indexes: Vec<String>,
    new_indexes: Vec<String>,
}

impl MigrationPlan {
    /// Build a plan, enforcing the pairing invariants: equal lengths and no
    /// destination shared across positions.
    pub fn new(old_indexes: Vec<String>, new_indexes: Vec<String>) -> Result<Self> {
        if old_indexes.len() != new_indexes.len() {
            return Err(MigrateError::InvalidPlan(format!(
                "{} sources but {} destinations",
                old_indexes.len(),
                new_indexes.len()
            )));
        }
        let mut seen = HashSet::new();
        for destination in &new_indexes {
            if !seen.insert(destination) {
                return Err(MigrateError::InvalidPlan(format!(
                    "destination {destination} assigned to more than one source"
                )));
            }
        }
        Ok(Self {
            old_indexes,
            new_indexes,
        })
    }

    /// Source indexes, in execution order.
    pub fn old_indexes(&self) -> &[String] {
        &self.old_indexes
    }

    /// Destination indexes, in execution order.
    pub fn new_indexes(&self) -> &[String] {
        &self.new_indexes
    }

    /// The (source, destination) pairs, position-aligned.
    pub fn pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.old_indexes
            .iter()
            .map(String::as_str)
            .zip(self.new_indexes.iter().map(String::as_str))
    }

    /// Number of pairs.
    pub fn len(&self) -> usize {
        self.old_indexes.len()
    }

    /// Whether the plan has no pairs.
    pub fn is_empty(&self) -> bool {
        self.old_indexes.is_empty()
    }
}

/// Summary of a finished migration run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationReport {
    /// Unique identifier of this run.
    pub run_id: String,
    /// The executed (source, destination) pairing.
    pub plan: MigrationPlan,
    /// The writer index created for concurrent writes.
    pub writer_index: String,
    /// Documents copied across all workers.
    pub documents_copied: u64,
    /// Pages read across all workers.
    pub pages_read: u64,
    /// Workers launched by the scheduler.
    pub workers_launched: u64,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run completed.
    pub completed_at: DateTime<Utc>,
}

/// Errors that terminate a migration run.
#[derive(Debug, thiserror::Error)]
pub enum MigrateError {
    /// Destination-name resolution failed.
    #[error(transparent)]
    Naming(#[from] NamingError),
    /// A copy worker failed or was lost.
    #[error(transparent)]
    Pool(#[from] PoolError),
    /// An unrecovered remote-store error.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    /// The resolved plan violates the pairing invariants.
    #[error("invalid migration plan: {0}")]
    InvalidPlan(String),
}

/// Result alias for orchestrator operations.
pub type Result<T> = std::result::Result<T, MigrateError>;

/// Observer invoked on every phase transition.
pub type PhaseObserver = Arc<dyn Fn(MigrationPhase) + Send + Sync>;

/// Drives one migration run end to end.
pub struct MigrationOrchestrator {
    config: MigrationConfig,
    retry: RetryExecutor,
    aliases: AliasManager,
    relational: Option<Arc<dyn RelationalCheckpoint>>,
    phase: RwLock<MigrationPhase>,
    observer: Option<PhaseObserver>,
}

impl MigrationOrchestrator {
    /// Create an orchestrator over `store` with the given configuration.
    pub fn new(store: Arc<dyn IndexStore>, config: MigrationConfig) -> Self {
        let policy = config.retry_policy();
        Self {
            retry: RetryExecutor::new(store.clone(), policy),
            aliases: AliasManager::new(store, policy),
            config,
            relational: None,
            phase: RwLock::new(MigrationPhase::Init),
            observer: None,
        }
    }

    /// Attach a relational collaborator whose connection is re-established
    /// at the isolation checkpoints.
    pub fn with_relational(mut self, relational: Arc<dyn RelationalCheckpoint>) -> Self {
        self.relational = Some(relational);
        self
    }

    /// Attach an observer called after every phase transition.
    pub fn with_phase_observer(mut self, observer: PhaseObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    /// The current protocol phase.
    pub fn phase(&self) -> MigrationPhase {
        *self.phase.read()
    }

    /// Execute the full migration protocol.
    pub async fn run(&self) -> Result<MigrationReport> {
        let run_id = Uuid::new_v4().to_string();
        let started_at = Utc::now();
        info!(
            %run_id,
            alias = %self.config.canonical_alias,
            "starting shard migration"
        );

        match self.execute().await {
            Ok((plan, writer_index, stats)) => {
                self.set_phase(MigrationPhase::Done);
                let report = MigrationReport {
                    run_id,
                    plan,
                    writer_index,
                    documents_copied: stats.documents_copied,
                    pages_read: stats.pages_read,
                    workers_launched: stats.workers_launched,
                    started_at,
                    completed_at: Utc::now(),
                };
                info!(
                    run_id = %report.run_id,
                    documents = report.documents_copied,
                    indexes = report.plan.len(),
                    "shard migration complete"
                );
                Ok(report)
            }
            Err(e) => {
                self.set_phase(MigrationPhase::Failed);
                error!(%run_id, error = %e, "shard migration failed");
                Err(e)
            }
        }
    }

    async fn execute(&self) -> Result<(MigrationPlan, String, PoolStats)> {
        let canonical = self.config.canonical_alias.clone();

        self.set_phase(MigrationPhase::Init);
        let mut old_indexes = self
            .retry
            .execute("indexes_bound", || {
                let store = self.retry.store().clone();
                let alias = canonical.clone();
                async move { store.indexes_bound(&alias).await }
            })
            .await?;
        old_indexes.sort();
        info!(
            alias = %canonical,
            count = old_indexes.len(),
            "indexes bound to canonical alias"
        );

        self.set_phase(MigrationPhase::RedirectReads);
        self.aliases.delete(&self.config.old_alias, "*").await?;
        for index in &old_indexes {
            self.aliases.put(&self.config.old_alias, index).await?;
        }

        self.set_phase(MigrationPhase::CreateWriter);
        let writer_seed = IndexName::with_current_timestamp(canonical.clone());
        let writer = resolve_destination(&self.retry, &writer_seed, &HashSet::new()).await?;
        let writer_index = writer.to_string();
        self.create_index_with_health(&writer_index).await?;
        self.aliases.put(&canonical, &writer_index).await?;
        self.reset_connections().await?;
        info!(index = %writer_index, "writer index created");

        self.set_phase(MigrationPhase::ResolveNames);
        let mut reserved = HashSet::new();
        let mut new_indexes = Vec::with_capacity(old_indexes.len());
        for old in &old_indexes {
            let source = IndexName::parse(old)?;
            let destination = resolve_destination(&self.retry, &source, &reserved).await?;
            let name = destination.to_string();
            reserved.insert(name.clone());
            new_indexes.push(name);
        }
        let new_indexes = dedup_preserving_order(new_indexes);
        let plan = MigrationPlan::new(old_indexes, new_indexes)?;
        info!(pairs = plan.len(), "destination names resolved");

        self.set_phase(MigrationPhase::CreateIndexes);
        if let Some(relational) = &self.relational {
            relational.reconnect().await?;
        }
        self.reset_connections().await?;
        for name in plan.new_indexes() {
            self.create_index_with_health(name).await?;
        }

        self.set_phase(MigrationPhase::CopyAndSwap);
        let mut pool = WorkerPool::new(self.config.max_workers);
        for (source, destination) in plan.pairs() {
            let worker = CopyWorker::new(
                self.retry.store().clone(),
                self.config.retry_policy(),
                source,
                destination,
                self.config.page_size,
                self.config.cursor_keep_alive,
            );
            pool.submit(worker).await?;
        }
        let stats = pool.drain().await?;
        self.reset_connections().await?;
        if let Some(relational) = &self.relational {
            relational.reconnect().await?;
        }
        info!(
            documents = stats.documents_copied,
            workers = stats.workers_launched,
            "copy phase complete"
        );

        self.set_phase(MigrationPhase::RebindAliases);
        self.aliases.delete(&canonical, "*").await?;
        for name in plan.new_indexes() {
            self.aliases.put(&canonical, name).await?;
        }
        self.aliases.put(&canonical, &writer_index).await?;

        Ok((plan, writer_index, stats))
    }

    async fn create_index_with_health(&self, name: &str) -> Result<()> {
        info!(index = %name, "creating index");
        self.retry
            .execute("create_index", || {
                let store = self.retry.store().clone();
                let name = name.to_string();
                async move {
                    store.create_index(&name).await?;
                    store.wait_for_health().await
                }
            })
            .await?;
        Ok(())
    }

    async fn reset_connections(&self) -> Result<()> {
        self.retry
            .execute("reset_connections", || {
                let store = self.retry.store().clone();
                async move { store.reset_connections().await }
            })
            .await?;
        Ok(())
    }

    fn set_phase(&self, phase: MigrationPhase) {
        *self.phase.write() = phase;
        info!(phase = %phase, "migration phase");
        if let Some(observer) = &self.observer {
            observer(phase);
        }
    }
}

fn dedup_preserving_order(names: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    names
        .into_iter()
        .filter(|name| seen.insert(name.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_rejects_unequal_lengths() {
        let err = MigrationPlan::new(
            vec!["a_20240101000000".into()],
            vec!["a_20240101000001".into(), "a_20240101000002".into()],
        )
        .unwrap_err();
        assert!(matches!(err, MigrateError::InvalidPlan(_)));
    }

    #[test]
    fn test_plan_rejects_shared_destination() {
        let err = MigrationPlan::new(
            vec!["a_20240101000000".into(), "a_20240101000100".into()],
            vec!["a_20240101000001".into(), "a_20240101000001".into()],
        )
        .unwrap_err();
        assert!(matches!(err, MigrateError::InvalidPlan(_)));
    }

    #[test]
    fn test_plan_pairs_are_position_aligned() {
        let plan = MigrationPlan::new(
            vec!["a_20240101000000".into(), "a_20240101000100".into()],
            vec!["a_20240101000001".into(), "a_20240101000101".into()],
        )
        .unwrap();
        let pairs: Vec<_> = plan.pairs().collect();
        assert_eq!(
            pairs,
            vec![
                ("a_20240101000000", "a_20240101000001"),
                ("a_20240101000100", "a_20240101000101"),
            ]
        );
        assert_eq!(plan.len(), 2);
        assert!(!plan.is_empty());
    }

    #[test]
    fn test_dedup_preserves_order() {
        let deduped = dedup_preserving_order(vec![
            "b".to_string(),
            "a".to_string(),
            "b".to_string(),
            "c".to_string(),
        ]);
        assert_eq!(deduped, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(MigrationPhase::Init.to_string(), "init");
        assert_eq!(MigrationPhase::RedirectReads.to_string(), "redirect_reads");
        assert_eq!(MigrationPhase::CopyAndSwap.to_string(), "copy_and_swap");
        assert_eq!(MigrationPhase::Done.to_string(), "done");
    }
}
