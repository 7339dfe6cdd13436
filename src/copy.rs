//! Copy worker — streams one source index into one destination index.
//!
//! Each worker is a failure-isolated unit of work: it re-establishes its
//! own connection state on entry, pages through the source, batch-writes
//! each page into the destination, and finally deletes the source. The
//! worker's result is the only signal the scheduler sees — no partial
//! progress escapes it.

#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::retry::{RetryExecutor, RetryPolicy};
use crate::store::{IndexStore, StoreError};

/// Transfer totals for one completed copy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopyStats {
    /// Documents written into the destination.
    pub documents_copied: u64,
    /// Non-empty pages read from the source.
    pub pages_read: u64,
}

/// One source → destination copy, executed as an isolated task.
pub struct CopyWorker {
    retry: RetryExecutor,
    source: String,
    destination: String,
    page_size: usize,
    keep_alive: Duration,
}

impl CopyWorker {
    /// Build a worker for one (source, destination) pair. The worker owns
    /// its own [`RetryExecutor`] — connection state is never shared across
    /// workers.
    pub fn new(
        store: Arc<dyn IndexStore>,
        policy: RetryPolicy,
        source: impl Into<String>,
        destination: impl Into<String>,
        page_size: usize,
        keep_alive: Duration,
    ) -> Self {
        Self {
            retry: RetryExecutor::new(store, policy),
            source: source.into(),
            destination: destination.into(),
            page_size,
            keep_alive,
        }
    }

    /// The source index name.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// The destination index name.
    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// Copy every document from source to destination, then delete the
    /// source (a source already gone is tolerated). Stops on the first
    /// empty page.
    pub async fn run(&self) -> Result<CopyStats, StoreError> {
        info!(
            source = %self.source,
            destination = %self.destination,
            "copy worker starting"
        );

        // Isolation boundary: this worker's connections are its own.
        self.retry
            .execute("reset_connections", || {
                let store = self.retry.store().clone();
                async move { store.reset_connections().await }
            })
            .await?;

        let cursor = self
            .retry
            .execute("open_cursor", || {
                let store = self.retry.store().clone();
                let source = self.source.clone();
                let page_size = self.page_size;
                let keep_alive = self.keep_alive;
                async move { store.open_cursor(&source, page_size, keep_alive).await }
            })
            .await?;

        let mut stats = CopyStats::default();
        loop {
            let page = self
                .retry
                .execute("fetch_page", || {
                    let store = self.retry.store().clone();
                    let cursor = cursor.clone();
                    async move { store.fetch_page(&cursor).await }
                })
                .await?;
            if page.is_empty() {
                break;
            }

            self.retry
                .execute("bulk_write", || {
                    let store = self.retry.store().clone();
                    let destination = self.destination.clone();
                    let page = page.clone();
                    async move { store.bulk_write(&destination, &page).await }
                })
                .await?;

            stats.pages_read += 1;
            stats.documents_copied += page.len() as u64;
            debug!(
                source = %self.source,
                destination = %self.destination,
                page_docs = page.len(),
                total_docs = stats.documents_copied,
                "page copied"
            );
        }

        let delete = self
            .retry
            .execute("delete_index", || {
                let store = self.retry.store().clone();
                let source = self.source.clone();
                async move {
                    store.delete_index(&source).await?;
                    store.wait_for_health().await
                }
            })
            .await;
        match delete {
            Ok(()) => {}
            Err(StoreError::NotFound(target)) => {
                debug!(%target, "source index already deleted");
            }
            Err(other) => return Err(other),
        }

        info!(
            source = %self.source,
            destination = %self.destination,
            documents = stats.documents_copied,
            pages = stats.pages_read,
            "copy worker finished"
        );
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Document, InMemoryStore};
    use serde_json::json;

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
            100,
            Duration::from_secs(300),
        )
    }

    #[tokio::test]
    async fn test_copies_all_documents_and_deletes_source() {
        let store = Arc::new(InMemoryStore::new());
        store.seed_index("emails_20240101000000", docs(250));
        store.seed_index("emails_20240101000001", Vec::new());
        let stats = worker(&store, "emails_20240101000000", "emails_20240101000001")
            .run()
            .await
            .unwrap();
        assert_eq!(stats.documents_copied, 250);
        assert_eq!(stats.pages_read, 3);
        assert!(store.documents("emails_20240101000000").is_none());
        assert_eq!(store.documents("emails_20240101000001").unwrap().len(), 250);
    }

    #[tokio::test]
    async fn test_page_cadence_for_250_docs() {
        let store = Arc::new(InMemoryStore::new());
        store.seed_index("emails_20240101000000", docs(250));
        store.seed_index("emails_20240101000001", Vec::new());
        worker(&store, "emails_20240101000000", "emails_20240101000001")
            .run()
            .await
            .unwrap();
        assert_eq!(store.fetched_page_sizes(), vec![100, 100, 50, 0]);
        assert_eq!(store.counters().bulk_writes, 3);
        assert_eq!(store.counters().pages_fetched, 4);
    }

    #[tokio::test]
    async fn test_empty_source_writes_nothing() {
        let store = Arc::new(InMemoryStore::new());
        store.seed_index("emails_20240101000000", Vec::new());
        store.seed_index("emails_20240101000001", Vec::new());
        let stats = worker(&store, "emails_20240101000000", "emails_20240101000001")
            .run()
            .await
            .unwrap();
        assert_eq!(stats.documents_copied, 0);
        assert_eq!(store.counters().bulk_writes, 0);
        assert!(store.documents("emails_20240101000000").is_none());
    }

    #[tokio::test]
    async fn test_preserves_payload_and_type_tag() {
        let store = Arc::new(InMemoryStore::new());
        let original = vec![Document::new(
            "doc-0",
            "message",
            json!({ "subject": "hello", "nested": { "a": [1, 2, 3] } }),
        )];
        store.seed_index("emails_20240101000000", original.clone());
        store.seed_index("emails_20240101000001", Vec::new());
        worker(&store, "emails_20240101000000", "emails_20240101000001")
            .run()
            .await
            .unwrap();
        assert_eq!(store.documents("emails_20240101000001").unwrap(), original);
    }

    #[tokio::test]
    async fn test_transport_failure_mid_copy_is_retried() {
        let store = Arc::new(InMemoryStore::new());
        store.seed_index("emails_20240101000000", docs(150));
        store.seed_index("emails_20240101000001", Vec::new());
        store.inject_error("fetch_page", StoreError::Transport("scroll timeout".into()));
        store.inject_error("bulk_write", StoreError::Transport("queue full".into()));
        let stats = worker(&store, "emails_20240101000000", "emails_20240101000001")
            .run()
            .await
            .unwrap();
        assert_eq!(stats.documents_copied, 150);
        assert_eq!(store.documents("emails_20240101000001").unwrap().len(), 150);
    }

    #[tokio::test]
    async fn test_rejected_write_propagates() {
        let store = Arc::new(InMemoryStore::new());
        store.seed_index("emails_20240101000000", docs(10));
        store.seed_index("emails_20240101000001", Vec::new());
        store.inject_error("bulk_write", StoreError::Rejected("mapping conflict".into()));
        let err = worker(&store, "emails_20240101000000", "emails_20240101000001")
            .run()
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Rejected(_)));
        // Fail-fast: the source must survive a failed copy.
        assert!(store.documents("emails_20240101000000").is_some());
    }

    #[tokio::test]
    async fn test_missing_source_on_delete_is_tolerated() {
        let store = Arc::new(InMemoryStore::new());
        store.seed_index("emails_20240101000000", docs(3));
        store.seed_index("emails_20240101000001", Vec::new());
        store.inject_error(
            "delete_index",
            StoreError::NotFound("index emails_20240101000000".into()),
        );
        let stats = worker(&store, "emails_20240101000000", "emails_20240101000001")
            .run()
            .await
            .unwrap();
        assert_eq!(stats.documents_copied, 3);
    }
}
