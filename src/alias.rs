//! Idempotent alias mutations with a health-wait barrier.
//!
//! Readers are redirected by rebinding aliases, so every mutation here is
//! followed by a blocking wait for store health — the barrier that makes
//! the change visible to the next reader or protocol step. Binds and
//! unbinds are safe to repeat; an unbind of something already gone is a
//! successful no-op.

#![forbid(unsafe_code)]

use std::sync::Arc;

use tracing::{debug, info};

use crate::retry::{RetryExecutor, RetryPolicy};
use crate::store::{IndexStore, StoreError};

/// Manages alias bindings on the remote store.
pub struct AliasManager {
    retry: RetryExecutor,
}

impl AliasManager {
    /// Create a manager over `store` retrying with `policy`.
    pub fn new(store: Arc<dyn IndexStore>, policy: RetryPolicy) -> Self {
        Self {
            retry: RetryExecutor::new(store, policy),
        }
    }

    /// Bind `alias` to `index`, then wait for store health. Retried as a
    /// unit, so a bind that lands but times out on the barrier is simply
    /// re-applied.
    pub async fn put(&self, alias: &str, index: &str) -> Result<(), StoreError> {
        info!(alias, index, "binding alias");
        self.retry
            .execute("put_alias", || {
                let store = self.retry.store().clone();
                let alias = alias.to_string();
                let index = index.to_string();
                async move {
                    store.put_alias(&alias, &index).await?;
                    store.wait_for_health().await
                }
            })
            .await
    }

    /// Unbind `alias` from every index matching `index_pattern`, then wait
    /// for store health. A [`StoreError::NotFound`] from the store means
    /// there was nothing to unbind and is mapped to success, skipping the
    /// barrier.
    pub async fn delete(&self, alias: &str, index_pattern: &str) -> Result<(), StoreError> {
        info!(alias, pattern = index_pattern, "unbinding alias");
        self.retry
            .execute("delete_alias", || {
                let store = self.retry.store().clone();
                let alias = alias.to_string();
                let pattern = index_pattern.to_string();
                async move {
                    match store.delete_alias(&alias, &pattern).await {
                        Ok(()) => store.wait_for_health().await,
                        Err(StoreError::NotFound(target)) => {
                            debug!(%target, "alias binding already absent");
                            Ok(())
                        }
                        Err(other) => Err(other),
                    }
                }
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use std::time::Duration;

    fn manager(store: &Arc<InMemoryStore>) -> AliasManager {
        AliasManager::new(
            store.clone(),
            RetryPolicy {
                delay: Duration::from_millis(1),
            },
        )
    }

    #[tokio::test]
    async fn test_put_waits_for_health() {
        let store = Arc::new(InMemoryStore::new());
        store.seed_index("emails_20240101000000", Vec::new());
        let aliases = manager(&store);
        aliases.put("emails", "emails_20240101000000").await.unwrap();
        assert_eq!(store.bound_indexes("emails"), vec!["emails_20240101000000"]);
        assert_eq!(store.counters().health_waits, 1);
    }

    #[tokio::test]
    async fn test_put_is_idempotent() {
        let store = Arc::new(InMemoryStore::new());
        store.seed_index("emails_20240101000000", Vec::new());
        let aliases = manager(&store);
        aliases.put("emails", "emails_20240101000000").await.unwrap();
        aliases.put("emails", "emails_20240101000000").await.unwrap();
        assert_eq!(store.bound_indexes("emails").len(), 1);
    }

    #[tokio::test]
    async fn test_delete_missing_is_success() {
        let store = Arc::new(InMemoryStore::new());
        let aliases = manager(&store);
        aliases.delete("emails", "*").await.unwrap();
        assert_eq!(store.counters().alias_deletes, 1);
        assert_eq!(store.counters().health_waits, 0);
    }

    #[tokio::test]
    async fn test_delete_existing_then_rerun() {
        let store = Arc::new(InMemoryStore::new());
        store.seed_index("emails_20240101000000", Vec::new());
        store.seed_alias("emails", "emails_20240101000000");
        let aliases = manager(&store);
        aliases.delete("emails", "*").await.unwrap();
        assert!(store.bound_indexes("emails").is_empty());
        aliases.delete("emails", "*").await.unwrap();
    }

    #[tokio::test]
    async fn test_put_retries_transport_failures() {
        let store = Arc::new(InMemoryStore::new());
        store.seed_index("emails_20240101000000", Vec::new());
        store.inject_error("put_alias", StoreError::Transport("broken pipe".into()));
        let aliases = manager(&store);
        aliases.put("emails", "emails_20240101000000").await.unwrap();
        assert_eq!(store.bound_indexes("emails"), vec!["emails_20240101000000"]);
        assert_eq!(store.counters().alias_puts, 2);
    }
}
