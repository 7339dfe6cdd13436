//! Unbounded retry with fixed backoff and connection reset.
//!
//! Every remote call in the crate goes through [`RetryExecutor::execute`];
//! nothing talks to the store directly. Transient transport failures are
//! retried forever — the operator kills the job if the store never comes
//! back — while every other error class propagates to the caller at once.

#![forbid(unsafe_code)]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::store::{IndexStore, StoreError};

/// Retry behavior applied uniformly to all remote calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Fixed delay between attempts. The attempt count is unbounded.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(10),
        }
    }
}

/// Runs remote operations under a [`RetryPolicy`], resetting the store's
/// connection pool between attempts.
#[derive(Clone)]
pub struct RetryExecutor {
    store: Arc<dyn IndexStore>,
    policy: RetryPolicy,
}

impl RetryExecutor {
    /// Create an executor over `store` with the given policy.
    pub fn new(store: Arc<dyn IndexStore>, policy: RetryPolicy) -> Self {
        Self { store, policy }
    }

    /// The store this executor operates on.
    pub fn store(&self) -> &Arc<dyn IndexStore> {
        &self.store
    }

    /// Run `op` until it returns anything other than
    /// [`StoreError::Transport`].
    ///
    /// On a transport failure: log a warning, sleep the fixed delay, reset
    /// the connection pool, and try again — an iterative loop with no
    /// attempt cap. A failure of the reset itself is logged and absorbed;
    /// the next attempt re-enters the same path.
    pub async fn execute<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T, StoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let mut attempt: u64 = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(StoreError::Transport(reason)) => {
                    warn!(
                        op = label,
                        attempt,
                        %reason,
                        delay_secs = self.policy.delay.as_secs_f64(),
                        "transient transport failure, retrying"
                    );
                    tokio::time::sleep(self.policy.delay).await;
                    if let Err(reset_err) = self.store.reset_connections().await {
                        warn!(op = label, error = %reset_err, "connection reset failed");
                    }
                    attempt += 1;
                }
                Err(other) => return Err(other),
            }
        }
    }
}
