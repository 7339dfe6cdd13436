//! # shardshift
//!
//! Zero-downtime migration of a search index's physical shards.
//!
//! A dataset served through a **canonical alias** is backed by one or more
//! timestamped physical indexes. Shardshift rebuilds that set in place:
//! it redirects readers to an "old" alias, creates a writer index for
//! concurrent writes, copies every source index into a freshly-named
//! destination under a bounded worker pool, and finally swaps the canonical
//! alias onto the new set — readers never observe an empty dataset, and
//! writes continue throughout.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use shardshift::{MigrationConfig, MigrationOrchestrator};
//!
//! let store: Arc<dyn shardshift::IndexStore> = connect_store()?;
//! let config = MigrationConfig::for_alias("emails");
//! let orchestrator = MigrationOrchestrator::new(store, config);
//! let report = orchestrator.run().await?;
//! println!("copied {} documents", report.documents_copied);
//! ```
//!
//! The remote store is consumed through the [`store::IndexStore`] trait;
//! this crate owns no wire protocol. Failures are terminal — there is no
//! automatic rollback — but every delete and bind is idempotent, so an
//! operator rerun after a failed run is safe.

#![forbid(unsafe_code)]

pub mod alias;
pub mod config;
pub mod copy;
pub mod job;
pub mod naming;
pub mod orchestrator;
pub mod pool;
pub mod retry;
pub mod store;

pub use alias::AliasManager;
pub use config::{ConfigError, MigrationConfig};
pub use copy::{CopyStats, CopyWorker};
pub use naming::{resolve_destination, IndexName, NamingError};
pub use orchestrator::{
    MigrateError, MigrationOrchestrator, MigrationPhase, MigrationPlan, MigrationReport,
};
pub use pool::{
    PoolError, PoolStats, WorkerHandle, WorkerPool, WorkerState, DEFAULT_WORKER_CEILING,
};
pub use retry::{RetryExecutor, RetryPolicy};
pub use store::{Document, IndexStore, PageCursor, RelationalCheckpoint, StoreError};
