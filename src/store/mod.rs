//! Remote index-store contract.
//!
//! Everything shardshift needs from the search/alias store, expressed as an
//! object-safe async trait. The wire protocol (HTTP, RESP, …) belongs to the
//! implementing client, not to this crate — the orchestration layer only
//! consumes the logical operations below.

#![forbid(unsafe_code)]

pub mod memory;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use memory::InMemoryStore;

/// A single indexed document, as moved by paged read / batched write.
///
/// The payload and type tag are carried verbatim from source to destination;
/// shardshift never inspects them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Document identifier within its index.
    pub id: String,
    /// Store-level type tag.
    pub doc_type: String,
    /// Raw document payload.
    pub source: serde_json::Value,
}

impl Document {
    /// Create a document from its parts.
    pub fn new(
        id: impl Into<String>,
        doc_type: impl Into<String>,
        source: serde_json::Value,
    ) -> Self {
        Self {
            id: id.into(),
            doc_type: doc_type.into(),
            source,
        }
    }
}

/// Opaque handle for an open paged-read cursor, owned by the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PageCursor(pub String);

impl fmt::Display for PageCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Error vocabulary shared by all remote-store operations.
///
/// The variants matter more than the messages: `Transport` is the only class
/// the retry layer recovers, and `NotFound` is the only class the idempotent
/// delete call sites map to success. Everything else is fail-fast.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// The transport layer failed; the operation may succeed on retry.
    #[error("transport error: {0}")]
    Transport(String),
    /// The named index or alias does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// The store refused the operation (bad request, conflict, …).
    #[error("rejected by store: {0}")]
    Rejected(String),
    /// The paged-read cursor is unknown or has expired.
    #[error("invalid cursor: {0}")]
    BadCursor(String),
}

/// Result alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Client contract for the remote search/alias store.
///
/// All mutations are idempotent from the caller's perspective except
/// `create_index`, which is rejected for an existing name — the naming
/// resolver guarantees callers never ask for one. Deletes report a missing
/// target as [`StoreError::NotFound`] rather than swallowing it; mapping
/// that to a no-op is a call-site decision.
#[async_trait]
pub trait IndexStore: Send + Sync {
    /// Create a new, empty physical index.
    async fn create_index(&self, name: &str) -> Result<()>;

    /// Delete a physical index along with its alias bindings.
    async fn delete_index(&self, name: &str) -> Result<()>;

    /// Whether an index with this exact name exists.
    async fn index_exists(&self, name: &str) -> Result<bool>;

    /// Bind `alias` to `index`. Binding an already-bound pair is a no-op.
    async fn put_alias(&self, alias: &str, index: &str) -> Result<()>;

    /// Unbind `alias` from every index matching `index_pattern` (`"*"`
    /// removes all bindings of the alias).
    async fn delete_alias(&self, alias: &str, index_pattern: &str) -> Result<()>;

    /// List the indexes currently bound to `alias`, in store order. An
    /// unknown alias resolves to the empty set.
    async fn indexes_bound(&self, alias: &str) -> Result<Vec<String>>;

    /// Write a batch of documents into `index`, preserving id, payload, and
    /// type tag. Documents with an existing id replace the stored copy.
    async fn bulk_write(&self, index: &str, documents: &[Document]) -> Result<()>;

    /// Open a paged-read cursor over `index` returning at most `page_size`
    /// documents per fetch, kept alive server-side for `keep_alive`.
    async fn open_cursor(
        &self,
        index: &str,
        page_size: usize,
        keep_alive: Duration,
    ) -> Result<PageCursor>;

    /// Fetch the next page for `cursor`. An empty page signals the end of
    /// the traversal.
    async fn fetch_page(&self, cursor: &PageCursor) -> Result<Vec<Document>>;

    /// Tear down and re-establish the client's connection pool.
    async fn reset_connections(&self) -> Result<()>;

    /// Block until the store reports a stable health status. Used as a
    /// synchronization barrier after every alias/index mutation.
    async fn wait_for_health(&self) -> Result<()>;
}

/// Relational-database collaborator.
///
/// The harness may hold a relational connection that goes stale across
/// worker isolation boundaries; the orchestrator invokes this checkpoint
/// after each of them. Runs without a relational collaborator skip it.
#[async_trait]
pub trait RelationalCheckpoint: Send + Sync {
    /// Re-establish the relational connection.
    async fn reconnect(&self) -> Result<()>;
}
