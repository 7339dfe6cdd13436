//! In-memory [`IndexStore`] backend.
//!
//! A complete, process-local implementation of the store contract over plain
//! maps. The integration suite drives full migration runs against it; error
//! injection and per-operation counters let tests exercise the retry and
//! fail-fast paths without a live cluster.

#![forbid(unsafe_code)]

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use uuid::Uuid;

use super::{Document, IndexStore, PageCursor, RelationalCheckpoint, Result, StoreError};

/// Point-in-time view of per-operation call counts.
///
/// Counters increment per attempt, before error injection is applied, so a
/// retried operation is visible as multiple calls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreCounters {
    /// `create_index` calls.
    pub creates: u64,
    /// `delete_index` calls.
    pub deletes: u64,
    /// `index_exists` calls.
    pub exists_checks: u64,
    /// `put_alias` calls.
    pub alias_puts: u64,
    /// `delete_alias` calls.
    pub alias_deletes: u64,
    /// `bulk_write` calls.
    pub bulk_writes: u64,
    /// `open_cursor` calls.
    pub cursors_opened: u64,
    /// `fetch_page` calls.
    pub pages_fetched: u64,
    /// `reset_connections` calls.
    pub connection_resets: u64,
    /// `wait_for_health` calls.
    pub health_waits: u64,
}

struct CursorState {
    snapshot: Vec<Document>,
    page_size: usize,
    offset: usize,
}

#[derive(Default)]
struct StoreState {
    indexes: BTreeMap<String, Vec<Document>>,
    aliases: BTreeMap<String, BTreeSet<String>>,
    cursors: HashMap<String, CursorState>,
    injected: HashMap<&'static str, VecDeque<StoreError>>,
    counters: StoreCounters,
    fetched_page_sizes: Vec<usize>,
}

/// In-memory store with error injection and call counters.
#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<StoreState>,
    fetch_latency: Mutex<Option<Duration>>,
}

impl InMemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an index populated with `documents`, replacing any previous
    /// index of the same name.
    pub fn seed_index(&self, name: &str, documents: Vec<Document>) {
        let mut state = self.state.lock();
        state.indexes.insert(name.to_string(), documents);
    }

    /// Bind `alias` to `index` without going through the async API.
    pub fn seed_alias(&self, alias: &str, index: &str) {
        let mut state = self.state.lock();
        state
            .aliases
            .entry(alias.to_string())
            .or_default()
            .insert(index.to_string());
    }

    /// Queue `error` to be returned by the next call to `op` (a method name
    /// such as `"bulk_write"`). Multiple injections for one operation are
    /// consumed in FIFO order.
    pub fn inject_error(&self, op: &'static str, error: StoreError) {
        let mut state = self.state.lock();
        state.injected.entry(op).or_default().push_back(error);
    }

    /// Delay every `fetch_page` call by `latency`, keeping workers
    /// observable in flight.
    pub fn set_fetch_latency(&self, latency: Duration) {
        *self.fetch_latency.lock() = Some(latency);
    }

    /// Documents currently stored in `index`, if it exists.
    pub fn documents(&self, index: &str) -> Option<Vec<Document>> {
        self.state.lock().indexes.get(index).cloned()
    }

    /// Indexes currently bound to `alias`, sorted.
    pub fn bound_indexes(&self, alias: &str) -> Vec<String> {
        self.state
            .lock()
            .aliases
            .get(alias)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Names of all existing indexes, sorted.
    pub fn index_names(&self) -> Vec<String> {
        self.state.lock().indexes.keys().cloned().collect()
    }

    /// Snapshot of the per-operation call counters.
    pub fn counters(&self) -> StoreCounters {
        self.state.lock().counters
    }

    /// Sizes of every fetched page, in fetch order (terminating empty
    /// fetches included).
    pub fn fetched_page_sizes(&self) -> Vec<usize> {
        self.state.lock().fetched_page_sizes.clone()
    }

    fn take_injected(&self, op: &'static str) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(queue) = state.injected.get_mut(op) {
            if let Some(error) = queue.pop_front() {
                return Err(error);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl IndexStore for InMemoryStore {
    async fn create_index(&self, name: &str) -> Result<()> {
        self.state.lock().counters.creates += 1;
        self.take_injected("create_index")?;
        let mut state = self.state.lock();
        if state.indexes.contains_key(name) {
            return Err(StoreError::Rejected(format!("index {name} already exists")));
        }
        state.indexes.insert(name.to_string(), Vec::new());
        Ok(())
    }

    async fn delete_index(&self, name: &str) -> Result<()> {
        self.state.lock().counters.deletes += 1;
        self.take_injected("delete_index")?;
        let mut state = self.state.lock();
        if state.indexes.remove(name).is_none() {
            return Err(StoreError::NotFound(format!("index {name}")));
        }
        for bindings in state.aliases.values_mut() {
            bindings.remove(name);
        }
        state.aliases.retain(|_, bindings| !bindings.is_empty());
        Ok(())
    }

    async fn index_exists(&self, name: &str) -> Result<bool> {
        self.state.lock().counters.exists_checks += 1;
        self.take_injected("index_exists")?;
        Ok(self.state.lock().indexes.contains_key(name))
    }

    async fn put_alias(&self, alias: &str, index: &str) -> Result<()> {
        self.state.lock().counters.alias_puts += 1;
        self.take_injected("put_alias")?;
        let mut state = self.state.lock();
        if !state.indexes.contains_key(index) {
            return Err(StoreError::NotFound(format!("index {index}")));
        }
        state
            .aliases
            .entry(alias.to_string())
            .or_default()
            .insert(index.to_string());
        Ok(())
    }

    async fn delete_alias(&self, alias: &str, index_pattern: &str) -> Result<()> {
        self.state.lock().counters.alias_deletes += 1;
        self.take_injected("delete_alias")?;
        let mut state = self.state.lock();
        if index_pattern == "*" {
            return match state.aliases.remove(alias) {
                Some(_) => Ok(()),
                None => Err(StoreError::NotFound(format!("alias {alias}"))),
            };
        }
        let Some(bindings) = state.aliases.get_mut(alias) else {
            return Err(StoreError::NotFound(format!("alias {alias}")));
        };
        if !bindings.remove(index_pattern) {
            return Err(StoreError::NotFound(format!(
                "alias {alias} on index {index_pattern}"
            )));
        }
        if bindings.is_empty() {
            state.aliases.remove(alias);
        }
        Ok(())
    }

    async fn indexes_bound(&self, alias: &str) -> Result<Vec<String>> {
        self.take_injected("indexes_bound")?;
        Ok(self.bound_indexes(alias))
    }

    async fn bulk_write(&self, index: &str, documents: &[Document]) -> Result<()> {
        self.state.lock().counters.bulk_writes += 1;
        self.take_injected("bulk_write")?;
        let mut state = self.state.lock();
        let Some(stored) = state.indexes.get_mut(index) else {
            return Err(StoreError::NotFound(format!("index {index}")));
        };
        for doc in documents {
            stored.retain(|existing| existing.id != doc.id);
            stored.push(doc.clone());
        }
        Ok(())
    }

    async fn open_cursor(
        &self,
        index: &str,
        page_size: usize,
        _keep_alive: Duration,
    ) -> Result<PageCursor> {
        self.state.lock().counters.cursors_opened += 1;
        self.take_injected("open_cursor")?;
        let mut state = self.state.lock();
        let Some(snapshot) = state.indexes.get(index).cloned() else {
            return Err(StoreError::NotFound(format!("index {index}")));
        };
        let id = Uuid::new_v4().to_string();
        state.cursors.insert(
            id.clone(),
            CursorState {
                snapshot,
                page_size,
                offset: 0,
            },
        );
        Ok(PageCursor(id))
    }

    async fn fetch_page(&self, cursor: &PageCursor) -> Result<Vec<Document>> {
        let latency = *self.fetch_latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        self.state.lock().counters.pages_fetched += 1;
        self.take_injected("fetch_page")?;
        let mut state = self.state.lock();
        let Some(cursor_state) = state.cursors.get_mut(&cursor.0) else {
            return Err(StoreError::BadCursor(cursor.0.clone()));
        };
        let start = cursor_state.offset;
        let end = (start + cursor_state.page_size).min(cursor_state.snapshot.len());
        let page: Vec<Document> = cursor_state.snapshot[start..end].to_vec();
        cursor_state.offset = end;
        state.fetched_page_sizes.push(page.len());
        Ok(page)
    }

    async fn reset_connections(&self) -> Result<()> {
        self.state.lock().counters.connection_resets += 1;
        self.take_injected("reset_connections")?;
        Ok(())
    }

    async fn wait_for_health(&self) -> Result<()> {
        self.state.lock().counters.health_waits += 1;
        self.take_injected("wait_for_health")?;
        Ok(())
    }
}

/// Relational checkpoint that only counts its invocations.
#[derive(Debug, Default)]
pub struct CountingCheckpoint {
    reconnects: Mutex<u64>,
}

impl CountingCheckpoint {
    /// Create a checkpoint with a zeroed counter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `reconnect` calls so far.
    pub fn reconnects(&self) -> u64 {
        *self.reconnects.lock()
    }
}

#[async_trait]
impl RelationalCheckpoint for CountingCheckpoint {
    async fn reconnect(&self) -> Result<()> {
        *self.reconnects.lock() += 1;
        Ok(())
    }
}
