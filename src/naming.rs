//! Timestamped index names and collision-free destination resolution.
//!
//! Physical indexes are named `<base>_<YYYYMMDDHHMMSS>`. A migration derives
//! each destination name from its source by advancing the embedded timestamp
//! one second at a time until a free name is found, never leaving the
//! source's calendar day.

#![forbid(unsafe_code)]

use std::collections::HashSet;
use std::fmt;

use chrono::{NaiveDate, NaiveDateTime, TimeDelta, Timelike, Utc};

use crate::retry::RetryExecutor;
use crate::store::StoreError;

/// Suffix format of the timestamp embedded in an index name.
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// Errors produced by name parsing and resolution.
#[derive(Debug, Clone, thiserror::Error)]
pub enum NamingError {
    /// The name has no parseable trailing timestamp.
    #[error("index name {0:?} has no parseable trailing timestamp")]
    Unparseable(String),
    /// Every candidate second in the source's calendar day is taken.
    #[error("out of timestamps in the day of {day} for index base {base:?}")]
    NamespaceExhausted {
        /// Base of the name being resolved.
        base: String,
        /// The calendar day that ran out of free seconds.
        day: NaiveDate,
    },
    /// A remote existence check failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// An index name with its embedded creation timestamp (second resolution).
///
/// Immutable once the index exists remotely; advancing produces a new value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IndexName {
    base: String,
    timestamp: NaiveDateTime,
}

impl IndexName {
    /// Build a name from a base and a timestamp. Sub-second precision is
    /// dropped — the rendered suffix cannot carry it.
    pub fn new(base: impl Into<String>, timestamp: NaiveDateTime) -> Self {
        Self {
            base: base.into(),
            timestamp: timestamp.with_nanosecond(0).unwrap_or(timestamp),
        }
    }

    /// Build a name stamped with the current UTC wall clock.
    pub fn with_current_timestamp(base: impl Into<String>) -> Self {
        Self::new(base, Utc::now().naive_utc())
    }

    /// Parse a `<base>_<YYYYMMDDHHMMSS>` name.
    pub fn parse(name: &str) -> Result<Self, NamingError> {
        let Some((base, suffix)) = name.rsplit_once('_') else {
            return Err(NamingError::Unparseable(name.to_string()));
        };
        let timestamp = NaiveDateTime::parse_from_str(suffix, TIMESTAMP_FORMAT)
            .map_err(|_| NamingError::Unparseable(name.to_string()))?;
        if base.is_empty() {
            return Err(NamingError::Unparseable(name.to_string()));
        }
        Ok(Self {
            base: base.to_string(),
            timestamp,
        })
    }

    /// The name's base, without the timestamp suffix.
    pub fn base(&self) -> &str {
        &self.base
    }

    /// The embedded timestamp.
    pub fn timestamp(&self) -> NaiveDateTime {
        self.timestamp
    }
}

impl fmt::Display for IndexName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.base, self.timestamp.format(TIMESTAMP_FORMAT))
    }
}

/// Resolve a free destination name starting from `seed`.
///
/// Checks remote existence of each candidate (through the retry layer) and
/// skips names already claimed in `reserved` — destinations handed out
/// earlier in the same run that do not exist remotely yet. The candidate
/// timestamp advances by one second per taken name; crossing into the next
/// calendar day fails with [`NamingError::NamespaceExhausted`].
///
/// For a copy destination, `seed` is the source index (which exists, so the
/// result strictly exceeds its timestamp); for the writer index, `seed` is
/// the current wall clock and may itself be returned.
///
/// Not race-free against concurrent external creators; the orchestrator is
/// assumed to be the only writer of this namespace during a run.
pub async fn resolve_destination(
    retry: &RetryExecutor,
    seed: &IndexName,
    reserved: &HashSet<String>,
) -> Result<IndexName, NamingError> {
    let day = seed.timestamp.date();
    let mut candidate = seed.clone();
    loop {
        let name = candidate.to_string();
        let exists = retry
            .execute("index_exists", || {
                let store = retry.store().clone();
                let name = name.clone();
                async move { store.index_exists(&name).await }
            })
            .await?;
        if !exists && !reserved.contains(&name) {
            return Ok(candidate);
        }
        let next = candidate.timestamp + TimeDelta::seconds(1);
        if next.date() != day {
            return Err(NamingError::NamespaceExhausted {
                base: seed.base.clone(),
                day,
            });
        }
        candidate = IndexName::new(candidate.base, next);
    }
}
