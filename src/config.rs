//! Migration run configuration.

#![forbid(unsafe_code)]

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::pool::DEFAULT_WORKER_CEILING;
use crate::retry::RetryPolicy;

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read config file {path}: {reason}")]
    Io {
        /// Path that failed to load.
        path: String,
        /// Underlying I/O error.
        reason: String,
    },
    /// The config file is not valid TOML for this schema.
    #[error("failed to parse config: {0}")]
    Parse(String),
    /// The configuration is structurally valid but unusable.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Tunables for one migration run.
///
/// The defaults carry the production constants: page size 100, five-minute
/// cursor keep-alive, 25 concurrent workers, 10-second retry backoff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationConfig {
    /// Alias application queries target; also the base of every physical
    /// index name.
    pub canonical_alias: String,
    /// Alias readers fall back to while the canonical set is rebuilt.
    pub old_alias: String,
    /// Documents per paged read.
    pub page_size: usize,
    /// Server-side lifetime of a paged-read cursor.
    pub cursor_keep_alive: Duration,
    /// Ceiling on concurrently running copy workers.
    pub max_workers: usize,
    /// Fixed delay between retries of a transient failure.
    pub retry_delay: Duration,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            canonical_alias: "search".to_string(),
            old_alias: "old_search".to_string(),
            page_size: 100,
            cursor_keep_alive: Duration::from_secs(300),
            max_workers: DEFAULT_WORKER_CEILING,
            retry_delay: Duration::from_secs(10),
        }
    }
}

impl MigrationConfig {
    /// Build a config for `alias`, deriving the old-alias name from it.
    pub fn for_alias(alias: impl Into<String>) -> Self {
        let canonical = alias.into();
        Self {
            old_alias: format!("old_{canonical}"),
            canonical_alias: canonical,
            ..Self::default()
        }
    }

    /// Load and validate a TOML config file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::parse_str(&contents)
    }

    /// Parse and validate a TOML config string.
    pub fn parse_str(contents: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(contents).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for unusable values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.canonical_alias.is_empty() {
            return Err(ConfigError::Invalid("canonical alias is empty".into()));
        }
        if self.old_alias.is_empty() {
            return Err(ConfigError::Invalid("old alias is empty".into()));
        }
        if self.old_alias == self.canonical_alias {
            return Err(ConfigError::Invalid(
                "old alias must differ from the canonical alias".into(),
            ));
        }
        if self.page_size == 0 {
            return Err(ConfigError::Invalid("page size cannot be 0".into()));
        }
        if self.max_workers == 0 {
            return Err(ConfigError::Invalid("worker ceiling cannot be 0".into()));
        }
        Ok(())
    }

    /// The retry policy all remote calls of the run use.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            delay: self.retry_delay,
        }
    }
}
