//! Registry and store configuration

use crate::error::StoreError;
use crate::retry::RetryPolicy;
use crate::store::{DurableStore, FileStore, MemoryStore};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

/// What a caller gets when another caller's allocation is still in flight
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingPolicy {
    /// Block until the mapping is committed
    #[default]
    Wait,
    /// Return the provisional value immediately
    Provisional,
}

/// Registry configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Ids reserved from the store per refill
    pub id_block_size: u32,
    /// Committed mappings kept in memory
    pub committed_cache_capacity: u64,
    /// Behavior when a uid is already being allocated
    pub pending_policy: PendingPolicy,
    /// Retry policy for store round trips
    pub retry: RetryPolicy,
}

impl RegistryConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With id block size
    #[inline]
    #[must_use]
    pub fn with_id_block_size(mut self, size: u32) -> Self {
        self.id_block_size = size.max(1);
        self
    }

    /// With committed cache capacity
    #[inline]
    #[must_use]
    pub fn with_committed_cache_capacity(mut self, capacity: u64) -> Self {
        self.committed_cache_capacity = capacity;
        self
    }

    /// With pending policy
    #[inline]
    #[must_use]
    pub fn with_pending_policy(mut self, policy: PendingPolicy) -> Self {
        self.pending_policy = policy;
        self
    }

    /// With retry policy
    #[inline]
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            id_block_size: 20,
            committed_cache_capacity: 100_000,
            pending_policy: PendingPolicy::Wait,
            retry: RetryPolicy::default(),
        }
    }
}

/// Durable store selection
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StoreConfig {
    /// Process-local, lost on exit
    #[default]
    Memory,
    /// JSON-lines log at `path`
    File {
        /// Log location
        path: PathBuf,
    },
}

impl StoreConfig {
    /// Open the configured store
    ///
    /// # Errors
    /// Propagates [`FileStore::open`] failures
    pub async fn open(&self) -> Result<Arc<dyn DurableStore>, StoreError> {
        Ok(match self {
            Self::Memory => Arc::new(MemoryStore::new()),
            Self::File { path } => Arc::new(FileStore::open(path).await?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_registry_conventions() {
        let config = RegistryConfig::new();
        assert_eq!(config.id_block_size, 20);
        assert_eq!(config.pending_policy, PendingPolicy::Wait);
        assert_eq!(config.retry.max_attempts, 5);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: RegistryConfig =
            serde_json::from_str(r#"{"pending_policy":"provisional","retry":{"max_attempts":2}}"#)
                .unwrap();
        assert_eq!(config.pending_policy, PendingPolicy::Provisional);
        assert_eq!(config.retry.max_attempts, 2);
        assert_eq!(config.retry.initial_backoff_ms, 50);
        assert_eq!(config.id_block_size, 20);
    }

    #[test]
    fn store_config_is_tagged() {
        let config: StoreConfig =
            serde_json::from_str(r#"{"kind":"file","path":"/var/lib/cdx/ids.jsonl"}"#).unwrap();
        assert_eq!(
            config,
            StoreConfig::File {
                path: PathBuf::from("/var/lib/cdx/ids.jsonl")
            }
        );
    }
}
