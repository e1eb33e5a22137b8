//! Session and workspace configuration

use crate::backend::{DirectoryBackend, MemoryBackend, StorageBackend};
use crate::error::ConfigError;
use cdx_registry::{RegistryConfig, RetryPolicy, StoreConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Ingestion session configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Target index; derived from repository name and time when unset
    pub index_name: Option<String>,
    /// Uploads in flight per Add
    pub upload_concurrency: usize,
    /// Content ids remembered for upload elision
    pub uploaded_cache_capacity: u64,
    /// Longest finalize waits for in-flight Adds, in milliseconds
    pub drain_timeout_ms: Option<u64>,
    /// Retry policy for backend calls
    pub retry: RetryPolicy,
}

impl SessionConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With fixed target index
    #[inline]
    #[must_use]
    pub fn with_index_name(mut self, index: impl Into<String>) -> Self {
        self.index_name = Some(index.into());
        self
    }

    /// With upload concurrency
    #[inline]
    #[must_use]
    pub fn with_upload_concurrency(mut self, concurrency: usize) -> Self {
        self.upload_concurrency = concurrency.max(1);
        self
    }

    /// With drain timeout
    #[inline]
    #[must_use]
    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    /// With retry policy
    #[inline]
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Drain timeout as a duration
    #[inline]
    #[must_use]
    pub fn drain_timeout(&self) -> Option<Duration> {
        self.drain_timeout_ms.map(Duration::from_millis)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            index_name: None,
            upload_concurrency: 8,
            uploaded_cache_capacity: 100_000,
            drain_timeout_ms: None,
            retry: RetryPolicy::default(),
        }
    }
}

/// Storage backend selection
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackendConfig {
    /// Keep entities in memory
    #[default]
    Memory,
    /// One JSON file per entity under `root`
    Directory {
        /// Root directory
        root: PathBuf,
    },
}

impl BackendConfig {
    /// Build the configured backend
    #[must_use]
    pub fn open(&self) -> Arc<dyn StorageBackend> {
        match self {
            Self::Memory => Arc::new(MemoryBackend::new()),
            Self::Directory { root } => Arc::new(DirectoryBackend::new(root)),
        }
    }
}

/// Complete configuration of an ingestion deployment
///
/// ```toml
/// [registry]
/// id_block_size = 20
/// pending_policy = "wait"
///
/// [registry.retry]
/// max_attempts = 5
///
/// [session]
/// upload_concurrency = 8
///
/// [store]
/// kind = "file"
/// path = "/var/lib/cdx/ids.jsonl"
///
/// [backend]
/// kind = "directory"
/// root = "/var/lib/cdx/index"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Stable id registry
    pub registry: RegistryConfig,
    /// Ingestion sessions
    pub session: SessionConfig,
    /// Durable id store
    pub store: StoreConfig,
    /// Storage backend
    pub backend: BackendConfig,
}

impl IngestConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With registry configuration
    #[inline]
    #[must_use]
    pub fn with_registry(mut self, registry: RegistryConfig) -> Self {
        self.registry = registry;
        self
    }

    /// With session configuration
    #[inline]
    #[must_use]
    pub fn with_session(mut self, session: SessionConfig) -> Self {
        self.session = session;
        self
    }

    /// With store selection
    #[inline]
    #[must_use]
    pub fn with_store(mut self, store: StoreConfig) -> Self {
        self.store = store;
        self
    }

    /// With backend selection
    #[inline]
    #[must_use]
    pub fn with_backend(mut self, backend: BackendConfig) -> Self {
        self.backend = backend;
        self
    }

    /// Parse and validate TOML
    ///
    /// # Errors
    /// Invalid TOML or out-of-range values
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file
    ///
    /// # Errors
    /// Unreadable file, invalid TOML or out-of-range values
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&source)
    }

    /// Render as TOML
    ///
    /// # Errors
    /// Values TOML cannot represent
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Check value ranges
    ///
    /// # Errors
    /// [`ConfigError::Invalid`] naming the first bad field
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.registry.id_block_size == 0 {
            return Err(invalid("registry.id_block_size", "must be at least 1"));
        }
        if self.registry.retry.max_attempts == 0 {
            return Err(invalid("registry.retry.max_attempts", "must be at least 1"));
        }
        if self.session.retry.max_attempts == 0 {
            return Err(invalid("session.retry.max_attempts", "must be at least 1"));
        }
        if self.session.upload_concurrency == 0 {
            return Err(invalid("session.upload_concurrency", "must be at least 1"));
        }
        if self.session.index_name.as_deref() == Some("") {
            return Err(invalid("session.index_name", "must not be empty"));
        }
        Ok(())
    }
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.to_string(),
    }
}
