//! Error types for ingestion
//!
//! - [`BackendError`]: failures reported by a [`crate::StorageBackend`]
//! - [`ItemError`]: why a single entity of a batch was not stored
//! - [`SessionError`]: failures of a whole session operation
//! - [`ConfigError`]: configuration loading and validation

use crate::report::BatchReport;
use crate::session::SessionState;
use cdx_model::{ContentIdError, EntityKind, Uid};
use cdx_registry::{RegistryError, Retryable};
use std::path::PathBuf;

/// Storage backend errors
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// Backend temporarily unreachable
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// Request exceeded its deadline
    #[error("backend request timed out")]
    Timeout,

    /// I/O failure
    #[error("backend i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Encoding or decoding failure
    #[error("backend serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Entity refused by the backend
    #[error("backend rejected {uid}: {reason}")]
    Rejected {
        /// Entity uid
        uid: Uid,
        /// Reason given
        reason: String,
    },

    /// Index was never registered with `add_repository`
    #[error("unknown index: {0}")]
    UnknownIndex(String),

    /// Index already finalized
    #[error("index {0} is sealed")]
    Sealed(String),

    /// Index name not usable by this backend
    #[error("invalid index name: {0:?}")]
    InvalidIndexName(String),

    /// Operation not implemented by this backend
    #[error("backend does not support {0}")]
    Unsupported(&'static str),
}

impl Retryable for BackendError {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Timeout | Self::Io(_))
    }
}

/// Why one entity of a batch failed
#[derive(Debug, thiserror::Error)]
pub enum ItemError {
    /// Upload kept failing
    #[error("upload failed after {attempts} attempts: {source}")]
    Upload {
        /// Attempts made
        attempts: u32,
        /// Last backend error
        #[source]
        source: BackendError,
    },

    /// Payload could not be hashed
    #[error("content id: {0}")]
    Content(#[from] ContentIdError),
}

/// Failed entity with its identity
#[derive(Debug, thiserror::Error)]
#[error("{kind:?} {uid}: {error}")]
pub struct ItemFailure {
    /// Entity uid
    pub uid: Uid,
    /// Entity kind
    pub kind: EntityKind,
    /// Cause
    #[source]
    pub error: ItemError,
}

/// Session errors
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Operation not valid in the current state
    #[error("{operation} is not valid in state {state}")]
    InvalidState {
        /// Operation attempted
        operation: &'static str,
        /// State observed
        state: SessionState,
    },

    /// Operation raced with finalize
    #[error("ordering violation in {operation}: {reason}")]
    OrderingViolation {
        /// Operation attempted
        operation: &'static str,
        /// What went wrong
        reason: String,
    },

    /// Session already finalized
    #[error("{operation} after session was finalized")]
    Finalized {
        /// Operation attempted
        operation: &'static str,
    },

    /// Session stopped after an unrecoverable error
    #[error("session halted: {reason}")]
    Halted {
        /// Cause of the halt
        reason: String,
    },

    /// Stable id resolution failed
    #[error("registry: {0}")]
    Registry(#[from] RegistryError),

    /// Session-level backend call failed
    #[error("backend {operation} failed after {attempts} attempts: {source}")]
    Backend {
        /// Backend operation
        operation: &'static str,
        /// Attempts made
        attempts: u32,
        /// Last backend error
        #[source]
        source: BackendError,
    },

    /// Some entities of a batch failed
    #[error("{failed} of {total} entities failed in {operation}", failed = .report.failed(), total = .report.len(), operation = .report.operation)]
    PartialBatchFailure {
        /// Full per-entity report
        report: BatchReport,
    },

    /// Scope entity could not be hashed
    #[error("content id: {0}")]
    Content(#[from] ContentIdError),
}

impl SessionError {
    /// Check if retrying the operation may succeed
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Registry(e) => e.is_retryable(),
            Self::Backend { source, .. } => source.is_retryable(),
            Self::PartialBatchFailure { .. } => true,
            _ => false,
        }
    }

    /// Check if the session can no longer make progress
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Halted { .. } => true,
            Self::Registry(e) => e.is_fatal(),
            _ => false,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("cannot read {path}: {source}")]
    Io {
        /// File path
        path: PathBuf,
        /// I/O error
        #[source]
        source: std::io::Error,
    },

    /// Invalid TOML
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config could not be rendered
    #[error("cannot render config: {0}")]
    Render(#[from] toml::ser::Error),

    /// Value out of range
    #[error("invalid value for {field}: {reason}")]
    Invalid {
        /// Offending field
        field: &'static str,
        /// What is wrong with it
        reason: String,
    },
}
