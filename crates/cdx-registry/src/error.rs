//! Error types for the stable id registry
//!
//! - [`StoreError`]: failures reported by a [`crate::DurableStore`]
//! - [`RegistryError`]: what registry callers see after internal retries

use cdx_model::{StableId, Uid};

/// Classification used by [`crate::RetryPolicy`]
pub trait Retryable {
    /// Whether another attempt may succeed
    fn is_retryable(&self) -> bool;
}

/// Durable store errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Store temporarily unreachable
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Round trip exceeded its deadline
    #[error("store operation timed out")]
    Timeout,

    /// I/O failure
    #[error("store i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Persisted data could not be decoded
    #[error("store corrupt at record {record}: {reason}")]
    Corrupt {
        /// Record (line) number
        record: usize,
        /// What was wrong
        reason: String,
    },

    /// Encoding failure
    #[error("store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// No positive `i32` values left to reserve
    #[error("stable id space exhausted")]
    IdSpaceExhausted,
}

impl Retryable for StoreError {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Timeout | Self::Io(_))
    }
}

/// Registry errors
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// Uid has no mapping yet
    #[error("no stable id mapping for {uid}")]
    NotFound {
        /// The uid
        uid: Uid,
    },

    /// Durable write (or read) kept failing after all retries
    #[error("durability failure during {operation} after {attempts} attempts: {source}")]
    DurabilityFailure {
        /// Operation that failed
        operation: &'static str,
        /// Attempts made
        attempts: u32,
        /// Last store error
        #[source]
        source: StoreError,
    },

    /// Two different stable ids observed for one uid
    #[error("consistency violation for {uid}: expected {expected}, observed {observed}")]
    ConsistencyViolation {
        /// The uid
        uid: Uid,
        /// Id this process handed out
        expected: StableId,
        /// Id found in the durable store
        observed: StableId,
    },

    /// Non-retryable store failure
    #[error("store error: {0}")]
    Store(#[source] StoreError),
}

impl RegistryError {
    /// Check if a later call may succeed
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::DurabilityFailure { .. })
    }

    /// Check if the error indicates index corruption risk
    #[inline]
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::ConsistencyViolation { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_error_retryable_classification() {
        assert!(StoreError::Timeout.is_retryable());
        assert!(StoreError::Unavailable("down".into()).is_retryable());
        assert!(!StoreError::IdSpaceExhausted.is_retryable());
        assert!(!StoreError::Corrupt {
            record: 1,
            reason: "bad".into()
        }
        .is_retryable());
    }

    #[test]
    fn registry_error_classification() {
        let durability = RegistryError::DurabilityFailure {
            operation: "put_if_absent",
            attempts: 3,
            source: StoreError::Timeout,
        };
        assert!(durability.is_retryable());
        assert!(!durability.is_fatal());

        let violation = RegistryError::ConsistencyViolation {
            uid: Uid::new("u"),
            expected: StableId::MIN,
            observed: StableId::new(2).unwrap(),
        };
        assert!(violation.is_fatal());
        assert!(violation.to_string().contains("expected 1, observed 2"));
    }
}
