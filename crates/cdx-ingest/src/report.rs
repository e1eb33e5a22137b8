//! Per-entity results of a session Add

use crate::error::{ItemFailure, SessionError};
use cdx_model::{EntityKind, StableId, Uid};

/// An entity that reached the backend (or already matched it)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemOutcome {
    /// Entity uid
    pub uid: Uid,
    /// Entity kind
    pub kind: EntityKind,
    /// Stable id, for kinds that carry one
    pub stable_id: Option<StableId>,
    /// False when upload was skipped because content was unchanged
    pub uploaded: bool,
}

/// Results of one Add, in entity order
#[derive(Debug, Default)]
pub struct BatchReport {
    /// Operation that produced the report
    pub operation: &'static str,
    /// One result per entity
    pub items: Vec<Result<ItemOutcome, ItemFailure>>,
}

impl BatchReport {
    /// Create empty report
    #[inline]
    #[must_use]
    pub fn new(operation: &'static str) -> Self {
        Self {
            operation,
            items: Vec::new(),
        }
    }

    /// Number of entities
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// No entities
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Entities sent to the backend
    #[must_use]
    pub fn uploaded(&self) -> usize {
        self.successes().filter(|outcome| outcome.uploaded).count()
    }

    /// Entities skipped as unchanged
    #[must_use]
    pub fn unchanged(&self) -> usize {
        self.successes().filter(|outcome| !outcome.uploaded).count()
    }

    /// Entities that failed
    #[must_use]
    pub fn failed(&self) -> usize {
        self.items.iter().filter(|item| item.is_err()).count()
    }

    /// True if no entity failed
    #[inline]
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }

    /// Successful outcomes
    pub fn successes(&self) -> impl Iterator<Item = &ItemOutcome> {
        self.items.iter().filter_map(|item| item.as_ref().ok())
    }

    /// Failures
    pub fn failures(&self) -> impl Iterator<Item = &ItemFailure> {
        self.items.iter().filter_map(|item| item.as_ref().err())
    }

    /// Outcome for `uid`
    #[must_use]
    pub fn get(&self, uid: &Uid) -> Option<&Result<ItemOutcome, ItemFailure>> {
        self.items.iter().find(|item| match item {
            Ok(outcome) => &outcome.uid == uid,
            Err(failure) => &failure.uid == uid,
        })
    }

    /// Turn failed entities into an error
    ///
    /// # Errors
    /// [`SessionError::PartialBatchFailure`] carrying the full report if any
    /// entity failed
    pub fn into_result(self) -> Result<Self, SessionError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(SessionError::PartialBatchFailure { report: self })
        }
    }
}
