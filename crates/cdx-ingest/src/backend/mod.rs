//! Storage backend interface
//!
//! A backend receives typed entities for a target index. How it stores
//! them, and how it handles its own concurrency, is its concern.

mod directory;
mod memory;

pub use directory::DirectoryBackend;
pub use memory::{BackendEvent, MemoryBackend};

use crate::error::BackendError;
use async_trait::async_trait;
use cdx_model::{ContentId, StableId, StoredEntity, Uid};

/// Identity under which an earlier index's record is carried over
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityLink {
    /// Entity uid
    pub uid: Uid,
    /// Stable id the copy carries
    pub stable_id: Option<StableId>,
}

/// Destination of ingested entities
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Register the repository scope of `index`
    async fn add_repository(&self, index: &str, repository_name: &str) -> Result<(), BackendError>;

    /// Store or replace one entity
    async fn upload_entity(&self, index: &str, entity: &StoredEntity) -> Result<(), BackendError>;

    /// Seal `index`; no uploads are accepted afterwards
    async fn finalize_repository(&self, index: &str, repository_name: &str)
        -> Result<(), BackendError>;

    /// Content ids already stored for `uids`, one per uid in order
    ///
    /// The default reports every uid as unknown, which disables upload
    /// elision against the backend.
    async fn stored_content_ids(
        &self,
        _index: &str,
        uids: &[Uid],
    ) -> Result<Vec<Option<ContentId>>, BackendError> {
        Ok(vec![None; uids.len()])
    }

    /// Most recently sealed index of `repository_name`, if any
    ///
    /// The default knows no earlier indexes, which disables carrying
    /// unchanged entities over from a previous run.
    async fn latest_sealed_index(
        &self,
        _repository_name: &str,
    ) -> Result<Option<String>, BackendError> {
        Ok(None)
    }

    /// Copy the records for `links` from `source_index` into `index`
    ///
    /// Each copy takes the link's stable id. Only called for uids whose
    /// content id in `source_index` matched.
    async fn link_entities(
        &self,
        _index: &str,
        _source_index: &str,
        _links: &[EntityLink],
    ) -> Result<(), BackendError> {
        Err(BackendError::Unsupported("link_entities"))
    }

    /// Short name for logs
    fn name(&self) -> &'static str {
        "backend"
    }
}
