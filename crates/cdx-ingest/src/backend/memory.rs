//! Process-local backend for tests and dry runs

use super::{EntityLink, StorageBackend};
use crate::error::BackendError;
use async_trait::async_trait;
use cdx_model::{ContentId, StoredEntity, Uid};
use parking_lot::Mutex;
use std::collections::HashMap;

/// Backend call, recorded in arrival order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendEvent {
    /// `add_repository`
    AddRepository {
        /// Index
        index: String,
    },
    /// `upload_entity`
    Upload {
        /// Index
        index: String,
        /// Entity uid
        uid: Uid,
    },
    /// `finalize_repository`
    Finalize {
        /// Index
        index: String,
    },
    /// `link_entities`
    Link {
        /// Index
        index: String,
        /// Index copied from
        source_index: String,
        /// Number of records copied
        count: usize,
    },
}

#[derive(Debug, Default)]
struct IndexState {
    repository_name: String,
    entities: HashMap<Uid, StoredEntity>,
    /// Position in seal order, once sealed
    sealed: Option<u64>,
}

#[derive(Debug, Default)]
struct Inner {
    indexes: HashMap<String, IndexState>,
    events: Vec<BackendEvent>,
    seals: u64,
}

/// In-memory [`StorageBackend`]
#[derive(Debug, Default)]
pub struct MemoryBackend {
    inner: Mutex<Inner>,
}

impl MemoryBackend {
    /// Create empty backend
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored entity
    #[must_use]
    pub fn entity(&self, index: &str, uid: &Uid) -> Option<StoredEntity> {
        self.inner
            .lock()
            .indexes
            .get(index)
            .and_then(|state| state.entities.get(uid).cloned())
    }

    /// Number of entities in `index`
    #[must_use]
    pub fn entity_count(&self, index: &str) -> usize {
        self.inner
            .lock()
            .indexes
            .get(index)
            .map_or(0, |state| state.entities.len())
    }

    /// Whether `index` was finalized
    #[must_use]
    pub fn is_sealed(&self, index: &str) -> bool {
        self.inner
            .lock()
            .indexes
            .get(index)
            .is_some_and(|state| state.sealed.is_some())
    }

    /// Repository registered for `index`
    #[must_use]
    pub fn repository_name(&self, index: &str) -> Option<String> {
        self.inner
            .lock()
            .indexes
            .get(index)
            .map(|state| state.repository_name.clone())
    }

    /// All calls so far
    #[must_use]
    pub fn events(&self) -> Vec<BackendEvent> {
        self.inner.lock().events.clone()
    }

    /// Number of `upload_entity` calls
    #[must_use]
    pub fn upload_count(&self) -> usize {
        self.inner
            .lock()
            .events
            .iter()
            .filter(|event| matches!(event, BackendEvent::Upload { .. }))
            .count()
    }

    /// Number of records copied by `link_entities`
    #[must_use]
    pub fn linked_count(&self) -> usize {
        self.inner
            .lock()
            .events
            .iter()
            .map(|event| match event {
                BackendEvent::Link { count, .. } => *count,
                _ => 0,
            })
            .sum()
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn add_repository(&self, index: &str, repository_name: &str) -> Result<(), BackendError> {
        let mut inner = self.inner.lock();
        let state = inner.indexes.entry(index.to_string()).or_default();
        if state.sealed.is_some() {
            return Err(BackendError::Sealed(index.to_string()));
        }
        state.repository_name = repository_name.to_string();
        inner.events.push(BackendEvent::AddRepository {
            index: index.to_string(),
        });
        Ok(())
    }

    async fn upload_entity(&self, index: &str, entity: &StoredEntity) -> Result<(), BackendError> {
        let mut inner = self.inner.lock();
        let state = inner
            .indexes
            .get_mut(index)
            .ok_or_else(|| BackendError::UnknownIndex(index.to_string()))?;
        if state.sealed.is_some() {
            return Err(BackendError::Sealed(index.to_string()));
        }
        state.entities.insert(entity.uid.clone(), entity.clone());
        inner.events.push(BackendEvent::Upload {
            index: index.to_string(),
            uid: entity.uid.clone(),
        });
        Ok(())
    }

    async fn finalize_repository(
        &self,
        index: &str,
        _repository_name: &str,
    ) -> Result<(), BackendError> {
        let mut inner = self.inner.lock();
        let seal = inner.seals + 1;
        let state = inner
            .indexes
            .get_mut(index)
            .ok_or_else(|| BackendError::UnknownIndex(index.to_string()))?;
        if state.sealed.is_none() {
            state.sealed = Some(seal);
            inner.seals = seal;
        }
        inner.events.push(BackendEvent::Finalize {
            index: index.to_string(),
        });
        Ok(())
    }

    async fn stored_content_ids(
        &self,
        index: &str,
        uids: &[Uid],
    ) -> Result<Vec<Option<ContentId>>, BackendError> {
        let inner = self.inner.lock();
        let state = inner.indexes.get(index);
        Ok(uids
            .iter()
            .map(|uid| {
                state
                    .and_then(|state| state.entities.get(uid))
                    .map(|entity| entity.content_id)
            })
            .collect())
    }

    async fn latest_sealed_index(
        &self,
        repository_name: &str,
    ) -> Result<Option<String>, BackendError> {
        let inner = self.inner.lock();
        Ok(inner
            .indexes
            .iter()
            .filter(|(_, state)| state.repository_name == repository_name)
            .filter_map(|(name, state)| state.sealed.map(|seal| (seal, name)))
            .max()
            .map(|(_, name)| name.clone()))
    }

    async fn link_entities(
        &self,
        index: &str,
        source_index: &str,
        links: &[EntityLink],
    ) -> Result<(), BackendError> {
        let mut inner = self.inner.lock();
        let source = inner
            .indexes
            .get(source_index)
            .ok_or_else(|| BackendError::UnknownIndex(source_index.to_string()))?;
        let copies = links
            .iter()
            .map(|link| {
                let mut copy = source.entities.get(&link.uid).cloned().ok_or_else(|| {
                    BackendError::Rejected {
                        uid: link.uid.clone(),
                        reason: format!("not stored in {source_index}"),
                    }
                })?;
                copy.stable_id = link.stable_id;
                Ok(copy)
            })
            .collect::<Result<Vec<_>, BackendError>>()?;

        let state = inner
            .indexes
            .get_mut(index)
            .ok_or_else(|| BackendError::UnknownIndex(index.to_string()))?;
        if state.sealed.is_some() {
            return Err(BackendError::Sealed(index.to_string()));
        }
        for copy in copies {
            state.entities.insert(copy.uid.clone(), copy);
        }
        inner.events.push(BackendEvent::Link {
            index: index.to_string(),
            source_index: source_index.to_string(),
            count: links.len(),
        });
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cdx_model::{Entity, SourceFile};

    fn text(path: &str, content: &str) -> StoredEntity {
        StoredEntity::new(Entity::TextSource(SourceFile::new("repo", path, content))).unwrap()
    }

    #[tokio::test]
    async fn upload_requires_registered_index() {
        let backend = MemoryBackend::new();
        let err = backend.upload_entity("idx", &text("a.rs", "")).await.unwrap_err();
        assert!(matches!(err, BackendError::UnknownIndex(_)));
    }

    #[tokio::test]
    async fn sealed_index_rejects_uploads() {
        let backend = MemoryBackend::new();
        backend.add_repository("idx", "repo").await.unwrap();
        backend.upload_entity("idx", &text("a.rs", "x")).await.unwrap();
        backend.finalize_repository("idx", "repo").await.unwrap();

        assert!(backend.is_sealed("idx"));
        let err = backend.upload_entity("idx", &text("b.rs", "y")).await.unwrap_err();
        assert!(matches!(err, BackendError::Sealed(_)));
        assert_eq!(backend.entity_count("idx"), 1);
    }

    #[tokio::test]
    async fn stored_content_ids_reflect_latest_upload() {
        let backend = MemoryBackend::new();
        backend.add_repository("idx", "repo").await.unwrap();
        let v1 = text("a.rs", "one");
        let v2 = text("a.rs", "two");
        backend.upload_entity("idx", &v1).await.unwrap();
        backend.upload_entity("idx", &v2).await.unwrap();

        let ids = backend
            .stored_content_ids("idx", &[v1.uid.clone(), Uid::new("missing")])
            .await
            .unwrap();
        assert_eq!(ids, vec![Some(v2.content_id), None]);
        assert_eq!(backend.upload_count(), 2);
    }

    #[tokio::test]
    async fn latest_sealed_index_follows_seal_order() {
        let backend = MemoryBackend::new();
        for index in ["repo.b", "repo.a", "repo.open"] {
            backend.add_repository(index, "repo").await.unwrap();
        }
        backend.add_repository("other.c", "other").await.unwrap();
        assert_eq!(backend.latest_sealed_index("repo").await.unwrap(), None);

        backend.finalize_repository("repo.b", "repo").await.unwrap();
        backend.finalize_repository("repo.a", "repo").await.unwrap();
        backend.finalize_repository("other.c", "other").await.unwrap();
        // Sealing again keeps the original position
        backend.finalize_repository("repo.b", "repo").await.unwrap();

        assert_eq!(
            backend.latest_sealed_index("repo").await.unwrap().as_deref(),
            Some("repo.a")
        );
    }

    #[tokio::test]
    async fn link_copies_records_with_new_stable_ids() {
        let backend = MemoryBackend::new();
        backend.add_repository("old", "repo").await.unwrap();
        let entity = text("a.rs", "same");
        backend.upload_entity("old", &entity).await.unwrap();
        backend.finalize_repository("old", "repo").await.unwrap();
        backend.add_repository("new", "repo").await.unwrap();

        let stable_id = cdx_model::StableId::new(7).unwrap();
        backend
            .link_entities(
                "new",
                "old",
                &[EntityLink {
                    uid: entity.uid.clone(),
                    stable_id: Some(stable_id),
                }],
            )
            .await
            .unwrap();

        let copy = backend.entity("new", &entity.uid).unwrap();
        assert_eq!(copy.content_id, entity.content_id);
        assert_eq!(copy.stable_id, Some(stable_id));
        assert_eq!(backend.linked_count(), 1);

        let missing = EntityLink {
            uid: Uid::new("text:absent"),
            stable_id: None,
        };
        let err = backend.link_entities("new", "old", &[missing]).await.unwrap_err();
        assert!(matches!(err, BackendError::Rejected { .. }));
    }
}
