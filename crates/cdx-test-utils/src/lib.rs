//! Testing utilities for CDX workspace
//!
//! Shared fixtures, plus stores and backends that misbehave on purpose.

#![allow(missing_docs)]

use async_trait::async_trait;
use cdx_ingest::{
    BackendError, EntityLink, IngestionSession, MemoryBackend, SessionConfig, StorageBackend,
};
use cdx_model::{
    AnalyzedProject, BoundSourceFile, Commit, ContentId, DefinitionSpan, DefinitionSymbol,
    LanguageInfo, ReferencedProject, Repository, SourceFile, Span, StableId, StoredEntity, Uid,
};
use cdx_registry::{
    DurableStore, IdRange, MemoryStore, PutOutcome, RegistryConfig, RetryPolicy,
    StableIdRegistry, StoreError,
};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

pub const REPO: &str = "codex";
pub const COMMIT: &str = "9f2c1e7";
pub const INDEX: &str = "codex.test";

pub fn repository() -> Repository {
    Repository::new(REPO).with_source_control("https://github.com/cdx/codex")
}

pub fn commit() -> Commit {
    Commit::new(REPO, COMMIT)
}

pub fn text_file(path: &str, content: &str) -> SourceFile {
    SourceFile::new(REPO, path, content)
}

pub fn definition(project: &str, id: &str) -> DefinitionSymbol {
    DefinitionSymbol {
        project_id: project.to_string(),
        id: id.to_string(),
        kind: "method".to_string(),
        short_name: id.to_string(),
        ..DefinitionSymbol::default()
    }
}

/// Bound file declaring one definition per id, one per line
pub fn bound_file(path: &str, definitions: &[&str]) -> BoundSourceFile {
    let content: String = definitions.iter().map(|id| format!("fn {id}() {{}}\n")).collect();
    let spans = definitions
        .iter()
        .zip(1u32..)
        .map(|(id, line_number)| DefinitionSpan {
            span: Span {
                start: 3,
                length: u32::try_from(id.len()).unwrap_or(u32::MAX),
                line_number,
            },
            definition: definition("core", id),
        })
        .collect();
    BoundSourceFile::new(text_file(path, &content)).with_definitions(spans)
}

/// Project referencing `references` (project id, referenced definition ids)
pub fn project(project_id: &str, references: &[(&str, &[&str])]) -> AnalyzedProject {
    let mut analyzed = AnalyzedProject::new(REPO, project_id);
    analyzed.project_references = references
        .iter()
        .map(|(referenced, ids)| ReferencedProject {
            project_id: (*referenced).to_string(),
            definitions: ids.iter().map(|id| definition(referenced, id)).collect(),
            ..ReferencedProject::default()
        })
        .collect();
    analyzed
}

pub fn language(name: &str) -> LanguageInfo {
    LanguageInfo {
        name: name.to_string(),
        classifications: Vec::new(),
    }
}

/// Retry policy that gives up quickly
pub fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::new()
        .with_max_attempts(max_attempts)
        .with_initial_backoff(Duration::from_millis(1))
        .without_jitter()
}

pub fn registry() -> Arc<StableIdRegistry> {
    registry_on(Arc::new(MemoryStore::new()))
}

pub fn registry_on(store: Arc<dyn DurableStore>) -> Arc<StableIdRegistry> {
    Arc::new(StableIdRegistry::new(
        store,
        RegistryConfig::new().with_retry(fast_retry(3)),
    ))
}

pub fn session_config() -> SessionConfig {
    SessionConfig::new()
        .with_index_name(INDEX)
        .with_retry(fast_retry(3))
}

pub fn session(registry: Arc<StableIdRegistry>, backend: Arc<dyn StorageBackend>) -> IngestionSession {
    IngestionSession::new(registry, backend, session_config())
}

/// Initialized session over a fresh registry
pub async fn started_session(backend: Arc<dyn StorageBackend>) -> IngestionSession {
    let session = session(registry(), backend);
    session
        .initialize(repository(), commit())
        .await
        .expect("initialize test session");
    session
}

/// Store that fails the first `failures` durable writes
#[derive(Debug)]
pub struct FlakyStore {
    pub inner: MemoryStore,
    failures: Mutex<u32>,
}

impl FlakyStore {
    pub fn new(failures: u32) -> Self {
        Self {
            inner: MemoryStore::new(),
            failures: Mutex::new(failures),
        }
    }

    pub fn set_failures(&self, failures: u32) {
        *self.failures.lock() = failures;
    }

    fn fail_once(&self) -> bool {
        let mut left = self.failures.lock();
        if *left == 0 {
            return false;
        }
        *left -= 1;
        true
    }
}

#[async_trait]
impl DurableStore for FlakyStore {
    async fn get_many(&self, uids: &[Uid]) -> Result<Vec<Option<StableId>>, StoreError> {
        self.inner.get_many(uids).await
    }

    async fn put_if_absent(&self, entries: &[(Uid, StableId)]) -> Result<Vec<PutOutcome>, StoreError> {
        if self.fail_once() {
            return Err(StoreError::Unavailable("injected write failure".to_string()));
        }
        self.inner.put_if_absent(entries).await
    }

    async fn reserve_ids(&self, count: u32) -> Result<IdRange, StoreError> {
        self.inner.reserve_ids(count).await
    }

    async fn len(&self) -> Result<usize, StoreError> {
        self.inner.len().await
    }
}

/// Store where another writer always commits a different id first
///
/// Reads miss, but every write finds the uid already mapped to
/// `id + offset`.
#[derive(Debug)]
pub struct RacingStore {
    pub inner: MemoryStore,
    offset: i32,
}

impl RacingStore {
    pub fn new(offset: i32) -> Self {
        Self {
            inner: MemoryStore::new(),
            offset,
        }
    }
}

#[async_trait]
impl DurableStore for RacingStore {
    async fn get_many(&self, uids: &[Uid]) -> Result<Vec<Option<StableId>>, StoreError> {
        self.inner.get_many(uids).await
    }

    async fn put_if_absent(&self, entries: &[(Uid, StableId)]) -> Result<Vec<PutOutcome>, StoreError> {
        for (uid, stable_id) in entries {
            if self.inner.peek(uid).is_none() {
                let other = StableId::new(stable_id.get() + self.offset)
                    .expect("offset keeps ids positive");
                self.inner.insert(uid.clone(), other);
            }
        }
        self.inner.put_if_absent(entries).await
    }

    async fn reserve_ids(&self, count: u32) -> Result<IdRange, StoreError> {
        self.inner.reserve_ids(count).await
    }

    async fn len(&self) -> Result<usize, StoreError> {
        self.inner.len().await
    }
}

/// Backend that delays every upload
#[derive(Debug)]
pub struct SlowBackend {
    pub inner: Arc<MemoryBackend>,
    delay: Duration,
}

impl SlowBackend {
    pub fn new(inner: Arc<MemoryBackend>, delay: Duration) -> Self {
        Self { inner, delay }
    }
}

#[async_trait]
impl StorageBackend for SlowBackend {
    async fn add_repository(&self, index: &str, repository_name: &str) -> Result<(), BackendError> {
        self.inner.add_repository(index, repository_name).await
    }

    async fn upload_entity(&self, index: &str, entity: &StoredEntity) -> Result<(), BackendError> {
        tokio::time::sleep(self.delay).await;
        self.inner.upload_entity(index, entity).await
    }

    async fn finalize_repository(&self, index: &str, repository_name: &str) -> Result<(), BackendError> {
        self.inner.finalize_repository(index, repository_name).await
    }

    async fn stored_content_ids(
        &self,
        index: &str,
        uids: &[Uid],
    ) -> Result<Vec<Option<ContentId>>, BackendError> {
        self.inner.stored_content_ids(index, uids).await
    }

    async fn latest_sealed_index(&self, repository_name: &str) -> Result<Option<String>, BackendError> {
        self.inner.latest_sealed_index(repository_name).await
    }

    async fn link_entities(
        &self,
        index: &str,
        source_index: &str,
        links: &[EntityLink],
    ) -> Result<(), BackendError> {
        self.inner.link_entities(index, source_index, links).await
    }
}

/// Backend that rejects chosen uids and can fail sealing a number of times
#[derive(Debug)]
pub struct FailingBackend {
    pub inner: Arc<MemoryBackend>,
    rejected: Mutex<HashSet<Uid>>,
    finalize_failures: Mutex<u32>,
}

impl FailingBackend {
    pub fn new(inner: Arc<MemoryBackend>) -> Self {
        Self {
            inner,
            rejected: Mutex::new(HashSet::new()),
            finalize_failures: Mutex::new(0),
        }
    }

    pub fn reject(&self, uid: Uid) {
        self.rejected.lock().insert(uid);
    }

    pub fn accept_all(&self) {
        self.rejected.lock().clear();
    }

    /// Next `failures` calls to `finalize_repository` fail as unavailable
    pub fn fail_finalize(&self, failures: u32) {
        *self.finalize_failures.lock() = failures;
    }
}

#[async_trait]
impl StorageBackend for FailingBackend {
    async fn add_repository(&self, index: &str, repository_name: &str) -> Result<(), BackendError> {
        self.inner.add_repository(index, repository_name).await
    }

    async fn upload_entity(&self, index: &str, entity: &StoredEntity) -> Result<(), BackendError> {
        if self.rejected.lock().contains(&entity.uid) {
            return Err(BackendError::Rejected {
                uid: entity.uid.clone(),
                reason: "injected rejection".to_string(),
            });
        }
        self.inner.upload_entity(index, entity).await
    }

    async fn finalize_repository(&self, index: &str, repository_name: &str) -> Result<(), BackendError> {
        {
            let mut left = self.finalize_failures.lock();
            if *left > 0 {
                *left -= 1;
                return Err(BackendError::Unavailable("injected seal failure".to_string()));
            }
        }
        self.inner.finalize_repository(index, repository_name).await
    }
}
