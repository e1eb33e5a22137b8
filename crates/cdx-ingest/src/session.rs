//! Repository ingestion session
//!
//! One session ingests one (repository, commit) scope into one target index:
//!
//! ```text
//! Created ─initialize─► Initialized ─first Add─► Accepting ─finalize─► Finalizing ─► Finalized
//! ```
//!
//! Adds may run concurrently and in any order. Finalize waits for every Add
//! that started before it, uploads the commit's file list and seals the
//! index. An Add that arrives while finalize runs fails with an ordering
//! violation instead of racing the seal.

use crate::backend::{EntityLink, StorageBackend};
use crate::config::SessionConfig;
use crate::error::{BackendError, ItemError, ItemFailure, SessionError};
use crate::expand;
use crate::report::{BatchReport, ItemOutcome};
use cdx_model::naming::target_index_name;
use cdx_model::{
    normalize_path, AnalyzedProject, BoundSourceFile, Commit, CommitFileLink, ContentId, Entity,
    EntityKind, LanguageInfo, Repository, SourceFile, StoredEntity, Uid,
};
use cdx_registry::{Exhausted, StableIdRegistry};
use chrono::Utc;
use dashmap::DashMap;
use futures::StreamExt;
use moka::future::Cache;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt::{self, Display, Formatter};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Constructed, scope not registered
    Created,
    /// Scope registered with the backend
    Initialized,
    /// At least one Add has started
    Accepting,
    /// Finalize started and has not completed
    Finalizing,
    /// Sealed; terminal
    Finalized,
}

impl Display for SessionState {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Created => "created",
            Self::Initialized => "initialized",
            Self::Accepting => "accepting",
            Self::Finalizing => "finalizing",
            Self::Finalized => "finalized",
        })
    }
}

/// Last finalize step that completed
///
/// A cancelled or failed finalize resumes after this step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalizeProgress {
    /// Nothing done yet
    #[default]
    NotStarted,
    /// Every earlier Add completed
    Drained,
    /// Commit file list uploaded
    CommitFilesUploaded,
    /// Backend sealed the index
    Sealed,
}

/// Session counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    /// Completed Add batches
    pub batches: u64,
    /// Entities uploaded
    pub uploaded: u64,
    /// Entities skipped as unchanged
    pub unchanged: u64,
    /// Entities that failed
    pub failed: u64,
}

#[derive(Debug, Default)]
struct Counters {
    batches: AtomicU64,
    uploaded: AtomicU64,
    unchanged: AtomicU64,
    failed: AtomicU64,
}

#[derive(Debug)]
struct Scope {
    repository: Repository,
    commit: Commit,
    index: String,
    /// Latest sealed index of the repository, source of carried-over records
    baseline: Option<String>,
}

#[derive(Debug)]
struct Lifecycle {
    state: SessionState,
    progress: FinalizeProgress,
    halted: Option<String>,
}

/// Counts one Add as in flight until dropped
struct InFlight<'a> {
    counter: &'a watch::Sender<usize>,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.counter.send_modify(|n| *n = n.saturating_sub(1));
    }
}

/// Ingestion of one repository commit into one target index
pub struct IngestionSession {
    registry: Arc<StableIdRegistry>,
    backend: Arc<dyn StorageBackend>,
    config: SessionConfig,
    scope: OnceCell<Scope>,
    lifecycle: Mutex<Lifecycle>,
    in_flight: watch::Sender<usize>,
    initialize_turn: tokio::sync::Mutex<()>,
    finalize_turn: tokio::sync::Mutex<()>,
    commit_files: DashMap<String, CommitFileLink>,
    file_ids: DashMap<String, Uid>,
    uploaded: Cache<Uid, ContentId>,
    /// Per definition: whether a declared copy has been stored
    definitions: DashMap<Uid, Arc<tokio::sync::Mutex<bool>>>,
    counters: Counters,
}

impl IngestionSession {
    /// Create session in [`SessionState::Created`]
    #[must_use]
    pub fn new(
        registry: Arc<StableIdRegistry>,
        backend: Arc<dyn StorageBackend>,
        config: SessionConfig,
    ) -> Self {
        let (in_flight, _) = watch::channel(0);
        Self {
            registry,
            backend,
            uploaded: Cache::new(config.uploaded_cache_capacity),
            config,
            scope: OnceCell::new(),
            lifecycle: Mutex::new(Lifecycle {
                state: SessionState::Created,
                progress: FinalizeProgress::NotStarted,
                halted: None,
            }),
            in_flight,
            initialize_turn: tokio::sync::Mutex::new(()),
            finalize_turn: tokio::sync::Mutex::new(()),
            commit_files: DashMap::new(),
            file_ids: DashMap::new(),
            definitions: DashMap::new(),
            counters: Counters::default(),
        }
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.lifecycle.lock().state
    }

    /// Finalize watermark
    #[must_use]
    pub fn progress(&self) -> FinalizeProgress {
        self.lifecycle.lock().progress
    }

    /// Reason the session halted, if it did
    #[must_use]
    pub fn halted(&self) -> Option<String> {
        self.lifecycle.lock().halted.clone()
    }

    /// Target index, once initialized
    #[must_use]
    pub fn index_name(&self) -> Option<&str> {
        self.scope.get().map(|scope| scope.index.as_str())
    }

    /// Adds currently running
    #[must_use]
    pub fn in_flight(&self) -> usize {
        *self.in_flight.borrow()
    }

    /// Counter snapshot
    #[must_use]
    pub fn stats(&self) -> SessionStats {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        SessionStats {
            batches: load(&self.counters.batches),
            uploaded: load(&self.counters.uploaded),
            unchanged: load(&self.counters.unchanged),
            failed: load(&self.counters.failed),
        }
    }

    /// Register the scope with the backend and upload its records
    ///
    /// On failure the session stays [`SessionState::Created`] and may be
    /// initialized again.
    ///
    /// # Errors
    /// - [`SessionError::InvalidState`] unless the session is new
    /// - [`SessionError::Backend`] if registration or upload kept failing
    #[tracing::instrument(skip_all, fields(repository = %repository.name, commit = %commit.commit_id))]
    pub async fn initialize(&self, repository: Repository, mut commit: Commit) -> Result<(), SessionError> {
        let _turn = self.initialize_turn.lock().await;
        {
            let lifecycle = self.lifecycle.lock();
            if let Some(reason) = &lifecycle.halted {
                return Err(SessionError::Halted {
                    reason: reason.clone(),
                });
            }
            if lifecycle.state != SessionState::Created {
                return Err(SessionError::InvalidState {
                    operation: "initialize",
                    state: lifecycle.state,
                });
            }
        }

        if commit.repository_name.is_empty() {
            commit.repository_name.clone_from(&repository.name);
        }
        let index = self
            .config
            .index_name
            .clone()
            .unwrap_or_else(|| target_index_name(&repository.name, Utc::now()));

        self.call_backend("add_repository", || {
            self.backend.add_repository(&index, &repository.name)
        })
        .await?;
        let baseline = match self
            .config
            .retry
            .run("latest_sealed_index", || {
                self.backend.latest_sealed_index(&repository.name)
            })
            .await
        {
            Ok(found) => found.filter(|previous| *previous != index),
            Err(e) => {
                tracing::warn!(attempts = e.attempts, "previous index lookup failed, uploading everything: {}", e.error);
                None
            }
        };
        for entity in [
            Entity::Repository(repository.clone()),
            Entity::Commit(commit.clone()),
        ] {
            let stored = StoredEntity::new(entity)?;
            self.upload(&index, &stored).await.map_err(from_item_error)?;
        }

        tracing::info!(
            index = %index,
            baseline = baseline.as_deref().unwrap_or("none"),
            backend = self.backend.name(),
            "session initialized"
        );
        self.scope
            .set(Scope {
                repository,
                commit,
                index,
                baseline,
            })
            .map_err(|_| SessionError::InvalidState {
                operation: "initialize",
                state: SessionState::Initialized,
            })?;
        self.lifecycle.lock().state = SessionState::Initialized;
        Ok(())
    }

    /// Ingest bound files with their text, definitions and references
    ///
    /// # Errors
    /// See [`Self::add_text_files`]
    #[tracing::instrument(skip_all, fields(files = files.len()))]
    pub async fn add_bound_files(&self, files: Vec<BoundSourceFile>) -> Result<BatchReport, SessionError> {
        let (_op, scope) = self.begin("add_bound_files")?;
        for file in &files {
            self.record_file(&file.source_file);
        }
        let entities = files
            .into_iter()
            .flat_map(|file| expand::bound_file(file, &scope.repository))
            .collect();
        self.ingest("add_bound_files", scope, entities).await
    }

    /// Ingest plain text files
    ///
    /// Per-entity failures are reported in the [`BatchReport`]; call
    /// [`BatchReport::into_result`] to treat any of them as an error.
    ///
    /// # Errors
    /// - [`SessionError::InvalidState`] before [`Self::initialize`]
    /// - [`SessionError::OrderingViolation`] while finalize runs
    /// - [`SessionError::Finalized`] after finalize
    /// - [`SessionError::Registry`] if stable id resolution failed; a
    ///   consistency violation also halts the session
    #[tracing::instrument(skip_all, fields(files = files.len()))]
    pub async fn add_text_files(&self, files: Vec<SourceFile>) -> Result<BatchReport, SessionError> {
        let (_op, scope) = self.begin("add_text_files")?;
        for file in &files {
            self.record_file(file);
        }
        let entities = files
            .into_iter()
            .flat_map(|file| expand::text_file(file, &scope.repository))
            .collect();
        self.ingest("add_text_files", scope, entities).await
    }

    /// Ingest projects, their references and additional files
    ///
    /// # Errors
    /// See [`Self::add_text_files`]
    #[tracing::instrument(skip_all, fields(projects = projects.len()))]
    pub async fn add_projects(&self, projects: Vec<AnalyzedProject>) -> Result<BatchReport, SessionError> {
        let (_op, scope) = self.begin("add_projects")?;
        for project in &projects {
            for file in &project.additional_source_files {
                self.record_file(&file.source_file);
            }
        }
        let entities = projects
            .into_iter()
            .flat_map(|project| expand::project(project, &scope.repository))
            .collect();
        self.ingest("add_projects", scope, entities).await
    }

    /// Record the commit's files and upload a link record for each
    ///
    /// # Errors
    /// See [`Self::add_text_files`]
    #[tracing::instrument(skip_all, fields(links = links.len()))]
    pub async fn add_commit_files(&self, links: Vec<CommitFileLink>) -> Result<BatchReport, SessionError> {
        let (_op, scope) = self.begin("add_commit_files")?;
        let entities = links
            .into_iter()
            .map(|mut link| {
                let key = link.path_key();
                if link.file_id.is_none() {
                    link.file_id = self.file_id(&key);
                }
                self.commit_files.insert(key.clone(), link.clone());
                // A file recorded since the first check is linked here
                if link.file_id.is_none() {
                    if let Some(file_id) = self.file_id(&key) {
                        if let Some(mut recorded) = self.commit_files.get_mut(&key) {
                            recorded.file_id = Some(file_id);
                        }
                    }
                }
                Entity::CommitFile {
                    repository_name: scope.repository.name.clone(),
                    commit_id: scope.commit.commit_id.clone(),
                    link,
                }
            })
            .collect();
        self.ingest("add_commit_files", scope, entities).await
    }

    /// Ingest language descriptions
    ///
    /// # Errors
    /// See [`Self::add_text_files`]
    #[tracing::instrument(skip_all, fields(languages = languages.len()))]
    pub async fn add_languages(&self, languages: Vec<LanguageInfo>) -> Result<BatchReport, SessionError> {
        let (_op, scope) = self.begin("add_languages")?;
        let entities = languages.into_iter().map(Entity::Language).collect();
        self.ingest("add_languages", scope, entities).await
    }

    /// Wait for earlier Adds, upload the commit file list and seal the index
    ///
    /// Idempotent once it has succeeded. After a failure or cancellation the
    /// next call resumes from [`Self::progress`].
    ///
    /// # Errors
    /// - [`SessionError::InvalidState`] before [`Self::initialize`]
    /// - [`SessionError::OrderingViolation`] if Adds did not drain within the
    ///   configured timeout
    /// - [`SessionError::Backend`] if an upload or the seal kept failing
    /// - [`SessionError::Halted`] after a consistency violation
    #[tracing::instrument(skip_all, fields(index = self.index_name().unwrap_or_default()))]
    pub async fn finalize(&self) -> Result<(), SessionError> {
        let _turn = self.finalize_turn.lock().await;
        let progress = {
            let mut lifecycle = self.lifecycle.lock();
            if let Some(reason) = &lifecycle.halted {
                return Err(SessionError::Halted {
                    reason: reason.clone(),
                });
            }
            match lifecycle.state {
                SessionState::Created => {
                    return Err(SessionError::InvalidState {
                        operation: "finalize",
                        state: SessionState::Created,
                    })
                }
                SessionState::Finalized => return Ok(()),
                SessionState::Initialized | SessionState::Accepting => {
                    lifecycle.state = SessionState::Finalizing;
                }
                SessionState::Finalizing => {
                    tracing::info!(progress = ?lifecycle.progress, "resuming finalize");
                }
            }
            lifecycle.progress
        };
        let scope = self.scope.get().ok_or(SessionError::InvalidState {
            operation: "finalize",
            state: SessionState::Finalizing,
        })?;

        if progress < FinalizeProgress::Drained {
            self.drain().await?;
            self.advance(FinalizeProgress::Drained);
        }

        if progress < FinalizeProgress::CommitFilesUploaded {
            let aggregate = self.commit_files_entity(scope)?;
            self.upload(&scope.index, &aggregate)
                .await
                .map_err(from_item_error)?;
            self.advance(FinalizeProgress::CommitFilesUploaded);
        }

        if progress < FinalizeProgress::Sealed {
            self.call_backend("finalize_repository", || {
                self.backend
                    .finalize_repository(&scope.index, &scope.repository.name)
            })
            .await?;
            let mut lifecycle = self.lifecycle.lock();
            lifecycle.progress = FinalizeProgress::Sealed;
            lifecycle.state = SessionState::Finalized;
        }

        let stats = self.stats();
        tracing::info!(
            batches = stats.batches,
            uploaded = stats.uploaded,
            unchanged = stats.unchanged,
            failed = stats.failed,
            commit_files = self.commit_files.len(),
            "session finalized"
        );
        Ok(())
    }

    /// Admit an Add: check state and count it in flight atomically
    fn begin(&self, operation: &'static str) -> Result<(InFlight<'_>, &Scope), SessionError> {
        let mut lifecycle = self.lifecycle.lock();
        if let Some(reason) = &lifecycle.halted {
            return Err(SessionError::Halted {
                reason: reason.clone(),
            });
        }
        match lifecycle.state {
            SessionState::Created => Err(SessionError::InvalidState {
                operation,
                state: SessionState::Created,
            }),
            SessionState::Initialized | SessionState::Accepting => {
                let scope = self.scope.get().ok_or(SessionError::InvalidState {
                    operation,
                    state: lifecycle.state,
                })?;
                lifecycle.state = SessionState::Accepting;
                self.in_flight.send_modify(|n| *n += 1);
                Ok((
                    InFlight {
                        counter: &self.in_flight,
                    },
                    scope,
                ))
            }
            SessionState::Finalizing => Err(SessionError::OrderingViolation {
                operation,
                reason: "finalize is in progress".to_string(),
            }),
            SessionState::Finalized => Err(SessionError::Finalized { operation }),
        }
    }

    fn halt(&self, reason: String) {
        tracing::error!(reason = %reason, "halting ingestion session");
        self.lifecycle.lock().halted.get_or_insert(reason);
    }

    fn advance(&self, progress: FinalizeProgress) {
        tracing::debug!(?progress, "finalize step complete");
        self.lifecycle.lock().progress = progress;
    }

    /// Remember a file's text uid for commit file links, in either order
    fn record_file(&self, file: &SourceFile) {
        let Some(path) = file.info.repo_relative_path.as_deref() else {
            return;
        };
        let key = normalize_path(path).to_lowercase();
        let uid = file.text_uid();
        let file_id = uid.to_string();
        self.file_ids.insert(key.clone(), uid);
        if let Some(mut link) = self.commit_files.get_mut(&key) {
            link.file_id = Some(file_id);
        }
    }

    fn file_id(&self, key: &str) -> Option<String> {
        self.file_ids.get(key).map(|uid| uid.to_string())
    }

    async fn drain(&self) -> Result<(), SessionError> {
        let mut rx = self.in_flight.subscribe();
        // The sender lives in `self`, so the channel cannot close while waiting
        let drained = async move {
            let _ = rx.wait_for(|n| *n == 0).await;
        };
        match self.config.drain_timeout() {
            Some(timeout) => tokio::time::timeout(timeout, drained).await.map_err(|_| {
                SessionError::OrderingViolation {
                    operation: "finalize",
                    reason: format!(
                        "{} operations still in flight after {timeout:?}",
                        self.in_flight()
                    ),
                }
            }),
            None => {
                drained.await;
                Ok(())
            }
        }
    }

    fn commit_files_entity(&self, scope: &Scope) -> Result<StoredEntity, SessionError> {
        let mut files: Vec<(String, CommitFileLink)> = self
            .commit_files
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        files.sort_by(|(a, _), (b, _)| a.cmp(b));
        Ok(StoredEntity::new(Entity::CommitFiles {
            commit: scope.commit.clone(),
            files: files.into_iter().map(|(_, link)| link).collect(),
        })?)
    }

    /// Resolve ids, skip unchanged entities, upload the rest
    async fn ingest(
        &self,
        operation: &'static str,
        scope: &Scope,
        entities: Vec<Entity>,
    ) -> Result<BatchReport, SessionError> {
        let mut seen = HashSet::with_capacity(entities.len());
        let entities: Vec<(Uid, Entity)> = entities
            .into_iter()
            .filter_map(|entity| {
                let uid = entity.uid();
                seen.insert(uid.clone()).then_some((uid, entity))
            })
            .collect();
        let declared: HashSet<Uid> = entities
            .iter()
            .filter_map(|(_, entity)| match entity {
                Entity::DeclaredDefinition { definition, .. } => Some(definition.clone()),
                _ => None,
            })
            .collect();

        let wanted: Vec<Uid> = entities
            .iter()
            .filter(|(_, entity)| entity.kind().requires_stable_id())
            .map(|(uid, _)| uid.clone())
            .collect();
        let stable_ids = match self.registry.resolve(&wanted).await {
            Ok(ids) => ids,
            Err(e) => {
                if e.is_fatal() {
                    self.halt(e.to_string());
                }
                return Err(e.into());
            }
        };
        let mut stable_ids = stable_ids.into_iter();

        let mut items: Vec<Option<Result<ItemOutcome, ItemFailure>>> =
            Vec::with_capacity(entities.len());
        let mut candidates = Vec::with_capacity(entities.len());
        for (position, (uid, entity)) in entities.into_iter().enumerate() {
            let kind = entity.kind();
            let stable_id = if kind.requires_stable_id() {
                stable_ids.next()
            } else {
                None
            };
            match StoredEntity::new(entity) {
                Ok(mut stored) => {
                    stored.stable_id = stable_id;
                    candidates.push((position, stored));
                    items.push(None);
                }
                Err(e) => items.push(Some(Err(ItemFailure {
                    uid,
                    kind,
                    error: e.into(),
                }))),
            }
        }

        let (unchanged, mut pending) = self.partition_unchanged(scope, candidates).await;
        for (position, stored) in unchanged {
            // Definitions settle under their own turn even when unchanged
            if stored.kind() == EntityKind::Definition {
                pending.push((position, stored));
            } else {
                items[position] = Some(Ok(outcome(&stored, false)));
            }
        }

        let declared = &declared;
        let uploads: Vec<_> = futures::stream::iter(pending)
            .map(|(position, stored)| async move {
                let result = if stored.kind() == EntityKind::Definition {
                    let is_declared = declared.contains(&stored.uid);
                    self.settle_definition(&scope.index, &stored, is_declared).await
                } else {
                    self.upload(&scope.index, &stored).await.map(|()| true)
                };
                (position, stored, result)
            })
            .buffered(self.config.upload_concurrency.max(1))
            .collect()
            .await;
        for (position, stored, result) in uploads {
            items[position] = Some(match result {
                Ok(uploaded) => Ok(outcome(&stored, uploaded)),
                Err(error) => {
                    tracing::warn!(uid = %stored.uid, kind = ?stored.kind(), "entity upload failed: {error}");
                    Err(ItemFailure {
                        kind: stored.kind(),
                        uid: stored.uid,
                        error,
                    })
                }
            });
        }

        let report = BatchReport {
            operation,
            items: items.into_iter().flatten().collect(),
        };
        self.counters.batches.fetch_add(1, Ordering::Relaxed);
        self.counters
            .uploaded
            .fetch_add(report.uploaded() as u64, Ordering::Relaxed);
        self.counters
            .unchanged
            .fetch_add(report.unchanged() as u64, Ordering::Relaxed);
        self.counters
            .failed
            .fetch_add(report.failed() as u64, Ordering::Relaxed);
        tracing::debug!(
            operation,
            entities = report.len(),
            uploaded = report.uploaded(),
            unchanged = report.unchanged(),
            failed = report.failed(),
            "batch ingested"
        );
        Ok(report)
    }

    /// Split entities whose content already matches what is stored
    ///
    /// Checked against this session's uploads, then the target index, then
    /// the baseline index, whose matching records are linked rather than
    /// uploaded again.
    async fn partition_unchanged(
        &self,
        scope: &Scope,
        candidates: Vec<(usize, StoredEntity)>,
    ) -> (Vec<(usize, StoredEntity)>, Vec<(usize, StoredEntity)>) {
        let mut unchanged = Vec::new();
        let mut unknown = Vec::new();
        for (position, stored) in candidates {
            if self.uploaded.get(&stored.uid).await == Some(stored.content_id) {
                unchanged.push((position, stored));
            } else {
                unknown.push((position, stored));
            }
        }
        if unknown.is_empty() {
            return (unchanged, unknown);
        }

        let uids: Vec<Uid> = unknown.iter().map(|(_, stored)| stored.uid.clone()).collect();
        let stored_ids = self.lookup_content_ids(&scope.index, &uids).await;
        let mut changed = Vec::with_capacity(unknown.len());
        for ((position, stored), existing) in unknown.into_iter().zip(stored_ids) {
            if existing == Some(stored.content_id) {
                self.uploaded
                    .insert(stored.uid.clone(), stored.content_id)
                    .await;
                unchanged.push((position, stored));
            } else {
                changed.push((position, stored));
            }
        }

        let changed = match scope.baseline.as_deref() {
            Some(baseline) if !changed.is_empty() => {
                self.carry_over(&scope.index, baseline, changed, &mut unchanged)
                    .await
            }
            _ => changed,
        };
        (unchanged, changed)
    }

    /// Link records that match `baseline`; returns the ones still to upload
    ///
    /// Definitions are never linked: their stored copy depends on which
    /// Adds of this session declare them.
    async fn carry_over(
        &self,
        index: &str,
        baseline: &str,
        candidates: Vec<(usize, StoredEntity)>,
        unchanged: &mut Vec<(usize, StoredEntity)>,
    ) -> Vec<(usize, StoredEntity)> {
        let (eligible, mut changed): (Vec<_>, Vec<_>) = candidates
            .into_iter()
            .partition(|(_, stored)| stored.kind() != EntityKind::Definition);
        if eligible.is_empty() {
            return changed;
        }

        let uids: Vec<Uid> = eligible.iter().map(|(_, stored)| stored.uid.clone()).collect();
        let previous = self.lookup_content_ids(baseline, &uids).await;
        let mut matched = Vec::new();
        for (candidate, existing) in eligible.into_iter().zip(previous) {
            if existing == Some(candidate.1.content_id) {
                matched.push(candidate);
            } else {
                changed.push(candidate);
            }
        }
        if matched.is_empty() {
            return changed;
        }

        let links: Vec<EntityLink> = matched
            .iter()
            .map(|(_, stored)| EntityLink {
                uid: stored.uid.clone(),
                stable_id: stored.stable_id,
            })
            .collect();
        match self
            .config
            .retry
            .run("link_entities", || {
                self.backend.link_entities(index, baseline, &links)
            })
            .await
        {
            Ok(()) => {
                tracing::debug!(baseline, linked = links.len(), "carried unchanged entities over");
                for (position, stored) in matched {
                    self.uploaded
                        .insert(stored.uid.clone(), stored.content_id)
                        .await;
                    unchanged.push((position, stored));
                }
            }
            Err(e) => {
                tracing::warn!(attempts = e.attempts, baseline, "linking failed, uploading instead: {}", e.error);
                changed.extend(matched);
            }
        }
        changed
    }

    /// Content ids stored in `index`; every uid unknown if the lookup fails
    async fn lookup_content_ids(&self, index: &str, uids: &[Uid]) -> Vec<Option<ContentId>> {
        match self
            .config
            .retry
            .run("stored_content_ids", || {
                self.backend.stored_content_ids(index, uids)
            })
            .await
        {
            Ok(ids) if ids.len() == uids.len() => ids,
            Ok(ids) => {
                tracing::warn!(
                    index,
                    expected = uids.len(),
                    returned = ids.len(),
                    "backend returned wrong number of content ids, uploading all"
                );
                vec![None; uids.len()]
            }
            Err(e) => {
                tracing::warn!(index, attempts = e.attempts, "content id lookup failed, uploading all: {}", e.error);
                vec![None; uids.len()]
            }
        }
    }

    /// Store a definition unless a declared copy already did
    ///
    /// A declared copy replaces a referenced one, never the reverse, so the
    /// stored record does not depend on the order Adds run in. Returns
    /// whether anything was uploaded.
    async fn settle_definition(
        &self,
        index: &str,
        stored: &StoredEntity,
        declared: bool,
    ) -> Result<bool, ItemError> {
        let turn = Arc::clone(self.definitions.entry(stored.uid.clone()).or_default().value());
        let mut has_declared = turn.lock().await;
        if *has_declared && !declared {
            return Ok(false);
        }
        let uploaded = if self.uploaded.get(&stored.uid).await == Some(stored.content_id) {
            false
        } else {
            self.upload(index, stored).await?;
            true
        };
        *has_declared |= declared;
        Ok(uploaded)
    }

    async fn upload(&self, index: &str, stored: &StoredEntity) -> Result<(), ItemError> {
        self.config
            .retry
            .run("upload_entity", || self.backend.upload_entity(index, stored))
            .await
            .map_err(|e| ItemError::Upload {
                attempts: e.attempts,
                source: e.error,
            })?;
        self.uploaded
            .insert(stored.uid.clone(), stored.content_id)
            .await;
        Ok(())
    }

    async fn call_backend<F, Fut>(&self, operation: &'static str, f: F) -> Result<(), SessionError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(), BackendError>>,
    {
        self.config
            .retry
            .run(operation, f)
            .await
            .map_err(|Exhausted { attempts, error }| SessionError::Backend {
                operation,
                attempts,
                source: error,
            })
    }
}

impl std::fmt::Debug for IngestionSession {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("IngestionSession")
            .field("backend", &self.backend.name())
            .field("index", &self.index_name())
            .field("state", &self.state())
            .field("progress", &self.progress())
            .field("in_flight", &self.in_flight())
            .finish_non_exhaustive()
    }
}

fn outcome(stored: &StoredEntity, uploaded: bool) -> ItemOutcome {
    ItemOutcome {
        uid: stored.uid.clone(),
        kind: stored.kind(),
        stable_id: stored.stable_id,
        uploaded,
    }
}

fn from_item_error(error: ItemError) -> SessionError {
    match error {
        ItemError::Upload { attempts, source } => SessionError::Backend {
            operation: "upload_entity",
            attempts,
            source,
        },
        ItemError::Content(e) => SessionError::Content(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use cdx_registry::MemoryStore;

    fn session(backend: Arc<MemoryBackend>) -> IngestionSession {
        let registry = Arc::new(StableIdRegistry::with_defaults(Arc::new(MemoryStore::new())));
        IngestionSession::new(registry, backend, SessionConfig::new().with_index_name("idx"))
    }

    #[tokio::test]
    async fn adds_require_initialize() {
        let session = session(Arc::new(MemoryBackend::new()));
        let err = session.add_languages(vec![]).await.unwrap_err();
        assert!(matches!(
            err,
            SessionError::InvalidState {
                state: SessionState::Created,
                ..
            }
        ));
        assert!(matches!(
            session.finalize().await,
            Err(SessionError::InvalidState { .. })
        ));
    }

    #[tokio::test]
    async fn lifecycle_walks_every_state() {
        let backend = Arc::new(MemoryBackend::new());
        let session = session(backend.clone());
        assert_eq!(session.state(), SessionState::Created);

        session
            .initialize(Repository::new("repo"), Commit::new("repo", "c1"))
            .await
            .unwrap();
        assert_eq!(session.state(), SessionState::Initialized);
        assert_eq!(session.index_name(), Some("idx"));
        assert_eq!(backend.repository_name("idx").as_deref(), Some("repo"));

        session
            .add_text_files(vec![SourceFile::new("repo", "a.rs", "a")])
            .await
            .unwrap();
        assert_eq!(session.state(), SessionState::Accepting);

        session.finalize().await.unwrap();
        assert_eq!(session.state(), SessionState::Finalized);
        assert_eq!(session.progress(), FinalizeProgress::Sealed);
        assert!(backend.is_sealed("idx"));
        assert_eq!(session.in_flight(), 0);
    }

    #[tokio::test]
    async fn initialize_twice_is_invalid() {
        let session = session(Arc::new(MemoryBackend::new()));
        session
            .initialize(Repository::new("repo"), Commit::new("repo", "c1"))
            .await
            .unwrap();
        let err = session
            .initialize(Repository::new("repo"), Commit::new("repo", "c1"))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::InvalidState { operation: "initialize", .. }));
    }

    #[tokio::test]
    async fn default_index_name_is_timestamped() {
        let registry = Arc::new(StableIdRegistry::with_defaults(Arc::new(MemoryStore::new())));
        let session = IngestionSession::new(
            registry,
            Arc::new(MemoryBackend::new()),
            SessionConfig::new(),
        );
        session
            .initialize(Repository::new("Org/Repo"), Commit::new("Org/Repo", "c1"))
            .await
            .unwrap();
        let index = session.index_name().unwrap();
        assert!(index.starts_with("org_repo."), "{index}");
        assert_eq!(index.len(), "org_repo.".len() + "yyMMdd.HHmmss".len());
    }

    #[tokio::test]
    async fn commit_file_links_pick_up_file_ids_in_either_order() {
        let backend = Arc::new(MemoryBackend::new());
        let session = session(backend.clone());
        session
            .initialize(Repository::new("repo"), Commit::new("repo", "c1"))
            .await
            .unwrap();

        let early = SourceFile::new("repo", "src/Early.rs", "");
        session.add_text_files(vec![early.clone()]).await.unwrap();
        session
            .add_commit_files(vec![
                CommitFileLink::new("src/early.rs"),
                CommitFileLink::new("src/Late.rs"),
            ])
            .await
            .unwrap();
        let late = SourceFile::new("repo", "SRC/late.rs", "");
        session.add_text_files(vec![late.clone()]).await.unwrap();
        session.finalize().await.unwrap();

        let aggregate_uid = Uid::derive(cdx_model::EntityKind::CommitFiles, &["repo", "c1"]);
        let stored = backend.entity("idx", &aggregate_uid).unwrap();
        let Entity::CommitFiles { files, .. } = stored.entity else {
            panic!("expected commit files aggregate");
        };
        let ids: Vec<_> = files.iter().map(|link| link.file_id.clone()).collect();
        assert_eq!(
            ids,
            vec![
                Some(early.text_uid().to_string()),
                Some(late.text_uid().to_string())
            ]
        );
    }

    #[tokio::test]
    async fn duplicate_entities_in_one_add_are_uploaded_once() {
        let backend = Arc::new(MemoryBackend::new());
        let session = session(backend.clone());
        session
            .initialize(Repository::new("repo"), Commit::new("repo", "c1"))
            .await
            .unwrap();
        let before = backend.upload_count();

        let file = SourceFile::new("repo", "a.rs", "a");
        let report = session
            .add_text_files(vec![file.clone(), file])
            .await
            .unwrap();
        assert_eq!(report.len(), 1);
        assert_eq!(backend.upload_count() - before, 1);
    }

    /// Memory backend that cannot link records between indexes
    struct NoLinks(Arc<MemoryBackend>);

    #[async_trait::async_trait]
    impl StorageBackend for NoLinks {
        async fn add_repository(&self, index: &str, repository_name: &str) -> Result<(), BackendError> {
            self.0.add_repository(index, repository_name).await
        }

        async fn upload_entity(&self, index: &str, entity: &StoredEntity) -> Result<(), BackendError> {
            self.0.upload_entity(index, entity).await
        }

        async fn finalize_repository(&self, index: &str, repository_name: &str) -> Result<(), BackendError> {
            self.0.finalize_repository(index, repository_name).await
        }

        async fn stored_content_ids(
            &self,
            index: &str,
            uids: &[Uid],
        ) -> Result<Vec<Option<ContentId>>, BackendError> {
            self.0.stored_content_ids(index, uids).await
        }

        async fn latest_sealed_index(&self, repository_name: &str) -> Result<Option<String>, BackendError> {
            self.0.latest_sealed_index(repository_name).await
        }
    }

    #[tokio::test]
    async fn baseline_that_cannot_be_linked_falls_back_to_upload() {
        let memory = Arc::new(MemoryBackend::new());
        let registry = Arc::new(StableIdRegistry::with_defaults(Arc::new(MemoryStore::new())));
        let file = SourceFile::new("repo", "a.rs", "a");

        let first = IngestionSession::new(
            Arc::clone(&registry),
            memory.clone(),
            SessionConfig::new().with_index_name("one"),
        );
        first
            .initialize(Repository::new("repo"), Commit::new("repo", "c1"))
            .await
            .unwrap();
        first.add_text_files(vec![file.clone()]).await.unwrap();
        first.finalize().await.unwrap();

        let second = IngestionSession::new(
            registry,
            Arc::new(NoLinks(memory.clone())),
            SessionConfig::new().with_index_name("two"),
        );
        second
            .initialize(Repository::new("repo"), Commit::new("repo", "c2"))
            .await
            .unwrap();
        assert_eq!(
            second.scope.get().and_then(|scope| scope.baseline.as_deref()),
            Some("one")
        );
        let before = memory.upload_count();

        let report = second.add_text_files(vec![file.clone()]).await.unwrap();
        assert_eq!(report.uploaded(), 1);
        assert_eq!(memory.upload_count() - before, 1);
        assert_eq!(memory.linked_count(), 0);
        assert!(memory.entity("two", &file.text_uid()).is_some());
    }
}
