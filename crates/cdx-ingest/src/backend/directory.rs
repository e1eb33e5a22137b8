//! Filesystem backend: one JSON document per entity
//!
//! ```text
//! <root>/<index>/repository.json
//! <root>/<index>/<kind prefix>/<uid digest>.json
//! <root>/<index>/sealed.json
//! ```

use super::{EntityLink, StorageBackend};
use crate::error::BackendError;
use async_trait::async_trait;
use cdx_model::{ContentId, StoredEntity, Uid};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const REPOSITORY_FILE: &str = "repository.json";
const SEALED_FILE: &str = "sealed.json";

#[derive(Debug, Serialize, Deserialize)]
struct RepositoryMarker {
    repository_name: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct SealMarker {
    repository_name: String,
    #[serde(default)]
    sealed_at: Option<DateTime<Utc>>,
}

/// Leading fields of a stored entity document
#[derive(Debug, Deserialize)]
struct StoredHeader {
    content_id: ContentId,
}

/// [`StorageBackend`] writing JSON files under a root directory
#[derive(Debug, Clone)]
pub struct DirectoryBackend {
    root: PathBuf,
}

impl DirectoryBackend {
    /// Create backend rooted at `root` (created on first use)
    #[inline]
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory
    #[inline]
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory of `index`
    ///
    /// # Errors
    /// [`BackendError::InvalidIndexName`] for names that would escape the root
    pub fn index_dir(&self, index: &str) -> Result<PathBuf, BackendError> {
        if index.is_empty()
            || index == "."
            || index == ".."
            || index.contains(['/', '\\'])
        {
            return Err(BackendError::InvalidIndexName(index.to_string()));
        }
        Ok(self.root.join(index))
    }

    /// Location of the document for `uid`
    ///
    /// # Errors
    /// Same as [`Self::index_dir`]
    pub fn entity_path(&self, index: &str, uid: &Uid) -> Result<PathBuf, BackendError> {
        let (prefix, digest) = uid.as_str().split_once(':').unwrap_or(("other", uid.as_str()));
        Ok(self
            .index_dir(index)?
            .join(file_safe(prefix))
            .join(format!("{}.json", file_safe(digest))))
    }

    /// Whether `index` was finalized
    ///
    /// # Errors
    /// I/O failures
    pub async fn is_sealed(&self, index: &str) -> Result<bool, BackendError> {
        Ok(tokio::fs::try_exists(self.index_dir(index)?.join(SEALED_FILE)).await?)
    }

    async fn ensure_open(&self, index: &str) -> Result<PathBuf, BackendError> {
        let dir = self.index_dir(index)?;
        if !tokio::fs::try_exists(dir.join(REPOSITORY_FILE)).await? {
            return Err(BackendError::UnknownIndex(index.to_string()));
        }
        if tokio::fs::try_exists(dir.join(SEALED_FILE)).await? {
            return Err(BackendError::Sealed(index.to_string()));
        }
        Ok(dir)
    }
}

async fn read_seal(dir: &Path) -> Result<Option<SealMarker>, BackendError> {
    match tokio::fs::read(dir.join(SEALED_FILE)).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn file_safe(value: &str) -> String {
    value
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Write via a temporary sibling and rename, so readers never see a torn file
async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), BackendError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

#[async_trait]
impl StorageBackend for DirectoryBackend {
    async fn add_repository(&self, index: &str, repository_name: &str) -> Result<(), BackendError> {
        let dir = self.index_dir(index)?;
        if tokio::fs::try_exists(dir.join(SEALED_FILE)).await? {
            return Err(BackendError::Sealed(index.to_string()));
        }
        let marker = serde_json::to_vec_pretty(&RepositoryMarker {
            repository_name: repository_name.to_string(),
        })?;
        write_atomic(&dir.join(REPOSITORY_FILE), &marker).await?;
        tracing::debug!(index, path = %dir.display(), "registered repository index");
        Ok(())
    }

    async fn upload_entity(&self, index: &str, entity: &StoredEntity) -> Result<(), BackendError> {
        self.ensure_open(index).await?;
        let path = self.entity_path(index, &entity.uid)?;
        let document = serde_json::to_vec(entity)?;
        write_atomic(&path, &document).await
    }

    async fn finalize_repository(
        &self,
        index: &str,
        repository_name: &str,
    ) -> Result<(), BackendError> {
        let dir = self.index_dir(index)?;
        if !tokio::fs::try_exists(dir.join(REPOSITORY_FILE)).await? {
            return Err(BackendError::UnknownIndex(index.to_string()));
        }
        if tokio::fs::try_exists(dir.join(SEALED_FILE)).await? {
            return Ok(());
        }
        let marker = serde_json::to_vec_pretty(&SealMarker {
            repository_name: repository_name.to_string(),
            sealed_at: Some(Utc::now()),
        })?;
        write_atomic(&dir.join(SEALED_FILE), &marker).await
    }

    async fn stored_content_ids(
        &self,
        index: &str,
        uids: &[Uid],
    ) -> Result<Vec<Option<ContentId>>, BackendError> {
        let mut found = Vec::with_capacity(uids.len());
        for uid in uids {
            let path = self.entity_path(index, uid)?;
            let content_id = match tokio::fs::read(&path).await {
                Ok(bytes) => Some(serde_json::from_slice::<StoredHeader>(&bytes)?.content_id),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
                Err(e) => return Err(e.into()),
            };
            found.push(content_id);
        }
        Ok(found)
    }

    async fn latest_sealed_index(
        &self,
        repository_name: &str,
    ) -> Result<Option<String>, BackendError> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let mut latest: Option<(Option<DateTime<Utc>>, String)> = None;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            let Some(seal) = read_seal(&entry.path()).await? else {
                continue;
            };
            if seal.repository_name != repository_name {
                continue;
            }
            let candidate = (seal.sealed_at, name);
            if latest.as_ref().map_or(true, |current| candidate > *current) {
                latest = Some(candidate);
            }
        }
        Ok(latest.map(|(_, name)| name))
    }

    async fn link_entities(
        &self,
        index: &str,
        source_index: &str,
        links: &[EntityLink],
    ) -> Result<(), BackendError> {
        self.ensure_open(index).await?;
        for link in links {
            let source = self.entity_path(source_index, &link.uid)?;
            let mut copy: StoredEntity = match tokio::fs::read(&source).await {
                Ok(bytes) => serde_json::from_slice(&bytes)?,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    return Err(BackendError::Rejected {
                        uid: link.uid.clone(),
                        reason: format!("not stored in {source_index}"),
                    })
                }
                Err(e) => return Err(e.into()),
            };
            copy.stable_id = link.stable_id;
            let document = serde_json::to_vec(&copy)?;
            write_atomic(&self.entity_path(index, &link.uid)?, &document).await?;
        }
        tracing::debug!(index, source_index, count = links.len(), "linked entities");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "directory"
    }
}
