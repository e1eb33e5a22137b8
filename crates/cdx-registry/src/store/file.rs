//! Append-only JSON-lines store

use super::{next_block, DurableStore, IdRange, PutOutcome};
use crate::error::StoreError;
use async_trait::async_trait;
use cdx_model::{StableId, Uid};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// One line of the log
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Record {
    /// Committed mapping
    Map { uid: Uid, id: StableId },
    /// Reservation high water mark
    Reserve { high: i32 },
}

/// File-backed [`DurableStore`]
///
/// Every mutation is appended and fsynced before it becomes visible.
/// Opening replays the log; a torn final line from an interrupted append is
/// discarded. One process may write a given file at a time.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    inner: Mutex<FileInner>,
}

#[derive(Debug)]
struct FileInner {
    file: File,
    mappings: HashMap<Uid, StableId>,
    high_water: i32,
    /// Log length to restore before the next append after a failed one
    rollback_to: Option<u64>,
    #[cfg(test)]
    torn_write_at: Option<usize>,
}

impl FileStore {
    /// Open or create the log at `path`
    ///
    /// # Errors
    /// I/O failures, or [`StoreError::Corrupt`] for an undecodable record
    /// that is not the last line
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let (mappings, high_water, valid_len) = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => replay(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => (HashMap::new(), 0, 0),
            Err(e) => return Err(e.into()),
        };

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        let on_disk = file.metadata().await?.len();
        if on_disk > valid_len {
            tracing::warn!(
                path = %path.display(),
                discarded = on_disk - valid_len,
                "discarding torn tail of store log"
            );
            file.set_len(valid_len).await?;
        }

        tracing::info!(
            path = %path.display(),
            mappings = mappings.len(),
            high_water,
            "opened file store"
        );

        Ok(Self {
            path,
            inner: Mutex::new(FileInner {
                file,
                mappings,
                high_water,
                rollback_to: None,
                #[cfg(test)]
                torn_write_at: None,
            }),
        })
    }

    /// Log location
    #[inline]
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Rebuild state from log contents; returns the byte length of valid records
fn replay(contents: &str) -> Result<(HashMap<Uid, StableId>, i32, u64), StoreError> {
    let mut mappings = HashMap::new();
    let mut high_water = 0;
    let mut valid_len = 0usize;
    let mut lines = contents.split_inclusive('\n').enumerate().peekable();

    while let Some((index, line)) = lines.next() {
        let is_last = lines.peek().is_none();
        let trimmed = line.trim();
        if trimmed.is_empty() {
            valid_len += line.len();
            continue;
        }
        match serde_json::from_str::<Record>(trimmed) {
            Ok(Record::Map { uid, id }) => {
                high_water = high_water.max(id.get());
                mappings.entry(uid).or_insert(id);
            }
            Ok(Record::Reserve { high }) => high_water = high_water.max(high),
            Err(_) if is_last && !line.ends_with('\n') => break,
            Err(e) => {
                return Err(StoreError::Corrupt {
                    record: index + 1,
                    reason: e.to_string(),
                })
            }
        }
        valid_len += line.len();
    }

    Ok((mappings, high_water, valid_len as u64))
}

impl FileInner {
    /// Append records durably, or leave the log as it was
    ///
    /// A failed write may leave part of a record behind. The log is cut back
    /// to its previous length before anything else is appended.
    async fn append(&mut self, records: &[Record]) -> Result<(), StoreError> {
        let mut buf = Vec::new();
        for record in records {
            serde_json::to_writer(&mut buf, record)?;
            buf.push(b'\n');
        }

        self.roll_back().await?;
        let committed = self.file.metadata().await?.len();
        let written = self.write_synced(&buf).await;
        if written.is_err() {
            self.rollback_to = Some(committed);
            if let Err(e) = self.roll_back().await {
                tracing::warn!(len = committed, "cannot truncate failed append yet: {e}");
            }
        }
        written
    }

    async fn roll_back(&mut self) -> Result<(), StoreError> {
        if let Some(len) = self.rollback_to {
            self.file.set_len(len).await?;
            self.file.sync_data().await?;
            self.rollback_to = None;
            tracing::debug!(len, "truncated failed append");
        }
        Ok(())
    }

    async fn write_synced(&mut self, buf: &[u8]) -> Result<(), StoreError> {
        #[cfg(test)]
        if let Some(at) = self.torn_write_at.take() {
            self.file.write_all(&buf[..at.min(buf.len())]).await?;
            self.file.flush().await?;
            return Err(std::io::Error::other("injected torn write").into());
        }
        self.file.write_all(buf).await?;
        self.file.sync_data().await?;
        Ok(())
    }
}

#[async_trait]
impl DurableStore for FileStore {
    async fn get_many(&self, uids: &[Uid]) -> Result<Vec<Option<StableId>>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(uids.iter().map(|uid| inner.mappings.get(uid).copied()).collect())
    }

    async fn put_if_absent(
        &self,
        entries: &[(Uid, StableId)],
    ) -> Result<Vec<PutOutcome>, StoreError> {
        let mut inner = self.inner.lock().await;
        let mut staged: HashMap<&Uid, StableId> = HashMap::new();
        let mut records = Vec::new();
        let mut outcomes = Vec::with_capacity(entries.len());

        for (uid, stable_id) in entries {
            if let Some(existing) = inner.mappings.get(uid).or_else(|| staged.get(uid)) {
                outcomes.push(PutOutcome::Existing(*existing));
                continue;
            }
            staged.insert(uid, *stable_id);
            records.push(Record::Map {
                uid: uid.clone(),
                id: *stable_id,
            });
            outcomes.push(PutOutcome::Inserted);
        }

        if !records.is_empty() {
            inner.append(&records).await?;
            for (uid, stable_id) in staged {
                inner.high_water = inner.high_water.max(stable_id.get());
                inner.mappings.insert(uid.clone(), stable_id);
            }
        }
        Ok(outcomes)
    }

    async fn reserve_ids(&self, count: u32) -> Result<IdRange, StoreError> {
        let mut inner = self.inner.lock().await;
        let (range, high) = next_block(inner.high_water, count)?;
        inner.append(&[Record::Reserve { high }]).await?;
        inner.high_water = high;
        tracing::debug!(first = %range.first, last = %range.last, "reserved id block");
        Ok(range)
    }

    async fn len(&self) -> Result<usize, StoreError> {
        Ok(self.inner.lock().await.mappings.len())
    }

    fn name(&self) -> &'static str {
        "file"
    }
}
