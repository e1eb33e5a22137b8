//! Durable UID to stable id storage
//!
//! The store is the sole source of truth for committed mappings. It also
//! hands out blocks of fresh ids so that registries sharing one store never
//! issue the same value twice.

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use crate::error::StoreError;
use async_trait::async_trait;
use cdx_model::{StableId, Uid};

/// Result of writing one mapping with [`DurableStore::put_if_absent`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// Mapping was written
    Inserted,
    /// Uid was already mapped; the stored value wins
    Existing(StableId),
}

/// Inclusive block of reserved stable ids
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdRange {
    /// First id in the block
    pub first: StableId,
    /// Last id in the block
    pub last: StableId,
}

impl IdRange {
    /// Number of ids in the block
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        usize::try_from(i64::from(self.last.get()) - i64::from(self.first.get()) + 1).unwrap_or(0)
    }

    /// Always false; a block holds at least one id
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.last < self.first
    }

    /// Ids in ascending order
    pub fn ids(&self) -> impl Iterator<Item = StableId> {
        (self.first.get()..=self.last.get()).filter_map(StableId::new)
    }
}

/// Reserve `count` ids above `high_water`; returns the block and the new mark
pub(crate) fn next_block(high_water: i32, count: u32) -> Result<(IdRange, i32), StoreError> {
    let count = i32::try_from(count.max(1)).map_err(|_| StoreError::IdSpaceExhausted)?;
    let last = high_water
        .checked_add(count)
        .ok_or(StoreError::IdSpaceExhausted)?;
    let first = StableId::new(high_water + 1).ok_or(StoreError::IdSpaceExhausted)?;
    let last_id = StableId::new(last).ok_or(StoreError::IdSpaceExhausted)?;
    Ok((
        IdRange {
            first,
            last: last_id,
        },
        last,
    ))
}

/// Persistent UID to stable id map
///
/// Implementations must make `put_if_absent` atomic per uid and must never
/// return a block from `reserve_ids` that overlaps an earlier one.
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Batched lookup, one result per input uid in input order
    async fn get_many(&self, uids: &[Uid]) -> Result<Vec<Option<StableId>>, StoreError>;

    /// Write mappings that do not exist yet, one outcome per entry
    async fn put_if_absent(&self, entries: &[(Uid, StableId)])
        -> Result<Vec<PutOutcome>, StoreError>;

    /// Durably reserve a block of at least `count` unused ids
    async fn reserve_ids(&self, count: u32) -> Result<IdRange, StoreError>;

    /// Number of committed mappings
    async fn len(&self) -> Result<usize, StoreError>;

    /// Short name for logs
    fn name(&self) -> &'static str {
        "store"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_block_starts_above_high_water() {
        let (range, high) = next_block(0, 20).unwrap();
        assert_eq!(range.first.get(), 1);
        assert_eq!(range.last.get(), 20);
        assert_eq!(range.len(), 20);
        assert_eq!(high, 20);

        let (range, _) = next_block(high, 5).unwrap();
        assert_eq!(range.ids().map(StableId::get).collect::<Vec<_>>(), vec![21, 22, 23, 24, 25]);
    }

    #[test]
    fn next_block_detects_exhaustion() {
        assert!(matches!(
            next_block(i32::MAX - 1, 2),
            Err(StoreError::IdSpaceExhausted)
        ));
        let (range, high) = next_block(i32::MAX - 1, 1).unwrap();
        assert_eq!(range.len(), 1);
        assert_eq!(high, i32::MAX);
    }
}
