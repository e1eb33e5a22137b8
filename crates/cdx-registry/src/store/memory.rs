//! Process-local store

use super::{next_block, DurableStore, IdRange, PutOutcome};
use crate::error::StoreError;
use async_trait::async_trait;
use cdx_model::{StableId, Uid};
use parking_lot::Mutex;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

/// In-memory [`DurableStore`]
///
/// Share one instance behind an `Arc` between several registries to model
/// processes writing to the same backing store. An optional read lag hides
/// mappings younger than the lag from `get_many`, like an eventually
/// consistent search index.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
    read_lag: Option<Duration>,
}

#[derive(Debug, Default)]
struct MemoryInner {
    mappings: HashMap<Uid, (StableId, Instant)>,
    high_water: i32,
}

impl MemoryStore {
    /// Create empty store
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Hide writes from readers for `lag` after they happen
    #[inline]
    #[must_use]
    pub fn with_read_lag(mut self, lag: Duration) -> Self {
        self.read_lag = Some(lag);
        self
    }

    /// Seed a mapping directly, bypassing reservation
    ///
    /// Raises the reservation mark above `stable_id`.
    pub fn insert(&self, uid: Uid, stable_id: StableId) {
        let mut inner = self.inner.lock();
        inner.high_water = inner.high_water.max(stable_id.get());
        inner.mappings.insert(uid, (stable_id, Instant::now()));
    }

    /// Committed mapping regardless of read lag
    #[must_use]
    pub fn peek(&self, uid: &Uid) -> Option<StableId> {
        self.inner.lock().mappings.get(uid).map(|(id, _)| *id)
    }

    /// Current reservation high water mark
    #[must_use]
    pub fn high_water(&self) -> i32 {
        self.inner.lock().high_water
    }
}

#[async_trait]
impl DurableStore for MemoryStore {
    async fn get_many(&self, uids: &[Uid]) -> Result<Vec<Option<StableId>>, StoreError> {
        let inner = self.inner.lock();
        let now = Instant::now();
        Ok(uids
            .iter()
            .map(|uid| {
                inner.mappings.get(uid).and_then(|(id, written)| match self.read_lag {
                    Some(lag) if now.duration_since(*written) < lag => None,
                    _ => Some(*id),
                })
            })
            .collect())
    }

    async fn put_if_absent(
        &self,
        entries: &[(Uid, StableId)],
    ) -> Result<Vec<PutOutcome>, StoreError> {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        Ok(entries
            .iter()
            .map(|(uid, stable_id)| match inner.mappings.entry(uid.clone()) {
                Entry::Occupied(existing) => PutOutcome::Existing(existing.get().0),
                Entry::Vacant(slot) => {
                    slot.insert((*stable_id, now));
                    PutOutcome::Inserted
                }
            })
            .collect())
    }

    async fn reserve_ids(&self, count: u32) -> Result<IdRange, StoreError> {
        let mut inner = self.inner.lock();
        let (range, high_water) = next_block(inner.high_water, count)?;
        inner.high_water = high_water;
        Ok(range)
    }

    async fn len(&self) -> Result<usize, StoreError> {
        Ok(self.inner.lock().mappings.len())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(value: i32) -> StableId {
        StableId::new(value).unwrap()
    }

    #[tokio::test]
    async fn put_if_absent_keeps_first_value() {
        let store = MemoryStore::new();
        let uid = Uid::new("a");

        let first = store.put_if_absent(&[(uid.clone(), id(1))]).await.unwrap();
        assert_eq!(first, vec![PutOutcome::Inserted]);

        let second = store.put_if_absent(&[(uid.clone(), id(9))]).await.unwrap();
        assert_eq!(second, vec![PutOutcome::Existing(id(1))]);

        assert_eq!(store.get_many(&[uid]).await.unwrap(), vec![Some(id(1))]);
        assert_eq!(store.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn reservations_never_overlap_seeded_ids() {
        let store = MemoryStore::new();
        store.insert(Uid::new("seed"), id(7));

        let block = store.reserve_ids(3).await.unwrap();
        assert_eq!(block.first, id(8));
        assert_eq!(block.last, id(10));
        assert_eq!(store.high_water(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn read_lag_hides_fresh_writes() {
        let store = MemoryStore::new().with_read_lag(Duration::from_millis(100));
        let uid = Uid::new("lagging");
        store.put_if_absent(&[(uid.clone(), id(1))]).await.unwrap();

        assert_eq!(store.get_many(&[uid.clone()]).await.unwrap(), vec![None]);
        assert_eq!(store.peek(&uid), Some(id(1)));

        tokio::time::advance(Duration::from_millis(150)).await;
        assert_eq!(store.get_many(&[uid]).await.unwrap(), vec![Some(id(1))]);
    }
}
