//! UID to stable id resolution
//!
//! Resolution order for each uid in a batch:
//! 1. committed-mapping cache
//! 2. durable store, one batched round trip for all cache misses
//! 3. pending allocation cache (another caller in this process is
//!    allocating the same uid)
//! 4. fresh allocation followed by a durable `put_if_absent`
//!
//! Writes that fail transiently are retried with the same stable id; when
//! retries run out the allocation stays pending and a later caller retries
//! it, still with the same id.

use crate::allocator::{store_failure, IdAllocator};
use crate::config::{PendingPolicy, RegistryConfig};
use crate::error::RegistryError;
use crate::pending::{Claim, PendingAllocationCache, PendingSlot, SlotState, WriteGuard};
use crate::store::{DurableStore, PutOutcome};
use cdx_model::{StableId, Uid};
use moka::future::Cache;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Snapshot of registry counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    /// Uids answered by the durable store
    pub store_hits: u64,
    /// Uids answered by the committed-mapping cache
    pub cache_hits: u64,
    /// Uids that found another caller's allocation in flight
    pub pending_hits: u64,
    /// Fresh stable ids assigned
    pub allocated: u64,
    /// Provisional ids replaced by a different durable mapping
    pub read_repairs: u64,
    /// Extra `put_if_absent` attempts after transient failures
    pub commit_retries: u64,
    /// Allocations currently pending
    pub in_flight: usize,
}

#[derive(Debug, Default)]
struct Counters {
    store_hits: AtomicU64,
    cache_hits: AtomicU64,
    pending_hits: AtomicU64,
    allocated: AtomicU64,
    read_repairs: AtomicU64,
    commit_retries: AtomicU64,
}

impl Counters {
    #[inline]
    fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }
}

/// Uids paired with their pending slots
type SlotList = Vec<(Uid, Arc<PendingSlot>)>;

/// Uids partitioned by a cache and store lookup
struct Lookup {
    resolved: HashMap<Uid, StableId>,
    missing: Vec<Uid>,
}

/// One slot this caller is writing
struct PendingWrite {
    uid: Uid,
    slot: Arc<PendingSlot>,
    guard: WriteGuard,
}

/// Durable UID to stable id registry
///
/// Cheap to share behind an `Arc`; every method takes `&self` and is safe to
/// call concurrently.
///
/// If the process dies between allocating an id and committing it, the
/// allocation is lost and the uid may get a different id after restart. The
/// durable store is the only source of truth.
pub struct StableIdRegistry {
    store: Arc<dyn DurableStore>,
    allocator: IdAllocator,
    pending: PendingAllocationCache,
    committed: Cache<Uid, StableId>,
    config: RegistryConfig,
    counters: Counters,
}

impl StableIdRegistry {
    /// Create registry over `store`
    #[must_use]
    pub fn new(store: Arc<dyn DurableStore>, config: RegistryConfig) -> Self {
        let allocator = IdAllocator::new(Arc::clone(&store), config.id_block_size, config.retry);
        let committed = Cache::builder()
            .max_capacity(config.committed_cache_capacity)
            .build();
        Self {
            store,
            allocator,
            pending: PendingAllocationCache::new(),
            committed,
            config,
            counters: Counters::default(),
        }
    }

    /// Create registry with default configuration
    #[must_use]
    pub fn with_defaults(store: Arc<dyn DurableStore>) -> Self {
        Self::new(store, RegistryConfig::default())
    }

    /// Configuration in use
    #[inline]
    #[must_use]
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Backing store
    #[inline]
    #[must_use]
    pub fn store(&self) -> &Arc<dyn DurableStore> {
        &self.store
    }

    /// Resolve every uid to its stable id, allocating where needed
    ///
    /// The result has one entry per input uid, in input order; duplicates
    /// resolve to the same id.
    ///
    /// # Errors
    /// - [`RegistryError::DurabilityFailure`] if a store round trip kept
    ///   failing; pending allocations keep their ids for the next call
    /// - [`RegistryError::ConsistencyViolation`] if an exposed provisional id
    ///   lost to a different durable mapping
    #[tracing::instrument(skip_all, fields(uids = uids.len()))]
    pub async fn resolve(&self, uids: &[Uid]) -> Result<Vec<StableId>, RegistryError> {
        if uids.is_empty() {
            return Ok(Vec::new());
        }

        let Lookup {
            mut resolved,
            missing,
        } = self.lookup(uids).await?;

        if !missing.is_empty() {
            let (owned, observed) = self.claim_slots(missing, SlotState::Writing).await?;
            let allocated = owned.len();
            resolved.extend(self.write_slots(owned).await?);
            for (uid, slot) in observed {
                let stable_id = self.observe(&uid, slot).await?;
                resolved.insert(uid, stable_id);
            }
            tracing::debug!(allocated, "resolved batch with new allocations");
        }

        in_input_order(uids, &resolved)
    }

    /// Assign ids without writing them durably
    ///
    /// Already-committed uids return their durable ids. New ids stay
    /// pending until [`Self::commit`] (or a waiting [`Self::resolve`]) writes
    /// them.
    ///
    /// # Errors
    /// Store failures while looking up or reserving ids
    #[tracing::instrument(skip_all, fields(uids = uids.len()))]
    pub async fn allocate_provisional(&self, uids: &[Uid]) -> Result<Vec<StableId>, RegistryError> {
        if uids.is_empty() {
            return Ok(Vec::new());
        }

        let Lookup {
            mut resolved,
            missing,
        } = self.lookup(uids).await?;

        if !missing.is_empty() {
            let (owned, observed) = self.claim_slots(missing, SlotState::Reserved).await?;
            for (uid, slot) in owned.into_iter().chain(observed) {
                resolved.insert(uid, expose(&slot));
            }
        }

        in_input_order(uids, &resolved)
    }

    /// Durably write provisional allocations; idempotent
    ///
    /// # Errors
    /// - [`RegistryError::NotFound`] for a uid that was never allocated
    /// - [`RegistryError::DurabilityFailure`] if the write kept failing
    /// - [`RegistryError::ConsistencyViolation`] if the store already maps a
    ///   uid to a different id
    #[tracing::instrument(skip_all, fields(uids = uids.len()))]
    pub async fn commit(&self, uids: &[Uid]) -> Result<(), RegistryError> {
        let mut candidates = Vec::new();
        for uid in unique(uids) {
            if self.committed.get(&uid).await.is_none() {
                candidates.push(uid);
            }
        }

        // No await between taking over a slot and handing it to write_slots
        let mut to_write = Vec::new();
        let mut to_wait = Vec::new();
        let mut unknown = Vec::new();
        for uid in candidates {
            match self.pending.get(&uid) {
                Some(slot) => match slot.state() {
                    SlotState::Committed(_) => {}
                    SlotState::Reserved | SlotState::Stalled if slot.try_begin_write() => {
                        to_write.push((uid, slot));
                    }
                    _ => to_wait.push((uid, slot)),
                },
                None => unknown.push(uid),
            }
        }

        self.write_slots(to_write).await?;
        for (uid, slot) in to_wait {
            self.await_commit(&uid, slot).await?;
        }

        // A slot may have committed between the cache check and the pending check
        let mut unresolved = Vec::new();
        for uid in unknown {
            if self.committed.get(&uid).await.is_none() {
                unresolved.push(uid);
            }
        }
        if !unresolved.is_empty() {
            let found = self.read_store(&unresolved).await?;
            for (uid, found) in unresolved.into_iter().zip(found) {
                match found {
                    Some(stable_id) => self.committed.insert(uid, stable_id).await,
                    None => return Err(RegistryError::NotFound { uid }),
                }
            }
        }
        Ok(())
    }

    /// Committed stable id for `uid`, without allocating
    ///
    /// # Errors
    /// [`RegistryError::NotFound`] if the uid has no durable mapping
    pub async fn lookup_committed(&self, uid: &Uid) -> Result<StableId, RegistryError> {
        let Lookup { resolved, .. } = self.lookup(std::slice::from_ref(uid)).await?;
        resolved
            .get(uid)
            .copied()
            .ok_or_else(|| RegistryError::NotFound { uid: uid.clone() })
    }

    /// Counter snapshot
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        RegistryStats {
            store_hits: load(&self.counters.store_hits),
            cache_hits: load(&self.counters.cache_hits),
            pending_hits: load(&self.counters.pending_hits),
            allocated: load(&self.counters.allocated),
            read_repairs: load(&self.counters.read_repairs),
            commit_retries: load(&self.counters.commit_retries),
            in_flight: self.pending.len(),
        }
    }

    /// Cache, then one batched store read for the misses
    async fn lookup(&self, uids: &[Uid]) -> Result<Lookup, RegistryError> {
        let mut resolved = HashMap::with_capacity(uids.len());
        let mut misses = Vec::new();

        for uid in unique(uids) {
            match self.committed.get(&uid).await {
                Some(stable_id) => {
                    resolved.insert(uid, stable_id);
                }
                None => misses.push(uid),
            }
        }
        Counters::add(&self.counters.cache_hits, resolved.len() as u64);

        let mut missing = Vec::new();
        if !misses.is_empty() {
            let found = self.read_store(&misses).await?;
            for (uid, found) in misses.into_iter().zip(found) {
                match found {
                    Some(stable_id) => {
                        Counters::add(&self.counters.store_hits, 1);
                        self.committed.insert(uid.clone(), stable_id).await;
                        resolved.insert(uid, stable_id);
                    }
                    None => missing.push(uid),
                }
            }
        }

        Ok(Lookup { resolved, missing })
    }

    async fn read_store(&self, uids: &[Uid]) -> Result<Vec<Option<StableId>>, RegistryError> {
        self.config
            .retry
            .run("get_many", || self.store.get_many(uids))
            .await
            .map_err(|e| store_failure("get_many", e))
    }

    /// Split unmapped uids into slots this caller owns and slots others own
    async fn claim_slots(
        &self,
        missing: Vec<Uid>,
        initial: SlotState,
    ) -> Result<(SlotList, SlotList), RegistryError> {
        let mut observed = Vec::new();
        let mut fresh = Vec::new();
        for uid in missing {
            match self.pending.get(&uid) {
                Some(slot) => observed.push((uid, slot)),
                None => fresh.push(uid),
            }
        }

        let mut owned = Vec::with_capacity(fresh.len());
        if !fresh.is_empty() {
            let ids = self.allocator.allocate(fresh.len()).await?;
            let mut lost = Vec::new();
            for (uid, stable_id) in fresh.into_iter().zip(ids) {
                match self.pending.claim(uid.clone(), stable_id, initial) {
                    Claim::Owner(slot) => owned.push((uid, slot)),
                    Claim::Existing(slot) => {
                        lost.push(stable_id);
                        observed.push((uid, slot));
                    }
                }
            }
            self.allocator.release(lost);
        }

        Counters::add(&self.counters.allocated, owned.len() as u64);
        Counters::add(&self.counters.pending_hits, observed.len() as u64);
        Ok((owned, observed))
    }

    /// Durably write slots already in `Writing`, settling each one
    async fn write_slots(
        &self,
        slots: SlotList,
    ) -> Result<Vec<(Uid, StableId)>, RegistryError> {
        if slots.is_empty() {
            return Ok(Vec::new());
        }

        let mut writes: Vec<PendingWrite> = slots
            .into_iter()
            .map(|(uid, slot)| PendingWrite {
                uid,
                guard: WriteGuard::new(Arc::clone(&slot)),
                slot,
            })
            .collect();

        let mut settled = Vec::with_capacity(writes.len());
        let mut first_error = None;

        // Another caller may have committed the uid after our store miss
        let mut batch = Vec::with_capacity(writes.len());
        for write in &mut writes {
            if let Some(stored) = self.committed.get(&write.uid).await {
                match self.settle(write, stored).await {
                    Ok(stable_id) => settled.push((write.uid.clone(), stable_id)),
                    Err(e) => {
                        first_error.get_or_insert(e);
                    }
                }
            } else {
                batch.push((write.uid.clone(), write.slot.stable_id()));
            }
        }

        if !batch.is_empty() {
            let mut attempts = 0u32;
            let result = self
                .config
                .retry
                .run("put_if_absent", || {
                    attempts += 1;
                    self.store.put_if_absent(&batch)
                })
                .await;
            Counters::add(
                &self.counters.commit_retries,
                u64::from(attempts.saturating_sub(1)),
            );

            // On failure the guards stall every slot still being written
            let outcomes = result.map_err(|e| {
                tracing::warn!(
                    uids = batch.len(),
                    attempts = e.attempts,
                    "durable write failed, allocations left pending: {}",
                    e.error
                );
                store_failure("put_if_absent", e)
            })?;

            let mut by_uid: HashMap<&Uid, StableId> = HashMap::with_capacity(batch.len());
            for ((uid, provisional), outcome) in batch.iter().zip(outcomes) {
                let stored = match outcome {
                    PutOutcome::Inserted => *provisional,
                    PutOutcome::Existing(stored) => stored,
                };
                by_uid.insert(uid, stored);
            }

            for write in &mut writes {
                if write.slot.state().is_settled() {
                    continue;
                }
                let Some(stored) = by_uid.get(&write.uid).copied() else {
                    continue;
                };
                match self.settle(write, stored).await {
                    Ok(stable_id) => settled.push((write.uid.clone(), stable_id)),
                    Err(e) => {
                        first_error.get_or_insert(e);
                    }
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(settled),
        }
    }

    /// Publish the durable value for a slot and retire it
    async fn settle(&self, write: &mut PendingWrite, stored: StableId) -> Result<StableId, RegistryError> {
        let provisional = write.slot.stable_id();
        write.slot.complete(stored);
        write.guard.disarm();
        self.committed.insert(write.uid.clone(), stored).await;
        self.pending.remove_committed(&write.uid, &write.slot);

        if stored == provisional {
            return Ok(stored);
        }
        if write.slot.is_exposed() {
            tracing::error!(
                uid = %write.uid,
                %provisional,
                %stored,
                "exposed provisional stable id conflicts with durable mapping"
            );
            return Err(RegistryError::ConsistencyViolation {
                uid: write.uid.clone(),
                expected: provisional,
                observed: stored,
            });
        }

        Counters::add(&self.counters.read_repairs, 1);
        tracing::warn!(
            uid = %write.uid,
            %provisional,
            %stored,
            "read repair: adopting durable mapping"
        );
        self.allocator.release([provisional]);
        Ok(stored)
    }

    /// Handle a slot owned by another caller, per the pending policy
    async fn observe(&self, uid: &Uid, slot: Arc<PendingSlot>) -> Result<StableId, RegistryError> {
        match self.config.pending_policy {
            PendingPolicy::Provisional => Ok(expose(&slot)),
            PendingPolicy::Wait => self.await_commit(uid, slot).await,
        }
    }

    /// Wait for a slot to commit, taking over its write if it stalls
    async fn await_commit(&self, uid: &Uid, slot: Arc<PendingSlot>) -> Result<StableId, RegistryError> {
        loop {
            match slot.settled().await {
                SlotState::Committed(stable_id) => return Ok(stable_id),
                SlotState::Reserved | SlotState::Stalled if slot.try_begin_write() => {
                    tracing::debug!(%uid, stable_id = %slot.stable_id(), "taking over pending write");
                    let mut written = self.write_slots(vec![(uid.clone(), slot)]).await?;
                    return written
                        .pop()
                        .map(|(_, stable_id)| stable_id)
                        .ok_or_else(|| RegistryError::NotFound { uid: uid.clone() });
                }
                _ => {}
            }
        }
    }
}

impl std::fmt::Debug for StableIdRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StableIdRegistry")
            .field("store", &self.store.name())
            .field("allocator", &self.allocator)
            .field("pending", &self.pending.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Hand out a slot's value; the committed value wins if there is one
fn expose(slot: &PendingSlot) -> StableId {
    slot.mark_exposed();
    match slot.state() {
        SlotState::Committed(stable_id) => stable_id,
        _ => slot.stable_id(),
    }
}

fn unique(uids: &[Uid]) -> Vec<Uid> {
    let mut seen = HashSet::with_capacity(uids.len());
    uids.iter()
        .filter(|uid| seen.insert(*uid))
        .cloned()
        .collect()
}

fn in_input_order(
    uids: &[Uid],
    resolved: &HashMap<Uid, StableId>,
) -> Result<Vec<StableId>, RegistryError> {
    uids.iter()
        .map(|uid| {
            resolved
                .get(uid)
                .copied()
                .ok_or_else(|| RegistryError::NotFound { uid: uid.clone() })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::store::{IdRange, MemoryStore};
    use crate::RetryPolicy;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    fn uids(names: &[&str]) -> Vec<Uid> {
        names.iter().map(|name| Uid::new(*name)).collect()
    }

    fn values(ids: &[StableId]) -> Vec<i32> {
        ids.iter().map(|id| id.get()).collect()
    }

    fn registry(store: Arc<dyn DurableStore>) -> StableIdRegistry {
        StableIdRegistry::new(
            store,
            RegistryConfig::new().with_retry(RetryPolicy::new().with_max_attempts(3)),
        )
    }

    /// Fails the first `failures` writes
    struct FailingWrites {
        inner: MemoryStore,
        failures: AtomicU32,
    }

    #[async_trait]
    impl DurableStore for FailingWrites {
        async fn get_many(&self, uids: &[Uid]) -> Result<Vec<Option<StableId>>, StoreError> {
            self.inner.get_many(uids).await
        }

        async fn put_if_absent(
            &self,
            entries: &[(Uid, StableId)],
        ) -> Result<Vec<PutOutcome>, StoreError> {
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err(StoreError::Unavailable("injected".into()));
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

    /// First write never completes; later writes go through
    struct HangingWrite {
        inner: MemoryStore,
        hang: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl DurableStore for HangingWrite {
        async fn get_many(&self, uids: &[Uid]) -> Result<Vec<Option<StableId>>, StoreError> {
            self.inner.get_many(uids).await
        }

        async fn put_if_absent(
            &self,
            entries: &[(Uid, StableId)],
        ) -> Result<Vec<PutOutcome>, StoreError> {
            if self.hang.swap(false, Ordering::SeqCst) {
                std::future::pending::<()>().await;
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

    #[tokio::test]
    async fn empty_batch_resolves_to_empty() {
        let registry = registry(Arc::new(MemoryStore::new()));
        assert!(registry.resolve(&[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn duplicates_share_one_id() {
        let registry = registry(Arc::new(MemoryStore::new()));
        let ids = registry.resolve(&uids(&["a", "b", "a"])).await.unwrap();
        assert_eq!(ids[0], ids[2]);
        assert_ne!(ids[0], ids[1]);
        assert_eq!(registry.stats().allocated, 2);
    }

    #[tokio::test]
    async fn second_resolve_hits_cache() {
        let registry = registry(Arc::new(MemoryStore::new()));
        let first = registry.resolve(&uids(&["a"])).await.unwrap();
        let second = registry.resolve(&uids(&["a"])).await.unwrap();
        assert_eq!(first, second);

        let stats = registry.stats();
        assert_eq!(stats.cache_hits, 1);
        assert_eq!(stats.allocated, 1);
        assert_eq!(stats.in_flight, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_write_retries_with_same_id() {
        let store = Arc::new(FailingWrites {
            inner: MemoryStore::new(),
            failures: AtomicU32::new(4),
        });
        let registry = registry(store.clone());
        let batch = uids(&["a"]);

        // 3 attempts, all fail: allocation stays pending
        let err = registry.resolve(&batch).await.unwrap_err();
        assert!(matches!(err, RegistryError::DurabilityFailure { attempts: 3, .. }));
        assert_eq!(registry.stats().in_flight, 1);
        let pending = registry.pending.get(&batch[0]).unwrap();
        assert_eq!(pending.state(), SlotState::Stalled);
        let provisional = pending.stable_id();

        // Next call takes over the stalled write with the same id
        let ids = registry.resolve(&batch).await.unwrap();
        assert_eq!(ids, vec![provisional]);
        assert_eq!(store.inner.peek(&batch[0]), Some(provisional));
        assert_eq!(registry.stats().allocated, 1);
        assert_eq!(registry.stats().in_flight, 0);
    }

    #[tokio::test]
    async fn read_repair_adopts_foreign_mapping() {
        let store = Arc::new(MemoryStore::new().with_read_lag(Duration::from_secs(3600)));
        // Another process committed "a" but our reads cannot see it yet
        let other = registry(store.clone());
        let foreign = other.resolve(&uids(&["a"])).await.unwrap();

        let local = registry(store.clone());
        let ids = local.resolve(&uids(&["a"])).await.unwrap();
        assert_eq!(ids, foreign);
        assert_eq!(local.stats().read_repairs, 1);
    }

    #[tokio::test]
    async fn exposed_provisional_conflict_is_violation() {
        let store = Arc::new(MemoryStore::new().with_read_lag(Duration::from_secs(3600)));
        let local = registry(store.clone());
        let provisional = local.allocate_provisional(&uids(&["a"])).await.unwrap();

        store.insert(Uid::new("a"), StableId::new(999).unwrap());
        let err = local.commit(&uids(&["a"])).await.unwrap_err();
        match err {
            RegistryError::ConsistencyViolation {
                expected, observed, ..
            } => {
                assert_eq!(expected, provisional[0]);
                assert_eq!(observed.get(), 999);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn provisional_then_commit_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let registry = registry(store.clone());
        let batch = uids(&["a", "b"]);

        let provisional = registry.allocate_provisional(&batch).await.unwrap();
        assert_eq!(store.len().await.unwrap(), 0);

        registry.commit(&batch).await.unwrap();
        registry.commit(&batch).await.unwrap();
        assert_eq!(store.len().await.unwrap(), 2);
        assert_eq!(registry.resolve(&batch).await.unwrap(), provisional);
    }

    #[tokio::test]
    async fn commit_of_unknown_uid_is_not_found() {
        let registry = registry(Arc::new(MemoryStore::new()));
        let err = registry.commit(&uids(&["never"])).await.unwrap_err();
        assert!(matches!(err, RegistryError::NotFound { .. }));
    }

    #[tokio::test]
    async fn provisional_policy_returns_in_flight_value() {
        let registry = StableIdRegistry::new(
            Arc::new(MemoryStore::new()),
            RegistryConfig::new().with_pending_policy(PendingPolicy::Provisional),
        );
        let batch = uids(&["a"]);
        let provisional = registry.allocate_provisional(&batch).await.unwrap();
        assert_eq!(registry.resolve(&batch).await.unwrap(), provisional);
        assert_eq!(registry.stats().pending_hits, 1);
    }

    #[tokio::test]
    async fn lookup_committed_does_not_allocate() {
        let registry = registry(Arc::new(MemoryStore::new()));
        assert!(matches!(
            registry.lookup_committed(&Uid::new("a")).await,
            Err(RegistryError::NotFound { .. })
        ));
        let ids = registry.resolve(&uids(&["a"])).await.unwrap();
        assert_eq!(registry.lookup_committed(&Uid::new("a")).await.unwrap(), ids[0]);
        assert_eq!(registry.stats().allocated, 1);
    }

    #[tokio::test]
    async fn cancelled_writer_is_taken_over_with_the_same_id() {
        let store = Arc::new(HangingWrite {
            inner: MemoryStore::new(),
            hang: std::sync::atomic::AtomicBool::new(true),
        });
        let registry = Arc::new(registry(store.clone()));
        let batch = uids(&["a"]);

        let writer = tokio::spawn({
            let registry = Arc::clone(&registry);
            let batch = batch.clone();
            async move { registry.resolve(&batch).await }
        });
        let slot = loop {
            match registry.pending.get(&batch[0]) {
                Some(slot) if slot.state() == SlotState::Writing => break slot,
                _ => tokio::task::yield_now().await,
            }
        };
        let provisional = slot.stable_id();

        let waiter = tokio::spawn({
            let registry = Arc::clone(&registry);
            let batch = batch.clone();
            async move { registry.resolve(&batch).await }
        });
        tokio::task::yield_now().await;
        writer.abort();
        assert!(writer.await.unwrap_err().is_cancelled());

        assert_eq!(waiter.await.unwrap().unwrap(), vec![provisional]);
        assert_eq!(store.inner.peek(&batch[0]), Some(provisional));
        assert_eq!(registry.stats().allocated, 1);
        assert_eq!(registry.stats().in_flight, 0);
    }
}
