//! In-flight allocations not yet durably committed
//!
//! Each uid being allocated owns one [`PendingSlot`]. The slot is a small
//! state machine driven by compare-and-set transitions:
//!
//! ```text
//! Reserved ──┐
//!            ├─► Writing ──► Committed(id)
//! Stalled ◄──┘      │
//!    ▲              │ retries exhausted / writer dropped
//!    └──────────────┘
//! ```
//!
//! The first caller to insert a slot for a uid becomes its writer. Later
//! callers either wait on the slot's watch channel or take the provisional
//! value. Slots are removed only once committed.

use cdx_model::{StableId, Uid};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

/// Lifecycle of a pending allocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Handed out provisionally, no durable write started
    Reserved,
    /// A caller is writing the mapping
    Writing,
    /// Last write attempt failed or its writer went away
    Stalled,
    /// Durable; carries the stored value
    Committed(StableId),
}

impl SlotState {
    /// True unless a write is in progress
    #[inline]
    #[must_use]
    pub fn is_settled(self) -> bool {
        !matches!(self, Self::Writing)
    }
}

/// Allocation record for one uid
#[derive(Debug)]
pub struct PendingSlot {
    stable_id: StableId,
    exposed: AtomicBool,
    state: watch::Sender<SlotState>,
}

impl PendingSlot {
    fn new(stable_id: StableId, state: SlotState) -> Self {
        let (state, _) = watch::channel(state);
        Self {
            stable_id,
            exposed: AtomicBool::new(false),
            state,
        }
    }

    /// Provisionally allocated value
    #[inline]
    #[must_use]
    pub fn stable_id(&self) -> StableId {
        self.stable_id
    }

    /// Current state
    #[inline]
    #[must_use]
    pub fn state(&self) -> SlotState {
        *self.state.borrow()
    }

    /// Record that the provisional value left the registry
    ///
    /// Callers must check [`Self::state`] after marking: a slot committed
    /// in between must hand out the committed value instead.
    #[inline]
    pub fn mark_exposed(&self) {
        self.exposed.store(true, Ordering::SeqCst);
    }

    /// Whether the provisional value was ever handed out
    #[inline]
    #[must_use]
    pub fn is_exposed(&self) -> bool {
        self.exposed.load(Ordering::SeqCst)
    }

    /// `Reserved | Stalled -> Writing`; true if this caller won
    pub fn try_begin_write(&self) -> bool {
        self.state.send_if_modified(|state| {
            if matches!(state, SlotState::Reserved | SlotState::Stalled) {
                *state = SlotState::Writing;
                true
            } else {
                false
            }
        })
    }

    /// `Writing -> Stalled`
    pub fn stall(&self) -> bool {
        self.state.send_if_modified(|state| {
            if matches!(state, SlotState::Writing) {
                *state = SlotState::Stalled;
                true
            } else {
                false
            }
        })
    }

    /// `Writing -> Committed(id)`
    pub fn complete(&self, stable_id: StableId) {
        self.state.send_if_modified(|state| {
            if matches!(state, SlotState::Committed(_)) {
                false
            } else {
                *state = SlotState::Committed(stable_id);
                true
            }
        });
    }

    /// Wait until no write is in progress
    pub async fn settled(&self) -> SlotState {
        let mut rx = self.state.subscribe();
        let settled = match rx.wait_for(|state| state.is_settled()).await {
            Ok(state) => *state,
            // The sender lives in `self`, so the channel cannot close here
            Err(_) => self.state(),
        };
        settled
    }
}

/// Outcome of [`PendingAllocationCache::claim`]
#[derive(Debug)]
pub enum Claim {
    /// Caller inserted the slot and owns its first write
    Owner(Arc<PendingSlot>),
    /// Another caller's slot was already present
    Existing(Arc<PendingSlot>),
}

/// Concurrent map of in-flight allocations
#[derive(Debug, Default)]
pub struct PendingAllocationCache {
    slots: DashMap<Uid, Arc<PendingSlot>>,
}

impl PendingAllocationCache {
    /// Create empty cache
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Slot for `uid`, if one is in flight
    #[must_use]
    pub fn get(&self, uid: &Uid) -> Option<Arc<PendingSlot>> {
        self.slots.get(uid).map(|slot| Arc::clone(slot.value()))
    }

    /// Insert a slot for `uid` unless one exists
    pub fn claim(&self, uid: Uid, stable_id: StableId, initial: SlotState) -> Claim {
        match self.slots.entry(uid) {
            Entry::Occupied(existing) => Claim::Existing(Arc::clone(existing.get())),
            Entry::Vacant(vacant) => {
                let slot = Arc::new(PendingSlot::new(stable_id, initial));
                vacant.insert(Arc::clone(&slot));
                Claim::Owner(slot)
            }
        }
    }

    /// Remove `slot` once committed; a newer slot for the same uid stays
    pub fn remove_committed(&self, uid: &Uid, slot: &Arc<PendingSlot>) -> bool {
        self.slots
            .remove_if(uid, |_, current| {
                Arc::ptr_eq(current, slot) && matches!(current.state(), SlotState::Committed(_))
            })
            .is_some()
    }

    /// Number of in-flight allocations
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// No allocations in flight
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Stalls the slot if dropped while armed
///
/// Held by the writer for the duration of a durable write so that a
/// cancelled writer leaves the slot open for takeover.
#[derive(Debug)]
pub(crate) struct WriteGuard {
    slot: Arc<PendingSlot>,
    armed: bool,
}

impl WriteGuard {
    pub(crate) fn new(slot: Arc<PendingSlot>) -> Self {
        Self { slot, armed: true }
    }

    pub(crate) fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for WriteGuard {
    fn drop(&mut self) {
        if self.armed && self.slot.stall() {
            tracing::debug!(stable_id = %self.slot.stable_id(), "pending write abandoned");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn id(value: i32) -> StableId {
        StableId::new(value).unwrap()
    }

    #[test]
    fn first_claim_wins() {
        let cache = PendingAllocationCache::new();
        let uid = Uid::new("a");

        let Claim::Owner(owner) = cache.claim(uid.clone(), id(1), SlotState::Writing) else {
            panic!("first claim must own the slot");
        };
        let Claim::Existing(seen) = cache.claim(uid.clone(), id(2), SlotState::Writing) else {
            panic!("second claim must observe the slot");
        };
        assert!(Arc::ptr_eq(&owner, &seen));
        assert_eq!(seen.stable_id(), id(1));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn removal_requires_commit() {
        let cache = PendingAllocationCache::new();
        let uid = Uid::new("a");
        let Claim::Owner(slot) = cache.claim(uid.clone(), id(1), SlotState::Writing) else {
            panic!("expected owner");
        };

        assert!(!cache.remove_committed(&uid, &slot));
        slot.complete(id(1));
        assert!(cache.remove_committed(&uid, &slot));
        assert!(cache.is_empty());
    }

    #[test]
    fn takeover_only_from_reserved_or_stalled() {
        let cache = PendingAllocationCache::new();
        let Claim::Owner(slot) = cache.claim(Uid::new("a"), id(1), SlotState::Reserved) else {
            panic!("expected owner");
        };

        assert!(slot.try_begin_write());
        assert!(!slot.try_begin_write());
        assert!(slot.stall());
        assert!(slot.try_begin_write());
        slot.complete(id(1));
        assert!(!slot.try_begin_write());
        assert!(!slot.stall());
    }

    #[test]
    fn dropped_guard_stalls_slot() {
        let cache = PendingAllocationCache::new();
        let Claim::Owner(slot) = cache.claim(Uid::new("a"), id(1), SlotState::Writing) else {
            panic!("expected owner");
        };

        drop(WriteGuard::new(Arc::clone(&slot)));
        assert_eq!(slot.state(), SlotState::Stalled);

        assert!(slot.try_begin_write());
        let mut guard = WriteGuard::new(Arc::clone(&slot));
        slot.complete(id(1));
        guard.disarm();
        drop(guard);
        assert_eq!(slot.state(), SlotState::Committed(id(1)));
    }

    #[tokio::test]
    async fn waiters_wake_on_commit() {
        let cache = Arc::new(PendingAllocationCache::new());
        let Claim::Owner(slot) = cache.claim(Uid::new("a"), id(3), SlotState::Writing) else {
            panic!("expected owner");
        };

        let waiter = {
            let slot = Arc::clone(&slot);
            tokio::spawn(async move { slot.settled().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        slot.complete(id(3));

        assert_eq!(waiter.await.unwrap(), SlotState::Committed(id(3)));
    }

    #[tokio::test]
    async fn waiters_wake_when_writer_goes_away() {
        let cache = PendingAllocationCache::new();
        let Claim::Owner(slot) = cache.claim(Uid::new("a"), id(4), SlotState::Writing) else {
            panic!("expected owner");
        };
        let guard = WriteGuard::new(Arc::clone(&slot));

        let waiter = {
            let slot = Arc::clone(&slot);
            tokio::spawn(async move { slot.settled().await })
        };
        tokio::task::yield_now().await;
        drop(guard);

        assert_eq!(waiter.await.unwrap(), SlotState::Stalled);
        assert_eq!(slot.settled().await, SlotState::Stalled);
    }
}
