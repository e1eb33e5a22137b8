//! Fresh stable ids handed out from durably reserved blocks

use crate::error::{RegistryError, StoreError};
use crate::retry::{Exhausted, RetryPolicy};
use crate::store::DurableStore;
use cdx_model::StableId;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// Block-based id allocator
///
/// Ids come only from blocks the store has durably reserved, so a value is
/// never issued twice, even across restarts. Issue order is strictly
/// increasing: a released id is handed out again only if no higher id was
/// issued after it, otherwise it becomes a gap.
pub struct IdAllocator {
    store: Arc<dyn DurableStore>,
    block_size: u32,
    retry: RetryPolicy,
    queue: Mutex<Queue>,
}

#[derive(Debug, Default)]
struct Queue {
    free: VecDeque<StableId>,
    /// Bound on every id issued and not released
    issued_high: i32,
}

impl IdAllocator {
    /// Create allocator over `store`
    #[must_use]
    pub fn new(store: Arc<dyn DurableStore>, block_size: u32, retry: RetryPolicy) -> Self {
        Self {
            store,
            block_size: block_size.max(1),
            retry,
            queue: Mutex::new(Queue::default()),
        }
    }

    /// Take `count` unused ids
    ///
    /// # Errors
    /// [`RegistryError::DurabilityFailure`] if reserving a new block keeps
    /// failing
    pub async fn allocate(&self, count: usize) -> Result<Vec<StableId>, RegistryError> {
        let mut ids = Vec::with_capacity(count);
        loop {
            {
                let mut queue = self.queue.lock();
                while ids.len() < count {
                    match queue.free.pop_front() {
                        Some(id) => {
                            queue.issued_high = queue.issued_high.max(id.get());
                            ids.push(id);
                        }
                        None => break,
                    }
                }
            }
            if ids.len() == count {
                return Ok(ids);
            }

            let wanted = u32::try_from(count - ids.len())
                .unwrap_or(u32::MAX)
                .max(self.block_size);
            let block = self
                .retry
                .run("reserve_ids", || self.store.reserve_ids(wanted))
                .await
                .map_err(|e| store_failure("reserve_ids", e))?;
            tracing::debug!(
                store = self.store.name(),
                first = %block.first,
                last = %block.last,
                "reserved id block"
            );
            self.queue.lock().free.extend(block.ids());
        }
    }

    /// Return ids that were allocated but never exposed
    ///
    /// Only ids at the top of what has been issued are queued again; the
    /// rest are dropped so later allocations stay above every issued id.
    pub fn release(&self, ids: impl IntoIterator<Item = StableId>) {
        let mut ids: Vec<StableId> = ids.into_iter().collect();
        ids.sort_unstable_by(|a, b| b.cmp(a));
        ids.dedup();

        let mut queue = self.queue.lock();
        let mut gaps = 0usize;
        for id in ids {
            if id.get() == queue.issued_high {
                queue.free.push_front(id);
                queue.issued_high = id.get() - 1;
            } else {
                gaps += 1;
            }
        }
        if gaps > 0 {
            tracing::debug!(gaps, "released ids below the issue mark left as gaps");
        }
    }

    /// Ids reserved locally and not yet handed out
    #[must_use]
    pub fn available(&self) -> usize {
        self.queue.lock().free.len()
    }
}

impl std::fmt::Debug for IdAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdAllocator")
            .field("store", &self.store.name())
            .field("block_size", &self.block_size)
            .field("available", &self.available())
            .finish_non_exhaustive()
    }
}

/// Map exhausted store retries to the registry error callers see
pub(crate) fn store_failure(operation: &'static str, exhausted: Exhausted<StoreError>) -> RegistryError {
    use crate::error::Retryable;

    if exhausted.error.is_retryable() {
        RegistryError::DurabilityFailure {
            operation,
            attempts: exhausted.attempts,
            source: exhausted.error,
        }
    } else {
        RegistryError::Store(exhausted.error)
    }
}
