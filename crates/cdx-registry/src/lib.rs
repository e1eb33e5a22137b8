//! CDX Registry
//!
//! Maps content-independent [`Uid`](cdx_model::Uid)s to compact, durable
//! [`StableId`](cdx_model::StableId)s.
//!
//! # Core Concepts
//!
//! - [`StableIdRegistry`]: resolves batches of uids, allocating ids for
//!   unseen ones
//! - [`DurableStore`]: the source of truth for committed mappings and id
//!   reservations ([`MemoryStore`], [`FileStore`])
//! - [`PendingAllocationCache`]: coordinates callers in one process that
//!   race on the same uid
//!
//! # Example
//!
//! ```rust
//! use cdx_model::Uid;
//! use cdx_registry::{MemoryStore, StableIdRegistry};
//! use std::sync::Arc;
//!
//! # tokio_test_runtime(async {
//! let registry = StableIdRegistry::with_defaults(Arc::new(MemoryStore::new()));
//!
//! let first = registry.resolve(&[Uid::new("a"), Uid::new("b")]).await.unwrap();
//! let second = registry.resolve(&[Uid::new("b"), Uid::new("c")]).await.unwrap();
//! assert_eq!(first[1], second[0]);
//! # });
//! # fn tokio_test_runtime(f: impl std::future::Future<Output = ()>) {
//! #     tokio::runtime::Builder::new_current_thread()
//! #         .enable_all()
//! #         .build()
//! #         .unwrap()
//! #         .block_on(f);
//! # }
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

mod allocator;
mod config;
mod error;
mod pending;
mod registry;
mod retry;
pub mod store;

// Re-exports
pub use allocator::IdAllocator;
pub use config::{PendingPolicy, RegistryConfig, StoreConfig};
pub use error::{RegistryError, Retryable, StoreError};
pub use pending::{Claim, PendingAllocationCache, PendingSlot, SlotState};
pub use registry::{RegistryStats, StableIdRegistry};
pub use retry::{Exhausted, RetryPolicy};
pub use store::{DurableStore, FileStore, IdRange, MemoryStore, PutOutcome};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
