//! CDX Ingest
//!
//! Incremental ingestion of one analyzed repository commit into a storage
//! backend.
//!
//! # Core Concepts
//!
//! - [`IngestionSession`]: lifecycle of one (repository, commit, index) scope
//! - [`StorageBackend`]: where stored entities go ([`MemoryBackend`],
//!   [`DirectoryBackend`])
//! - [`BatchReport`]: per-entity outcome of an Add operation
//! - [`IngestConfig`]: TOML configuration of registry, session, store and
//!   backend
//!
//! # Example
//!
//! ```rust
//! use cdx_ingest::{IngestionSession, MemoryBackend, SessionConfig};
//! use cdx_model::{Commit, Repository, SourceFile};
//! use cdx_registry::{MemoryStore, StableIdRegistry};
//! use std::sync::Arc;
//!
//! # tokio_test_runtime(async {
//! let registry = Arc::new(StableIdRegistry::with_defaults(Arc::new(MemoryStore::new())));
//! let backend = Arc::new(MemoryBackend::new());
//! let session = IngestionSession::new(registry, backend.clone(), SessionConfig::new());
//!
//! session.initialize(Repository::new("codex"), Commit::new("codex", "abc123")).await.unwrap();
//! let report = session
//!     .add_text_files(vec![SourceFile::new("codex", "README.md", "# codex")])
//!     .await
//!     .unwrap();
//! assert!(report.is_success());
//! session.finalize().await.unwrap();
//! assert!(backend.is_sealed(session.index_name().unwrap()));
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

pub mod backend;
mod config;
mod error;
mod expand;
mod report;
mod session;

// Re-exports
pub use backend::{BackendEvent, DirectoryBackend, EntityLink, MemoryBackend, StorageBackend};
pub use config::{BackendConfig, IngestConfig, SessionConfig};
pub use error::{BackendError, ConfigError, ItemError, ItemFailure, SessionError};
pub use report::{BatchReport, ItemOutcome};
pub use session::{FinalizeProgress, IngestionSession, SessionState, SessionStats};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
