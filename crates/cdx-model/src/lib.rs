//! CDX Model
//!
//! Entities produced by repository analysis and the identities used to
//! index them.
//!
//! # Core Concepts
//!
//! - [`Uid`]: content-independent identity derived from stable attributes
//! - [`ContentId`]: Blake3 hash of an entity's payload, for change detection
//! - [`StableId`]: compact positive integer substitute for a [`Uid`]
//! - [`Entity`] / [`StoredEntity`]: typed index records sent to a backend
//!
//! # Example
//!
//! ```rust
//! use cdx_model::{Entity, SourceFile, StoredEntity};
//!
//! let file = SourceFile::new("codex", "src/main.rs", "fn main() {}");
//! let stored = StoredEntity::new(Entity::TextSource(file)).unwrap();
//!
//! // Same path, same uid, whatever the content
//! let edited = SourceFile::new("codex", "src/main.rs", "fn main() { run() }");
//! assert_eq!(stored.uid, edited.text_uid());
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

mod content;
mod entity;
mod ids;
pub mod naming;
mod project;
mod reference;
mod scope;
mod source;

// Re-exports
pub use content::{ContentId, ContentIdError};
pub use entity::{Entity, StoredEntity};
pub use ids::{EntityKind, InvalidStableId, StableId, Uid};
pub use project::{
    AnalyzedProject, ClassificationStyle, CommitFileLink, LanguageInfo, ProjectFileLink,
    ProjectKind, ReferencedProject,
};
pub use reference::{
    CompressedSpans, FileScope, ReferenceGroup, ReferenceSpans, COMPRESS_SPANS_AT,
};
pub use scope::{Branch, Commit, Repository};
pub use source::{
    normalize_path, BoundSourceFile, ClassificationSpan, DefinitionSpan, DefinitionSymbol,
    ReferenceSpan, ReferenceSymbol, SourceFile, SourceFileInfo, Span,
};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
