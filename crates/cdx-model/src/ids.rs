//! Entity identity: [`Uid`], [`StableId`] and [`EntityKind`]

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};

/// Number of digest bytes kept in a derived uid
const UID_DIGEST_BYTES: usize = 16;

/// Content-independent identity of a logical entity
///
/// Derived from stable identity attributes (repository, path, symbol id),
/// never from content, so repeated analysis of a changed entity yields the
/// same uid.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Uid(String);

impl Uid {
    /// Wrap an externally computed uid
    #[inline]
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Derive a uid for `kind` from its identity attributes
    ///
    /// Parts are NUL separated before hashing so `["ab", "c"]` and
    /// `["a", "bc"]` never collide.
    #[must_use]
    pub fn derive<S: AsRef<str>>(kind: EntityKind, parts: &[S]) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(kind.prefix().as_bytes());
        for part in parts {
            hasher.update(&[0]);
            hasher.update(part.as_ref().as_bytes());
        }
        let digest = hasher.finalize();
        Self(format!(
            "{}:{}",
            kind.prefix(),
            hex::encode(&digest.as_bytes()[..UID_DIGEST_BYTES])
        ))
    }

    /// Borrow as `&str`
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Uid {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Uid {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Uid {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl AsRef<str> for Uid {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Compact, durable, strictly positive substitute for a [`Uid`]
///
/// Never reused: once a value has been assigned to a uid in a registry's
/// durable store it belongs to that uid forever.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub struct StableId(i32);

impl StableId {
    /// Smallest valid stable id
    pub const MIN: Self = Self(1);

    /// Create a stable id; `None` unless `value > 0`
    #[inline]
    #[must_use]
    pub const fn new(value: i32) -> Option<Self> {
        if value > 0 {
            Some(Self(value))
        } else {
            None
        }
    }

    /// Raw integer value
    #[inline]
    #[must_use]
    pub const fn get(self) -> i32 {
        self.0
    }
}

impl Display for StableId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<i32> for StableId {
    type Error = InvalidStableId;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        Self::new(value).ok_or(InvalidStableId(value))
    }
}

impl From<StableId> for i32 {
    fn from(value: StableId) -> Self {
        value.0
    }
}

/// Rejected non-positive stable id value
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("stable id must be strictly positive, got {0}")]
pub struct InvalidStableId(pub i32);

/// Kind of entity stored in the search backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// Repository description
    Repository,
    /// Commit description
    Commit,
    /// Raw text of a source file
    TextSource,
    /// Source file with semantic bindings
    BoundSource,
    /// Definition symbol
    Definition,
    /// Marks a definition as declared in a repository
    DeclaredDefinition,
    /// References from one file to one symbol
    Reference,
    /// Key/value property of another entity
    Property,
    /// Analyzed project
    Project,
    /// Reference from a project to another project
    ProjectReference,
    /// Single commit file link
    CommitFile,
    /// Aggregate list of commit files
    CommitFiles,
    /// Language classification info
    Language,
}

impl EntityKind {
    /// All kinds, in declaration order
    pub const ALL: [Self; 13] = [
        Self::Repository,
        Self::Commit,
        Self::TextSource,
        Self::BoundSource,
        Self::Definition,
        Self::DeclaredDefinition,
        Self::Reference,
        Self::Property,
        Self::Project,
        Self::ProjectReference,
        Self::CommitFile,
        Self::CommitFiles,
        Self::Language,
    ];

    /// Short prefix used in derived uids and on-disk layouts
    #[must_use]
    pub const fn prefix(self) -> &'static str {
        match self {
            Self::Repository => "repo",
            Self::Commit => "commit",
            Self::TextSource => "text",
            Self::BoundSource => "bound",
            Self::Definition => "def",
            Self::DeclaredDefinition => "decl",
            Self::Reference => "ref",
            Self::Property => "prop",
            Self::Project => "project",
            Self::ProjectReference => "projref",
            Self::CommitFile => "cfile",
            Self::CommitFiles => "cfiles",
            Self::Language => "lang",
        }
    }

    /// Whether records of this kind carry a [`StableId`]
    #[must_use]
    pub const fn requires_stable_id(self) -> bool {
        matches!(
            self,
            Self::TextSource | Self::BoundSource | Self::Definition | Self::Project
        )
    }
}

impl Display for EntityKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}
