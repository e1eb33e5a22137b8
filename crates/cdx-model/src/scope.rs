//! Scope entities bounding an ingestion session

use crate::ids::{EntityKind, Uid};
use serde::{Deserialize, Serialize};

/// A source repository
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Repository {
    /// Repository name (unique within a deployment)
    pub name: String,
    /// Optional external identifier
    pub id: Option<String>,
    /// Free-form description
    pub description: Option<String>,
    /// Web address of the repository landing page
    pub web_address: Option<String>,
    /// Web address of source control (used to build file links)
    pub source_control_web_address: Option<String>,
    /// Name of the primary branch
    pub primary_branch: Option<String>,
}

impl Repository {
    /// Create repository with name
    #[inline]
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// With source control web address
    #[inline]
    #[must_use]
    pub fn with_source_control(mut self, address: impl Into<String>) -> Self {
        self.source_control_web_address = Some(address.into());
        self
    }

    /// Identity of the repository record
    #[must_use]
    pub fn uid(&self) -> Uid {
        Uid::derive(EntityKind::Repository, &[self.name.as_str()])
    }
}

/// A commit (or changeset) in version control
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Commit {
    /// Name of the containing repository
    pub repository_name: String,
    /// Commit hash or changeset number
    pub commit_id: String,
    /// Commit message
    pub description: Option<String>,
    /// Parent commit ids
    pub parent_commit_ids: Vec<String>,
    /// Commit date as RFC 3339 text
    pub date_committed: Option<String>,
}

impl Commit {
    /// Create commit
    #[inline]
    #[must_use]
    pub fn new(repository_name: impl Into<String>, commit_id: impl Into<String>) -> Self {
        Self {
            repository_name: repository_name.into(),
            commit_id: commit_id.into(),
            ..Self::default()
        }
    }

    /// Identity of the commit record
    #[must_use]
    pub fn uid(&self) -> Uid {
        Uid::derive(
            EntityKind::Commit,
            &[self.repository_name.as_str(), self.commit_id.as_str()],
        )
    }
}

/// A branch pointing at a commit
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Branch {
    /// Branch name
    pub name: String,
    /// Commit the branch points at
    pub head_commit_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repository_uid_ignores_description() {
        let a = Repository::new("codex");
        let mut b = Repository::new("codex");
        b.description = Some("changed".into());
        assert_eq!(a.uid(), b.uid());
    }

    #[test]
    fn commit_uid_scoped_by_repository() {
        let a = Commit::new("r1", "abc");
        let b = Commit::new("r2", "abc");
        assert_ne!(a.uid(), b.uid());
    }
}
