//! Projects, commit file links and language descriptions

use crate::ids::{EntityKind, Uid};
use crate::source::{normalize_path, BoundSourceFile, DefinitionSymbol};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Link from a project to one of its files
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectFileLink {
    /// Path relative to the project
    pub project_relative_path: String,
    /// Path relative to the repository, if inside it
    pub repo_relative_path: Option<String>,
    /// Identifier of the file
    pub file_id: Option<String>,
}

/// A project referenced by an analyzed project
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReferencedProject {
    /// Referenced project id
    pub project_id: String,
    /// Display name
    pub display_name: Option<String>,
    /// Definitions used from the referenced project, sorted
    pub definitions: Vec<DefinitionSymbol>,
    /// Properties such as version or public key
    pub properties: BTreeMap<String, String>,
}

/// Standard project kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectKind {
    /// Project built from source
    #[default]
    Source,
    /// Metadata rendered as source
    MetadataAsSource,
    /// Decompiled binary
    Decompilation,
}

/// An analyzed project
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzedProject {
    /// Repository containing the project
    pub repository_name: String,
    /// Project identifier
    pub project_id: String,
    /// Project kind
    pub project_kind: ProjectKind,
    /// Primary file (e.g. the project file)
    pub primary_file: Option<ProjectFileLink>,
    /// Files in the project
    pub files: Vec<ProjectFileLink>,
    /// Referenced projects with used definitions
    pub project_references: Vec<ReferencedProject>,
    /// Extra generated or external files bound with the project
    pub additional_source_files: Vec<BoundSourceFile>,
}

impl AnalyzedProject {
    /// Create project
    #[inline]
    #[must_use]
    pub fn new(repository_name: impl Into<String>, project_id: impl Into<String>) -> Self {
        Self {
            repository_name: repository_name.into(),
            project_id: project_id.into(),
            ..Self::default()
        }
    }

    /// Identity of the project record
    #[must_use]
    pub fn uid(&self) -> Uid {
        Uid::derive(
            EntityKind::Project,
            &[self.repository_name.as_str(), self.project_id.as_str()],
        )
    }

    /// Identity of the reference record from this project to `referenced`
    #[must_use]
    pub fn reference_uid(&self, referenced: &ReferencedProject) -> Uid {
        Uid::derive(
            EntityKind::ProjectReference,
            &[
                self.repository_name.as_str(),
                self.project_id.as_str(),
                referenced.project_id.as_str(),
            ],
        )
    }
}

/// Link between a commit and one of the files it contains
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CommitFileLink {
    /// Path relative to the repository
    pub repo_relative_path: String,
    /// Uid of the text record for the file (filled during ingestion)
    pub file_id: Option<String>,
    /// Version control id of the file content
    pub version_control_file_id: Option<String>,
}

impl CommitFileLink {
    /// Create link for path
    #[inline]
    #[must_use]
    pub fn new(repo_relative_path: impl Into<String>) -> Self {
        Self {
            repo_relative_path: repo_relative_path.into(),
            ..Self::default()
        }
    }

    /// Case-insensitive lookup key
    #[must_use]
    pub fn path_key(&self) -> String {
        normalize_path(&self.repo_relative_path).to_lowercase()
    }
}

/// Style associated with a classification name
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassificationStyle {
    /// Classification name
    pub name: String,
    /// CSS color
    pub color: Option<String>,
    /// Whether the text should be italic
    pub italic: bool,
}

/// Description of a language
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LanguageInfo {
    /// Language name
    pub name: String,
    /// Classification styles
    pub classifications: Vec<ClassificationStyle>,
}

impl LanguageInfo {
    /// Identity of the language record
    #[must_use]
    pub fn uid(&self) -> Uid {
        Uid::derive(EntityKind::Language, &[self.name.to_lowercase()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commit_file_path_key_is_case_insensitive() {
        assert_eq!(
            CommitFileLink::new("Src\\Main.rs").path_key(),
            CommitFileLink::new("src/main.rs").path_key()
        );
    }

    #[test]
    fn project_reference_uid_per_pair() {
        let project = AnalyzedProject::new("repo", "app");
        let a = ReferencedProject {
            project_id: "core".into(),
            ..ReferencedProject::default()
        };
        let b = ReferencedProject {
            project_id: "util".into(),
            ..ReferencedProject::default()
        };
        assert_ne!(project.reference_uid(&a), project.reference_uid(&b));
        assert_ne!(project.uid(), project.reference_uid(&a));
    }
}
