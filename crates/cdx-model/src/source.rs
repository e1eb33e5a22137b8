//! Source files, spans and symbols produced by analysis

use crate::ids::{EntityKind, Uid};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Descriptive information about a source file
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceFileInfo {
    /// Repository containing the file
    pub repository_name: String,
    /// Path relative to the repository root
    pub repo_relative_path: Option<String>,
    /// Project containing the file
    pub project_id: Option<String>,
    /// Path relative to the project
    pub project_relative_path: Option<String>,
    /// Language of the file
    pub language: Option<String>,
    /// Number of lines
    pub lines: u32,
    /// Size in bytes
    pub size: u64,
    /// Web address of the file
    pub web_address: Option<String>,
    /// Source control content id (i.e. git blob SHA)
    pub source_control_content_id: Option<String>,
    /// Extensible key/value properties
    pub properties: BTreeMap<String, String>,
}

impl SourceFileInfo {
    /// Identity attributes shared by the text and bound records of the file
    ///
    /// Repo-relative paths compare case-insensitively; files outside the
    /// repository fall back to project scope.
    #[must_use]
    pub fn identity_parts(&self) -> Vec<String> {
        file_identity(
            &self.repository_name,
            self.repo_relative_path.as_deref(),
            self.project_id.as_deref(),
            self.project_relative_path.as_deref(),
        )
    }

    /// Display path used in logs
    #[must_use]
    pub fn display_path(&self) -> String {
        match (&self.repo_relative_path, &self.project_id, &self.project_relative_path) {
            (Some(path), _, _) => path.clone(),
            (None, Some(project), Some(path)) => format!("{project}:{path}"),
            _ => "<unnamed>".to_string(),
        }
    }
}

/// Identity attributes of a file, by repo path or else by project path
pub(crate) fn file_identity(
    repository_name: &str,
    repo_relative_path: Option<&str>,
    project_id: Option<&str>,
    project_relative_path: Option<&str>,
) -> Vec<String> {
    match repo_relative_path {
        Some(path) => vec![repository_name.to_string(), normalize_path(path).to_lowercase()],
        None => vec![
            repository_name.to_string(),
            project_id.unwrap_or_default().to_string(),
            project_relative_path
                .map(normalize_path)
                .unwrap_or_default()
                .to_lowercase(),
        ],
    }
}

/// Normalize path separators to `/`
#[must_use]
pub fn normalize_path(path: &str) -> String {
    path.replace('\\', "/")
}

/// Text contents of a file
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceFile {
    /// File information
    pub info: SourceFileInfo,
    /// Full text
    pub content: String,
    /// Exclude from text search
    pub exclude_from_search: bool,
}

impl SourceFile {
    /// Create a source file in a repository
    #[must_use]
    pub fn new(
        repository_name: impl Into<String>,
        repo_relative_path: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let content = content.into();
        let lines = u32::try_from(content.lines().count()).unwrap_or(u32::MAX);
        Self {
            info: SourceFileInfo {
                repository_name: repository_name.into(),
                repo_relative_path: Some(repo_relative_path.into()),
                lines,
                size: content.len() as u64,
                ..SourceFileInfo::default()
            },
            content,
            exclude_from_search: false,
        }
    }

    /// Identity of the text record
    #[must_use]
    pub fn text_uid(&self) -> Uid {
        Uid::derive(EntityKind::TextSource, &self.info.identity_parts())
    }
}

/// Character span within a file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Span {
    /// Start character offset
    pub start: u32,
    /// Length in characters
    pub length: u32,
    /// One-based line number of the start
    pub line_number: u32,
}

/// A symbol declared somewhere in the analyzed code base
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DefinitionSymbol {
    /// Project declaring the symbol
    pub project_id: String,
    /// Project-unique symbol id
    pub id: String,
    /// Symbol kind (class, method, ...)
    pub kind: String,
    /// Short name
    pub short_name: String,
    /// Container qualified name
    pub container_qualified_name: Option<String>,
    /// Exclude from search results
    pub exclude_from_search: bool,
    /// Exclude from default (unscoped) search results
    pub exclude_from_default_search: bool,
}

impl DefinitionSymbol {
    /// Identity of the definition record
    #[must_use]
    pub fn uid(&self) -> Uid {
        Uid::derive(
            EntityKind::Definition,
            &[self.project_id.as_str(), self.id.as_str()],
        )
    }

    /// Symbol with its search flags made consistent
    ///
    /// A symbol excluded from search is also excluded from default search.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.exclude_from_default_search |= self.exclude_from_search;
        self
    }
}

/// A referenced symbol
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReferenceSymbol {
    /// Project declaring the referenced symbol
    pub project_id: String,
    /// Project-unique symbol id
    pub id: String,
    /// Symbol kind
    pub kind: String,
    /// Reference kind (reference, definition, override, ...)
    pub reference_kind: String,
    /// Exclude from search results
    pub exclude_from_search: bool,
}

/// Definition located at a span
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DefinitionSpan {
    /// Location of the definition
    pub span: Span,
    /// Defined symbol
    pub definition: DefinitionSymbol,
}

/// Reference located at a span
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReferenceSpan {
    /// Location of the reference
    pub span: Span,
    /// Referenced symbol
    pub reference: ReferenceSymbol,
}

/// Classification (syntax coloring) of a span
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ClassificationSpan {
    /// Classified span
    pub span: Span,
    /// Classification name
    pub classification: String,
}

/// A source file with semantic binding information
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BoundSourceFile {
    /// The file text and info
    pub source_file: SourceFile,
    /// Definitions, sorted by span
    pub definitions: Vec<DefinitionSpan>,
    /// References, sorted by span (may overlap)
    pub references: Vec<ReferenceSpan>,
    /// Classifications, sorted by start
    pub classifications: Vec<ClassificationSpan>,
    /// Exclude from text search
    pub exclude_from_search: bool,
}

impl BoundSourceFile {
    /// Bind a source file with no spans
    #[inline]
    #[must_use]
    pub fn new(source_file: SourceFile) -> Self {
        Self {
            source_file,
            ..Self::default()
        }
    }

    /// With declared definitions
    #[inline]
    #[must_use]
    pub fn with_definitions(mut self, definitions: Vec<DefinitionSpan>) -> Self {
        self.definitions = definitions;
        self
    }

    /// With references
    #[inline]
    #[must_use]
    pub fn with_references(mut self, references: Vec<ReferenceSpan>) -> Self {
        self.references = references;
        self
    }

    /// Identity of the bound record
    #[must_use]
    pub fn bound_uid(&self) -> Uid {
        Uid::derive(
            EntityKind::BoundSource,
            &self.source_file.info.identity_parts(),
        )
    }

    /// Repo-relative path of the underlying file
    #[inline]
    #[must_use]
    pub fn repo_relative_path(&self) -> Option<&str> {
        self.source_file.info.repo_relative_path.as_deref()
    }
}
