//! Per-symbol reference records of a bound file
//!
//! A bound file's references are grouped by referenced symbol (project,
//! symbol id, reference kind). Each group becomes one record; large groups
//! store their spans delta-encoded.

use crate::ids::{EntityKind, Uid};
use crate::source::{file_identity, BoundSourceFile, ReferenceSymbol, SourceFileInfo, Span};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Groups with at least this many spans are stored compressed
pub const COMPRESS_SPANS_AT: usize = 10;

/// Location of the file a reference record belongs to
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FileScope {
    /// Repository containing the file
    pub repository_name: String,
    /// Project containing the file
    pub project_id: Option<String>,
    /// Path relative to the repository root
    pub repo_relative_path: Option<String>,
    /// Path relative to the project
    pub project_relative_path: Option<String>,
}

impl FileScope {
    /// Identity attributes of the file, matching its text and bound records
    #[must_use]
    pub fn identity_parts(&self) -> Vec<String> {
        file_identity(
            &self.repository_name,
            self.repo_relative_path.as_deref(),
            self.project_id.as_deref(),
            self.project_relative_path.as_deref(),
        )
    }
}

impl From<&SourceFileInfo> for FileScope {
    fn from(info: &SourceFileInfo) -> Self {
        Self {
            repository_name: info.repository_name.clone(),
            project_id: info.project_id.clone(),
            repo_relative_path: info.repo_relative_path.clone(),
            project_relative_path: info.project_relative_path.clone(),
        }
    }
}

/// Delta-encoded span columns
///
/// `starts` and `lines` hold the difference to the previous span (the
/// first entry is absolute), so spans sorted by position encode as small
/// numbers.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CompressedSpans {
    /// Start offset deltas
    pub starts: Vec<i64>,
    /// Lengths
    pub lengths: Vec<u32>,
    /// Line number deltas
    pub lines: Vec<i64>,
}

impl CompressedSpans {
    /// Encode `spans`, keeping their order
    #[must_use]
    pub fn encode(spans: &[Span]) -> Self {
        let mut encoded = Self {
            starts: Vec::with_capacity(spans.len()),
            lengths: Vec::with_capacity(spans.len()),
            lines: Vec::with_capacity(spans.len()),
        };
        let (mut start, mut line) = (0i64, 0i64);
        for span in spans {
            encoded.starts.push(i64::from(span.start) - start);
            encoded.lengths.push(span.length);
            encoded.lines.push(i64::from(span.line_number) - line);
            start = i64::from(span.start);
            line = i64::from(span.line_number);
        }
        encoded
    }

    /// Decode back to spans; malformed columns decode as far as they agree
    #[must_use]
    pub fn decode(&self) -> Vec<Span> {
        let (mut start, mut line) = (0i64, 0i64);
        self.starts
            .iter()
            .zip(&self.lengths)
            .zip(&self.lines)
            .map(|((start_delta, length), line_delta)| {
                start += start_delta;
                line += line_delta;
                Span {
                    start: u32::try_from(start).unwrap_or_default(),
                    length: *length,
                    line_number: u32::try_from(line).unwrap_or_default(),
                }
            })
            .collect()
    }

    /// Number of encoded spans
    #[must_use]
    pub fn len(&self) -> usize {
        self.lengths.len()
    }

    /// No spans encoded
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lengths.is_empty()
    }
}

/// Spans of one reference group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "encoding", rename_all = "snake_case")]
pub enum ReferenceSpans {
    /// Plain list, for groups below [`COMPRESS_SPANS_AT`]
    List {
        /// Spans in file order
        spans: Vec<Span>,
    },
    /// Delta-encoded
    Compressed(CompressedSpans),
}

impl ReferenceSpans {
    /// Pick the encoding for `spans` by count
    #[must_use]
    pub fn new(spans: Vec<Span>) -> Self {
        if spans.len() < COMPRESS_SPANS_AT {
            Self::List { spans }
        } else {
            Self::Compressed(CompressedSpans::encode(&spans))
        }
    }

    /// Spans in file order, whatever the encoding
    #[must_use]
    pub fn spans(&self) -> Vec<Span> {
        match self {
            Self::List { spans } => spans.clone(),
            Self::Compressed(compressed) => compressed.decode(),
        }
    }

    /// Number of spans
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::List { spans } => spans.len(),
            Self::Compressed(compressed) => compressed.len(),
        }
    }

    /// No spans
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// All references from one file to one symbol
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceGroup {
    /// Referencing file
    pub file: FileScope,
    /// Referenced symbol (first occurrence in the file)
    pub reference: ReferenceSymbol,
    /// Where the symbol is referenced
    pub spans: ReferenceSpans,
}

impl ReferenceGroup {
    /// Identity of the record: file plus symbol and reference kind
    #[must_use]
    pub fn uid(&self) -> Uid {
        let mut parts = self.file.identity_parts();
        parts.extend([
            self.reference.project_id.clone(),
            self.reference.id.clone(),
            self.reference.reference_kind.clone(),
        ]);
        Uid::derive(EntityKind::Reference, &parts)
    }

    /// Group the searchable references of `file`, in order of first use
    #[must_use]
    pub fn from_file(file: &BoundSourceFile) -> Vec<Self> {
        let scope = FileScope::from(&file.source_file.info);
        let mut index: HashMap<(&str, &str, &str), usize> = HashMap::new();
        let mut groups: Vec<(&ReferenceSymbol, Vec<Span>)> = Vec::new();

        for span in file.references.iter().filter(|r| !r.reference.exclude_from_search) {
            let symbol = &span.reference;
            let key = (
                symbol.project_id.as_str(),
                symbol.id.as_str(),
                symbol.reference_kind.as_str(),
            );
            let slot = *index.entry(key).or_insert_with(|| {
                groups.push((symbol, Vec::new()));
                groups.len() - 1
            });
            groups[slot].1.push(span.span);
        }

        groups
            .into_iter()
            .map(|(reference, spans)| Self {
                file: scope.clone(),
                reference: reference.clone(),
                spans: ReferenceSpans::new(spans),
            })
            .collect()
    }
}
