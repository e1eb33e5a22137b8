//! Analysis output consumed by `cdx ingest`

use anyhow::{ensure, Context, Result};
use cdx_model::{
    AnalyzedProject, BoundSourceFile, Commit, CommitFileLink, LanguageInfo, Repository, SourceFile,
};
use serde::Deserialize;
use std::path::Path;

/// Everything analysis produced for one repository commit
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct Manifest {
    pub(crate) repository: Repository,
    pub(crate) commit: Commit,
    pub(crate) text_files: Vec<SourceFile>,
    pub(crate) bound_files: Vec<BoundSourceFile>,
    pub(crate) projects: Vec<AnalyzedProject>,
    pub(crate) commit_files: Vec<CommitFileLink>,
    pub(crate) languages: Vec<LanguageInfo>,
}

impl Manifest {
    pub(crate) fn from_json(source: &str) -> Result<Self> {
        let mut manifest: Self = serde_json::from_str(source).context("invalid manifest")?;
        ensure!(
            !manifest.repository.name.is_empty(),
            "manifest has no repository name"
        );
        ensure!(!manifest.commit.commit_id.is_empty(), "manifest has no commit id");
        if manifest.commit.repository_name.is_empty() {
            manifest
                .commit
                .repository_name
                .clone_from(&manifest.repository.name);
        }
        Ok(manifest)
    }

    pub(crate) async fn load(path: &Path) -> Result<Self> {
        let source = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("cannot read manifest {}", path.display()))?;
        Self::from_json(&source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_manifest_fills_commit_repository() {
        let manifest = Manifest::from_json(
            r#"{
                "repository": { "name": "codex" },
                "commit": { "commit_id": "abc" },
                "text_files": [
                    { "info": { "repository_name": "codex", "repo_relative_path": "a.rs" }, "content": "a" }
                ],
                "commit_files": [ { "repo_relative_path": "a.rs" } ]
            }"#,
        )
        .unwrap();
        assert_eq!(manifest.commit.repository_name, "codex");
        assert_eq!(manifest.text_files.len(), 1);
        assert_eq!(manifest.commit_files[0].path_key(), "a.rs");
        assert!(manifest.bound_files.is_empty());
    }

    #[test]
    fn manifest_without_commit_is_rejected() {
        let err = Manifest::from_json(r#"{ "repository": { "name": "codex" } }"#).unwrap_err();
        assert!(err.to_string().contains("commit id"));
    }

    #[tokio::test]
    async fn load_reads_manifest_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("analysis.json");
        std::fs::write(
            &path,
            r#"{ "repository": { "name": "codex" }, "commit": { "commit_id": "abc" } }"#,
        )
        .unwrap();

        let manifest = Manifest::load(&path).await.unwrap();
        assert_eq!(manifest.repository.name, "codex");
        let missing = Manifest::load(&dir.path().join("missing.json")).await.unwrap_err();
        assert!(missing.to_string().contains("cannot read manifest"));
    }
}
