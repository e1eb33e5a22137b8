//! Index records forwarded to the storage backend
//!
//! [`Entity`] is the typed payload; [`StoredEntity`] wraps it with the
//! identity ([`Uid`], optional [`StableId`]) and change-detection data
//! ([`ContentId`], encoded size) the backend stores alongside it.

use crate::content::{ContentId, ContentIdError};
use crate::ids::{EntityKind, StableId, Uid};
use crate::project::{AnalyzedProject, CommitFileLink, LanguageInfo, ReferencedProject};
use crate::reference::ReferenceGroup;
use crate::scope::{Commit, Repository};
use crate::source::{BoundSourceFile, DefinitionSymbol, SourceFile};
use serde::{Deserialize, Serialize};

/// Typed payload of an index record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum Entity {
    /// Repository description
    Repository(Repository),
    /// Commit description
    Commit(Commit),
    /// Raw file text
    TextSource(SourceFile),
    /// Bound file, pointing at its text record
    BoundSource {
        /// Uid of the text record of the same file
        text_uid: Uid,
        /// Bound file
        file: BoundSourceFile,
    },
    /// Definition symbol, the same record whether declared or referenced
    Definition(DefinitionSymbol),
    /// Marks a definition as declared in a repository
    DeclaredDefinition {
        /// Declaring repository
        repository_name: String,
        /// Uid of the definition record
        definition: Uid,
    },
    /// References from one file to one symbol
    Reference(ReferenceGroup),
    /// Key/value property of another entity
    Property {
        /// Uid of the entity the property belongs to
        owner: Uid,
        /// Property name
        key: String,
        /// Property value
        value: String,
    },
    /// Project (additional source files are stored as their own records)
    Project(AnalyzedProject),
    /// Reference from one project to another
    ProjectReference {
        /// Referencing project
        project_id: String,
        /// Repository of the referencing project
        repository_name: String,
        /// Referenced project
        reference: ReferencedProject,
    },
    /// Single commit file link
    CommitFile {
        /// Repository name
        repository_name: String,
        /// Commit id
        commit_id: String,
        /// Link
        link: CommitFileLink,
    },
    /// All files of a commit, sorted by path
    CommitFiles {
        /// Commit
        commit: Commit,
        /// Links sorted case-insensitively by path
        files: Vec<CommitFileLink>,
    },
    /// Language description
    Language(LanguageInfo),
}

impl Entity {
    /// Kind of this entity
    #[must_use]
    pub fn kind(&self) -> EntityKind {
        match self {
            Self::Repository(_) => EntityKind::Repository,
            Self::Commit(_) => EntityKind::Commit,
            Self::TextSource(_) => EntityKind::TextSource,
            Self::BoundSource { .. } => EntityKind::BoundSource,
            Self::Definition(_) => EntityKind::Definition,
            Self::DeclaredDefinition { .. } => EntityKind::DeclaredDefinition,
            Self::Reference(_) => EntityKind::Reference,
            Self::Property { .. } => EntityKind::Property,
            Self::Project(_) => EntityKind::Project,
            Self::ProjectReference { .. } => EntityKind::ProjectReference,
            Self::CommitFile { .. } => EntityKind::CommitFile,
            Self::CommitFiles { .. } => EntityKind::CommitFiles,
            Self::Language(_) => EntityKind::Language,
        }
    }

    /// Identity of this entity
    #[must_use]
    pub fn uid(&self) -> Uid {
        match self {
            Self::Repository(repository) => repository.uid(),
            Self::Commit(commit) => commit.uid(),
            Self::TextSource(file) => file.text_uid(),
            Self::BoundSource { file, .. } => file.bound_uid(),
            Self::Definition(definition) => definition.uid(),
            Self::DeclaredDefinition {
                repository_name,
                definition,
            } => Uid::derive(
                EntityKind::DeclaredDefinition,
                &[repository_name.as_str(), definition.as_str()],
            ),
            Self::Reference(group) => group.uid(),
            Self::Property { owner, key, .. } => {
                Uid::derive(EntityKind::Property, &[owner.as_str(), key.as_str()])
            }
            Self::Project(project) => project.uid(),
            Self::ProjectReference {
                project_id,
                repository_name,
                reference,
            } => Uid::derive(
                EntityKind::ProjectReference,
                &[
                    repository_name.as_str(),
                    project_id.as_str(),
                    reference.project_id.as_str(),
                ],
            ),
            Self::CommitFile {
                repository_name,
                commit_id,
                link,
            } => Uid::derive(
                EntityKind::CommitFile,
                &[repository_name.clone(), commit_id.clone(), link.path_key()],
            ),
            Self::CommitFiles { commit, .. } => Uid::derive(
                EntityKind::CommitFiles,
                &[commit.repository_name.as_str(), commit.commit_id.as_str()],
            ),
            Self::Language(language) => language.uid(),
        }
    }
}

/// An entity ready for upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEntity {
    /// Identity
    pub uid: Uid,
    /// Compact identity (present iff the kind requires one)
    pub stable_id: Option<StableId>,
    /// Hash of the serialized payload
    pub content_id: ContentId,
    /// Size of the serialized payload in bytes
    pub content_size: usize,
    /// Payload
    pub entity: Entity,
}

impl StoredEntity {
    /// Wrap an entity, computing its uid and content id
    ///
    /// # Errors
    /// Returns error if the payload cannot be serialized
    pub fn new(entity: Entity) -> Result<Self, ContentIdError> {
        let (content_id, content_size) = ContentId::of(&entity)?;
        Ok(Self {
            uid: entity.uid(),
            stable_id: None,
            content_id,
            content_size,
            entity,
        })
    }

    /// Kind of the payload
    #[inline]
    #[must_use]
    pub fn kind(&self) -> EntityKind {
        self.entity.kind()
    }

    /// Attach a stable id
    #[inline]
    #[must_use]
    pub fn with_stable_id(mut self, stable_id: StableId) -> Self {
        self.stable_id = Some(stable_id);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stored_entity_content_id_tracks_payload() {
        let a = StoredEntity::new(Entity::TextSource(SourceFile::new("r", "a.rs", "one"))).unwrap();
        let b = StoredEntity::new(Entity::TextSource(SourceFile::new("r", "a.rs", "two"))).unwrap();
        assert_eq!(a.uid, b.uid);
        assert_ne!(a.content_id, b.content_id);
        assert_eq!(a.kind(), EntityKind::TextSource);
        assert!(a.stable_id.is_none());
    }

    #[test]
    fn entity_serializes_with_kind_tag() {
        let entity = Entity::Language(LanguageInfo {
            name: "rust".into(),
            classifications: vec![],
        });
        let json = serde_json::to_value(&entity).unwrap();
        assert_eq!(json["kind"], "language");
        assert_eq!(json["payload"]["name"], "rust");
    }

    #[test]
    fn commit_file_uid_is_case_insensitive() {
        let make = |path: &str| Entity::CommitFile {
            repository_name: "r".into(),
            commit_id: "c".into(),
            link: CommitFileLink::new(path),
        };
        assert_eq!(make("A/B.rs").uid(), make("a/b.rs").uid());
    }

    #[test]
    fn property_uid_is_owner_and_key() {
        let owner = SourceFile::new("r", "a.rs", "").text_uid();
        let make = |key: &str, value: &str| Entity::Property {
            owner: owner.clone(),
            key: key.into(),
            value: value.into(),
        };
        assert_eq!(make("lang", "rust").uid(), make("lang", "c").uid());
        assert_ne!(make("lang", "rust").uid(), make("tool", "rust").uid());
        assert_eq!(make("lang", "rust").kind(), EntityKind::Property);
    }

    #[test]
    fn declared_marker_is_separate_from_definition() {
        let definition = DefinitionSymbol {
            project_id: "core".into(),
            id: "a".into(),
            ..DefinitionSymbol::default()
        };
        let marker = Entity::DeclaredDefinition {
            repository_name: "r".into(),
            definition: definition.uid(),
        };
        assert_ne!(marker.uid(), definition.uid());
        assert_eq!(Entity::Definition(definition.clone()).uid(), definition.uid());
    }
}
