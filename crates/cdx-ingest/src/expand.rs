//! Analyzed inputs to the index records they produce

use cdx_model::naming::file_web_address;
use cdx_model::{AnalyzedProject, BoundSourceFile, Entity, ReferenceGroup, Repository, SourceFile, Uid};
use std::collections::BTreeMap;

/// Fill the file's web address from the repository's source control address
pub(crate) fn with_web_address(mut file: SourceFile, repository: &Repository) -> SourceFile {
    if file.info.web_address.is_none() {
        if let (Some(address), Some(path)) = (
            repository.source_control_web_address.as_deref(),
            file.info.repo_relative_path.as_deref(),
        ) {
            file.info.web_address = Some(file_web_address(address, path));
        }
    }
    file
}

/// Text record for a plain file, plus its properties
pub(crate) fn text_file(file: SourceFile, repository: &Repository) -> Vec<Entity> {
    let file = with_web_address(file, repository);
    let mut entities = properties(&file.text_uid(), &file.info.properties);
    entities.insert(0, Entity::TextSource(file));
    entities
}

/// Records for a bound file
///
/// Text, then each declared definition with its marker, then one record
/// per referenced symbol, then the bound record and its properties.
pub(crate) fn bound_file(mut file: BoundSourceFile, repository: &Repository) -> Vec<Entity> {
    file.source_file = with_web_address(file.source_file, repository);
    let text_uid = file.source_file.text_uid();
    let bound_uid = file.bound_uid();
    let references = ReferenceGroup::from_file(&file);

    let mut entities = Vec::with_capacity(2 + 2 * file.definitions.len() + references.len());
    entities.push(Entity::TextSource(file.source_file.clone()));
    for span in &file.definitions {
        let definition = span.definition.clone().normalized();
        entities.push(Entity::DeclaredDefinition {
            repository_name: repository.name.clone(),
            definition: definition.uid(),
        });
        entities.push(Entity::Definition(definition));
    }
    entities.extend(references.into_iter().map(Entity::Reference));
    let properties = properties(&bound_uid, &file.source_file.info.properties);
    entities.push(Entity::BoundSource { text_uid, file });
    entities.extend(properties);
    entities
}

/// Project record plus references, referenced definitions and extra files
pub(crate) fn project(mut project: AnalyzedProject, repository: &Repository) -> Vec<Entity> {
    let additional = std::mem::take(&mut project.additional_source_files);
    let mut entities = Vec::new();

    for reference in &project.project_references {
        entities.extend(
            reference
                .definitions
                .iter()
                .map(|definition| Entity::Definition(definition.clone().normalized())),
        );
        entities.push(Entity::ProjectReference {
            project_id: project.project_id.clone(),
            repository_name: project.repository_name.clone(),
            reference: reference.clone(),
        });
    }
    for file in additional {
        entities.extend(bound_file(file, repository));
    }
    entities.insert(0, Entity::Project(project));
    entities
}

fn properties(owner: &Uid, properties: &BTreeMap<String, String>) -> Vec<Entity> {
    properties
        .iter()
        .map(|(key, value)| Entity::Property {
            owner: owner.clone(),
            key: key.clone(),
            value: value.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use cdx_model::{
        DefinitionSpan, DefinitionSymbol, EntityKind, ReferenceSpan, ReferenceSymbol,
        ReferencedProject, Span,
    };

    fn definition(id: &str) -> DefinitionSymbol {
        DefinitionSymbol {
            project_id: "core".into(),
            id: id.into(),
            kind: "method".into(),
            short_name: id.into(),
            ..DefinitionSymbol::default()
        }
    }

    fn reference(id: &str, line_number: u32) -> ReferenceSpan {
        ReferenceSpan {
            span: Span {
                start: line_number * 10,
                length: 1,
                line_number,
            },
            reference: ReferenceSymbol {
                project_id: "core".into(),
                id: id.into(),
                kind: "method".into(),
                reference_kind: "reference".into(),
                exclude_from_search: false,
            },
        }
    }

    #[test]
    fn bound_file_produces_text_definitions_and_bound() {
        let repository = Repository::new("repo").with_source_control("https://github.com/o/repo");
        let file = BoundSourceFile::new(SourceFile::new("repo", "src/lib.rs", "fn a() {}"))
            .with_definitions(vec![DefinitionSpan {
                definition: definition("a"),
                ..DefinitionSpan::default()
            }]);

        let entities = bound_file(file, &repository);
        let kinds: Vec<_> = entities.iter().map(Entity::kind).collect();
        assert_eq!(
            kinds,
            vec![
                EntityKind::TextSource,
                EntityKind::DeclaredDefinition,
                EntityKind::Definition,
                EntityKind::BoundSource
            ]
        );

        let Entity::TextSource(text) = &entities[0] else {
            panic!("expected text record");
        };
        assert_eq!(
            text.info.web_address.as_deref(),
            Some("https://github.com/o/repo/blob/master/src/lib.rs")
        );
        let Entity::DeclaredDefinition {
            repository_name,
            definition: marked,
        } = &entities[1]
        else {
            panic!("expected declared marker");
        };
        assert_eq!(repository_name, "repo");
        assert_eq!(marked, &definition("a").uid());
        let Entity::BoundSource { text_uid, .. } = &entities[3] else {
            panic!("expected bound record");
        };
        assert_eq!(text_uid, &text.text_uid());
    }

    #[test]
    fn bound_file_groups_references_and_adds_properties() {
        let repository = Repository::new("repo");
        let mut source = SourceFile::new("repo", "src/lib.rs", "");
        source.info.properties.insert("generated".into(), "true".into());
        let file = BoundSourceFile::new(source).with_references(vec![
            reference("a", 1),
            reference("b", 2),
            reference("a", 3),
        ]);
        let bound_uid = file.bound_uid();

        let entities = bound_file(file, &repository);
        let kinds: Vec<_> = entities.iter().map(Entity::kind).collect();
        assert_eq!(
            kinds,
            vec![
                EntityKind::TextSource,
                EntityKind::Reference,
                EntityKind::Reference,
                EntityKind::BoundSource,
                EntityKind::Property,
            ]
        );
        let Entity::Reference(group) = &entities[1] else {
            panic!("expected reference record");
        };
        assert_eq!(group.reference.id, "a");
        assert_eq!(group.spans.len(), 2);
        assert_eq!(
            entities[4],
            Entity::Property {
                owner: bound_uid,
                key: "generated".into(),
                value: "true".into(),
            }
        );
    }

    #[test]
    fn text_file_properties_belong_to_text_record() {
        let mut file = SourceFile::new("repo", "notes.md", "");
        file.info.properties.insert("lang".into(), "markdown".into());
        let text_uid = file.text_uid();

        let entities = text_file(file, &Repository::new("repo"));
        assert_eq!(entities.len(), 2);
        assert!(matches!(&entities[1], Entity::Property { owner, .. } if *owner == text_uid));
    }

    #[test]
    fn explicit_web_address_is_kept() {
        let repository = Repository::new("repo").with_source_control("https://example.com");
        let mut file = SourceFile::new("repo", "a.rs", "");
        file.info.web_address = Some("https://mirror/a.rs".into());
        let Some(Entity::TextSource(text)) = text_file(file, &repository).into_iter().next() else {
            panic!("expected text record");
        };
        assert_eq!(text.info.web_address.as_deref(), Some("https://mirror/a.rs"));
    }

    #[test]
    fn project_expands_references_and_additional_files() {
        let repository = Repository::new("repo");
        let mut analyzed = AnalyzedProject::new("repo", "app");
        analyzed.project_references.push(ReferencedProject {
            project_id: "core".into(),
            definitions: vec![definition("x"), definition("y")],
            ..ReferencedProject::default()
        });
        analyzed
            .additional_source_files
            .push(BoundSourceFile::new(SourceFile::new("repo", "gen/g.rs", "")));

        let entities = project(analyzed, &repository);
        let kinds: Vec<_> = entities.iter().map(Entity::kind).collect();
        assert_eq!(
            kinds,
            vec![
                EntityKind::Project,
                EntityKind::Definition,
                EntityKind::Definition,
                EntityKind::ProjectReference,
                EntityKind::TextSource,
                EntityKind::BoundSource,
            ]
        );
        let Entity::Project(stored) = &entities[0] else {
            panic!("expected project record");
        };
        assert!(stored.additional_source_files.is_empty());
        assert!(!kinds.contains(&EntityKind::DeclaredDefinition));
    }

    #[test]
    fn declared_and_referenced_copies_agree() {
        let mut hidden = definition("h");
        hidden.exclude_from_search = true;

        let file = BoundSourceFile::new(SourceFile::new("repo", "src/h.rs", "")).with_definitions(
            vec![DefinitionSpan {
                definition: hidden.clone(),
                ..DefinitionSpan::default()
            }],
        );
        let mut analyzed = AnalyzedProject::new("repo", "app");
        analyzed.project_references.push(ReferencedProject {
            project_id: "core".into(),
            definitions: vec![hidden],
            ..ReferencedProject::default()
        });

        let pick = |entities: Vec<Entity>| {
            entities
                .into_iter()
                .find_map(|entity| match entity {
                    Entity::Definition(definition) => Some(definition),
                    _ => None,
                })
                .unwrap()
        };
        let declared = pick(bound_file(file, &Repository::new("repo")));
        let referenced = pick(project(analyzed, &Repository::new("repo")));
        assert_eq!(declared, referenced);
        assert!(declared.exclude_from_default_search);
    }
}
