//! Identity derivation properties

use cdx_model::naming::safe_index_name;
use cdx_model::{Entity, EntityKind, SourceFile, StoredEntity, Uid};
use proptest::prelude::*;

proptest! {
    #[test]
    fn text_uid_ignores_path_case_separators_and_content(
        segments in prop::collection::vec("[a-zA-Z0-9_]{1,8}", 1..5),
        content in ".{0,64}",
    ) {
        let forward = SourceFile::new("repo", segments.join("/"), content);
        let backslashed = SourceFile::new("repo", segments.join("\\").to_uppercase(), "other");
        prop_assert_eq!(forward.text_uid(), backslashed.text_uid());
    }

    #[test]
    fn derived_uids_carry_kind_prefix_and_fixed_digest(
        parts in prop::collection::vec(".{0,12}", 0..4),
    ) {
        for kind in EntityKind::ALL {
            let uid = Uid::derive(kind, &parts);
            let (prefix, digest) = uid.as_str().split_once(':').unwrap();
            prop_assert_eq!(prefix, kind.prefix());
            prop_assert_eq!(digest.len(), 32);
        }
    }

    #[test]
    fn content_change_never_changes_uid(a in ".{0,64}", b in ".{0,64}") {
        let first = StoredEntity::new(Entity::TextSource(SourceFile::new("repo", "src/x.rs", a.clone()))).unwrap();
        let second = StoredEntity::new(Entity::TextSource(SourceFile::new("repo", "src/x.rs", b.clone()))).unwrap();
        prop_assert_eq!(&first.uid, &second.uid);
        prop_assert_eq!(first.content_id == second.content_id, a == b);
    }

    #[test]
    fn safe_index_names_are_lowercase_without_separators(name in "[ -~]{0,24}") {
        let safe = safe_index_name(&name);
        prop_assert!(!safe.contains(['/', '\\', ' ', '.', ':', '*', '?']));
        prop_assert!(!safe.starts_with('_'));
        prop_assert_eq!(safe.to_lowercase(), safe);
    }
}
