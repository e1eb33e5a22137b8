use cdx_model::Uid;
use cdx_registry::{MemoryStore, RegistryConfig, StableIdRegistry};
use proptest::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;

fn block_on<F: std::future::Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
        .block_on(future)
}

proptest! {
    #[test]
    fn resolve_preserves_length_order_and_identity(
        names in proptest::collection::vec("[a-e]{1,2}", 0..40),
        block in 1u32..8,
    ) {
        let batch: Vec<Uid> = names.iter().map(|name| Uid::new(name.as_str())).collect();
        let registry = StableIdRegistry::new(
            Arc::new(MemoryStore::new()),
            RegistryConfig::new().with_id_block_size(block),
        );

        let ids = block_on(registry.resolve(&batch)).unwrap();
        prop_assert_eq!(ids.len(), batch.len());

        let mut by_uid = HashMap::new();
        for (uid, id) in batch.iter().zip(&ids) {
            let first = *by_uid.entry(uid).or_insert(*id);
            prop_assert_eq!(first, *id);
        }
        let mut distinct: Vec<_> = by_uid.values().collect();
        distinct.sort_unstable();
        distinct.dedup();
        prop_assert_eq!(distinct.len(), by_uid.len());

        // Resolving again, reversed, returns the same ids reversed
        let reversed: Vec<Uid> = batch.iter().rev().cloned().collect();
        let again = block_on(registry.resolve(&reversed)).unwrap();
        let expected: Vec<_> = ids.iter().rev().copied().collect();
        prop_assert_eq!(again, expected);
    }
}
