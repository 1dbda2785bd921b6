//! Property tests for component tables and entity lifecycle.
//!
//! Random sequences of add/remove/lookup operations are replayed against a
//! `ComponentTable` and a `BTreeMap` model; after every step the table must
//! agree with the model and satisfy its id/index invariant.

use std::collections::BTreeMap;

use ferrule_ecs::prelude::*;
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum TableOp {
    Add(u32, i64),
    Remove(u32),
    Get(u32),
    Mutate(u32, i64),
    Clear,
}

fn table_op_strategy() -> impl Strategy<Value = TableOp> {
    prop_oneof![
        4 => (0..64u32, any::<i64>()).prop_map(|(id, v)| TableOp::Add(id, v)),
        3 => (0..64u32).prop_map(TableOp::Remove),
        2 => (0..64u32).prop_map(TableOp::Get),
        2 => (0..64u32, any::<i64>()).prop_map(|(id, v)| TableOp::Mutate(id, v)),
        1 => Just(TableOp::Clear),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(2_000))]

    #[test]
    fn table_matches_model(ops in prop::collection::vec(table_op_strategy(), 1..120)) {
        let mut table: ComponentTable<i64> = ComponentTable::new();
        let mut model: BTreeMap<u32, i64> = BTreeMap::new();

        for op in ops {
            match op {
                TableOp::Add(raw, v) => {
                    let id = EntityId::new(raw);
                    let result = table.add(id, v);
                    if model.contains_key(&raw) {
                        prop_assert!(
                            matches!(result, Err(EcsError::DuplicateKey { .. })),
                            "expected DuplicateKey"
                        );
                    } else {
                        prop_assert!(result.is_ok());
                        model.insert(raw, v);
                    }
                }
                TableOp::Remove(raw) => {
                    prop_assert_eq!(table.remove(EntityId::new(raw)), model.remove(&raw));
                }
                TableOp::Get(raw) => {
                    prop_assert_eq!(table.get(EntityId::new(raw)), model.get(&raw));
                }
                TableOp::Mutate(raw, v) => {
                    if let Some(slot) = table.get_mut(EntityId::new(raw)) {
                        *slot = v;
                        model.insert(raw, v);
                    } else {
                        prop_assert!(!model.contains_key(&raw));
                    }
                }
                TableOp::Clear => {
                    table.clear();
                    model.clear();
                }
            }

            prop_assert!(table.is_consistent());
            prop_assert_eq!(table.len(), model.len());
        }

        let mut ids: Vec<u32> = table.ids().iter().map(|id| id.to_raw()).collect();
        ids.sort_unstable();
        let expected: Vec<u32> = model.keys().copied().collect();
        prop_assert_eq!(ids, expected);
    }

    #[test]
    fn destroyed_ids_are_never_reissued(
        ops in prop::collection::vec((any::<bool>(), 0..32usize), 1..100)
    ) {
        let mut group = EntityGroup::new();
        let mut alive: Vec<EntityId> = Vec::new();
        let mut ever_issued = std::collections::HashSet::new();

        for (create, pick) in ops {
            if create || alive.is_empty() {
                let id = group.create_entity("e");
                prop_assert!(ever_issued.insert(id), "id {} issued twice", id);
                alive.push(id);
            } else {
                let victim = alive.swap_remove(pick % alive.len());
                prop_assert!(group.destroy_entity(victim));
                prop_assert!(!group.destroy_entity(victim));
            }
            prop_assert_eq!(group.entity_count(), alive.len());
            prop_assert!(group.is_consistent());
        }
    }
}
