//! Property-based tests for entity version history.
//!
//! Random sequences of stop writes and destroys are applied one changeset at
//! a time, and the stored state is compared with a simple model after every
//! step.
//!
//! # Invariants tested
//!
//! - **Monotonic versions:** each write of a key yields the next version, also
//!   after the key was destroyed and re-created.
//! - **Complete history:** every superseded version is archived exactly once,
//!   in order, and a destroy archives the last version with its changeset.
//! - **Stable identity:** a key keeps its entity id across updates and
//!   re-creation.
//! - **Atomic rejection:** destroying a missing key fails and changes nothing.

use std::collections::BTreeMap;

use onestop_core::{
    ApplyConfig, ChangeOp, EntityKind, NewChangeset,
    test_support::{destroy_stop, stop},
};
use onestop_store::{ApplyError, Registry, RegistryStore};
use proptest::prelude::*;

const KEYS: [&str; 3] = ["s-9q8-alpha", "s-9q8-bravo", "s-9q8-charlie"];

#[derive(Debug, Clone)]
enum Step {
    Write { key: usize, lon: i16 },
    Destroy { key: usize },
}

fn step_strategy() -> impl Strategy<Value = Step> {
    prop_oneof![
        3 => (0..KEYS.len(), -180_i16..=180).prop_map(|(key, lon)| Step::Write { key, lon }),
        1 => (0..KEYS.len()).prop_map(|key| Step::Destroy { key }),
    ]
}

#[derive(Debug, Default, Clone, Copy)]
struct Model {
    version: i64,
    live: bool,
    id: Option<i64>,
}

fn apply_one(registry: &mut Registry, op: ChangeOp) -> (i64, Result<(), ApplyError>) {
    let changeset = registry
        .create_changeset(&NewChangeset::default())
        .expect("create changeset");
    registry
        .add_changes(changeset.id, vec![op])
        .expect("attach change");
    (changeset.id, registry.apply(changeset.id).map(|_| ()))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn versions_and_history_follow_writes(steps in prop::collection::vec(step_strategy(), 1..24)) {
        let mut registry = Registry::new(
            RegistryStore::open_in_memory().expect("open registry"),
            ApplyConfig::default(),
        );
        let mut model: BTreeMap<usize, Model> = BTreeMap::new();

        for step in steps {
            match step {
                Step::Write { key, lon } => {
                    let (_, result) =
                        apply_one(&mut registry, stop(KEYS[key], f64::from(lon), 0.0));
                    prop_assert!(result.is_ok(), "write failed: {result:?}");
                    let entry = model.entry(key).or_default();
                    entry.version += 1;
                    entry.live = true;
                }
                Step::Destroy { key } => {
                    let live = model.get(&key).is_some_and(|entry| entry.live);
                    let (changeset_id, result) = apply_one(&mut registry, destroy_stop(KEYS[key]));
                    if live {
                        prop_assert!(result.is_ok(), "destroy failed: {result:?}");
                        if let Some(entry) = model.get_mut(&key) {
                            entry.live = false;
                        }
                        let history = registry
                            .store()
                            .entities()
                            .history(EntityKind::Stop, KEYS[key])
                            .expect("load history");
                        let last = history.last().expect("destroy archives a version");
                        prop_assert_eq!(last.destroyed_in_changeset_id, Some(changeset_id));
                    } else {
                        prop_assert!(
                            matches!(result, Err(ApplyError::Validation { .. })),
                            "destroying a missing stop should fail: {result:?}"
                        );
                        let changeset = registry
                            .changeset(changeset_id)
                            .expect("load changeset")
                            .expect("changeset exists");
                        prop_assert!(!changeset.applied);
                    }
                }
            }

            let entities = registry.store().entities();
            for (key, entry) in &mut model {
                let current = entities
                    .find_current(EntityKind::Stop, KEYS[*key])
                    .expect("query stop");
                let history = entities
                    .history(EntityKind::Stop, KEYS[*key])
                    .expect("load history");
                let archived: Vec<i64> = history.iter().map(|row| row.version).collect();

                if entry.live {
                    let row = current.expect("live stop has a current row");
                    prop_assert_eq!(row.version, entry.version);
                    prop_assert_eq!(archived, (1..entry.version).collect::<Vec<_>>());
                    let first_id = *entry.id.get_or_insert(row.id);
                    prop_assert_eq!(row.id, first_id);
                } else {
                    prop_assert!(current.is_none());
                    prop_assert_eq!(archived, (1..=entry.version).collect::<Vec<_>>());
                }
                if let Some(id) = entry.id {
                    prop_assert!(history.iter().all(|row| row.current_id == id));
                }
            }
        }
    }
}
