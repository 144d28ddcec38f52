//! The set of entities written during one apply.

use std::collections::{BTreeMap, BTreeSet};

use onestop_core::{EntityId, EntityKind};

use crate::{StoredEntity, UpsertOutcome};

/// One entity written during an apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TouchedEntity {
    /// Entity kind.
    pub kind: EntityKind,
    /// Surrogate id.
    pub id: EntityId,
    /// Business key.
    pub business_key: String,
    /// Attributes any operation of the apply carried, whether or not their
    /// value changed.
    pub supplied_attributes: BTreeSet<String>,
    /// Whether the last operation on the entity destroyed it.
    pub destroyed: bool,
}

impl TouchedEntity {
    /// Whether an operation carried `attribute`. A destroy carries everything.
    pub fn attribute_supplied(&self, attribute: &str) -> bool {
        self.destroyed || self.supplied_attributes.contains(attribute)
    }
}

/// Entities written during an apply, keyed by surrogate id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TouchedEntities {
    entries: BTreeMap<EntityId, TouchedEntity>,
}

impl TouchedEntities {
    /// Record a create or update.
    pub fn record_upsert(&mut self, outcome: &UpsertOutcome) {
        let entry = self.entry(&outcome.entity);
        entry.destroyed = false;
        entry
            .supplied_attributes
            .extend(outcome.supplied_attributes.iter().cloned());
    }

    /// Record a destroy.
    pub fn record_retire(&mut self, retired: &StoredEntity) {
        let entry = self.entry(retired);
        entry.destroyed = true;
        entry
            .supplied_attributes
            .extend(retired.attributes.keys().cloned());
    }

    fn entry(&mut self, entity: &StoredEntity) -> &mut TouchedEntity {
        self.entries
            .entry(entity.id)
            .or_insert_with(|| TouchedEntity {
                kind: entity.kind,
                id: entity.id,
                business_key: entity.business_key.clone(),
                supplied_attributes: BTreeSet::new(),
                destroyed: false,
            })
    }

    /// Every touched entity in id order.
    pub fn iter(&self) -> impl Iterator<Item = &TouchedEntity> {
        self.entries.values()
    }

    /// Touched entities of `kind` that still exist.
    pub fn live(&self, kind: EntityKind) -> impl Iterator<Item = &TouchedEntity> {
        self.entries
            .values()
            .filter(move |entity| entity.kind == kind && !entity.destroyed)
    }

    /// Ids of touched entities of `kind` that still exist.
    pub fn live_ids(&self, kind: EntityKind) -> Vec<EntityId> {
        self.live(kind).map(|entity| entity.id).collect()
    }

    /// Entry for `id`, if touched.
    pub fn get(&self, id: EntityId) -> Option<&TouchedEntity> {
        self.entries.get(&id)
    }

    /// Number of touched entities.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing was touched.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
