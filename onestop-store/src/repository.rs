//! Current and historical entity rows.
//!
//! Every entity kind shares two tables. `current_entities` holds one row per
//! `(kind, business_key)`; `old_entities` holds every superseded or destroyed
//! version. The surrogate id of the current row is stable across updates and
//! is reused when a destroyed key is created again.

use onestop_core::{
    ChangesetId, EntityAttributes, EntityChange, EntityId, EntityKind, ValidationError,
    change::merge_attributes,
};
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde_json::{Map, Value};

use crate::error::{StoreError, WriteError, json, sqlite};

/// JSON attribute map stored with each row.
pub type Attributes = Map<String, Value>;

/// The current version of an entity.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEntity {
    /// Stable surrogate id.
    pub id: EntityId,
    /// Entity kind.
    pub kind: EntityKind,
    /// Business key.
    pub business_key: String,
    /// Version number, starting at 1.
    pub version: i64,
    /// Changeset that wrote this version.
    pub created_or_updated_in_changeset_id: ChangesetId,
    /// Attributes keyed by wire name.
    pub attributes: Attributes,
}

impl StoredEntity {
    /// Decode the attributes into the kind's typed schema.
    ///
    /// # Errors
    /// Returns [`StoreError::Json`] when the stored attributes do not match
    /// `T`.
    pub fn decode<T: EntityAttributes>(&self) -> Result<T, StoreError> {
        serde_json::from_value(Value::Object(self.attributes.clone()))
            .map_err(json("decode entity attributes"))
    }
}

/// A superseded or destroyed version of an entity.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoricalEntity {
    /// Surrogate id of the current row this version belonged to.
    pub current_id: EntityId,
    /// Entity kind.
    pub kind: EntityKind,
    /// Business key.
    pub business_key: String,
    /// Version number.
    pub version: i64,
    /// Changeset that wrote this version.
    pub created_or_updated_in_changeset_id: ChangesetId,
    /// Changeset that destroyed the entity, when this version ended by a
    /// destroy.
    pub destroyed_in_changeset_id: Option<ChangesetId>,
    /// Attributes keyed by wire name.
    pub attributes: Attributes,
}

/// Result of [`VersionedEntityRepository::upsert`].
#[derive(Debug, Clone, PartialEq)]
pub struct UpsertOutcome {
    /// The row as written.
    pub entity: StoredEntity,
    /// Whether the write created the current row.
    pub created: bool,
    /// Attribute names whose value changed; every attribute on create.
    pub changed_attributes: Vec<String>,
    /// Attribute names the change carried, changed or not.
    pub supplied_attributes: Vec<String>,
}

const ENTITY_COLUMNS: &str =
    "id, kind, business_key, version, created_or_updated_in_changeset_id, attributes";

struct RawEntity {
    id: EntityId,
    kind: String,
    business_key: String,
    version: i64,
    changeset_id: ChangesetId,
    attributes: String,
}

impl RawEntity {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            kind: row.get(1)?,
            business_key: row.get(2)?,
            version: row.get(3)?,
            changeset_id: row.get(4)?,
            attributes: row.get(5)?,
        })
    }

    fn into_stored(self) -> Result<StoredEntity, StoreError> {
        Ok(StoredEntity {
            id: self.id,
            kind: parse_kind(self.kind)?,
            business_key: self.business_key,
            version: self.version,
            created_or_updated_in_changeset_id: self.changeset_id,
            attributes: parse_attributes(&self.attributes)?,
        })
    }
}

pub(crate) fn parse_kind(value: String) -> Result<EntityKind, StoreError> {
    value.parse().map_err(|_| StoreError::Corrupt {
        column: "kind",
        value,
    })
}

fn parse_attributes(text: &str) -> Result<Attributes, StoreError> {
    serde_json::from_str(text).map_err(json("decode stored attributes"))
}

fn encode_attributes(attributes: &Attributes) -> Result<String, StoreError> {
    serde_json::to_string(attributes).map_err(json("encode attributes"))
}

/// Versioned persistence for every entity kind.
///
/// The repository borrows a connection; inside the apply engine that
/// connection is the apply transaction, so writes commit or roll back with
/// it.
#[derive(Debug, Clone, Copy)]
pub struct VersionedEntityRepository<'conn> {
    connection: &'conn Connection,
}

impl<'conn> VersionedEntityRepository<'conn> {
    /// Wrap a connection or transaction.
    pub const fn new(connection: &'conn Connection) -> Self {
        Self { connection }
    }

    /// Current version of `kind` with `key`.
    ///
    /// # Errors
    /// Returns [`StoreError`] when the query or decoding fails.
    pub fn find_current(
        &self,
        kind: EntityKind,
        key: &str,
    ) -> Result<Option<StoredEntity>, StoreError> {
        self.connection
            .query_row(
                &format!(
                    "SELECT {ENTITY_COLUMNS} FROM current_entities
                     WHERE kind = ?1 AND business_key = ?2"
                ),
                params![kind.as_str(), key],
                RawEntity::from_row,
            )
            .optional()
            .map_err(sqlite("find current entity"))?
            .map(RawEntity::into_stored)
            .transpose()
    }

    /// Current version of the entity with surrogate `id`.
    ///
    /// # Errors
    /// Returns [`StoreError`] when the query or decoding fails.
    pub fn find_by_id(&self, id: EntityId) -> Result<Option<StoredEntity>, StoreError> {
        self.connection
            .query_row(
                &format!("SELECT {ENTITY_COLUMNS} FROM current_entities WHERE id = ?1"),
                [id],
                RawEntity::from_row,
            )
            .optional()
            .map_err(sqlite("find entity by id"))?
            .map(RawEntity::into_stored)
            .transpose()
    }

    /// Whether a current row exists for `kind` and `key`.
    ///
    /// # Errors
    /// Returns [`StoreError::Sqlite`] when the query fails.
    pub fn exists(&self, kind: EntityKind, key: &str) -> Result<bool, StoreError> {
        self.connection
            .query_row(
                "SELECT 1 FROM current_entities WHERE kind = ?1 AND business_key = ?2",
                params![kind.as_str(), key],
                |_| Ok(()),
            )
            .optional()
            .map(|found| found.is_some())
            .map_err(sqlite("check entity existence"))
    }

    /// Number of current rows of `kind`.
    ///
    /// # Errors
    /// Returns [`StoreError::Sqlite`] when the query fails.
    pub fn count(&self, kind: EntityKind) -> Result<i64, StoreError> {
        self.connection
            .query_row(
                "SELECT COUNT(*) FROM current_entities WHERE kind = ?1",
                [kind.as_str()],
                |row| row.get(0),
            )
            .map_err(sqlite("count entities"))
    }

    /// Create or update the entity described by `change`.
    ///
    /// References named by the change must resolve to current rows, which
    /// includes rows written earlier in the same transaction. On update the
    /// previous version moves to history tagged with the changeset that wrote
    /// it, and the supplied attributes are merged over the stored ones. The
    /// merged record must satisfy the kind's schema.
    ///
    /// # Errors
    /// Returns [`WriteError::Invalid`] for schema or reference violations and
    /// [`WriteError::Store`] for storage failures.
    pub fn upsert(
        &self,
        change: &EntityChange,
        changeset_id: ChangesetId,
    ) -> Result<UpsertOutcome, WriteError> {
        let kind = change.kind();
        let key = change.business_key()?;
        self.check_references(change, &key)?;
        let incoming = change.to_attributes()?;

        let current = self.find_current(kind, &key)?;
        let created = current.is_none();
        let (mut attributes, version, reuse_id) = match &current {
            Some(row) => (row.attributes.clone(), row.version + 1, Some(row.id)),
            None => {
                let (last_version, last_id) = self.last_historical(kind, &key)?;
                (Attributes::new(), last_version + 1, last_id)
            }
        };
        let supplied_attributes: Vec<String> = incoming.keys().cloned().collect();
        let changed_attributes = merge_attributes(&mut attributes, incoming);
        EntityChange::from_attributes(kind, attributes.clone())?.validate()?;

        let encoded = encode_attributes(&attributes)?;
        let id = match current {
            Some(previous) => {
                self.archive(&previous, None)?;
                self.connection
                    .execute(
                        "UPDATE current_entities
                         SET version = ?1, created_or_updated_in_changeset_id = ?2, attributes = ?3
                         WHERE id = ?4",
                        params![version, changeset_id, encoded, previous.id],
                    )
                    .map_err(sqlite("update current entity"))?;
                previous.id
            }
            None => {
                self.connection
                    .execute(
                        "INSERT INTO current_entities
                         (id, kind, business_key, version, created_or_updated_in_changeset_id, attributes)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                        params![reuse_id, kind.as_str(), key, version, changeset_id, encoded],
                    )
                    .map_err(sqlite("insert current entity"))?;
                self.connection.last_insert_rowid()
            }
        };

        Ok(UpsertOutcome {
            entity: StoredEntity {
                id,
                kind,
                business_key: key,
                version,
                created_or_updated_in_changeset_id: changeset_id,
                attributes,
            },
            created,
            changed_attributes,
            supplied_attributes,
        })
    }

    /// Move the current row of `kind`/`key` into history as destroyed by
    /// `changeset_id`.
    ///
    /// # Errors
    /// Returns [`ValidationError::UnknownEntity`] (as [`WriteError::Invalid`])
    /// when no current row exists.
    pub fn retire(
        &self,
        kind: EntityKind,
        key: &str,
        changeset_id: ChangesetId,
    ) -> Result<StoredEntity, WriteError> {
        let current = self
            .find_current(kind, key)?
            .ok_or_else(|| ValidationError::UnknownEntity {
                kind,
                key: key.to_owned(),
            })?;
        self.archive(&current, Some(changeset_id))?;
        self.connection
            .execute("DELETE FROM current_entities WHERE id = ?1", [current.id])
            .map_err(sqlite("delete current entity"))?;
        Ok(current)
    }

    /// Every historical version of `kind`/`key`, oldest first.
    ///
    /// # Errors
    /// Returns [`StoreError`] when the query or decoding fails.
    pub fn history(
        &self,
        kind: EntityKind,
        key: &str,
    ) -> Result<Vec<HistoricalEntity>, StoreError> {
        let mut statement = self
            .connection
            .prepare_cached(
                "SELECT current_id, kind, business_key, version,
                        created_or_updated_in_changeset_id, destroyed_in_changeset_id, attributes
                 FROM old_entities
                 WHERE kind = ?1 AND business_key = ?2
                 ORDER BY version",
            )
            .map_err(sqlite("prepare history query"))?;
        let rows = statement
            .query_map(params![kind.as_str(), key], |row| {
                Ok((
                    row.get::<_, EntityId>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, ChangesetId>(4)?,
                    row.get::<_, Option<ChangesetId>>(5)?,
                    row.get::<_, String>(6)?,
                ))
            })
            .map_err(sqlite("query history"))?;

        let mut history = Vec::new();
        for row in rows {
            let (current_id, stored_kind, business_key, version, written_in, destroyed_in, text) =
                row.map_err(sqlite("read history row"))?;
            history.push(HistoricalEntity {
                current_id,
                kind: parse_kind(stored_kind)?,
                business_key,
                version,
                created_or_updated_in_changeset_id: written_in,
                destroyed_in_changeset_id: destroyed_in,
                attributes: parse_attributes(&text)?,
            });
        }
        Ok(history)
    }

    /// Current route stop patterns whose stop pattern lists `stop_key`.
    ///
    /// # Errors
    /// Returns [`StoreError`] when the query or decoding fails.
    pub fn patterns_serving_stop(&self, stop_key: &str) -> Result<Vec<StoredEntity>, StoreError> {
        let mut statement = self
            .connection
            .prepare_cached(&format!(
                "SELECT {ENTITY_COLUMNS} FROM current_entities AS e
                 WHERE e.kind = ?1
                   AND EXISTS (
                       SELECT 1 FROM json_each(e.attributes, '$.stopPattern') AS stop
                       WHERE stop.value = ?2
                   )
                 ORDER BY e.id"
            ))
            .map_err(sqlite("prepare pattern lookup"))?;
        let rows = statement
            .query_map(
                params![EntityKind::RouteStopPattern.as_str(), stop_key],
                RawEntity::from_row,
            )
            .map_err(sqlite("query patterns serving stop"))?;
        rows.map(|row| row.map_err(sqlite("read pattern row"))?.into_stored())
            .collect()
    }

    /// One page of current rows written by `changeset_id` with ids above
    /// `after`, ordered by id.
    ///
    /// # Errors
    /// Returns [`StoreError`] when the query or decoding fails.
    pub fn created_or_updated_in(
        &self,
        changeset_id: ChangesetId,
        after: EntityId,
        limit: usize,
    ) -> Result<Vec<StoredEntity>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut statement = self
            .connection
            .prepare_cached(&format!(
                "SELECT {ENTITY_COLUMNS} FROM current_entities
                 WHERE created_or_updated_in_changeset_id = ?1 AND id > ?2
                 ORDER BY id
                 LIMIT ?3"
            ))
            .map_err(sqlite("prepare changeset entity page"))?;
        let rows = statement
            .query_map(params![changeset_id, after, limit], RawEntity::from_row)
            .map_err(sqlite("query changeset entity page"))?;
        rows.map(|row| row.map_err(sqlite("read changeset entity row"))?.into_stored())
            .collect()
    }

    fn check_references(&self, change: &EntityChange, key: &str) -> Result<(), WriteError> {
        for reference in change.references() {
            if !self.exists(reference.kind, &reference.key)? {
                return Err(ValidationError::UnknownReference {
                    kind: change.kind(),
                    key: key.to_owned(),
                    field: reference.field,
                    target_kind: reference.kind,
                    target_key: reference.key,
                }
                .into());
            }
        }
        Ok(())
    }

    /// Highest historical version and its surrogate id, or `(0, None)`.
    fn last_historical(
        &self,
        kind: EntityKind,
        key: &str,
    ) -> Result<(i64, Option<EntityId>), StoreError> {
        self.connection
            .query_row(
                "SELECT version, current_id FROM old_entities
                 WHERE kind = ?1 AND business_key = ?2
                 ORDER BY version DESC LIMIT 1",
                params![kind.as_str(), key],
                |row| Ok((row.get::<_, i64>(0)?, Some(row.get::<_, EntityId>(1)?))),
            )
            .optional()
            .map(|found| found.unwrap_or((0, None)))
            .map_err(sqlite("read last historical version"))
    }

    fn archive(
        &self,
        row: &StoredEntity,
        destroyed_in: Option<ChangesetId>,
    ) -> Result<(), StoreError> {
        self.connection
            .execute(
                "INSERT INTO old_entities
                 (current_id, kind, business_key, version, created_or_updated_in_changeset_id,
                  destroyed_in_changeset_id, attributes)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    row.id,
                    row.kind.as_str(),
                    row.business_key,
                    row.version,
                    row.created_or_updated_in_changeset_id,
                    destroyed_in,
                    encode_attributes(&row.attributes)?,
                ],
            )
            .map(|_| ())
            .map_err(sqlite("archive entity version"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RegistryStore;
    use onestop_core::{
        Geometry, Stop,
        test_support::{operator, route, stop},
    };
    use rstest::{fixture, rstest};

    #[fixture]
    fn store() -> RegistryStore {
        let store = RegistryStore::open_in_memory().expect("open store");
        for id in 1..=4 {
            store
                .connection()
                .execute("INSERT INTO changesets (id, created_at) VALUES (?1, 0)", [id])
                .expect("seed changeset");
        }
        store
    }

    #[rstest]
    fn create_starts_at_version_one(store: RegistryStore) {
        let repo = store.entities();
        let outcome = repo
            .upsert(&stop("s-1", 1.0, 2.0).entity, 1)
            .expect("create stop");
        assert!(outcome.created);
        assert_eq!(outcome.entity.version, 1);
        assert!(outcome.changed_attributes.contains(&"geometry".to_owned()));
        assert!(repo.history(EntityKind::Stop, "s-1").expect("history").is_empty());
    }

    #[rstest]
    fn update_archives_previous_version(store: RegistryStore) {
        let repo = store.entities();
        let first = repo.upsert(&stop("s-1", 1.0, 2.0).entity, 1).expect("create");
        let second = repo.upsert(&stop("s-1", 1.5, 2.0).entity, 2).expect("update");

        assert_eq!(second.entity.id, first.entity.id);
        assert_eq!(second.entity.version, 2);
        assert_eq!(second.changed_attributes, vec!["geometry".to_owned()]);

        let history = repo.history(EntityKind::Stop, "s-1").expect("history");
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].version, 1);
        assert_eq!(history[0].created_or_updated_in_changeset_id, 1);
        assert_eq!(history[0].destroyed_in_changeset_id, None);
    }

    #[rstest]
    fn resending_a_value_reports_it_supplied_but_unchanged(store: RegistryStore) {
        let repo = store.entities();
        repo.upsert(&stop("s-1", 1.0, 2.0).entity, 1).expect("create");
        let again = repo.upsert(&stop("s-1", 1.0, 2.0).entity, 2).expect("resend");

        assert!(again.changed_attributes.is_empty());
        assert!(again.supplied_attributes.contains(&"geometry".to_owned()));
        assert!(again.supplied_attributes.contains(&"name".to_owned()));
    }

    #[rstest]
    fn partial_update_keeps_stored_attributes(store: RegistryStore) {
        let repo = store.entities();
        repo.upsert(&stop("s-1", 1.0, 2.0).entity, 1).expect("create");
        repo.upsert(
            &onestop_core::test_support::rename_stop("s-1", "Renamed").entity,
            2,
        )
        .expect("rename");
        let current = repo
            .find_current(EntityKind::Stop, "s-1")
            .expect("query")
            .expect("stop exists");
        let typed: Stop = current.decode().expect("decode stop");
        assert_eq!(typed.name.as_deref(), Some("Renamed"));
        assert_eq!(typed.geometry, Some(Geometry::point_at(1.0, 2.0)));
    }

    #[rstest]
    fn recreation_continues_version_sequence(store: RegistryStore) {
        let repo = store.entities();
        let created = repo.upsert(&stop("s-1", 1.0, 2.0).entity, 1).expect("create");
        repo.retire(EntityKind::Stop, "s-1", 2).expect("destroy");
        assert!(!repo.exists(EntityKind::Stop, "s-1").expect("exists"));

        let recreated = repo.upsert(&stop("s-1", 3.0, 4.0).entity, 3).expect("recreate");
        assert_eq!(recreated.entity.version, 2);
        assert_eq!(recreated.entity.id, created.entity.id);
        assert!(recreated.created);

        let history = repo.history(EntityKind::Stop, "s-1").expect("history");
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].destroyed_in_changeset_id, Some(2));
    }

    #[rstest]
    fn unknown_reference_is_rejected(store: RegistryStore) {
        let err = store
            .entities()
            .upsert(&route("r-1", "o-missing").entity, 1)
            .expect_err("route without operator");
        assert!(matches!(
            err,
            WriteError::Invalid(ValidationError::UnknownReference {
                target_kind: EntityKind::Operator,
                ..
            })
        ));
    }

    #[rstest]
    fn references_resolve_against_earlier_writes(store: RegistryStore) {
        let repo = store.entities();
        repo.upsert(&operator("o-1").entity, 1).expect("operator");
        repo.upsert(&route("r-1", "o-1").entity, 1).expect("route");
        assert_eq!(repo.count(EntityKind::Route).expect("count"), 1);
    }

    #[rstest]
    fn destroying_missing_entity_fails(store: RegistryStore) {
        let err = store
            .entities()
            .retire(EntityKind::Stop, "s-nowhere", 1)
            .expect_err("nothing to destroy");
        assert!(matches!(
            err,
            WriteError::Invalid(ValidationError::UnknownEntity { .. })
        ));
    }

    #[rstest]
    fn invalid_merge_writes_nothing(store: RegistryStore) {
        let repo = store.entities();
        let bad = onestop_core::test_support::rename_stop("s-1", "No geometry");
        assert!(repo.upsert(&bad.entity, 1).is_err());
        assert!(!repo.exists(EntityKind::Stop, "s-1").expect("exists"));
    }

    #[rstest]
    fn pages_entities_written_by_changeset(store: RegistryStore) {
        let repo = store.entities();
        for i in 0..5 {
            repo.upsert(&stop(&format!("s-{i}"), 1.0, 2.0).entity, 1)
                .expect("create stop");
        }
        let first = repo.created_or_updated_in(1, 0, 2).expect("first page");
        assert_eq!(first.len(), 2);
        let last_id = first.last().map(|row| row.id).expect("page has rows");
        let rest = repo.created_or_updated_in(1, last_id, 10).expect("rest");
        assert_eq!(rest.len(), 3);
        assert!(rest.iter().all(|row| row.id > last_id));
    }
}
