//! Feed version registration and import provenance.

use log::debug;
use onestop_core::{
    ChangesetId, EntityId, EntityKind, FeedVersion, FeedVersionId, ImportProvenance,
    ValidationError,
};
use rusqlite::{Connection, OptionalExtension, Row, params};

use crate::{
    ChangesetEntityCursor, VersionedEntityRepository,
    error::{StoreError, WriteError, sqlite},
    repository::parse_kind,
};

/// One entity recorded as imported from a feed version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportedEntity {
    /// Entity kind.
    pub entity_kind: EntityKind,
    /// Entity surrogate id.
    pub entity_id: EntityId,
    /// Feed imported from.
    pub feed_onestop_id: String,
    /// Feed version imported from.
    pub feed_version_id: FeedVersionId,
}

/// Reads and writes feed versions and import provenance rows.
#[derive(Debug, Clone, Copy)]
pub struct FeedVersionStore<'conn> {
    connection: &'conn Connection,
}

fn read_feed_version(row: &Row<'_>) -> rusqlite::Result<FeedVersion> {
    Ok(FeedVersion {
        id: row.get(0)?,
        feed_onestop_id: row.get(1)?,
        sha1: row.get(2)?,
        created_at: row.get(3)?,
    })
}

impl<'conn> FeedVersionStore<'conn> {
    /// Wrap a connection or transaction.
    pub const fn new(connection: &'conn Connection) -> Self {
        Self { connection }
    }

    /// Register a fetched snapshot of `feed_onestop_id`.
    ///
    /// Registering the same `sha1` for the same feed again returns the
    /// existing record.
    ///
    /// # Errors
    /// Returns [`ValidationError::FeedVersionMismatch`] when `sha1` is already
    /// registered for another feed, and [`ValidationError::InvalidField`] for
    /// blank inputs.
    pub fn register(
        &self,
        feed_onestop_id: &str,
        sha1: &str,
        created_at: i64,
    ) -> Result<FeedVersion, WriteError> {
        if feed_onestop_id.trim().is_empty() || sha1.trim().is_empty() {
            return Err(ValidationError::InvalidField {
                kind: EntityKind::FeedVersion,
                key: sha1.to_owned(),
                field: "sha1",
                reason: "feed and sha1 must not be blank".to_owned(),
            }
            .into());
        }
        if let Some(existing) = self.by_sha1(sha1)? {
            if existing.feed_onestop_id == feed_onestop_id {
                return Ok(existing);
            }
            return Err(ValidationError::FeedVersionMismatch {
                feed_version_id: existing.id,
                feed_onestop_id: feed_onestop_id.to_owned(),
            }
            .into());
        }
        self.connection
            .execute(
                "INSERT INTO feed_versions (feed_onestop_id, sha1, created_at) VALUES (?1, ?2, ?3)",
                params![feed_onestop_id, sha1, created_at],
            )
            .map_err(sqlite("insert feed version"))?;
        Ok(FeedVersion {
            id: self.connection.last_insert_rowid(),
            feed_onestop_id: feed_onestop_id.to_owned(),
            sha1: sha1.to_owned(),
            created_at,
        })
    }

    /// Feed version with `id`, if any.
    ///
    /// # Errors
    /// Returns [`StoreError::Sqlite`] when the query fails.
    pub fn get(&self, id: FeedVersionId) -> Result<Option<FeedVersion>, StoreError> {
        self.connection
            .query_row(
                "SELECT id, feed_onestop_id, sha1, created_at FROM feed_versions WHERE id = ?1",
                [id],
                read_feed_version,
            )
            .optional()
            .map_err(sqlite("load feed version"))
    }

    /// Feed version with `sha1`, if any.
    ///
    /// # Errors
    /// Returns [`StoreError::Sqlite`] when the query fails.
    pub fn by_sha1(&self, sha1: &str) -> Result<Option<FeedVersion>, StoreError> {
        self.connection
            .query_row(
                "SELECT id, feed_onestop_id, sha1, created_at FROM feed_versions WHERE sha1 = ?1",
                [sha1],
                read_feed_version,
            )
            .optional()
            .map_err(sqlite("load feed version by sha1"))
    }

    /// Check that `provenance` names a registered version of its feed.
    ///
    /// # Errors
    /// Returns [`ValidationError::UnknownFeedVersion`] or
    /// [`ValidationError::FeedVersionMismatch`].
    pub fn check(&self, provenance: &ImportProvenance) -> Result<(), WriteError> {
        let version = self.get(provenance.feed_version_id)?.ok_or(
            ValidationError::UnknownFeedVersion {
                feed_version_id: provenance.feed_version_id,
            },
        )?;
        if version.feed_onestop_id != provenance.feed_onestop_id {
            return Err(ValidationError::FeedVersionMismatch {
                feed_version_id: version.id,
                feed_onestop_id: provenance.feed_onestop_id.clone(),
            }
            .into());
        }
        Ok(())
    }

    /// Record every import-tracked entity written by `changeset_id` as
    /// imported under `provenance`, walking the entities in bounded batches.
    ///
    /// Returns the number of rows recorded.
    ///
    /// # Errors
    /// Returns [`StoreError`] when reading or inserting fails.
    pub fn record_imports(
        &self,
        changeset_id: ChangesetId,
        provenance: &ImportProvenance,
        batch_size: usize,
    ) -> Result<usize, StoreError> {
        let repository = VersionedEntityRepository::new(self.connection);
        let mut cursor = ChangesetEntityCursor::new(changeset_id, batch_size);
        let mut insert = self
            .connection
            .prepare_cached(
                "INSERT OR IGNORE INTO entities_imported_from_feed
                 (entity_kind, entity_id, feed_onestop_id, feed_version_id)
                 VALUES (?1, ?2, ?3, ?4)",
            )
            .map_err(sqlite("prepare import provenance insert"))?;

        let mut recorded = 0;
        while let Some(batch) = cursor.next_batch(&repository)? {
            for entity in batch
                .iter()
                .filter(|entity| entity.kind.records_import_provenance())
            {
                recorded += insert
                    .execute(params![
                        entity.kind.as_str(),
                        entity.id,
                        provenance.feed_onestop_id,
                        provenance.feed_version_id
                    ])
                    .map_err(sqlite("insert import provenance"))?;
            }
            debug!(
                "changeset {changeset_id}: recorded provenance up to entity {}",
                cursor.position()
            );
        }
        Ok(recorded)
    }

    /// Entities recorded as imported from `feed_version_id`.
    ///
    /// # Errors
    /// Returns [`StoreError`] when the query or decoding fails.
    pub fn imported_entities(
        &self,
        feed_version_id: FeedVersionId,
    ) -> Result<Vec<ImportedEntity>, StoreError> {
        let mut statement = self
            .connection
            .prepare_cached(
                "SELECT entity_kind, entity_id, feed_onestop_id, feed_version_id
                 FROM entities_imported_from_feed
                 WHERE feed_version_id = ?1 ORDER BY id",
            )
            .map_err(sqlite("prepare imported entity query"))?;
        let rows = statement
            .query_map([feed_version_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, EntityId>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, FeedVersionId>(3)?,
                ))
            })
            .map_err(sqlite("query imported entities"))?;
        let mut imported = Vec::new();
        for row in rows {
            let (kind, entity_id, feed_onestop_id, version_id) =
                row.map_err(sqlite("read imported entity row"))?;
            imported.push(ImportedEntity {
                entity_kind: parse_kind(kind)?,
                entity_id,
                feed_onestop_id,
                feed_version_id: version_id,
            });
        }
        Ok(imported)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RegistryStore;
    use rstest::rstest;

    #[rstest]
    fn registration_is_idempotent_per_feed() {
        let store = RegistryStore::open_in_memory().expect("open store");
        let versions = store.feed_versions();
        let first = versions.register("f-1", "abc", 0).expect("register");
        let again = versions.register("f-1", "abc", 5).expect("register again");
        assert_eq!(first, again);

        let err = versions
            .register("f-2", "abc", 0)
            .expect_err("sha1 belongs to f-1");
        assert!(matches!(
            err,
            WriteError::Invalid(ValidationError::FeedVersionMismatch { .. })
        ));
    }

    #[rstest]
    fn provenance_must_match_registered_feed() {
        let store = RegistryStore::open_in_memory().expect("open store");
        let versions = store.feed_versions();
        let version = versions.register("f-1", "abc", 0).expect("register");

        let good = ImportProvenance {
            feed_onestop_id: "f-1".into(),
            feed_version_id: version.id,
        };
        assert!(versions.check(&good).is_ok());

        let wrong_feed = ImportProvenance {
            feed_onestop_id: "f-2".into(),
            ..good.clone()
        };
        assert!(matches!(
            versions.check(&wrong_feed),
            Err(WriteError::Invalid(ValidationError::FeedVersionMismatch { .. }))
        ));

        let missing = ImportProvenance {
            feed_version_id: version.id + 100,
            ..good
        };
        assert!(matches!(
            versions.check(&missing),
            Err(WriteError::Invalid(ValidationError::UnknownFeedVersion { .. }))
        ));
    }
}
