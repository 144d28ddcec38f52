//! Changeset and payload rows.

use onestop_core::{
    ChangePayload, Changeset, ChangesetId, ChangesetUser, ImportProvenance, NewChangeset,
    PayloadBody,
};
use rusqlite::{Connection, OptionalExtension, Row, params};

use crate::error::{StoreError, json, sqlite};

/// Reads and writes changesets and their payloads.
#[derive(Debug, Clone, Copy)]
pub struct ChangesetStore<'conn> {
    connection: &'conn Connection,
}

impl<'conn> ChangesetStore<'conn> {
    /// Wrap a connection or transaction.
    pub const fn new(connection: &'conn Connection) -> Self {
        Self { connection }
    }

    /// Insert a new, unapplied changeset.
    ///
    /// # Errors
    /// Returns [`StoreError::Sqlite`] when the insert fails.
    pub fn create(&self, new: &NewChangeset, created_at: i64) -> Result<Changeset, StoreError> {
        let user = new.user.as_ref();
        let provenance = new.provenance.as_ref();
        self.connection
            .execute(
                "INSERT INTO changesets
                 (notes, user_email, user_admin, has_user, imported_from_feed,
                  imported_from_feed_version_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    new.notes,
                    user.and_then(|u| u.email.as_deref()),
                    user.is_some_and(|u| u.admin),
                    user.is_some(),
                    provenance.map(|p| p.feed_onestop_id.as_str()),
                    provenance.map(|p| p.feed_version_id),
                    created_at,
                ],
            )
            .map_err(sqlite("insert changeset"))?;
        Ok(Changeset {
            id: self.connection.last_insert_rowid(),
            notes: new.notes.clone(),
            applied: false,
            applied_at: None,
            user: new.user.clone(),
            provenance: new.provenance.clone(),
            created_at,
        })
    }

    /// Changeset with `id`, if any.
    ///
    /// # Errors
    /// Returns [`StoreError::Sqlite`] when the query fails.
    pub fn get(&self, id: ChangesetId) -> Result<Option<Changeset>, StoreError> {
        self.connection
            .query_row(
                "SELECT id, notes, applied, applied_at, user_email, user_admin, has_user,
                        imported_from_feed, imported_from_feed_version_id, created_at
                 FROM changesets WHERE id = ?1",
                [id],
                read_changeset,
            )
            .optional()
            .map_err(sqlite("load changeset"))
    }

    /// Mark `id` applied at `applied_at`.
    ///
    /// # Errors
    /// Returns [`StoreError::Sqlite`] when the update fails.
    pub fn mark_applied(&self, id: ChangesetId, applied_at: i64) -> Result<(), StoreError> {
        self.connection
            .execute(
                "UPDATE changesets SET applied = 1, applied_at = ?1 WHERE id = ?2 AND applied = 0",
                params![applied_at, id],
            )
            .map(|_| ())
            .map_err(sqlite("mark changeset applied"))
    }

    /// Attach a payload body to changeset `id`.
    ///
    /// Callers check the applied state and size bound first.
    ///
    /// # Errors
    /// Returns [`StoreError`] when encoding or the insert fails.
    pub fn insert_payload(
        &self,
        changeset_id: ChangesetId,
        body: PayloadBody,
        created_at: i64,
    ) -> Result<ChangePayload, StoreError> {
        let encoded = serde_json::to_string(&body).map_err(json("encode change payload"))?;
        self.connection
            .execute(
                "INSERT INTO change_payloads (changeset_id, payload, created_at)
                 VALUES (?1, ?2, ?3)",
                params![changeset_id, encoded, created_at],
            )
            .map_err(sqlite("insert change payload"))?;
        Ok(ChangePayload {
            id: self.connection.last_insert_rowid(),
            changeset_id,
            body,
            created_at,
        })
    }

    /// Payloads of `changeset_id` in apply order.
    ///
    /// # Errors
    /// Returns [`StoreError`] when the query or decoding fails.
    pub fn payloads(&self, changeset_id: ChangesetId) -> Result<Vec<ChangePayload>, StoreError> {
        let mut statement = self
            .connection
            .prepare_cached(
                "SELECT id, payload, created_at FROM change_payloads
                 WHERE changeset_id = ?1 ORDER BY id",
            )
            .map_err(sqlite("prepare payload query"))?;
        let rows = statement
            .query_map([changeset_id], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })
            .map_err(sqlite("query payloads"))?;

        let mut payloads = Vec::new();
        for row in rows {
            let (id, text, created_at) = row.map_err(sqlite("read payload row"))?;
            let body = serde_json::from_str(&text).map_err(json("decode change payload"))?;
            payloads.push(ChangePayload {
                id,
                changeset_id,
                body,
                created_at,
            });
        }
        Ok(payloads)
    }
}

fn read_changeset(row: &Row<'_>) -> rusqlite::Result<Changeset> {
    let has_user: bool = row.get(6)?;
    let user = has_user
        .then(|| -> rusqlite::Result<ChangesetUser> {
            Ok(ChangesetUser {
                email: row.get(4)?,
                admin: row.get(5)?,
            })
        })
        .transpose()?;
    let feed: Option<String> = row.get(7)?;
    let feed_version: Option<i64> = row.get(8)?;
    let provenance = feed
        .zip(feed_version)
        .map(|(feed_onestop_id, feed_version_id)| ImportProvenance {
            feed_onestop_id,
            feed_version_id,
        });
    Ok(Changeset {
        id: row.get(0)?,
        notes: row.get(1)?,
        applied: row.get(2)?,
        applied_at: row.get(3)?,
        user,
        provenance,
        created_at: row.get(9)?,
    })
}
