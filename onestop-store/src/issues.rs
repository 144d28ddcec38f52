//! Issue persistence, lookup and deprecation.

use onestop_core::{
    ChangesetId, EntityAttributeRef, EntityId, EntityKind, Issue, IssueCandidate, IssueId,
    IssueType, equivalent,
};
use rusqlite::{Connection, OptionalExtension, params};

use crate::{
    error::{StoreError, sqlite},
    repository::parse_kind,
};

const ISSUE_COLUMNS: &str = "id, issue_type, details, open, created_by_changeset_id, \
                             resolved_by_changeset_id, created_at";

type IssueRow = (IssueId, String, String, bool, Option<ChangesetId>, Option<ChangesetId>, i64);

/// Reads and writes issues and their entity attachments.
#[derive(Debug, Clone, Copy)]
pub struct IssueStore<'conn> {
    connection: &'conn Connection,
}

impl<'conn> IssueStore<'conn> {
    /// Wrap a connection or transaction.
    pub const fn new(connection: &'conn Connection) -> Self {
        Self { connection }
    }

    /// Persist `candidate` as a new open issue.
    ///
    /// `created_by` is `None` for manually reported issues.
    ///
    /// # Errors
    /// Returns [`StoreError::Sqlite`] when an insert fails.
    pub fn create(
        &self,
        candidate: &IssueCandidate,
        created_by: Option<ChangesetId>,
        created_at: i64,
    ) -> Result<Issue, StoreError> {
        self.connection
            .execute(
                "INSERT INTO issues (issue_type, details, open, created_by_changeset_id, created_at)
                 VALUES (?1, ?2, 1, ?3, ?4)",
                params![
                    candidate.issue_type.as_str(),
                    candidate.details,
                    created_by,
                    created_at
                ],
            )
            .map_err(sqlite("insert issue"))?;
        let id = self.connection.last_insert_rowid();

        let mut attach = self
            .connection
            .prepare_cached(
                "INSERT INTO entities_with_issues (issue_id, entity_kind, entity_id, entity_attribute)
                 VALUES (?1, ?2, ?3, ?4)",
            )
            .map_err(sqlite("prepare issue attachment"))?;
        for entity in &candidate.entities {
            attach
                .execute(params![
                    id,
                    entity.kind.as_str(),
                    entity.entity_id,
                    entity.attribute
                ])
                .map_err(sqlite("attach issue to entity"))?;
        }

        Ok(Issue {
            id,
            issue_type: candidate.issue_type,
            details: candidate.details.clone(),
            open: true,
            created_by_changeset_id: created_by,
            resolved_by_changeset_id: None,
            created_at,
            entities: candidate.entities.clone(),
        })
    }

    /// Issue with `id`, if any.
    ///
    /// # Errors
    /// Returns [`StoreError`] when the query or decoding fails.
    pub fn get(&self, id: IssueId) -> Result<Option<Issue>, StoreError> {
        let row = self
            .connection
            .query_row(
                &format!("SELECT {ISSUE_COLUMNS} FROM issues WHERE id = ?1"),
                [id],
                read_issue_row,
            )
            .optional()
            .map_err(sqlite("load issue"))?;
        row.map(|row| self.hydrate(row)).transpose()
    }

    /// Every open issue, oldest first.
    ///
    /// # Errors
    /// Returns [`StoreError`] when the query or decoding fails.
    pub fn open_issues(&self) -> Result<Vec<Issue>, StoreError> {
        self.select(
            &format!("SELECT {ISSUE_COLUMNS} FROM issues WHERE open = 1 ORDER BY id"),
            params![],
        )
    }

    /// Every issue, open or closed, whose type is in `types`.
    ///
    /// # Errors
    /// Returns [`StoreError`] when the query or decoding fails.
    pub fn with_types(&self, types: &[IssueType]) -> Result<Vec<Issue>, StoreError> {
        let mut issues = Vec::new();
        for issue_type in types {
            issues.extend(self.select(
                &format!("SELECT {ISSUE_COLUMNS} FROM issues WHERE issue_type = ?1 ORDER BY id"),
                params![issue_type.as_str()],
            )?);
        }
        issues.sort_by_key(|issue| issue.id);
        Ok(issues)
    }

    /// Issues attached to `kind`/`entity_id`.
    ///
    /// With `attributes`, only attachments naming one of those attributes
    /// count.
    ///
    /// # Errors
    /// Returns [`StoreError`] when the query or decoding fails.
    pub fn issues_of_entity(
        &self,
        kind: EntityKind,
        entity_id: EntityId,
        attributes: Option<&[&str]>,
    ) -> Result<Vec<Issue>, StoreError> {
        let issues = self.select(
            &format!(
                "SELECT {ISSUE_COLUMNS} FROM issues
                 WHERE id IN (
                     SELECT issue_id FROM entities_with_issues
                     WHERE entity_kind = ?1 AND entity_id = ?2
                 )
                 ORDER BY id"
            ),
            params![kind.as_str(), entity_id],
        )?;
        let Some(names) = attributes else {
            return Ok(issues);
        };
        Ok(issues
            .into_iter()
            .filter(|issue| {
                issue.entities.iter().any(|entity| {
                    entity.kind == kind
                        && entity.entity_id == entity_id
                        && entity
                            .attribute
                            .as_deref()
                            .is_some_and(|name| names.contains(&name))
                })
            })
            .collect())
    }

    /// Issues, open or closed, that concern `feed_onestop_id`: those attached
    /// to an entity imported from any of its versions, and those raised by a
    /// changeset imported from it.
    ///
    /// # Errors
    /// Returns [`StoreError`] when the query or decoding fails.
    pub fn from_feed(&self, feed_onestop_id: &str) -> Result<Vec<Issue>, StoreError> {
        self.select(
            &format!(
                "SELECT {ISSUE_COLUMNS} FROM issues
                 WHERE id IN (
                     SELECT attached.issue_id
                     FROM entities_with_issues AS attached
                     JOIN entities_imported_from_feed AS imported
                       ON imported.entity_kind = attached.entity_kind
                      AND imported.entity_id = attached.entity_id
                     WHERE imported.feed_onestop_id = ?1
                 )
                 OR created_by_changeset_id IN (
                     SELECT id FROM changesets WHERE imported_from_feed = ?1
                 )
                 ORDER BY id"
            ),
            params![feed_onestop_id],
        )
    }

    /// Open issue equivalent to `candidate`, if one exists.
    ///
    /// # Errors
    /// Returns [`StoreError`] when the query or decoding fails.
    pub fn find_by_equivalent(
        &self,
        candidate: &IssueCandidate,
    ) -> Result<Option<Issue>, StoreError> {
        let pool = match candidate.entities.first() {
            Some(anchor) => self.issues_of_entity(anchor.kind, anchor.entity_id, None)?,
            None => self.select(
                &format!("SELECT {ISSUE_COLUMNS} FROM issues WHERE issue_type = ?1 ORDER BY id"),
                params![candidate.issue_type.as_str()],
            )?,
        };
        let signature = candidate.signature();
        Ok(pool
            .into_iter()
            .find(|issue| issue.open && equivalent(&issue.signature(), &signature)))
    }

    /// Close `id`.
    ///
    /// The closing changeset is recorded only when `resolved` is true;
    /// otherwise the issue is deprecated.
    ///
    /// # Errors
    /// Returns [`StoreError::Sqlite`] when the update fails.
    pub fn deprecate(
        &self,
        id: IssueId,
        by_changeset: ChangesetId,
        resolved: bool,
    ) -> Result<(), StoreError> {
        self.connection
            .execute(
                "UPDATE issues
                 SET open = 0,
                     resolved_by_changeset_id = CASE WHEN ?2 THEN ?3 ELSE resolved_by_changeset_id END
                 WHERE id = ?1",
                params![id, resolved, by_changeset],
            )
            .map(|_| ())
            .map_err(sqlite("close issue"))
    }

    /// Close `id` as resolved by `by_changeset`.
    ///
    /// # Errors
    /// Returns [`StoreError::Sqlite`] when the update fails.
    pub fn resolve(&self, id: IssueId, by_changeset: ChangesetId) -> Result<(), StoreError> {
        self.deprecate(id, by_changeset, true)
    }

    fn select(
        &self,
        sql: &str,
        parameters: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<Issue>, StoreError> {
        let mut statement = self
            .connection
            .prepare_cached(sql)
            .map_err(sqlite("prepare issue query"))?;
        let rows = statement
            .query_map(parameters, read_issue_row)
            .map_err(sqlite("query issues"))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(sqlite("read issue row"))?;
        rows.into_iter().map(|row| self.hydrate(row)).collect()
    }

    fn hydrate(&self, row: IssueRow) -> Result<Issue, StoreError> {
        let (id, type_name, details, open, created_by, resolved_by, created_at) = row;
        let issue_type: IssueType = type_name.parse().map_err(|_| StoreError::Corrupt {
            column: "issue_type",
            value: type_name.clone(),
        })?;
        Ok(Issue {
            id,
            issue_type,
            details,
            open,
            created_by_changeset_id: created_by,
            resolved_by_changeset_id: resolved_by,
            created_at,
            entities: self.attachments(id)?,
        })
    }

    fn attachments(&self, issue_id: IssueId) -> Result<Vec<EntityAttributeRef>, StoreError> {
        let mut statement = self
            .connection
            .prepare_cached(
                "SELECT entity_kind, entity_id, entity_attribute FROM entities_with_issues
                 WHERE issue_id = ?1 ORDER BY id",
            )
            .map_err(sqlite("prepare attachment query"))?;
        let rows = statement
            .query_map([issue_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, EntityId>(1)?,
                    row.get::<_, Option<String>>(2)?,
                ))
            })
            .map_err(sqlite("query attachments"))?;
        let mut entities = Vec::new();
        for row in rows {
            let (kind, entity_id, attribute) = row.map_err(sqlite("read attachment row"))?;
            entities.push(EntityAttributeRef {
                kind: parse_kind(kind)?,
                entity_id,
                attribute,
            });
        }
        Ok(entities)
    }
}

fn read_issue_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<IssueRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RegistryStore;
    use rstest::{fixture, rstest};

    #[fixture]
    fn store() -> RegistryStore {
        let store = RegistryStore::open_in_memory().expect("open store");
        store
            .connection()
            .execute("INSERT INTO changesets (id, created_at) VALUES (1, 0)", [])
            .expect("seed changeset");
        store
    }

    fn gap(stop: EntityId, rsp: EntityId) -> IssueCandidate {
        IssueCandidate::new(IssueType::StopRspDistanceGap, "too far")
            .with_entity(EntityAttributeRef::attribute(EntityKind::Stop, stop, "geometry"))
            .with_entity(EntityAttributeRef::attribute(
                EntityKind::RouteStopPattern,
                rsp,
                "geometry",
            ))
    }

    #[rstest]
    fn created_issue_round_trips(store: RegistryStore) {
        let issues = store.issues();
        let created = issues.create(&gap(1, 2), Some(1), 7).expect("create issue");
        let loaded = issues.get(created.id).expect("query").expect("issue exists");
        assert_eq!(loaded, created);
    }

    #[rstest]
    fn finds_open_equivalent_only(store: RegistryStore) {
        let issues = store.issues();
        let created = issues.create(&gap(1, 2), None, 0).expect("create issue");
        assert_eq!(
            issues
                .find_by_equivalent(&gap(1, 2))
                .expect("lookup")
                .map(|issue| issue.id),
            Some(created.id)
        );
        assert!(issues.find_by_equivalent(&gap(1, 3)).expect("lookup").is_none());

        issues.deprecate(created.id, 1, false).expect("deprecate");
        assert!(issues.find_by_equivalent(&gap(1, 2)).expect("lookup").is_none());
    }

    #[rstest]
    fn deprecation_does_not_record_resolver(store: RegistryStore) {
        let issues = store.issues();
        let deprecated = issues.create(&gap(1, 2), None, 0).expect("create");
        let resolved = issues.create(&gap(3, 4), None, 0).expect("create");
        issues.deprecate(deprecated.id, 1, false).expect("deprecate");
        issues.resolve(resolved.id, 1).expect("resolve");

        let deprecated = issues.get(deprecated.id).expect("query").expect("exists");
        assert!(!deprecated.open);
        assert_eq!(deprecated.resolved_by_changeset_id, None);
        let resolved = issues.get(resolved.id).expect("query").expect("exists");
        assert!(!resolved.open);
        assert_eq!(resolved.resolved_by_changeset_id, Some(1));
        assert!(issues.open_issues().expect("open issues").is_empty());
    }

    #[rstest]
    fn filters_entity_issues_by_attribute(store: RegistryStore) {
        let issues = store.issues();
        let geometry = issues.create(&gap(1, 2), None, 0).expect("create");
        let whole = issues
            .create(
                &IssueCandidate::new(IssueType::StopPositionInaccurate, "check stop")
                    .with_entity(EntityAttributeRef::entity(EntityKind::Stop, 1)),
                None,
                0,
            )
            .expect("create");

        let all = issues
            .issues_of_entity(EntityKind::Stop, 1, None)
            .expect("all issues");
        assert_eq!(
            all.iter().map(|issue| issue.id).collect::<Vec<_>>(),
            vec![geometry.id, whole.id]
        );
        let scoped = issues
            .issues_of_entity(EntityKind::Stop, 1, Some(&["geometry"]))
            .expect("scoped issues");
        assert_eq!(
            scoped.iter().map(|issue| issue.id).collect::<Vec<_>>(),
            vec![geometry.id]
        );
    }

    #[rstest]
    fn lists_issues_by_type(store: RegistryStore) {
        let issues = store.issues();
        issues.create(&gap(1, 2), None, 0).expect("create");
        let maintenance = issues
            .create(
                &IssueCandidate::new(IssueType::FeedVersionMaintenanceExtend, "extend")
                    .with_entity(EntityAttributeRef::entity(EntityKind::FeedVersion, 9)),
                None,
                0,
            )
            .expect("create");
        let found = issues
            .with_types(&[IssueType::FeedVersionMaintenanceExtend])
            .expect("by type");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, maintenance.id);
        assert!(found[0].is_attached_to_feed_version());
    }
}
