//! Registry schema creation and version checks.

use rusqlite::{
    Connection, Error as SqliteError, OptionalExtension, Transaction, TransactionBehavior,
};
use thiserror::Error;

/// Version of the schema created by [`initialise_schema`].
pub const SCHEMA_VERSION: i64 = 1;

/// Create the registry tables inside `connection` and record the schema
/// version.
///
/// The function is idempotent for databases already at [`SCHEMA_VERSION`] and
/// rejects databases at any other version.
///
/// # Errors
/// Returns [`SchemaError`] when a migration step fails or the stored version
/// differs.
///
/// # Examples
/// ```
/// use onestop_store::schema::initialise_schema;
/// use rusqlite::Connection;
///
/// let mut conn = Connection::open_in_memory().expect("open database");
/// initialise_schema(&mut conn).expect("create schema");
/// initialise_schema(&mut conn).expect("re-running is harmless");
/// let version: i64 = conn
///     .query_row("SELECT version FROM registry_schema_version", [], |row| row.get(0))
///     .expect("read version");
/// assert_eq!(version, 1);
/// ```
pub fn initialise_schema(connection: &mut Connection) -> Result<(), SchemaError> {
    connection
        .pragma_update(None, "foreign_keys", true)
        .map_err(|source| SchemaError::ForeignKeys { source })?;

    let transaction = connection
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(migration("begin schema transaction"))?;
    for step in STEPS {
        transaction
            .execute_batch(step.sql)
            .map_err(migration(step.label))?;
    }
    match stored_version(&transaction)? {
        None => {
            transaction
                .execute(
                    "INSERT INTO registry_schema_version (version) VALUES (?1)",
                    [SCHEMA_VERSION],
                )
                .map_err(migration("record schema version"))?;
        }
        Some(found) if found != SCHEMA_VERSION => {
            return Err(SchemaError::VersionMismatch {
                expected: SCHEMA_VERSION,
                found,
            });
        }
        Some(_) => {}
    }
    transaction
        .commit()
        .map_err(migration("commit schema transaction"))
}

/// A labelled, idempotent DDL statement.
struct Step {
    label: &'static str,
    sql: &'static str,
}

const STEPS: &[Step] = &[
    Step {
        label: "create current_entities",
        sql: "CREATE TABLE IF NOT EXISTS current_entities (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            kind TEXT NOT NULL,
            business_key TEXT NOT NULL CHECK (length(trim(business_key)) > 0),
            version INTEGER NOT NULL CHECK (version > 0),
            created_or_updated_in_changeset_id INTEGER NOT NULL REFERENCES changesets(id),
            attributes TEXT NOT NULL,
            UNIQUE (kind, business_key)
        )",
    },
    Step {
        label: "create old_entities",
        sql: "CREATE TABLE IF NOT EXISTS old_entities (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            current_id INTEGER NOT NULL,
            kind TEXT NOT NULL,
            business_key TEXT NOT NULL,
            version INTEGER NOT NULL CHECK (version > 0),
            created_or_updated_in_changeset_id INTEGER NOT NULL REFERENCES changesets(id),
            destroyed_in_changeset_id INTEGER REFERENCES changesets(id),
            attributes TEXT NOT NULL,
            UNIQUE (kind, business_key, version)
        )",
    },
    Step {
        label: "index current_entities by changeset",
        sql: "CREATE INDEX IF NOT EXISTS idx_current_entities_changeset
            ON current_entities(created_or_updated_in_changeset_id, id)",
    },
    Step {
        label: "create changesets",
        sql: "CREATE TABLE IF NOT EXISTS changesets (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            notes TEXT,
            applied INTEGER NOT NULL DEFAULT 0 CHECK (applied IN (0, 1)),
            applied_at INTEGER,
            user_email TEXT,
            user_admin INTEGER NOT NULL DEFAULT 0 CHECK (user_admin IN (0, 1)),
            has_user INTEGER NOT NULL DEFAULT 0 CHECK (has_user IN (0, 1)),
            imported_from_feed TEXT,
            imported_from_feed_version_id INTEGER REFERENCES feed_versions(id),
            created_at INTEGER NOT NULL
        )",
    },
    Step {
        label: "create change_payloads",
        sql: "CREATE TABLE IF NOT EXISTS change_payloads (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            changeset_id INTEGER NOT NULL REFERENCES changesets(id),
            payload TEXT NOT NULL,
            created_at INTEGER NOT NULL
        )",
    },
    Step {
        label: "index change_payloads",
        sql: "CREATE INDEX IF NOT EXISTS idx_change_payloads_changeset
            ON change_payloads(changeset_id, id)",
    },
    Step {
        label: "create issues",
        sql: "CREATE TABLE IF NOT EXISTS issues (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            issue_type TEXT NOT NULL,
            details TEXT NOT NULL,
            open INTEGER NOT NULL DEFAULT 1 CHECK (open IN (0, 1)),
            created_by_changeset_id INTEGER REFERENCES changesets(id),
            resolved_by_changeset_id INTEGER REFERENCES changesets(id),
            created_at INTEGER NOT NULL,
            CHECK (resolved_by_changeset_id IS NULL OR open = 0)
        )",
    },
    Step {
        label: "create entities_with_issues",
        sql: "CREATE TABLE IF NOT EXISTS entities_with_issues (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            issue_id INTEGER NOT NULL REFERENCES issues(id),
            entity_kind TEXT NOT NULL,
            entity_id INTEGER NOT NULL,
            entity_attribute TEXT
        )",
    },
    Step {
        label: "index entities_with_issues by entity",
        sql: "CREATE INDEX IF NOT EXISTS idx_entities_with_issues_entity
            ON entities_with_issues(entity_kind, entity_id, issue_id)",
    },
    Step {
        label: "index entities_with_issues by issue",
        sql: "CREATE INDEX IF NOT EXISTS idx_entities_with_issues_issue
            ON entities_with_issues(issue_id)",
    },
    Step {
        label: "create feed_versions",
        sql: "CREATE TABLE IF NOT EXISTS feed_versions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            feed_onestop_id TEXT NOT NULL CHECK (length(trim(feed_onestop_id)) > 0),
            sha1 TEXT NOT NULL UNIQUE CHECK (length(trim(sha1)) > 0),
            created_at INTEGER NOT NULL
        )",
    },
    Step {
        label: "create entities_imported_from_feed",
        sql: "CREATE TABLE IF NOT EXISTS entities_imported_from_feed (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            entity_kind TEXT NOT NULL,
            entity_id INTEGER NOT NULL,
            feed_onestop_id TEXT NOT NULL,
            feed_version_id INTEGER NOT NULL REFERENCES feed_versions(id),
            UNIQUE (entity_kind, entity_id, feed_version_id)
        )",
    },
    Step {
        label: "index entities_imported_from_feed by feed",
        sql: "CREATE INDEX IF NOT EXISTS idx_entities_imported_from_feed_feed
            ON entities_imported_from_feed(feed_onestop_id, entity_kind, entity_id)",
    },
    Step {
        label: "create schema version table",
        sql: "CREATE TABLE IF NOT EXISTS registry_schema_version (
            version INTEGER PRIMARY KEY CHECK (version > 0),
            applied_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
        ) WITHOUT ROWID",
    },
];

fn stored_version(transaction: &Transaction<'_>) -> Result<Option<i64>, SchemaError> {
    transaction
        .query_row(
            "SELECT version FROM registry_schema_version LIMIT 1",
            [],
            |row| row.get(0),
        )
        .optional()
        .map_err(migration("read schema version"))
}

fn migration(step: &'static str) -> impl FnOnce(SqliteError) -> SchemaError {
    move |source| SchemaError::Migration { step, source }
}

/// Errors raised when initialising the registry schema.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// Foreign key enforcement could not be enabled.
    #[error("failed to enable SQLite foreign keys")]
    ForeignKeys {
        /// Underlying `SQLite` error.
        #[source]
        source: SqliteError,
    },
    /// A migration statement failed.
    #[error("failed to execute migration step '{step}'")]
    Migration {
        /// Step description.
        step: &'static str,
        /// Underlying `SQLite` error.
        #[source]
        source: SqliteError,
    },
    /// The database was created by a different schema version.
    #[error(
        "expected registry schema version {expected} but found {found}; apply migrations before retrying"
    )]
    VersionMismatch {
        /// Version this build understands.
        expected: i64,
        /// Version recorded in the database.
        found: i64,
    },
}
