//! Connection ownership and store-wide settings.

use std::{
    path::Path,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use rusqlite::Connection;

use crate::{
    ChangesetStore, IssueStore, VersionedEntityRepository,
    error::{StoreError, sqlite},
    provenance::FeedVersionStore,
    schema::initialise_schema,
};

/// How long a writer waits for a competing writer before giving up.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// An open registry database.
///
/// `SQLite` admits one writer at a time; concurrent applies from separate
/// `RegistryStore` handles serialise on the write lock and wait up to the
/// busy timeout for it.
#[derive(Debug)]
pub struct RegistryStore {
    connection: Connection,
}

impl RegistryStore {
    /// Open or create a registry database at `path`.
    ///
    /// The database runs in WAL mode with foreign keys enforced and a
    /// [`DEFAULT_BUSY_TIMEOUT`].
    ///
    /// # Errors
    /// Returns [`StoreError`] when the file cannot be opened or the schema
    /// cannot be initialised.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let connection = Connection::open(path).map_err(|source| StoreError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        connection
            .execute_batch("PRAGMA journal_mode = WAL;")
            .map_err(sqlite("enable WAL journal"))?;
        Self::initialise(connection)
    }

    /// Open a private in-memory registry.
    ///
    /// # Errors
    /// Returns [`StoreError`] when the schema cannot be initialised.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let connection = Connection::open_in_memory().map_err(sqlite("open in-memory database"))?;
        Self::initialise(connection)
    }

    fn initialise(mut connection: Connection) -> Result<Self, StoreError> {
        connection
            .busy_timeout(DEFAULT_BUSY_TIMEOUT)
            .map_err(sqlite("set busy timeout"))?;
        initialise_schema(&mut connection)?;
        Ok(Self { connection })
    }

    /// Change how long writes wait for a competing writer.
    ///
    /// # Errors
    /// Returns [`StoreError::Sqlite`] if `SQLite` rejects the setting.
    pub fn set_busy_timeout(&self, timeout: Duration) -> Result<(), StoreError> {
        self.connection
            .busy_timeout(timeout)
            .map_err(sqlite("set busy timeout"))
    }

    /// Read access to the underlying connection.
    pub const fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Write access to the underlying connection, used to open transactions.
    pub const fn connection_mut(&mut self) -> &mut Connection {
        &mut self.connection
    }

    /// Entity reads outside a transaction.
    pub const fn entities(&self) -> VersionedEntityRepository<'_> {
        VersionedEntityRepository::new(&self.connection)
    }

    /// Issue reads outside a transaction.
    pub const fn issues(&self) -> IssueStore<'_> {
        IssueStore::new(&self.connection)
    }

    /// Changeset reads outside a transaction.
    pub const fn changesets(&self) -> ChangesetStore<'_> {
        ChangesetStore::new(&self.connection)
    }

    /// Feed version reads outside a transaction.
    pub const fn feed_versions(&self) -> FeedVersionStore<'_> {
        FeedVersionStore::new(&self.connection)
    }
}

/// Current time in whole seconds since the Unix epoch.
pub(crate) fn unix_now() -> Result<i64, StoreError> {
    let elapsed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|_| StoreError::Clock)?;
    i64::try_from(elapsed.as_secs()).map_err(|_| StoreError::Clock)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn file_database_uses_wal() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let store = RegistryStore::open(dir.path().join("registry.db")).expect("open store");
        let mode: String = store
            .connection()
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .expect("read journal mode");
        assert_eq!(mode.to_lowercase(), "wal");
    }

    #[rstest]
    fn reopening_keeps_schema() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = dir.path().join("registry.db");
        drop(RegistryStore::open(&path).expect("first open"));
        let store = RegistryStore::open(&path).expect("second open");
        store
            .set_busy_timeout(Duration::from_millis(250))
            .expect("set timeout");
    }

    #[rstest]
    fn clock_reads_after_epoch() {
        assert!(unix_now().expect("clock") > 0);
    }
}
