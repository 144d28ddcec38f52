//! One handle over the store and the apply engine.

use std::path::Path;

use onestop_core::{
    ApplyConfig, ChangeOp, ChangePayload, Changeset, ChangesetEvent, ChangesetId, FeedVersion,
    Issue, IssueCandidate, NewChangeset, PayloadBody, chunk_changes,
};
use rusqlite::{Transaction, TransactionBehavior};

use crate::{
    ApplyError, ApplyOutcome, ChangesetApplyEngine, ChangesetStore, IssueStore, RegistryStore,
    StoreError, TrialOutcome, WriteError, error::sqlite, provenance::FeedVersionStore,
    store::unix_now,
};

/// The unit-of-work API: create changesets, attach payloads, apply.
///
/// # Examples
/// ```
/// use onestop_core::{ApplyConfig, NewChangeset};
/// use onestop_store::{ApplyError, Registry, RegistryStore};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let mut registry = Registry::new(RegistryStore::open_in_memory()?, ApplyConfig::default());
/// let changeset = registry.create_changeset(&NewChangeset::default())?;
/// registry.apply(changeset.id)?;
/// assert!(matches!(
///     registry.apply(changeset.id),
///     Err(ApplyError::AlreadyApplied { .. })
/// ));
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Registry {
    store: RegistryStore,
    engine: ChangesetApplyEngine,
}

impl Registry {
    /// Registry over `store` with the default engine for `config`.
    pub fn new(store: RegistryStore, config: ApplyConfig) -> Self {
        Self::with_engine(store, ChangesetApplyEngine::new(config))
    }

    /// Registry over `store` driven by a customised `engine`.
    pub const fn with_engine(store: RegistryStore, engine: ChangesetApplyEngine) -> Self {
        Self { store, engine }
    }

    /// Open the database at `path`.
    ///
    /// # Errors
    /// Returns [`StoreError`] when the database cannot be opened.
    pub fn open(path: impl AsRef<Path>, config: ApplyConfig) -> Result<Self, StoreError> {
        Ok(Self::new(RegistryStore::open(path)?, config))
    }

    /// Underlying store, for reads.
    pub const fn store(&self) -> &RegistryStore {
        &self.store
    }

    /// Apply engine.
    pub const fn engine(&self) -> &ChangesetApplyEngine {
        &self.engine
    }

    /// Changeset with `id`, if any.
    ///
    /// # Errors
    /// Returns [`StoreError`] when the query fails.
    pub fn changeset(&self, id: ChangesetId) -> Result<Option<Changeset>, StoreError> {
        self.store.changesets().get(id)
    }

    /// Create an unapplied changeset and tell its author.
    ///
    /// # Errors
    /// Returns [`WriteError::Invalid`] when the provenance names an unknown
    /// feed version or one belonging to another feed.
    pub fn create_changeset(&mut self, new: &NewChangeset) -> Result<Changeset, WriteError> {
        let now = unix_now()?;
        let transaction = self.begin("begin changeset creation")?;
        if let Some(provenance) = &new.provenance {
            FeedVersionStore::new(&transaction).check(provenance)?;
        }
        let changeset = ChangesetStore::new(&transaction).create(new, now)?;
        transaction
            .commit()
            .map_err(sqlite("commit changeset creation"))?;
        self.engine.notify(ChangesetEvent::Created, &changeset);
        Ok(changeset)
    }

    /// Attach one payload body to an unapplied changeset.
    ///
    /// # Errors
    /// Returns [`ApplyError::UnknownChangeset`], [`ApplyError::AlreadyApplied`]
    /// or a [`ApplyError::Validation`] wrapping `PayloadTooLarge`.
    pub fn add_payload(
        &mut self,
        changeset_id: ChangesetId,
        body: PayloadBody,
    ) -> Result<ChangePayload, ApplyError> {
        body.ensure_within(self.engine.config().max_entities_per_payload)
            .map_err(|err| ApplyError::invalid(changeset_id, err))?;
        let now = unix_now()?;
        let transaction = self.begin("begin payload insert")?;
        let changesets = ChangesetStore::new(&transaction);
        ensure_unapplied(&changesets, changeset_id)?;
        let payload = changesets.insert_payload(changeset_id, body, now)?;
        transaction
            .commit()
            .map_err(sqlite("commit payload insert"))?;
        Ok(payload)
    }

    /// Attach `changes`, split into payloads of at most
    /// `max_entities_per_payload` operations, in one transaction.
    ///
    /// # Errors
    /// Returns [`ApplyError::UnknownChangeset`] or
    /// [`ApplyError::AlreadyApplied`]; nothing is attached on error.
    pub fn add_changes(
        &mut self,
        changeset_id: ChangesetId,
        changes: Vec<ChangeOp>,
    ) -> Result<Vec<ChangePayload>, ApplyError> {
        let bodies = chunk_changes(changes, self.engine.config().max_entities_per_payload);
        let now = unix_now()?;
        let transaction = self.begin("begin payload insert")?;
        let changesets = ChangesetStore::new(&transaction);
        ensure_unapplied(&changesets, changeset_id)?;
        let payloads = bodies
            .into_iter()
            .map(|body| changesets.insert_payload(changeset_id, body, now))
            .collect::<Result<Vec<_>, _>>()?;
        transaction
            .commit()
            .map_err(sqlite("commit payload insert"))?;
        Ok(payloads)
    }

    /// Register a fetched feed snapshot so changesets can cite it as
    /// provenance.
    ///
    /// # Errors
    /// See [`FeedVersionStore::register`].
    pub fn register_feed_version(
        &self,
        feed_onestop_id: &str,
        sha1: &str,
    ) -> Result<FeedVersion, WriteError> {
        let now = unix_now()?;
        self.store.feed_versions().register(feed_onestop_id, sha1, now)
    }

    /// Record a manually reported issue.
    ///
    /// # Errors
    /// Returns [`StoreError`] when the insert fails.
    pub fn report_issue(&mut self, candidate: &IssueCandidate) -> Result<Issue, StoreError> {
        let now = unix_now()?;
        let transaction = self.begin("begin issue report")?;
        let issue = IssueStore::new(&transaction).create(candidate, None, now)?;
        transaction.commit().map_err(sqlite("commit issue report"))?;
        Ok(issue)
    }

    /// Apply `changeset_id`. See [`ChangesetApplyEngine::apply`].
    ///
    /// # Errors
    /// Returns [`ApplyError`]; nothing is written on error.
    pub fn apply(&mut self, changeset_id: ChangesetId) -> Result<ApplyOutcome, ApplyError> {
        self.engine.apply(self.store.connection_mut(), changeset_id)
    }

    /// Dry-run `changeset_id`. See [`ChangesetApplyEngine::trial_apply`].
    pub fn trial_apply(&mut self, changeset_id: ChangesetId) -> TrialOutcome {
        self.engine
            .trial_apply(self.store.connection_mut(), changeset_id)
    }

    fn begin(&mut self, operation: &'static str) -> Result<Transaction<'_>, StoreError> {
        self.store
            .connection_mut()
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(sqlite(operation))
    }
}

fn ensure_unapplied(
    changesets: &ChangesetStore<'_>,
    changeset_id: ChangesetId,
) -> Result<(), ApplyError> {
    match changesets.get(changeset_id)? {
        None => Err(ApplyError::UnknownChangeset { changeset_id }),
        Some(changeset) if changeset.applied => Err(ApplyError::AlreadyApplied { changeset_id }),
        Some(_) => Ok(()),
    }
}
