//! Applying changesets atomically, for real or as a trial.

use std::sync::Arc;

use log::{error, info, warn};
use onestop_core::{
    ApplyConfig, CONFLATE_STOPS_JOB, ChangeAction, Changeset, ChangesetEvent, ChangesetId,
    EntityId, EntityKind, FETCH_FEEDS_JOB, GeoGeometry, GeometryService, Issue, IssueId, JobQueue,
    LogJobQueue, LogNotifier, Notifier,
};
use rusqlite::{Connection, TransactionBehavior};
use serde::Serialize;

use crate::{
    ChangesetStore, IssueStore, TouchedEntities, VersionedEntityRepository,
    error::{ApplyError, sqlite},
    provenance::FeedVersionStore,
    quality::{CheckContext, QualityCheckEngine},
    reconcile::{Reconciliation, load_claims, reconcile},
    store::unix_now,
};

/// Whether an apply keeps its writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyMode {
    /// Commit and dispatch side effects.
    Commit,
    /// Roll back after reconciliation; no side effects.
    DryRun,
}

/// Result of a successful apply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyOutcome {
    /// Applied changeset.
    pub changeset_id: ChangesetId,
    /// Open issues describing problems found in the touched entities.
    pub issues: Vec<Issue>,
    /// Issues the changeset resolved.
    pub resolved_issue_ids: Vec<IssueId>,
    /// Issues deprecated because their entities changed.
    pub deprecated_issue_ids: Vec<IssueId>,
    /// Number of distinct entities written.
    pub touched_entities: usize,
}

/// Result of a trial apply. Nothing it reports was persisted.
#[derive(Debug)]
pub struct TrialOutcome {
    /// Whether a real apply would succeed against the current state.
    pub would_succeed: bool,
    /// Issues a real apply would leave open for the touched entities.
    pub issues: Vec<Issue>,
    /// Why a real apply would fail.
    pub failure: Option<ApplyError>,
}

/// Orchestrates payload application, quality checks and issue
/// reconciliation inside one immediate `SQLite` transaction.
pub struct ChangesetApplyEngine {
    config: ApplyConfig,
    checks: QualityCheckEngine,
    geometry: Arc<dyn GeometryService>,
    notifier: Arc<dyn Notifier>,
    jobs: Arc<dyn JobQueue>,
}

impl std::fmt::Debug for ChangesetApplyEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangesetApplyEngine")
            .field("config", &self.config)
            .field("checks", &self.checks)
            .finish_non_exhaustive()
    }
}

impl Default for ChangesetApplyEngine {
    fn default() -> Self {
        Self::new(ApplyConfig::default())
    }
}

struct Applied {
    changeset: Changeset,
    touched: TouchedEntities,
    reconciliation: Reconciliation,
}

impl ChangesetApplyEngine {
    /// Engine with the default checks, `geo`-backed geometry and log-only
    /// collaborators.
    pub fn new(config: ApplyConfig) -> Self {
        Self {
            config,
            checks: QualityCheckEngine::default(),
            geometry: Arc::new(GeoGeometry),
            notifier: Arc::new(LogNotifier),
            jobs: Arc::new(LogJobQueue),
        }
    }

    /// Replace the quality checks.
    #[must_use]
    pub fn with_checks(mut self, checks: QualityCheckEngine) -> Self {
        self.checks = checks;
        self
    }

    /// Replace the geometry capability.
    #[must_use]
    pub fn with_geometry(mut self, geometry: Arc<dyn GeometryService>) -> Self {
        self.geometry = geometry;
        self
    }

    /// Replace the notifier.
    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Replace the job queue.
    #[must_use]
    pub fn with_job_queue(mut self, jobs: Arc<dyn JobQueue>) -> Self {
        self.jobs = jobs;
        self
    }

    /// Active configuration.
    pub const fn config(&self) -> &ApplyConfig {
        &self.config
    }

    /// Apply `changeset_id` and commit, then dispatch side effects.
    ///
    /// # Errors
    /// Returns [`ApplyError`]; on error nothing was written.
    pub fn apply(
        &self,
        connection: &mut Connection,
        changeset_id: ChangesetId,
    ) -> Result<ApplyOutcome, ApplyError> {
        let applied = self
            .run(connection, changeset_id, ApplyMode::Commit)
            .inspect_err(|err| error!("changeset {changeset_id} failed to apply: {err}"))?;
        info!(
            "changeset {changeset_id} applied: {} entities, {} issues open, {} resolved, {} deprecated",
            applied.touched.len(),
            applied.reconciliation.issues.len(),
            applied.reconciliation.resolved.len(),
            applied.reconciliation.deprecated.len()
        );
        self.dispatch_applied(&applied.changeset, &applied.touched);
        Ok(outcome(changeset_id, applied))
    }

    /// Run the whole apply and roll it back, reporting what would happen.
    ///
    /// Repeated trials against unchanged state report the same result.
    pub fn trial_apply(
        &self,
        connection: &mut Connection,
        changeset_id: ChangesetId,
    ) -> TrialOutcome {
        match self.run(connection, changeset_id, ApplyMode::DryRun) {
            Ok(applied) => TrialOutcome {
                would_succeed: true,
                issues: applied.reconciliation.issues,
                failure: None,
            },
            Err(failure) => TrialOutcome {
                would_succeed: false,
                issues: Vec::new(),
                failure: Some(failure),
            },
        }
    }

    fn run(
        &self,
        connection: &mut Connection,
        changeset_id: ChangesetId,
        mode: ApplyMode,
    ) -> Result<Applied, ApplyError> {
        let transaction = connection
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(sqlite("begin apply transaction"))?;

        let changesets = ChangesetStore::new(&transaction);
        let changeset = changesets
            .get(changeset_id)?
            .ok_or(ApplyError::UnknownChangeset { changeset_id })?;
        if changeset.applied {
            return Err(ApplyError::AlreadyApplied { changeset_id });
        }

        let repository = VersionedEntityRepository::new(&transaction);
        let mut touched = TouchedEntities::default();
        let mut resolving: Vec<IssueId> = Vec::new();
        for payload in changesets.payloads(changeset_id)? {
            for op in &payload.body.changes {
                let written = match op.action {
                    ChangeAction::CreateUpdate => repository
                        .upsert(&op.entity, changeset_id)
                        .map(|outcome| touched.record_upsert(&outcome)),
                    ChangeAction::Destroy => op
                        .entity
                        .business_key()
                        .map_err(Into::into)
                        .and_then(|key| repository.retire(op.entity.kind(), &key, changeset_id))
                        .map(|retired| touched.record_retire(&retired)),
                };
                written.map_err(|err| ApplyError::from_write(changeset_id, err))?;
                for issue_id in &op.issues_resolved {
                    if !resolving.contains(issue_id) {
                        resolving.push(*issue_id);
                    }
                }
            }
        }

        let now = unix_now()?;
        changesets.mark_applied(changeset_id, now)?;

        if let Some(provenance) = &changeset.provenance {
            let feed_versions = FeedVersionStore::new(&transaction);
            feed_versions
                .check(provenance)
                .map_err(|err| ApplyError::from_write(changeset_id, err))?;
            feed_versions.record_imports(
                changeset_id,
                provenance,
                crate::cursor::MAX_BATCH_SIZE,
            )?;
        }

        let issues = IssueStore::new(&transaction);
        let claimed = load_claims(&issues, changeset_id, &resolving)?;
        let candidates = self.checks.run(&CheckContext {
            repository,
            touched: &touched,
            claimed: &claimed,
            geometry: self.geometry.as_ref(),
            stop_rsp_distance_threshold_meters: self.config.stop_rsp_distance_threshold_meters,
        })?;

        let reconciliation =
            reconcile(&issues, changeset_id, &touched, &claimed, &candidates, now)?;

        match mode {
            ApplyMode::Commit => transaction
                .commit()
                .map_err(sqlite("commit apply transaction"))?,
            ApplyMode::DryRun => transaction
                .rollback()
                .map_err(sqlite("roll back trial apply"))?,
        }

        Ok(Applied {
            changeset: Changeset {
                applied: true,
                applied_at: Some(now),
                ..changeset
            },
            touched,
            reconciliation,
        })
    }

    /// Tell the changeset's author about `event`, when configured and
    /// eligible. Failures are logged.
    pub(crate) fn notify(&self, event: ChangesetEvent, changeset: &Changeset) {
        if !self.config.send_user_emails {
            return;
        }
        let Some(user) = changeset
            .user
            .as_ref()
            .filter(|user| user.accepts_notifications())
        else {
            return;
        };
        if let Err(err) = self.notifier.notify(event, changeset.id, user) {
            warn!("changeset {}: notification failed: {err}", changeset.id);
        }
    }

    fn dispatch_applied(&self, changeset: &Changeset, touched: &TouchedEntities) {
        self.notify(ChangesetEvent::Applied, changeset);
        if self.config.auto_conflate_with_external_map {
            self.submit(changeset.id, CONFLATE_STOPS_JOB, &touched.live_ids(EntityKind::Stop));
        }
        if self.config.auto_fetch_related_feeds {
            self.submit(changeset.id, FETCH_FEEDS_JOB, &touched.live_ids(EntityKind::Feed));
        }
    }

    fn submit(&self, changeset_id: ChangesetId, job: &str, ids: &[EntityId]) {
        if ids.is_empty() {
            return;
        }
        if let Err(err) = self.jobs.submit(job, ids) {
            warn!("changeset {changeset_id}: job {job} not submitted: {err}");
        }
    }
}

fn outcome(changeset_id: ChangesetId, applied: Applied) -> ApplyOutcome {
    ApplyOutcome {
        changeset_id,
        touched_entities: applied.touched.len(),
        issues: applied.reconciliation.issues,
        resolved_issue_ids: applied.reconciliation.resolved,
        deprecated_issue_ids: applied.reconciliation.deprecated,
    }
}
