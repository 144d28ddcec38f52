//! Post-commit collaborators: user notifications and background jobs.
//!
//! Both run only after a changeset transaction has committed. Their failures
//! are reported through [`DispatchError`] so callers can log them; they never
//! undo the commit.

use log::info;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{ChangesetId, EntityId};

/// Job that conflates touched stops with the external map.
pub const CONFLATE_STOPS_JOB: &str = "conflate_stops_with_osm";
/// Job that refetches touched feeds.
pub const FETCH_FEEDS_JOB: &str = "fetch_feeds";

/// Lifecycle moments a user may be told about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangesetEvent {
    /// The changeset was created.
    Created,
    /// The changeset was applied.
    Applied,
}

/// Author of a changeset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangesetUser {
    /// Contact address.
    pub email: Option<String>,
    /// Administrators are never notified.
    pub admin: bool,
}

impl ChangesetUser {
    /// Non-admin user with an e-mail address.
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: Some(email.into()),
            admin: false,
        }
    }

    /// Administrator with an e-mail address.
    pub fn admin(email: impl Into<String>) -> Self {
        Self {
            email: Some(email.into()),
            admin: true,
        }
    }

    /// Whether this user can and should receive changeset notifications.
    pub const fn accepts_notifications(&self) -> bool {
        self.email.is_some() && !self.admin
    }
}

/// A collaborator failed to accept work.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// The notifier rejected the message.
    #[error("notification for changeset {changeset_id} failed: {reason}")]
    Notify {
        /// Changeset the notification concerned.
        changeset_id: ChangesetId,
        /// Collaborator diagnostic.
        reason: String,
    },
    /// The job queue rejected the job.
    #[error("job {job} could not be submitted: {reason}")]
    Submit {
        /// Job name.
        job: String,
        /// Collaborator diagnostic.
        reason: String,
    },
}

/// Delivers changeset notifications to users.
pub trait Notifier: Send + Sync {
    /// Tell `user` that `event` happened to `changeset_id`.
    ///
    /// # Errors
    /// Returns [`DispatchError::Notify`] when delivery cannot be queued.
    fn notify(
        &self,
        event: ChangesetEvent,
        changeset_id: ChangesetId,
        user: &ChangesetUser,
    ) -> Result<(), DispatchError>;
}

/// Accepts asynchronous jobs keyed by name.
pub trait JobQueue: Send + Sync {
    /// Enqueue `job` for the given entity ids.
    ///
    /// # Errors
    /// Returns [`DispatchError::Submit`] when the job cannot be queued.
    fn submit(&self, job: &str, entity_ids: &[EntityId]) -> Result<(), DispatchError>;
}

/// [`Notifier`] that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(
        &self,
        event: ChangesetEvent,
        changeset_id: ChangesetId,
        user: &ChangesetUser,
    ) -> Result<(), DispatchError> {
        info!(
            "changeset {changeset_id} {event:?}; would notify {}",
            user.email.as_deref().unwrap_or("<no e-mail>")
        );
        Ok(())
    }
}

/// [`JobQueue`] that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogJobQueue;

impl JobQueue for LogJobQueue {
    fn submit(&self, job: &str, entity_ids: &[EntityId]) -> Result<(), DispatchError> {
        info!("job {job} submitted for {} entities", entity_ids.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(ChangesetUser::new("a@example.com"), true)]
    #[case(ChangesetUser::admin("root@example.com"), false)]
    #[case(ChangesetUser { email: None, admin: false }, false)]
    fn notification_eligibility(#[case] user: ChangesetUser, #[case] expected: bool) {
        assert_eq!(user.accepts_notifications(), expected);
    }

    #[rstest]
    fn log_collaborators_accept_everything() {
        let user = ChangesetUser::new("a@example.com");
        assert!(LogNotifier.notify(ChangesetEvent::Applied, 1, &user).is_ok());
        assert!(LogJobQueue.submit(FETCH_FEEDS_JOB, &[1, 2]).is_ok());
    }
}
