//! Error types raised by the store and the apply engine.

use std::path::PathBuf;

use onestop_core::{ChangesetId, IssueId, ValidationError};
use rusqlite::Error as SqliteError;
use thiserror::Error;

use crate::schema::SchemaError;

/// Persistence failures.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Opening the database failed.
    #[error("failed to open registry database at {path:?}")]
    Open {
        /// Database path.
        path: PathBuf,
        /// Underlying `SQLite` error.
        #[source]
        source: SqliteError,
    },
    /// A statement failed.
    #[error("failed to {operation}")]
    Sqlite {
        /// Operation being attempted.
        operation: &'static str,
        /// Underlying `SQLite` error.
        #[source]
        source: SqliteError,
    },
    /// Schema initialisation failed.
    #[error(transparent)]
    Schema(#[from] SchemaError),
    /// A stored JSON column could not be decoded or encoded.
    #[error("failed to {operation}")]
    Json {
        /// Operation being attempted.
        operation: &'static str,
        /// Underlying serde error.
        #[source]
        source: serde_json::Error,
    },
    /// A stored value is outside its closed set.
    #[error("corrupt {column} value {value:?}")]
    Corrupt {
        /// Column holding the value.
        column: &'static str,
        /// Offending value.
        value: String,
    },
    /// The system clock reads before the Unix epoch.
    #[error("system clock is before the Unix epoch")]
    Clock,
}

/// Adapt a `rusqlite` error into [`StoreError::Sqlite`] tagged with `operation`.
pub(crate) fn sqlite(operation: &'static str) -> impl FnOnce(SqliteError) -> StoreError {
    move |source| StoreError::Sqlite { operation, source }
}

/// Adapt a serde error into [`StoreError::Json`] tagged with `operation`.
pub(crate) fn json(operation: &'static str) -> impl FnOnce(serde_json::Error) -> StoreError {
    move |source| StoreError::Json { operation, source }
}

/// Failure of a single write that may be caused by bad input or by storage.
#[derive(Debug, Error)]
pub enum WriteError {
    /// The input was rejected.
    #[error(transparent)]
    Invalid(#[from] ValidationError),
    /// Storage failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Reasons a changeset could not be applied or modified.
///
/// Every variant leaves the database exactly as it was before the call.
#[derive(Debug, Error)]
pub enum ApplyError {
    /// The changeset was applied earlier.
    #[error("changeset {changeset_id} has already been applied")]
    AlreadyApplied {
        /// Changeset id.
        changeset_id: ChangesetId,
    },
    /// No changeset has this id.
    #[error("changeset {changeset_id} does not exist")]
    UnknownChangeset {
        /// Changeset id.
        changeset_id: ChangesetId,
    },
    /// A payload operation or resolution claim was invalid.
    #[error("changeset {changeset_id} is invalid: {source}")]
    Validation {
        /// Changeset id.
        changeset_id: ChangesetId,
        /// What was wrong.
        #[source]
        source: ValidationError,
    },
    /// Issues claimed as resolved are still detected after the changes.
    #[error(
        "changeset {changeset_id} claims to resolve issue {} but it is still present",
        first_issue(.issue_ids)
    )]
    UnresolvedIssues {
        /// Changeset id.
        changeset_id: ChangesetId,
        /// Every claimed issue that is still present, in claim order.
        issue_ids: Vec<IssueId>,
    },
    /// Storage failed.
    #[error("failed to persist changeset: {0}")]
    Persist(#[from] StoreError),
}

fn first_issue(issue_ids: &[IssueId]) -> String {
    issue_ids
        .first()
        .map_or_else(|| "<none>".to_owned(), ToString::to_string)
}

impl ApplyError {
    /// Attach `changeset_id` to a failed write.
    pub(crate) fn from_write(changeset_id: ChangesetId, err: WriteError) -> Self {
        match err {
            WriteError::Invalid(source) => Self::Validation {
                changeset_id,
                source,
            },
            WriteError::Store(source) => Self::Persist(source),
        }
    }

    /// Attach `changeset_id` to a rejected input.
    pub(crate) const fn invalid(changeset_id: ChangesetId, source: ValidationError) -> Self {
        Self::Validation {
            changeset_id,
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn unresolved_message_names_first_issue() {
        let err = ApplyError::UnresolvedIssues {
            changeset_id: 3,
            issue_ids: vec![8, 9],
        };
        assert_eq!(
            err.to_string(),
            "changeset 3 claims to resolve issue 8 but it is still present"
        );
    }

    #[rstest]
    fn write_errors_keep_their_category() {
        let invalid = ApplyError::from_write(
            1,
            WriteError::Invalid(ValidationError::UnknownIssue { issue_id: 4 }),
        );
        assert!(matches!(
            invalid,
            ApplyError::Validation {
                changeset_id: 1,
                source: ValidationError::UnknownIssue { issue_id: 4 }
            }
        ));
        let persist = ApplyError::from_write(1, WriteError::Store(StoreError::Clock));
        assert!(matches!(persist, ApplyError::Persist(StoreError::Clock)));
    }
}
