//! Validation failures raised while applying change operations.

use thiserror::Error;

use crate::{EntityKind, FeedVersionId, IssueId};

/// A change operation or payload that cannot be applied as written.
///
/// Validation failures abort the whole apply; the changeset remains
/// unapplied and can be retried once the payload is corrected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// A business-key reference does not resolve to a current entity.
    #[error("{kind} {key} references unknown {target_kind} {target_key} through {field}")]
    UnknownReference {
        /// Kind of the entity carrying the reference.
        kind: EntityKind,
        /// Business key of the entity carrying the reference.
        key: String,
        /// Attribute holding the reference.
        field: &'static str,
        /// Kind the reference must resolve to.
        target_kind: EntityKind,
        /// Business key that failed to resolve.
        target_key: String,
    },
    /// A destroy operation named an entity with no current row.
    #[error("cannot destroy {kind} {key}: no current entity with that key")]
    UnknownEntity {
        /// Kind of the missing entity.
        kind: EntityKind,
        /// Business key of the missing entity.
        key: String,
    },
    /// A required attribute is absent after merging the change.
    #[error("{kind} {key} is missing required field {field}")]
    MissingField {
        /// Kind of the invalid entity.
        kind: EntityKind,
        /// Business key of the invalid entity.
        key: String,
        /// Name of the missing attribute.
        field: &'static str,
    },
    /// An attribute is present but unusable.
    #[error("{kind} {key} has invalid {field}: {reason}")]
    InvalidField {
        /// Kind of the invalid entity.
        kind: EntityKind,
        /// Business key of the invalid entity.
        key: String,
        /// Name of the invalid attribute.
        field: &'static str,
        /// Human-readable explanation.
        reason: String,
    },
    /// A payload carried more operations than the configured maximum.
    #[error("change payload carries {count} operations; the maximum is {max}")]
    PayloadTooLarge {
        /// Number of operations supplied.
        count: usize,
        /// Configured ceiling.
        max: usize,
    },
    /// A payload could not be decoded into change operations.
    #[error("malformed change payload: {reason}")]
    MalformedPayload {
        /// Decoder diagnostic.
        reason: String,
    },
    /// `issuesResolved` named an issue that does not exist.
    #[error("issue {issue_id} named in issuesResolved does not exist")]
    UnknownIssue {
        /// Offending issue id.
        issue_id: IssueId,
    },
    /// `issuesResolved` named an issue that is already closed.
    #[error("issue {issue_id} named in issuesResolved is already closed")]
    IssueNotOpen {
        /// Offending issue id.
        issue_id: IssueId,
    },
    /// Import provenance named a feed version that was never registered.
    #[error("feed version {feed_version_id} is not registered")]
    UnknownFeedVersion {
        /// Offending feed version id.
        feed_version_id: FeedVersionId,
    },
    /// Import provenance paired a feed version with a different feed.
    #[error("feed version {feed_version_id} does not belong to feed {feed_onestop_id}")]
    FeedVersionMismatch {
        /// Feed version named by the provenance.
        feed_version_id: FeedVersionId,
        /// Feed named by the provenance.
        feed_onestop_id: String,
    },
}
