//! Changesets and the payloads attached to them.

use serde::{Deserialize, Serialize};

use crate::{ChangeOp, ChangesetId, FeedVersionId, ValidationError, dispatch::ChangesetUser};

/// Feed import that produced a changeset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportProvenance {
    /// Feed the changes were imported from.
    pub feed_onestop_id: String,
    /// Registered feed version the changes were imported from.
    pub feed_version_id: FeedVersionId,
}

/// A persisted changeset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Changeset {
    /// Surrogate id.
    pub id: ChangesetId,
    /// Free-form description.
    pub notes: Option<String>,
    /// Whether the changeset has been applied. Set exactly once.
    pub applied: bool,
    /// Apply time, seconds since the Unix epoch.
    pub applied_at: Option<i64>,
    /// Author, when known.
    pub user: Option<ChangesetUser>,
    /// Import provenance, when the changeset came from a feed import.
    pub provenance: Option<ImportProvenance>,
    /// Creation time, seconds since the Unix epoch.
    pub created_at: i64,
}

/// Parameters for creating a changeset.
///
/// # Examples
/// ```
/// use onestop_core::{ChangesetUser, NewChangeset};
///
/// let new = NewChangeset::default()
///     .with_notes("fix Richmond stop")
///     .with_user(ChangesetUser::new("editor@example.com"));
/// assert_eq!(new.notes.as_deref(), Some("fix Richmond stop"));
/// assert!(new.provenance.is_none());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewChangeset {
    /// Free-form description.
    pub notes: Option<String>,
    /// Author.
    pub user: Option<ChangesetUser>,
    /// Import provenance.
    pub provenance: Option<ImportProvenance>,
}

impl NewChangeset {
    /// Set the notes.
    #[must_use]
    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    /// Set the author.
    #[must_use]
    pub fn with_user(mut self, user: ChangesetUser) -> Self {
        self.user = Some(user);
        self
    }

    /// Mark the changeset as imported from a feed version.
    #[must_use]
    pub fn imported_from(
        mut self,
        feed_onestop_id: impl Into<String>,
        feed_version_id: FeedVersionId,
    ) -> Self {
        self.provenance = Some(ImportProvenance {
            feed_onestop_id: feed_onestop_id.into(),
            feed_version_id,
        });
        self
    }
}

/// Body of a change payload as carried on the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PayloadBody {
    /// Operations in apply order.
    pub changes: Vec<ChangeOp>,
}

impl PayloadBody {
    /// Decode a payload body from JSON.
    ///
    /// # Errors
    /// Returns [`ValidationError::MalformedPayload`] when the JSON does not
    /// describe a list of change operations.
    pub fn from_json(json: &str) -> Result<Self, ValidationError> {
        serde_json::from_str(json).map_err(|err| ValidationError::MalformedPayload {
            reason: err.to_string(),
        })
    }

    /// Encode the body as JSON.
    ///
    /// # Errors
    /// Returns [`ValidationError::MalformedPayload`] if serialisation fails.
    pub fn to_json(&self) -> Result<String, ValidationError> {
        serde_json::to_string(self).map_err(|err| ValidationError::MalformedPayload {
            reason: err.to_string(),
        })
    }

    /// Number of operations.
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    /// Whether the body carries no operations.
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Reject bodies carrying more than `max` operations.
    ///
    /// # Errors
    /// Returns [`ValidationError::PayloadTooLarge`].
    pub fn ensure_within(&self, max: usize) -> Result<(), ValidationError> {
        if self.changes.len() > max {
            return Err(ValidationError::PayloadTooLarge {
                count: self.changes.len(),
                max,
            });
        }
        Ok(())
    }
}

/// A persisted payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePayload {
    /// Surrogate id; ascending ids give apply order.
    pub id: i64,
    /// Owning changeset.
    pub changeset_id: ChangesetId,
    /// Operations.
    pub body: PayloadBody,
    /// Creation time, seconds since the Unix epoch.
    pub created_at: i64,
}

/// Split `changes` into payload bodies of at most `max` operations each,
/// preserving order.
///
/// A `max` of zero is treated as one.
///
/// # Examples
/// ```
/// use onestop_core::{ChangeOp, EntityChange, Operator, chunk_changes};
///
/// let ops: Vec<_> = (0..5)
///     .map(|i| {
///         ChangeOp::create_update(EntityChange::Operator(Operator {
///             onestop_id: format!("o-{i}"),
///             ..Operator::default()
///         }))
///     })
///     .collect();
/// let bodies = chunk_changes(ops, 2);
/// assert_eq!(bodies.iter().map(|b| b.len()).collect::<Vec<_>>(), vec![2, 2, 1]);
/// ```
pub fn chunk_changes(changes: Vec<ChangeOp>, max: usize) -> Vec<PayloadBody> {
    let size = max.max(1);
    let mut bodies = Vec::new();
    let mut remaining = changes.into_iter().peekable();
    while remaining.peek().is_some() {
        bodies.push(PayloadBody {
            changes: remaining.by_ref().take(size).collect(),
        });
    }
    bodies
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{EntityChange, Operator};
    use rstest::rstest;

    fn operator_op(key: &str) -> ChangeOp {
        ChangeOp::create_update(EntityChange::Operator(Operator {
            onestop_id: key.to_owned(),
            name: Some(key.to_uppercase()),
            ..Operator::default()
        }))
    }

    #[rstest]
    #[case(0, 0)]
    #[case(3, 1)]
    #[case(4, 2)]
    #[case(7, 3)]
    fn chunks_preserve_order_and_bound_size(#[case] count: usize, #[case] expected: usize) {
        let ops: Vec<_> = (0..count).map(|i| operator_op(&format!("o-{i}"))).collect();
        let bodies = chunk_changes(ops.clone(), 3);
        assert_eq!(bodies.len(), expected);
        assert!(bodies.iter().all(|body| body.len() <= 3));
        let flattened: Vec<_> = bodies.into_iter().flat_map(|body| body.changes).collect();
        assert_eq!(flattened, ops);
    }

    #[rstest]
    fn oversized_body_is_rejected() {
        let body = PayloadBody {
            changes: vec![operator_op("o-1"), operator_op("o-2")],
        };
        assert_eq!(
            body.ensure_within(1),
            Err(ValidationError::PayloadTooLarge { count: 2, max: 1 })
        );
        assert!(body.ensure_within(2).is_ok());
    }

    #[rstest]
    fn malformed_json_is_a_validation_error() {
        assert!(matches!(
            PayloadBody::from_json(r#"{"changes": [{"action": "createUpdate"}]}"#),
            Err(ValidationError::MalformedPayload { .. })
        ));
    }

    #[rstest]
    fn json_round_trip_keeps_operations() {
        let body = PayloadBody {
            changes: vec![operator_op("o-1")],
        };
        let json = body.to_json().expect("encode");
        assert_eq!(PayloadBody::from_json(&json), Ok(body));
    }
}
