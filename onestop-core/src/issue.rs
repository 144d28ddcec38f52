//! Data-quality issues and their equivalency signatures.
//!
//! Two issues are equivalent when they share a type and attach to exactly
//! the same set of `(kind, entity id, attribute)` tuples. Equivalency drives
//! deduplication of new candidates and decides whether a changeset really
//! fixed the issues it claims to resolve.

use std::{collections::BTreeSet, fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{ChangesetId, EntityId, EntityKind, IssueId};

/// Closed set of issue types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueType {
    /// A stop lies too far from a route stop pattern that serves it.
    StopRspDistanceGap,
    /// A route stop pattern line is degenerate.
    RspLineInaccurate,
    /// A stop position looks wrong.
    StopPositionInaccurate,
    /// Distance calculations along a pattern look wrong.
    DistanceCalculationInaccurate,
    /// A feed version's service period needs extending.
    FeedVersionMaintenanceExtend,
    /// A feed version needs importing.
    FeedVersionMaintenanceImport,
}

impl IssueType {
    /// Every issue type.
    pub const ALL: [Self; 6] = [
        Self::StopRspDistanceGap,
        Self::RspLineInaccurate,
        Self::StopPositionInaccurate,
        Self::DistanceCalculationInaccurate,
        Self::FeedVersionMaintenanceExtend,
        Self::FeedVersionMaintenanceImport,
    ];

    /// Stored name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::StopRspDistanceGap => "stop_rsp_distance_gap",
            Self::RspLineInaccurate => "rsp_line_inaccurate",
            Self::StopPositionInaccurate => "stop_position_inaccurate",
            Self::DistanceCalculationInaccurate => "distance_calculation_inaccurate",
            Self::FeedVersionMaintenanceExtend => "feed_version_maintenance_extend",
            Self::FeedVersionMaintenanceImport => "feed_version_maintenance_import",
        }
    }
}

impl fmt::Display for IssueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown issue type name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown issue type {0:?}")]
pub struct UnknownIssueType(pub String);

impl FromStr for IssueType {
    type Err = UnknownIssueType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|ty| ty.as_str() == s)
            .ok_or_else(|| UnknownIssueType(s.to_owned()))
    }
}

/// One attachment of an issue: an entity, optionally narrowed to an attribute.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityAttributeRef {
    /// Kind of the attached entity.
    pub kind: EntityKind,
    /// Surrogate id of the attached entity.
    pub entity_id: EntityId,
    /// Attribute the issue concerns; `None` means the whole entity.
    pub attribute: Option<String>,
}

impl EntityAttributeRef {
    /// Attachment to a whole entity.
    pub const fn entity(kind: EntityKind, entity_id: EntityId) -> Self {
        Self {
            kind,
            entity_id,
            attribute: None,
        }
    }

    /// Attachment to one attribute of an entity.
    pub fn attribute(kind: EntityKind, entity_id: EntityId, attribute: impl Into<String>) -> Self {
        Self {
            kind,
            entity_id,
            attribute: Some(attribute.into()),
        }
    }
}

/// Type plus attachment set; the identity used for equivalency.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IssueSignature {
    /// Issue type.
    pub issue_type: IssueType,
    /// Attachments, ordered and deduplicated.
    pub entities: BTreeSet<EntityAttributeRef>,
}

impl IssueSignature {
    /// Build a signature from an attachment list.
    pub fn new<'a>(
        issue_type: IssueType,
        entities: impl IntoIterator<Item = &'a EntityAttributeRef>,
    ) -> Self {
        Self {
            issue_type,
            entities: entities.into_iter().cloned().collect(),
        }
    }
}

/// Whether two signatures describe the same problem.
///
/// # Examples
/// ```
/// use onestop_core::{EntityAttributeRef, EntityKind, IssueSignature, IssueType, equivalent};
///
/// let stop = EntityAttributeRef::attribute(EntityKind::Stop, 1, "geometry");
/// let rsp = EntityAttributeRef::attribute(EntityKind::RouteStopPattern, 2, "geometry");
/// let a = IssueSignature::new(IssueType::StopRspDistanceGap, [&stop, &rsp]);
/// let b = IssueSignature::new(IssueType::StopRspDistanceGap, [&rsp, &stop]);
/// let c = IssueSignature::new(IssueType::RspLineInaccurate, [&rsp, &stop]);
/// assert!(equivalent(&a, &b));
/// assert!(!equivalent(&a, &c));
/// ```
pub fn equivalent(a: &IssueSignature, b: &IssueSignature) -> bool {
    a == b
}

/// A persisted issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Issue {
    /// Issue id.
    pub id: IssueId,
    /// Issue type.
    pub issue_type: IssueType,
    /// Human-readable description.
    pub details: String,
    /// `false` once resolved or deprecated.
    pub open: bool,
    /// Changeset whose checks raised the issue; absent for manual issues.
    pub created_by_changeset_id: Option<ChangesetId>,
    /// Changeset that resolved the issue.
    pub resolved_by_changeset_id: Option<ChangesetId>,
    /// Creation time, seconds since the Unix epoch.
    pub created_at: i64,
    /// Attachments.
    pub entities: Vec<EntityAttributeRef>,
}

impl Issue {
    /// Equivalency signature.
    pub fn signature(&self) -> IssueSignature {
        IssueSignature::new(self.issue_type, &self.entities)
    }

    /// Whether any attachment is a feed version.
    pub fn is_attached_to_feed_version(&self) -> bool {
        self.entities
            .iter()
            .any(|entity| entity.kind == EntityKind::FeedVersion)
    }
}

/// An issue proposed by a quality check, not yet persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueCandidate {
    /// Issue type.
    pub issue_type: IssueType,
    /// Human-readable description.
    pub details: String,
    /// Attachments.
    pub entities: Vec<EntityAttributeRef>,
}

impl IssueCandidate {
    /// Candidate with no attachments yet.
    pub fn new(issue_type: IssueType, details: impl Into<String>) -> Self {
        Self {
            issue_type,
            details: details.into(),
            entities: Vec::new(),
        }
    }

    /// Add an attachment.
    #[must_use]
    pub fn with_entity(mut self, entity: EntityAttributeRef) -> Self {
        self.entities.push(entity);
        self
    }

    /// Equivalency signature.
    pub fn signature(&self) -> IssueSignature {
        IssueSignature::new(self.issue_type, &self.entities)
    }
}
