//! Core domain types for the Onestop registry.
//!
//! The registry tracks transit entities (feeds, operators, stops, routes,
//! route stop patterns, schedule stop pairs and serving relationships) whose
//! every mutation arrives through a changeset. This crate holds the
//! storage-agnostic pieces: entity schemas, the change payload wire format,
//! issue signatures, engine configuration and the collaborator traits used
//! for geometry, notifications and background jobs.
//!
//! Persistence and the apply engine live in `onestop-store`.

#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod change;
pub mod changeset;
pub mod config;
pub mod dispatch;
pub mod entity;
pub mod geometry;
pub mod issue;
#[cfg(any(test, feature = "test-support"))]
#[cfg_attr(docsrs, doc(cfg(feature = "test-support")))]
pub mod test_support;
pub mod validation;

/// Surrogate identifier of a changeset row.
pub type ChangesetId = i64;
/// Surrogate identifier of a current entity row.
///
/// The identifier is stable across updates of the same business key and is
/// what issue attachments refer to.
pub type EntityId = i64;
/// Identifier of an issue row.
pub type IssueId = i64;
/// Identifier of a registered feed version.
pub type FeedVersionId = i64;

pub use change::{ChangeAction, ChangeOp, EntityChange};
pub use changeset::{
    ChangePayload, Changeset, ImportProvenance, NewChangeset, PayloadBody, chunk_changes,
};
pub use config::{ApplyConfig, ConfigError};
pub use dispatch::{
    CONFLATE_STOPS_JOB, ChangesetEvent, ChangesetUser, DispatchError, FETCH_FEEDS_JOB, JobQueue,
    LogJobQueue, LogNotifier, Notifier,
};
pub use entity::{
    EntityAttributes, EntityKind, EntityReference, Feed, FeedVersion, Operator,
    OperatorServingStop, Route, RouteServingStop, RouteStopPattern, ScheduleStopPair, Stop,
    UnknownEntityKind,
};
pub use geometry::{GeoGeometry, Geometry, GeometryService};
pub use issue::{
    EntityAttributeRef, Issue, IssueCandidate, IssueSignature, IssueType, UnknownIssueType,
    equivalent,
};
pub use validation::ValidationError;
