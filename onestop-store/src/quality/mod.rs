//! Read-only data-quality checks run over the entities an apply touched.
//!
//! Checks see the database as it stands inside the apply transaction, so they
//! observe the changeset's own writes. They never write.

mod distance_gap;
mod line_geometry;

use std::collections::BTreeSet;

use log::debug;
use onestop_core::{GeometryService, Issue, IssueCandidate};

use crate::{StoreError, TouchedEntities, VersionedEntityRepository};

pub use distance_gap::StopRspDistanceCheck;
pub use line_geometry::RspLineCheck;

/// Everything a check may read.
#[derive(Clone, Copy)]
pub struct CheckContext<'a> {
    /// Entity reads within the apply transaction.
    pub repository: VersionedEntityRepository<'a>,
    /// Entities written by the apply.
    pub touched: &'a TouchedEntities,
    /// Open issues the changeset claims to resolve. Checks re-evaluate the
    /// entities attached to these even when the apply left them alone.
    pub claimed: &'a [Issue],
    /// Geometry capability.
    pub geometry: &'a dyn GeometryService,
    /// Distance in metres beyond which a stop is detached from a pattern.
    pub stop_rsp_distance_threshold_meters: f64,
}

/// A single data-quality rule.
pub trait QualityCheck: Send + Sync {
    /// Stable name used in logs.
    fn name(&self) -> &'static str;

    /// Produce candidates for problems among the touched entities.
    ///
    /// # Errors
    /// Returns [`StoreError`] when reading entities fails.
    fn check(&self, context: &CheckContext<'_>) -> Result<Vec<IssueCandidate>, StoreError>;
}

/// Runs an ordered list of checks and drops candidates with duplicate
/// signatures.
pub struct QualityCheckEngine {
    checks: Vec<Box<dyn QualityCheck>>,
}

impl Default for QualityCheckEngine {
    fn default() -> Self {
        Self::new(vec![Box::new(StopRspDistanceCheck), Box::new(RspLineCheck)])
    }
}

impl std::fmt::Debug for QualityCheckEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.checks.iter().map(|check| check.name()))
            .finish()
    }
}

impl QualityCheckEngine {
    /// Engine running `checks` in order.
    pub fn new(checks: Vec<Box<dyn QualityCheck>>) -> Self {
        Self { checks }
    }

    /// Engine running no checks.
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// Run every check and return the unique candidates in discovery order.
    ///
    /// # Errors
    /// Returns the first [`StoreError`] raised by a check.
    pub fn run(&self, context: &CheckContext<'_>) -> Result<Vec<IssueCandidate>, StoreError> {
        let mut seen = BTreeSet::new();
        let mut candidates = Vec::new();
        for check in &self.checks {
            let found = check.check(context)?;
            debug!(
                "quality check {} produced {} candidates over {} touched entities",
                check.name(),
                found.len(),
                context.touched.len()
            );
            for candidate in found {
                if seen.insert(candidate.signature()) {
                    candidates.push(candidate);
                }
            }
        }
        Ok(candidates)
    }
}
