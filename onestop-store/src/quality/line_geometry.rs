//! Degenerate route stop pattern lines.

use std::collections::BTreeSet;

use onestop_core::{
    EntityAttributeRef, EntityId, EntityKind, IssueCandidate, IssueType, RouteStopPattern,
};

use super::{CheckContext, QualityCheck};
use crate::StoreError;

/// Flags route stop patterns whose line has fewer than two distinct
/// coordinates, among the touched patterns and those named by claimed line
/// issues.
#[derive(Debug, Default, Clone, Copy)]
pub struct RspLineCheck;

impl QualityCheck for RspLineCheck {
    fn name(&self) -> &'static str {
        "rsp_line_inaccurate"
    }

    fn check(&self, context: &CheckContext<'_>) -> Result<Vec<IssueCandidate>, StoreError> {
        let mut patterns: BTreeSet<EntityId> = context
            .touched
            .live_ids(EntityKind::RouteStopPattern)
            .into_iter()
            .collect();
        patterns.extend(
            context
                .claimed
                .iter()
                .filter(|issue| issue.issue_type == IssueType::RspLineInaccurate)
                .flat_map(|issue| &issue.entities)
                .filter(|attachment| attachment.kind == EntityKind::RouteStopPattern)
                .map(|attachment| attachment.entity_id),
        );

        let mut candidates = Vec::new();
        for id in patterns {
            let Some(row) = context.repository.find_by_id(id)? else {
                continue;
            };
            let pattern: RouteStopPattern = row.decode()?;
            let Some(line) = pattern.line() else {
                continue;
            };
            let mut distinct: Vec<(u64, u64)> = line
                .coords()
                .map(|coord| (coord.x.to_bits(), coord.y.to_bits()))
                .collect();
            distinct.sort_unstable();
            distinct.dedup();
            if distinct.len() < 2 {
                candidates.push(
                    IssueCandidate::new(
                        IssueType::RspLineInaccurate,
                        format!(
                            "RouteStopPattern {} has {} distinct coordinates",
                            row.business_key,
                            distinct.len()
                        ),
                    )
                    .with_entity(EntityAttributeRef::attribute(
                        EntityKind::RouteStopPattern,
                        row.id,
                        "geometry",
                    )),
                );
            }
        }
        Ok(candidates)
    }
}
