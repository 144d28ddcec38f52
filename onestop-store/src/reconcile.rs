//! Reconciling quality-check candidates with stored issues.

use std::collections::BTreeSet;

use log::info;
use onestop_core::{
    ChangesetId, Issue, IssueCandidate, IssueId, IssueSignature, ValidationError,
};

use crate::{IssueStore, TouchedEntities, error::ApplyError};

/// What reconciliation did to the issue table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciliation {
    /// Open issues matching the candidates, reused or newly created.
    pub issues: Vec<Issue>,
    /// Issues closed as resolved by the changeset.
    pub resolved: Vec<IssueId>,
    /// Issues closed without resolution because their entities changed.
    pub deprecated: Vec<IssueId>,
}

/// Fold `candidates` and the `claimed` issues into the issue table on behalf
/// of `changeset_id`.
///
/// Fails before writing anything when a claimed issue is one the candidates
/// show is still present.
pub(crate) fn reconcile(
    issues: &IssueStore<'_>,
    changeset_id: ChangesetId,
    touched: &TouchedEntities,
    claimed: &[Issue],
    candidates: &[IssueCandidate],
    now: i64,
) -> Result<Reconciliation, ApplyError> {
    let signatures: BTreeSet<IssueSignature> =
        candidates.iter().map(IssueCandidate::signature).collect();

    let unresolved: Vec<IssueId> = claimed
        .iter()
        .filter(|issue| signatures.contains(&issue.signature()))
        .map(|issue| issue.id)
        .collect();
    if !unresolved.is_empty() {
        return Err(ApplyError::UnresolvedIssues {
            changeset_id,
            issue_ids: unresolved,
        });
    }

    let claimed_ids: BTreeSet<IssueId> = claimed.iter().map(|issue| issue.id).collect();
    let mut outcome = Reconciliation::default();

    for issue in stale_issues(issues, touched)? {
        if claimed_ids.contains(&issue.id) || signatures.contains(&issue.signature()) {
            continue;
        }
        issues.deprecate(issue.id, changeset_id, false)?;
        info!(
            "changeset {changeset_id} deprecated issue {} ({})",
            issue.id, issue.issue_type
        );
        outcome.deprecated.push(issue.id);
    }

    for issue in claimed {
        issues.resolve(issue.id, changeset_id)?;
        info!("changeset {changeset_id} resolved issue {}", issue.id);
        outcome.resolved.push(issue.id);
    }

    for candidate in candidates {
        let issue = match issues.find_by_equivalent(candidate)? {
            Some(existing) => existing,
            None => issues.create(candidate, Some(changeset_id), now)?,
        };
        outcome.issues.push(issue);
    }

    Ok(outcome)
}

/// Load the issues named by `resolving`, which must all exist and be open.
pub(crate) fn load_claims(
    issues: &IssueStore<'_>,
    changeset_id: ChangesetId,
    resolving: &[IssueId],
) -> Result<Vec<Issue>, ApplyError> {
    let mut claimed = Vec::with_capacity(resolving.len());
    for &issue_id in resolving {
        let issue = issues.get(issue_id)?.ok_or_else(|| {
            ApplyError::invalid(changeset_id, ValidationError::UnknownIssue { issue_id })
        })?;
        if !issue.open {
            return Err(ApplyError::invalid(
                changeset_id,
                ValidationError::IssueNotOpen { issue_id },
            ));
        }
        claimed.push(issue);
    }
    Ok(claimed)
}

/// Open issues attached to a touched entity through an attribute an
/// operation carried, through a whole-entity attachment, or by a destroy. Issues attached to a
/// feed version are never stale.
fn stale_issues(
    issues: &IssueStore<'_>,
    touched: &TouchedEntities,
) -> Result<Vec<Issue>, ApplyError> {
    let mut seen = BTreeSet::new();
    let mut stale = Vec::new();
    for entity in touched.iter() {
        for issue in issues.issues_of_entity(entity.kind, entity.id, None)? {
            if !issue.open || issue.is_attached_to_feed_version() || seen.contains(&issue.id) {
                continue;
            }
            let affected = issue.entities.iter().any(|attachment| {
                attachment.kind == entity.kind
                    && attachment.entity_id == entity.id
                    && attachment
                        .attribute
                        .as_deref()
                        .is_none_or(|name| entity.attribute_supplied(name))
            });
            if affected {
                seen.insert(issue.id);
                stale.push(issue);
            }
        }
    }
    Ok(stale)
}
