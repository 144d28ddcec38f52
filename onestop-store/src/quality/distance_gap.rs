//! Stops that sit too far from the route stop pattern lines serving them.

use std::collections::BTreeSet;

use onestop_core::{
    EntityAttributeRef, EntityId, EntityKind, IssueCandidate, IssueType, RouteStopPattern,
    ScheduleStopPair, Stop,
};

use super::{CheckContext, QualityCheck};
use crate::{StoreError, StoredEntity};

/// Flags `(stop, route stop pattern)` pairs whose stop lies further from the
/// pattern line than the configured threshold.
///
/// A pair is in scope when the stop was touched and appears in the pattern,
/// when the pattern was touched, when a touched schedule stop pair links
/// the stop to the pattern, or when the changeset claims to resolve a gap
/// issue attached to the pair.
#[derive(Debug, Default, Clone, Copy)]
pub struct StopRspDistanceCheck;

impl QualityCheck for StopRspDistanceCheck {
    fn name(&self) -> &'static str {
        "stop_rsp_distance_gap"
    }

    fn check(&self, context: &CheckContext<'_>) -> Result<Vec<IssueCandidate>, StoreError> {
        let pairs = scope(context)?;
        let mut candidates = Vec::new();
        for (stop_id, rsp_id) in pairs {
            if let Some(candidate) = evaluate(context, stop_id, rsp_id)? {
                candidates.push(candidate);
            }
        }
        Ok(candidates)
    }
}

fn scope(context: &CheckContext<'_>) -> Result<BTreeSet<(EntityId, EntityId)>, StoreError> {
    let repository = &context.repository;
    let mut pairs = BTreeSet::new();

    for stop in context.touched.live(EntityKind::Stop) {
        for pattern in repository.patterns_serving_stop(&stop.business_key)? {
            pairs.insert((stop.id, pattern.id));
        }
    }

    for touched in context.touched.live(EntityKind::RouteStopPattern) {
        let Some(row) = repository.find_by_id(touched.id)? else {
            continue;
        };
        let pattern: RouteStopPattern = row.decode()?;
        for key in pattern.stops() {
            if let Some(stop) = repository.find_current(EntityKind::Stop, key)? {
                pairs.insert((stop.id, row.id));
            }
        }
    }

    for touched in context.touched.live(EntityKind::ScheduleStopPair) {
        let Some(row) = repository.find_by_id(touched.id)? else {
            continue;
        };
        let pair: ScheduleStopPair = row.decode()?;
        let Some(pattern_key) = pair.route_stop_pattern_onestop_id.as_deref() else {
            continue;
        };
        let Some(pattern) =
            repository.find_current(EntityKind::RouteStopPattern, pattern_key)?
        else {
            continue;
        };
        for stop_key in [&pair.origin_onestop_id, &pair.destination_onestop_id]
            .into_iter()
            .flatten()
        {
            if let Some(stop) = repository.find_current(EntityKind::Stop, stop_key)? {
                pairs.insert((stop.id, pattern.id));
            }
        }
    }

    for issue in context.claimed {
        if issue.issue_type != IssueType::StopRspDistanceGap {
            continue;
        }
        let attached = |kind: EntityKind| {
            issue
                .entities
                .iter()
                .find(|attachment| attachment.kind == kind)
                .map(|attachment| attachment.entity_id)
        };
        if let (Some(stop_id), Some(rsp_id)) = (
            attached(EntityKind::Stop),
            attached(EntityKind::RouteStopPattern),
        ) {
            pairs.insert((stop_id, rsp_id));
        }
    }

    Ok(pairs)
}

fn load(
    context: &CheckContext<'_>,
    id: EntityId,
) -> Result<Option<StoredEntity>, StoreError> {
    context.repository.find_by_id(id)
}

fn evaluate(
    context: &CheckContext<'_>,
    stop_id: EntityId,
    rsp_id: EntityId,
) -> Result<Option<IssueCandidate>, StoreError> {
    let (Some(stop_row), Some(rsp_row)) = (load(context, stop_id)?, load(context, rsp_id)?) else {
        return Ok(None);
    };
    let stop: Stop = stop_row.decode()?;
    let pattern: RouteStopPattern = rsp_row.decode()?;
    let (Some(point), Some(line)) = (stop.point(), pattern.line()) else {
        return Ok(None);
    };
    let Some(nearest) = context.geometry.point_on_line_nearest(&line, &point) else {
        return Ok(None);
    };
    let gap = context.geometry.distance(&point, &nearest);
    if gap <= context.stop_rsp_distance_threshold_meters {
        return Ok(None);
    }
    Ok(Some(
        IssueCandidate::new(
            IssueType::StopRspDistanceGap,
            format!(
                "Stop {} is {gap:.1} m from RouteStopPattern {}, beyond the {:.1} m threshold",
                stop_row.business_key,
                rsp_row.business_key,
                context.stop_rsp_distance_threshold_meters
            ),
        )
        .with_entity(EntityAttributeRef::attribute(
            EntityKind::Stop,
            stop_id,
            "geometry",
        ))
        .with_entity(EntityAttributeRef::attribute(
            EntityKind::RouteStopPattern,
            rsp_id,
            "geometry",
        )),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{RegistryStore, TouchedEntities};
    use onestop_core::{
        ChangeOp, GeoGeometry, Issue,
        test_support::{operator, route, route_stop_pattern, schedule_stop_pair, stop},
    };
    use rstest::{fixture, rstest};

    struct Network {
        store: RegistryStore,
    }

    impl Network {
        fn write(&self, op: &ChangeOp) -> crate::UpsertOutcome {
            self.store.entities().upsert(&op.entity, 1).expect("write entity")
        }

        fn candidates(&self, touched: &TouchedEntities) -> Vec<IssueCandidate> {
            self.candidates_claiming(touched, &[])
        }

        fn candidates_claiming(
            &self,
            touched: &TouchedEntities,
            claimed: &[Issue],
        ) -> Vec<IssueCandidate> {
            let context = CheckContext {
                repository: self.store.entities(),
                touched,
                claimed,
                geometry: &GeoGeometry,
                stop_rsp_distance_threshold_meters: 100.0,
            };
            StopRspDistanceCheck.check(&context).expect("run check")
        }
    }

    /// A line along the equator with one stop on it and one ~1.1 km north.
    #[fixture]
    fn network() -> Network {
        let store = RegistryStore::open_in_memory().expect("open store");
        store
            .connection()
            .execute("INSERT INTO changesets (id, created_at) VALUES (1, 0)", [])
            .expect("seed changeset");
        let network = Network { store };
        network.write(&operator("o-1"));
        network.write(&route("r-1", "o-1"));
        network.write(&stop("s-near", 0.0, 0.0));
        network.write(&stop("s-far", 0.5, 0.01));
        network
    }

    #[rstest]
    fn touched_pattern_flags_distant_stop(network: Network) {
        let rsp = network.write(&route_stop_pattern(
            "r-1-p",
            "r-1",
            &["s-near", "s-far"],
            &[(0.0, 0.0), (1.0, 0.0)],
        ));
        let mut touched = TouchedEntities::default();
        touched.record_upsert(&rsp);

        let candidates = network.candidates(&touched);
        assert_eq!(candidates.len(), 1);
        let far = network
            .store
            .entities()
            .find_current(EntityKind::Stop, "s-far")
            .expect("query")
            .expect("stop exists");
        assert!(candidates[0].entities.contains(&EntityAttributeRef::attribute(
            EntityKind::Stop,
            far.id,
            "geometry"
        )));
    }

    #[rstest]
    fn touched_stop_is_checked_against_patterns_serving_it(network: Network) {
        network.write(&route_stop_pattern(
            "r-1-p",
            "r-1",
            &["s-near", "s-far"],
            &[(0.0, 0.0), (1.0, 0.0)],
        ));
        let moved = network.write(&stop("s-far", 0.5, 0.0002));
        let mut touched = TouchedEntities::default();
        touched.record_upsert(&moved);
        assert!(network.candidates(&touched).is_empty());

        let moved_away = network.write(&stop("s-far", 0.5, 0.02));
        let mut touched = TouchedEntities::default();
        touched.record_upsert(&moved_away);
        assert_eq!(network.candidates(&touched).len(), 1);
    }

    #[rstest]
    fn touched_schedule_stop_pair_links_its_stops(network: Network) {
        network.write(&route_stop_pattern(
            "r-1-p",
            "r-1",
            &["s-near"],
            &[(0.0, 0.0), (1.0, 0.0)],
        ));
        let ssp = network.write(&schedule_stop_pair(
            "t-1", "r-1", "r-1-p", "s-near", "s-far",
        ));
        let mut touched = TouchedEntities::default();
        touched.record_upsert(&ssp);
        assert_eq!(network.candidates(&touched).len(), 1);
    }

    #[rstest]
    fn untouched_network_is_out_of_scope(network: Network) {
        network.write(&route_stop_pattern(
            "r-1-p",
            "r-1",
            &["s-near", "s-far"],
            &[(0.0, 0.0), (1.0, 0.0)],
        ));
        assert!(network.candidates(&TouchedEntities::default()).is_empty());
    }

    #[rstest]
    fn claimed_gap_is_rechecked_without_touching_its_entities(network: Network) {
        let rsp = network.write(&route_stop_pattern(
            "r-1-p",
            "r-1",
            &["s-near", "s-far"],
            &[(0.0, 0.0), (1.0, 0.0)],
        ));
        let mut touched = TouchedEntities::default();
        touched.record_upsert(&rsp);
        let found = network.candidates(&touched);
        assert_eq!(found.len(), 1);
        let claimed = network
            .store
            .issues()
            .create(&found[0], Some(1), 0)
            .expect("store issue");

        let unrelated = network.write(&operator("o-2"));
        let mut touched = TouchedEntities::default();
        touched.record_upsert(&unrelated);
        assert!(network.candidates(&touched).is_empty());

        let rechecked = network.candidates_claiming(&touched, std::slice::from_ref(&claimed));
        assert_eq!(rechecked.len(), 1);
        assert_eq!(rechecked[0].signature(), claimed.signature());
    }
}
