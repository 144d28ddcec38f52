//! Test doubles and change builders shared by unit and behaviour tests.

use std::sync::{Mutex, PoisonError};

use crate::{
    ChangeOp, ChangesetEvent, ChangesetId, ChangesetUser, DispatchError, EntityChange, EntityId,
    Feed, Geometry, JobQueue, Notifier, Operator, Route, RouteStopPattern, ScheduleStopPair, Stop,
};

/// One notification observed by [`RecordingNotifier`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentNotification {
    /// Event reported.
    pub event: ChangesetEvent,
    /// Changeset concerned.
    pub changeset_id: ChangesetId,
    /// Recipient address.
    pub email: Option<String>,
}

/// [`Notifier`] that records every call.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<SentNotification>>,
}

impl RecordingNotifier {
    /// Notifications received so far.
    pub fn sent(&self) -> Vec<SentNotification> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(
        &self,
        event: ChangesetEvent,
        changeset_id: ChangesetId,
        user: &ChangesetUser,
    ) -> Result<(), DispatchError> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(SentNotification {
                event,
                changeset_id,
                email: user.email.clone(),
            });
        Ok(())
    }
}

/// [`JobQueue`] that records every submission.
#[derive(Debug, Default)]
pub struct RecordingJobQueue {
    jobs: Mutex<Vec<(String, Vec<EntityId>)>>,
}

impl RecordingJobQueue {
    /// Submissions received so far, as `(job, entity ids)`.
    pub fn jobs(&self) -> Vec<(String, Vec<EntityId>)> {
        self.jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl JobQueue for RecordingJobQueue {
    fn submit(&self, job: &str, entity_ids: &[EntityId]) -> Result<(), DispatchError> {
        self.jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((job.to_owned(), entity_ids.to_vec()));
        Ok(())
    }
}

/// Collaborator that rejects everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct Unavailable;

impl Notifier for Unavailable {
    fn notify(
        &self,
        _event: ChangesetEvent,
        changeset_id: ChangesetId,
        _user: &ChangesetUser,
    ) -> Result<(), DispatchError> {
        Err(DispatchError::Notify {
            changeset_id,
            reason: "mailer offline".to_owned(),
        })
    }
}

impl JobQueue for Unavailable {
    fn submit(&self, job: &str, _entity_ids: &[EntityId]) -> Result<(), DispatchError> {
        Err(DispatchError::Submit {
            job: job.to_owned(),
            reason: "queue offline".to_owned(),
        })
    }
}

/// Create-or-update a feed.
pub fn feed(key: &str) -> ChangeOp {
    ChangeOp::create_update(EntityChange::Feed(Feed {
        onestop_id: key.to_owned(),
        url: Some(format!("https://example.com/{key}.zip")),
        feed_format: Some("gtfs".to_owned()),
        ..Feed::default()
    }))
}

/// Create-or-update an operator.
pub fn operator(key: &str) -> ChangeOp {
    ChangeOp::create_update(EntityChange::Operator(Operator {
        onestop_id: key.to_owned(),
        name: Some(format!("Operator {key}")),
        ..Operator::default()
    }))
}

/// Create-or-update a stop at `(lon, lat)`.
pub fn stop(key: &str, lon: f64, lat: f64) -> ChangeOp {
    ChangeOp::create_update(EntityChange::Stop(Stop {
        onestop_id: key.to_owned(),
        name: Some(format!("Stop {key}")),
        geometry: Some(Geometry::point_at(lon, lat)),
        ..Stop::default()
    }))
}

/// Rename a stop, leaving its geometry alone.
pub fn rename_stop(key: &str, name: &str) -> ChangeOp {
    ChangeOp::create_update(EntityChange::Stop(Stop {
        onestop_id: key.to_owned(),
        name: Some(name.to_owned()),
        ..Stop::default()
    }))
}

/// Create-or-update a route operated by `operator`.
pub fn route(key: &str, operator: &str) -> ChangeOp {
    ChangeOp::create_update(EntityChange::Route(Route {
        onestop_id: key.to_owned(),
        name: Some(format!("Route {key}")),
        operated_by_onestop_id: Some(operator.to_owned()),
        ..Route::default()
    }))
}

/// Create-or-update a route stop pattern.
pub fn route_stop_pattern(
    key: &str,
    route: &str,
    stops: &[&str],
    line: &[(f64, f64)],
) -> ChangeOp {
    ChangeOp::create_update(EntityChange::RouteStopPattern(RouteStopPattern {
        onestop_id: key.to_owned(),
        route_onestop_id: Some(route.to_owned()),
        stop_pattern: Some(stops.iter().map(|&s| s.to_owned()).collect()),
        geometry: Some(Geometry::line_through(line)),
        ..RouteStopPattern::default()
    }))
}

/// Create-or-update a schedule stop pair.
pub fn schedule_stop_pair(
    trip: &str,
    route: &str,
    pattern: &str,
    origin: &str,
    destination: &str,
) -> ChangeOp {
    ChangeOp::create_update(EntityChange::ScheduleStopPair(ScheduleStopPair {
        trip: Some(trip.to_owned()),
        route_onestop_id: Some(route.to_owned()),
        route_stop_pattern_onestop_id: Some(pattern.to_owned()),
        origin_onestop_id: Some(origin.to_owned()),
        destination_onestop_id: Some(destination.to_owned()),
        service_start_date: Some("2024-01-01".to_owned()),
        service_end_date: Some("2024-12-31".to_owned()),
        ..ScheduleStopPair::default()
    }))
}

/// Destroy the stop with `key`.
pub fn destroy_stop(key: &str) -> ChangeOp {
    ChangeOp::destroy(EntityChange::Stop(Stop {
        onestop_id: key.to_owned(),
        ..Stop::default()
    }))
}
