//! Entity kinds tracked by the registry and their attribute schemas.
//!
//! Each versioned kind has one attribute struct. Payload operations carry a
//! possibly partial instance of that struct; the store merges it over the
//! current record and validates the merged result with
//! [`EntityAttributes::validate`]. Cross-entity references always use business
//! keys (onestop ids), never surrogate ids.

use std::{collections::BTreeMap, fmt, str::FromStr};

use geo::{LineString, Point};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use thiserror::Error;

use crate::{FeedVersionId, ValidationError, geometry::Geometry};

/// Closed set of entity kinds known to the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityKind {
    /// A published GTFS feed.
    Feed,
    /// A transit agency.
    Operator,
    /// A boarding location.
    Stop,
    /// A named service operated by an operator.
    Route,
    /// An ordered stop sequence with its shape.
    RouteStopPattern,
    /// A timetable edge between two consecutive stops of a trip.
    ScheduleStopPair,
    /// Relationship: an operator serves a stop.
    OperatorServingStop,
    /// Relationship: a route serves a stop.
    RouteServingStop,
    /// A fetched snapshot of a feed. Registered, not versioned.
    FeedVersion,
}

impl EntityKind {
    /// Kinds that have current and historical rows.
    pub const VERSIONED: [Self; 8] = [
        Self::Feed,
        Self::Operator,
        Self::Stop,
        Self::Route,
        Self::RouteStopPattern,
        Self::ScheduleStopPair,
        Self::OperatorServingStop,
        Self::RouteServingStop,
    ];

    /// Kinds that receive a feed-import row when created by an import.
    pub const IMPORT_TRACKED: [Self; 5] = [
        Self::Feed,
        Self::Operator,
        Self::Stop,
        Self::Route,
        Self::RouteStopPattern,
    ];

    /// Stored and displayed name of the kind.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Feed => "Feed",
            Self::Operator => "Operator",
            Self::Stop => "Stop",
            Self::Route => "Route",
            Self::RouteStopPattern => "RouteStopPattern",
            Self::ScheduleStopPair => "ScheduleStopPair",
            Self::OperatorServingStop => "OperatorServingStop",
            Self::RouteServingStop => "RouteServingStop",
            Self::FeedVersion => "FeedVersion",
        }
    }

    /// Key naming the kind inside a change operation.
    pub const fn payload_key(self) -> &'static str {
        match self {
            Self::Feed => "feed",
            Self::Operator => "operator",
            Self::Stop => "stop",
            Self::Route => "route",
            Self::RouteStopPattern => "routeStopPattern",
            Self::ScheduleStopPair => "scheduleStopPair",
            Self::OperatorServingStop => "operatorServingStop",
            Self::RouteServingStop => "routeServingStop",
            Self::FeedVersion => "feedVersion",
        }
    }

    /// Whether entities of this kind are mutated through changesets.
    pub const fn is_versioned(self) -> bool {
        !matches!(self, Self::FeedVersion)
    }

    /// Whether an import changeset records provenance for this kind.
    pub const fn records_import_provenance(self) -> bool {
        matches!(
            self,
            Self::Feed | Self::Operator | Self::Stop | Self::Route | Self::RouteStopPattern
        )
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown entity kind name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown entity kind {0:?}")]
pub struct UnknownEntityKind(pub String);

impl FromStr for EntityKind {
    type Err = UnknownEntityKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::VERSIONED
            .into_iter()
            .chain(std::iter::once(Self::FeedVersion))
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| UnknownEntityKind(s.to_owned()))
    }
}

/// A business-key reference from one entity to another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityReference {
    /// Kind the reference must resolve to.
    pub kind: EntityKind,
    /// Referenced business key.
    pub key: String,
    /// Attribute holding the reference.
    pub field: &'static str,
}

impl EntityReference {
    fn new(kind: EntityKind, key: &str, field: &'static str) -> Self {
        Self {
            kind,
            key: key.to_owned(),
            field,
        }
    }
}

/// Shared behaviour of the per-kind attribute structs.
pub trait EntityAttributes: Serialize + DeserializeOwned + Clone + fmt::Debug {
    /// Kind described by this schema.
    const KIND: EntityKind;

    /// Business key identifying the entity across versions.
    fn business_key(&self) -> Result<String, ValidationError>;

    /// Business-key references set on this (possibly partial) record.
    fn references(&self) -> Vec<EntityReference>;

    /// Check that a fully merged record satisfies the kind's schema.
    fn validate(&self) -> Result<(), ValidationError>;
}

fn require<'a, T>(
    value: Option<&'a T>,
    kind: EntityKind,
    key: &str,
    field: &'static str,
) -> Result<&'a T, ValidationError> {
    value.ok_or_else(|| ValidationError::MissingField {
        kind,
        key: key.to_owned(),
        field,
    })
}

fn invalid(kind: EntityKind, key: &str, field: &'static str, reason: &str) -> ValidationError {
    ValidationError::InvalidField {
        kind,
        key: key.to_owned(),
        field,
        reason: reason.to_owned(),
    }
}

fn require_onestop_id(kind: EntityKind, onestop_id: &str) -> Result<String, ValidationError> {
    if onestop_id.trim().is_empty() {
        return Err(invalid(kind, onestop_id, "onestopId", "must not be blank"));
    }
    Ok(onestop_id.to_owned())
}

fn require_geometry(
    geometry: Option<&Geometry>,
    kind: EntityKind,
    key: &str,
    expected: &'static str,
) -> Result<(), ValidationError> {
    let geometry = require(geometry, kind, key, "geometry")?;
    if geometry.geometry_type() != expected {
        return Err(invalid(
            kind,
            key,
            "geometry",
            &format!("expected {expected}, found {}", geometry.geometry_type()),
        ));
    }
    if !geometry.is_finite() {
        return Err(invalid(kind, key, "geometry", "coordinates must be finite"));
    }
    Ok(())
}

/// A published GTFS feed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Feed {
    /// Business key, e.g. `f-9q9-bart`.
    pub onestop_id: String,
    /// Location the feed is fetched from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Feed format, usually `gtfs`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feed_format: Option<String>,
    /// Licence terms for the feed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license_url: Option<String>,
}

impl EntityAttributes for Feed {
    const KIND: EntityKind = EntityKind::Feed;

    fn business_key(&self) -> Result<String, ValidationError> {
        require_onestop_id(Self::KIND, &self.onestop_id)
    }

    fn references(&self) -> Vec<EntityReference> {
        Vec::new()
    }

    fn validate(&self) -> Result<(), ValidationError> {
        let key = self.business_key()?;
        require(self.url.as_ref(), Self::KIND, &key, "url")?;
        Ok(())
    }
}

/// A transit agency.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operator {
    /// Business key, e.g. `o-9q9-bart`.
    pub onestop_id: String,
    /// Public name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// IANA timezone name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    /// Public website.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
}

impl EntityAttributes for Operator {
    const KIND: EntityKind = EntityKind::Operator;

    fn business_key(&self) -> Result<String, ValidationError> {
        require_onestop_id(Self::KIND, &self.onestop_id)
    }

    fn references(&self) -> Vec<EntityReference> {
        Vec::new()
    }

    fn validate(&self) -> Result<(), ValidationError> {
        let key = self.business_key()?;
        require(self.name.as_ref(), Self::KIND, &key, "name")?;
        Ok(())
    }
}

/// A boarding location.
///
/// # Examples
/// ```
/// use onestop_core::{EntityAttributes, Geometry, Stop};
///
/// let stop = Stop {
///     onestop_id: "s-9q9-richmond".into(),
///     geometry: Some(Geometry::point_at(-122.35, 37.93)),
///     ..Stop::default()
/// };
/// assert!(stop.validate().is_ok());
/// assert!(stop.point().is_some());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stop {
    /// Business key, e.g. `s-9q9-richmond`.
    pub onestop_id: String,
    /// Public name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// IANA timezone name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    /// Stop position; must be a point.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geometry: Option<Geometry>,
    /// Free-form tags.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<BTreeMap<String, String>>,
}

impl Stop {
    /// Stop position as a `geo` point.
    pub fn point(&self) -> Option<Point<f64>> {
        self.geometry.as_ref().and_then(Geometry::point)
    }
}

impl EntityAttributes for Stop {
    const KIND: EntityKind = EntityKind::Stop;

    fn business_key(&self) -> Result<String, ValidationError> {
        require_onestop_id(Self::KIND, &self.onestop_id)
    }

    fn references(&self) -> Vec<EntityReference> {
        Vec::new()
    }

    fn validate(&self) -> Result<(), ValidationError> {
        let key = self.business_key()?;
        require_geometry(self.geometry.as_ref(), Self::KIND, &key, "Point")
    }
}

/// A named service operated by an operator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Route {
    /// Business key, e.g. `r-9q9-richmond~fremont`.
    pub onestop_id: String,
    /// Public name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// GTFS vehicle type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vehicle_type: Option<String>,
    /// Operator running the route.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operated_by_onestop_id: Option<String>,
}

impl EntityAttributes for Route {
    const KIND: EntityKind = EntityKind::Route;

    fn business_key(&self) -> Result<String, ValidationError> {
        require_onestop_id(Self::KIND, &self.onestop_id)
    }

    fn references(&self) -> Vec<EntityReference> {
        self.operated_by_onestop_id
            .iter()
            .map(|key| EntityReference::new(EntityKind::Operator, key, "operatedByOnestopId"))
            .collect()
    }

    fn validate(&self) -> Result<(), ValidationError> {
        let key = self.business_key()?;
        require(
            self.operated_by_onestop_id.as_ref(),
            Self::KIND,
            &key,
            "operatedByOnestopId",
        )?;
        Ok(())
    }
}

/// An ordered stop sequence together with the shape vehicles follow.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteStopPattern {
    /// Business key, e.g. `r-9q9-richmond~fremont-e8fb80-61d4dc`.
    pub onestop_id: String,
    /// Route the pattern belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route_onestop_id: Option<String>,
    /// Ordered stop business keys.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_pattern: Option<Vec<String>>,
    /// Shape; must be a line string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geometry: Option<Geometry>,
    /// GTFS trip ids following this pattern.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trips: Option<Vec<String>>,
}

impl RouteStopPattern {
    /// Shape as a `geo` line string.
    pub fn line(&self) -> Option<LineString<f64>> {
        self.geometry.as_ref().and_then(Geometry::line_string)
    }

    /// Ordered stop keys, empty when unset.
    pub fn stops(&self) -> &[String] {
        self.stop_pattern.as_deref().unwrap_or_default()
    }
}

impl EntityAttributes for RouteStopPattern {
    const KIND: EntityKind = EntityKind::RouteStopPattern;

    fn business_key(&self) -> Result<String, ValidationError> {
        require_onestop_id(Self::KIND, &self.onestop_id)
    }

    fn references(&self) -> Vec<EntityReference> {
        let route = self
            .route_onestop_id
            .iter()
            .map(|key| EntityReference::new(EntityKind::Route, key, "routeOnestopId"));
        let stops = self
            .stops()
            .iter()
            .map(|key| EntityReference::new(EntityKind::Stop, key, "stopPattern"));
        route.chain(stops).collect()
    }

    fn validate(&self) -> Result<(), ValidationError> {
        let key = self.business_key()?;
        require(
            self.route_onestop_id.as_ref(),
            Self::KIND,
            &key,
            "routeOnestopId",
        )?;
        let stops = require(self.stop_pattern.as_ref(), Self::KIND, &key, "stopPattern")?;
        if stops.is_empty() {
            return Err(invalid(
                Self::KIND,
                &key,
                "stopPattern",
                "must list at least one stop",
            ));
        }
        require_geometry(self.geometry.as_ref(), Self::KIND, &key, "LineString")
    }
}

/// A timetable edge: one trip travelling between two consecutive stops.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleStopPair {
    /// GTFS trip id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trip: Option<String>,
    /// Departure stop.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_onestop_id: Option<String>,
    /// Arrival stop.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_onestop_id: Option<String>,
    /// Route the trip belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route_onestop_id: Option<String>,
    /// Pattern the trip follows.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route_stop_pattern_onestop_id: Option<String>,
    /// `HH:MM:SS` departure from the origin.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_departure_time: Option<String>,
    /// `HH:MM:SS` arrival at the destination.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_arrival_time: Option<String>,
    /// First service day, `YYYY-MM-DD`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_start_date: Option<String>,
    /// Last service day, `YYYY-MM-DD`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_end_date: Option<String>,
}

fn is_iso_date(value: &str) -> bool {
    let bytes = value.as_bytes();
    bytes.len() == 10
        && bytes.iter().enumerate().all(|(index, byte)| match index {
            4 | 7 => *byte == b'-',
            _ => byte.is_ascii_digit(),
        })
}

impl ScheduleStopPair {
    fn check_date(
        &self,
        key: &str,
        field: &'static str,
        value: Option<&String>,
    ) -> Result<(), ValidationError> {
        match value {
            Some(date) if !is_iso_date(date) => {
                Err(invalid(Self::KIND, key, field, "expected YYYY-MM-DD"))
            }
            _ => Ok(()),
        }
    }
}

impl EntityAttributes for ScheduleStopPair {
    const KIND: EntityKind = EntityKind::ScheduleStopPair;

    /// Pairs have no onestop id; the key combines trip, origin and destination.
    fn business_key(&self) -> Result<String, ValidationError> {
        let partial = self.trip.clone().unwrap_or_default();
        let trip = require(self.trip.as_ref(), Self::KIND, &partial, "trip")?;
        let origin = require(
            self.origin_onestop_id.as_ref(),
            Self::KIND,
            trip,
            "originOnestopId",
        )?;
        let destination = require(
            self.destination_onestop_id.as_ref(),
            Self::KIND,
            trip,
            "destinationOnestopId",
        )?;
        Ok(format!("{trip}:{origin}>{destination}"))
    }

    fn references(&self) -> Vec<EntityReference> {
        let mut references = Vec::new();
        if let Some(key) = &self.route_onestop_id {
            references.push(EntityReference::new(EntityKind::Route, key, "routeOnestopId"));
        }
        if let Some(key) = &self.route_stop_pattern_onestop_id {
            references.push(EntityReference::new(
                EntityKind::RouteStopPattern,
                key,
                "routeStopPatternOnestopId",
            ));
        }
        if let Some(key) = &self.origin_onestop_id {
            references.push(EntityReference::new(EntityKind::Stop, key, "originOnestopId"));
        }
        if let Some(key) = &self.destination_onestop_id {
            references.push(EntityReference::new(
                EntityKind::Stop,
                key,
                "destinationOnestopId",
            ));
        }
        references
    }

    fn validate(&self) -> Result<(), ValidationError> {
        let key = self.business_key()?;
        require(
            self.route_onestop_id.as_ref(),
            Self::KIND,
            &key,
            "routeOnestopId",
        )?;
        self.check_date(&key, "serviceStartDate", self.service_start_date.as_ref())?;
        self.check_date(&key, "serviceEndDate", self.service_end_date.as_ref())?;
        if let (Some(start), Some(end)) = (&self.service_start_date, &self.service_end_date) {
            // ISO dates order lexicographically.
            if start > end {
                return Err(invalid(
                    Self::KIND,
                    &key,
                    "serviceStartDate",
                    "begins after serviceEndDate",
                ));
            }
        }
        Ok(())
    }
}

/// Relationship: an operator serves a stop.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperatorServingStop {
    /// Serving operator.
    pub operator_onestop_id: String,
    /// Served stop.
    pub stop_onestop_id: String,
}

impl EntityAttributes for OperatorServingStop {
    const KIND: EntityKind = EntityKind::OperatorServingStop;

    fn business_key(&self) -> Result<String, ValidationError> {
        Ok(format!(
            "{}>{}",
            require_onestop_id(EntityKind::Operator, &self.operator_onestop_id)?,
            require_onestop_id(EntityKind::Stop, &self.stop_onestop_id)?
        ))
    }

    fn references(&self) -> Vec<EntityReference> {
        vec![
            EntityReference::new(
                EntityKind::Operator,
                &self.operator_onestop_id,
                "operatorOnestopId",
            ),
            EntityReference::new(EntityKind::Stop, &self.stop_onestop_id, "stopOnestopId"),
        ]
    }

    fn validate(&self) -> Result<(), ValidationError> {
        self.business_key().map(|_| ())
    }
}

/// Relationship: a route serves a stop.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteServingStop {
    /// Serving route.
    pub route_onestop_id: String,
    /// Served stop.
    pub stop_onestop_id: String,
}

impl EntityAttributes for RouteServingStop {
    const KIND: EntityKind = EntityKind::RouteServingStop;

    fn business_key(&self) -> Result<String, ValidationError> {
        Ok(format!(
            "{}>{}",
            require_onestop_id(EntityKind::Route, &self.route_onestop_id)?,
            require_onestop_id(EntityKind::Stop, &self.stop_onestop_id)?
        ))
    }

    fn references(&self) -> Vec<EntityReference> {
        vec![
            EntityReference::new(EntityKind::Route, &self.route_onestop_id, "routeOnestopId"),
            EntityReference::new(EntityKind::Stop, &self.stop_onestop_id, "stopOnestopId"),
        ]
    }

    fn validate(&self) -> Result<(), ValidationError> {
        self.business_key().map(|_| ())
    }
}

/// A registered snapshot of a feed, used for import provenance and as an
/// attachment point for maintenance issues.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedVersion {
    /// Surrogate id.
    pub id: FeedVersionId,
    /// Feed the snapshot was fetched from.
    pub feed_onestop_id: String,
    /// SHA-1 of the fetched archive.
    pub sha1: String,
    /// Registration time, seconds since the Unix epoch.
    pub created_at: i64,
}
