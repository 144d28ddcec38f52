//! Declarative change operations carried by change payloads.
//!
//! A [`ChangeOp`] pairs an action with exactly one entity change and an
//! optional list of issues the operation claims to resolve:
//!
//! ```json
//! { "action": "createUpdate",
//!   "stop": { "onestopId": "s-9q9-richmond", "geometry": {"type": "Point", "coordinates": [-122.35, 37.93]} },
//!   "issuesResolved": [8] }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
    EntityKind, EntityReference, IssueId, ValidationError,
    entity::{
        EntityAttributes, Feed, Operator, OperatorServingStop, Route, RouteServingStop,
        RouteStopPattern, ScheduleStopPair, Stop,
    },
};

/// What a change operation does to its entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChangeAction {
    /// Create the entity, or merge the supplied attributes into the current
    /// version.
    CreateUpdate,
    /// Retire the current version into history.
    Destroy,
}

/// Attributes of exactly one entity, tagged by its payload key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EntityChange {
    /// Feed attributes.
    Feed(Feed),
    /// Operator attributes.
    Operator(Operator),
    /// Stop attributes.
    Stop(Stop),
    /// Route attributes.
    Route(Route),
    /// Route stop pattern attributes.
    RouteStopPattern(RouteStopPattern),
    /// Schedule stop pair attributes.
    ScheduleStopPair(ScheduleStopPair),
    /// Operator-serves-stop relationship.
    OperatorServingStop(OperatorServingStop),
    /// Route-serves-stop relationship.
    RouteServingStop(RouteServingStop),
}

macro_rules! with_attributes {
    ($change:expr, $attrs:ident => $body:expr) => {
        match $change {
            EntityChange::Feed($attrs) => $body,
            EntityChange::Operator($attrs) => $body,
            EntityChange::Stop($attrs) => $body,
            EntityChange::Route($attrs) => $body,
            EntityChange::RouteStopPattern($attrs) => $body,
            EntityChange::ScheduleStopPair($attrs) => $body,
            EntityChange::OperatorServingStop($attrs) => $body,
            EntityChange::RouteServingStop($attrs) => $body,
        }
    };
}

fn kind_of<T: EntityAttributes>(_: &T) -> EntityKind {
    T::KIND
}

impl EntityChange {
    /// Kind of the entity being changed.
    pub fn kind(&self) -> EntityKind {
        with_attributes!(self, attrs => kind_of(attrs))
    }

    /// Business key of the entity being changed.
    ///
    /// # Errors
    /// Returns [`ValidationError`] when the key fields are blank or absent.
    pub fn business_key(&self) -> Result<String, ValidationError> {
        with_attributes!(self, attrs => attrs.business_key())
    }

    /// References set by this change.
    pub fn references(&self) -> Vec<EntityReference> {
        with_attributes!(self, attrs => attrs.references())
    }

    /// Validate this change as a complete record.
    ///
    /// # Errors
    /// Returns the first schema violation found.
    pub fn validate(&self) -> Result<(), ValidationError> {
        with_attributes!(self, attrs => attrs.validate())
    }

    /// Attributes set by this change as a JSON object keyed by wire name.
    ///
    /// Unset optional attributes are omitted, so merging the result over a
    /// stored record only overwrites what the change names.
    ///
    /// # Errors
    /// Returns [`ValidationError::MalformedPayload`] if the attributes do not
    /// serialise to an object.
    pub fn to_attributes(&self) -> Result<Map<String, Value>, ValidationError> {
        let value = with_attributes!(self, attrs => serde_json::to_value(attrs));
        match value {
            Ok(Value::Object(map)) => Ok(map),
            Ok(other) => Err(ValidationError::MalformedPayload {
                reason: format!("{} attributes serialised to {other}", self.kind()),
            }),
            Err(err) => Err(ValidationError::MalformedPayload {
                reason: err.to_string(),
            }),
        }
    }

    /// Rebuild a typed change from stored attributes.
    ///
    /// # Errors
    /// Returns [`ValidationError::MalformedPayload`] when the attributes do not
    /// match the kind's schema or the kind is not versioned.
    pub fn from_attributes(
        kind: EntityKind,
        attributes: Map<String, Value>,
    ) -> Result<Self, ValidationError> {
        if !kind.is_versioned() {
            return Err(ValidationError::MalformedPayload {
                reason: format!("{kind} is not changed through payloads"),
            });
        }
        let mut tagged = Map::new();
        tagged.insert(kind.payload_key().to_owned(), Value::Object(attributes));
        serde_json::from_value(Value::Object(tagged)).map_err(|err| {
            ValidationError::MalformedPayload {
                reason: format!("stored {kind} attributes: {err}"),
            }
        })
    }
}

/// Merge `incoming` over `stored`, returning the names of attributes whose
/// value changed.
///
/// Attributes absent from `incoming` keep their stored value.
///
/// # Examples
/// ```
/// use onestop_core::change::merge_attributes;
/// use serde_json::{Map, json};
///
/// let mut stored: Map<_, _> = json!({"onestopId": "s-1", "name": "Old"})
///     .as_object()
///     .cloned()
///     .unwrap();
/// let incoming = json!({"onestopId": "s-1", "name": "New"})
///     .as_object()
///     .cloned()
///     .unwrap();
/// assert_eq!(merge_attributes(&mut stored, incoming), vec!["name".to_owned()]);
/// assert_eq!(stored["name"], "New");
/// ```
pub fn merge_attributes(
    stored: &mut Map<String, Value>,
    incoming: Map<String, Value>,
) -> Vec<String> {
    let mut changed = Vec::new();
    for (name, value) in incoming {
        if stored.get(&name) != Some(&value) {
            changed.push(name.clone());
            stored.insert(name, value);
        }
    }
    changed
}

/// One declarative operation inside a change payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeOp {
    /// Whether to create/update or destroy.
    pub action: ChangeAction,
    /// The entity and the attributes supplied for it.
    #[serde(flatten)]
    pub entity: EntityChange,
    /// Issues this operation claims to fix.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub issues_resolved: Vec<IssueId>,
}

impl ChangeOp {
    /// Create-or-update operation for `entity`.
    pub const fn create_update(entity: EntityChange) -> Self {
        Self {
            action: ChangeAction::CreateUpdate,
            entity,
            issues_resolved: Vec::new(),
        }
    }

    /// Destroy operation for `entity`; only its key fields are consulted.
    pub const fn destroy(entity: EntityChange) -> Self {
        Self {
            action: ChangeAction::Destroy,
            entity,
            issues_resolved: Vec::new(),
        }
    }

    /// Attach issue ids this operation resolves.
    #[must_use]
    pub fn resolving(mut self, issues: impl IntoIterator<Item = IssueId>) -> Self {
        self.issues_resolved.extend(issues);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Geometry;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    fn decodes_wire_operation() {
        let op: ChangeOp = serde_json::from_value(json!({
            "action": "createUpdate",
            "stop": {
                "onestopId": "s-9q9-richmond",
                "name": "Richmond",
                "geometry": {"type": "Point", "coordinates": [-122.35, 37.93]}
            },
            "issuesResolved": [8]
        }))
        .expect("decode op");
        assert_eq!(op.action, ChangeAction::CreateUpdate);
        assert_eq!(op.entity.kind(), EntityKind::Stop);
        assert_eq!(op.issues_resolved, vec![8]);
        assert_eq!(op.entity.business_key(), Ok("s-9q9-richmond".to_owned()));
    }

    #[rstest]
    fn rejects_operation_without_entity() {
        let result: Result<ChangeOp, _> =
            serde_json::from_value(json!({"action": "destroy", "issuesResolved": []}));
        assert!(result.is_err());
    }

    #[rstest]
    fn rejects_unknown_action() {
        let result: Result<ChangeOp, _> = serde_json::from_value(json!({
            "action": "merge",
            "operator": {"onestopId": "o-1"}
        }));
        assert!(result.is_err());
    }

    #[rstest]
    fn partial_change_omits_unset_attributes() {
        let change = EntityChange::Stop(Stop {
            onestop_id: "s-1".into(),
            name: Some("Main St".into()),
            ..Stop::default()
        });
        let attributes = change.to_attributes().expect("attributes");
        assert_eq!(
            Value::Object(attributes),
            json!({"onestopId": "s-1", "name": "Main St"})
        );
    }

    #[rstest]
    fn merged_attributes_rebuild_typed_change() {
        let mut stored = EntityChange::Stop(Stop {
            onestop_id: "s-1".into(),
            name: Some("Main St".into()),
            geometry: Some(Geometry::point_at(1.0, 2.0)),
            ..Stop::default()
        })
        .to_attributes()
        .expect("stored attributes");
        let update = EntityChange::Stop(Stop {
            onestop_id: "s-1".into(),
            geometry: Some(Geometry::point_at(1.5, 2.0)),
            ..Stop::default()
        })
        .to_attributes()
        .expect("update attributes");

        let changed = merge_attributes(&mut stored, update);
        assert_eq!(changed, vec!["geometry".to_owned()]);

        let merged = EntityChange::from_attributes(EntityKind::Stop, stored).expect("rebuild");
        let EntityChange::Stop(stop) = merged else {
            panic!("expected a stop");
        };
        assert_eq!(stop.name.as_deref(), Some("Main St"));
        assert_eq!(stop.geometry, Some(Geometry::point_at(1.5, 2.0)));
    }

    #[rstest]
    fn feed_versions_are_not_payload_entities() {
        let result = EntityChange::from_attributes(EntityKind::FeedVersion, Map::new());
        assert!(matches!(
            result,
            Err(ValidationError::MalformedPayload { .. })
        ));
    }

    #[rstest]
    fn serialises_back_to_wire_shape() {
        let op = ChangeOp::destroy(EntityChange::Operator(Operator {
            onestop_id: "o-1".into(),
            ..Operator::default()
        }))
        .resolving([3]);
        assert_eq!(
            serde_json::to_value(&op).expect("serialise"),
            json!({"action": "destroy", "operator": {"onestopId": "o-1"}, "issuesResolved": [3]})
        );
    }
}
