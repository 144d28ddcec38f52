//! Entity geometries and the distance capability used by quality checks.

use geo::{Closest, ClosestPoint, Coord, Distance, Haversine, LineString, Point};
use serde::{Deserialize, Serialize};

/// GeoJSON-shaped geometry carried by stops and route stop patterns.
///
/// Coordinates are WGS84 `[longitude, latitude]` pairs.
///
/// # Examples
/// ```
/// use onestop_core::Geometry;
///
/// let geometry: Geometry =
///     serde_json::from_str(r#"{"type":"Point","coordinates":[-122.4,37.8]}"#).unwrap();
/// assert_eq!(geometry.geometry_type(), "Point");
/// assert!(geometry.point().is_some());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Geometry {
    /// A single position.
    Point {
        /// `[longitude, latitude]`.
        coordinates: [f64; 2],
    },
    /// An ordered path of positions.
    LineString {
        /// Ordered `[longitude, latitude]` pairs.
        coordinates: Vec<[f64; 2]>,
    },
}

impl Geometry {
    /// Build a point geometry from longitude and latitude.
    pub const fn point_at(lon: f64, lat: f64) -> Self {
        Self::Point {
            coordinates: [lon, lat],
        }
    }

    /// Build a line geometry from `(longitude, latitude)` pairs.
    pub fn line_through(coordinates: &[(f64, f64)]) -> Self {
        Self::LineString {
            coordinates: coordinates.iter().map(|&(x, y)| [x, y]).collect(),
        }
    }

    /// GeoJSON type name.
    pub const fn geometry_type(&self) -> &'static str {
        match self {
            Self::Point { .. } => "Point",
            Self::LineString { .. } => "LineString",
        }
    }

    /// Return the geometry as a `geo` point when it is one.
    pub fn point(&self) -> Option<Point<f64>> {
        match self {
            Self::Point { coordinates: [x, y] } => Some(Point::new(*x, *y)),
            Self::LineString { .. } => None,
        }
    }

    /// Return the geometry as a `geo` line string when it is one.
    pub fn line_string(&self) -> Option<LineString<f64>> {
        match self {
            Self::LineString { coordinates } => Some(LineString::new(
                coordinates.iter().map(|&[x, y]| Coord { x, y }).collect(),
            )),
            Self::Point { .. } => None,
        }
    }

    /// Whether every coordinate is a finite number.
    pub fn is_finite(&self) -> bool {
        match self {
            Self::Point { coordinates } => coordinates.iter().all(|c| c.is_finite()),
            Self::LineString { coordinates } => coordinates
                .iter()
                .flat_map(|pair| pair.iter())
                .all(|c| c.is_finite()),
        }
    }
}

/// Opaque geometry capability consumed by the quality checks.
///
/// Implementations must be pure: the same inputs always yield the same
/// outputs, so that trial applies are reproducible.
pub trait GeometryService: Send + Sync {
    /// Distance between two WGS84 points in metres.
    fn distance(&self, a: &Point<f64>, b: &Point<f64>) -> f64;

    /// The point on `line` closest to `point`, or `None` when the line is
    /// empty.
    fn point_on_line_nearest(&self, line: &LineString<f64>, point: &Point<f64>)
    -> Option<Point<f64>>;
}

/// [`GeometryService`] backed by the `geo` crate.
///
/// Distances use the haversine formula. The nearest point is computed in
/// longitude/latitude space, which is accurate enough at stop-to-line scale.
///
/// # Examples
/// ```
/// use geo::{LineString, Point};
/// use onestop_core::{GeoGeometry, GeometryService};
///
/// let line = LineString::from(vec![(0.0, 0.0), (1.0, 0.0)]);
/// let nearest = GeoGeometry
///     .point_on_line_nearest(&line, &Point::new(0.5, 0.1))
///     .unwrap();
/// assert_eq!(nearest, Point::new(0.5, 0.0));
/// ```
#[derive(Debug, Default, Clone, Copy)]
pub struct GeoGeometry;

impl GeometryService for GeoGeometry {
    fn distance(&self, a: &Point<f64>, b: &Point<f64>) -> f64 {
        Haversine.distance(*a, *b)
    }

    fn point_on_line_nearest(
        &self,
        line: &LineString<f64>,
        point: &Point<f64>,
    ) -> Option<Point<f64>> {
        match line.closest_point(point) {
            Closest::Intersection(nearest) | Closest::SinglePoint(nearest) => Some(nearest),
            Closest::Indeterminate => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn point_round_trips_through_geojson_shape() {
        let json = serde_json::to_value(Geometry::point_at(1.5, 2.5)).expect("serialise point");
        assert_eq!(
            json,
            serde_json::json!({"type": "Point", "coordinates": [1.5, 2.5]})
        );
    }

    #[rstest]
    fn line_string_exposes_geo_line() {
        let geometry = Geometry::line_through(&[(0.0, 0.0), (1.0, 1.0)]);
        let line = geometry.line_string().expect("line geometry");
        assert_eq!(line.0.len(), 2);
        assert!(geometry.point().is_none());
    }

    #[rstest]
    fn rejects_unknown_geometry_type() {
        let result: Result<Geometry, _> =
            serde_json::from_str(r#"{"type":"Polygon","coordinates":[]}"#);
        assert!(result.is_err());
    }

    #[rstest]
    #[case(Point::new(0.5, 0.0005), 55.0, 56.0)]
    #[case(Point::new(0.5, 0.01), 1_100.0, 1_115.0)]
    fn measures_stop_to_line_gap(#[case] stop: Point<f64>, #[case] low: f64, #[case] high: f64) {
        let line = LineString::from(vec![(0.0, 0.0), (1.0, 0.0)]);
        let nearest = GeoGeometry
            .point_on_line_nearest(&line, &stop)
            .expect("nearest point");
        let gap = GeoGeometry.distance(&stop, &nearest);
        assert!((low..high).contains(&gap), "unexpected gap {gap}");
    }

    #[rstest]
    fn empty_line_has_no_nearest_point() {
        let line = LineString::<f64>::new(Vec::new());
        assert!(
            GeoGeometry
                .point_on_line_nearest(&line, &Point::new(0.0, 0.0))
                .is_none()
        );
    }

    #[rstest]
    fn detects_non_finite_coordinates() {
        assert!(!Geometry::point_at(f64::NAN, 0.0).is_finite());
        assert!(Geometry::point_at(0.0, 0.0).is_finite());
    }
}
