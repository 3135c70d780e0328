//! Geofence classification tests
//!
//! Covers the reference field scenario, the vertex tie-break, degenerate geometry and
//! properties over randomly generated convex polygons.

use proptest::prelude::*;
use sensorgate::geofence::{haversine_distance_m, polygon_feature_collection, GeofenceEvaluator};
use sensorgate::model::Land;
use serde_json::json;

const MIN_LAT: f64 = 39.495387;
const MAX_LAT: f64 = 39.529577;
const MIN_LNG: f64 = -107.744122;
const MAX_LNG: f64 = -107.653999;

fn field() -> serde_json::Value {
    polygon_feature_collection(&[
        (MIN_LNG, MIN_LAT),
        (MAX_LNG, MIN_LAT),
        (MAX_LNG, MAX_LAT),
        (MIN_LNG, MAX_LAT),
        (MIN_LNG, MIN_LAT),
    ])
}

#[test]
fn test_point_in_field_is_inside() {
    assert!(GeofenceEvaluator::is_point_inside(39.512345, -107.699060, &field()));
}

#[test]
fn test_san_francisco_is_outside() {
    assert!(!GeofenceEvaluator::is_point_inside(37.7749, -122.4194, &field()));
}

#[test]
fn test_vertex_is_inside() {
    assert!(GeofenceEvaluator::is_point_inside(MIN_LAT, MIN_LNG, &field()));
    assert!(GeofenceEvaluator::is_point_inside(MAX_LAT, MAX_LNG, &field()));
}

#[test]
fn test_degenerate_geometry_is_outside() {
    let cases = vec![
        json!(null),
        json!({}),
        json!({"type": "FeatureCollection", "features": []}),
        json!({
            "type": "FeatureCollection",
            "features": [
                field()["features"][0].clone(),
                field()["features"][0].clone()
            ]
        }),
        polygon_feature_collection(&[(MIN_LNG, MIN_LAT), (MAX_LNG, MAX_LAT)]),
        json!({
            "type": "FeatureCollection",
            "features": [{
                "type": "Feature",
                "geometry": {"type": "Polygon", "coordinates": [[["a", "b"], [1, 2], [3, 4]]]}
            }]
        }),
        json!({
            "type": "FeatureCollection",
            "features": [{
                "type": "Feature",
                "geometry": {"type": "Point", "coordinates": [MIN_LNG, MIN_LAT]}
            }]
        }),
    ];

    for geometry in cases {
        assert!(
            !GeofenceEvaluator::is_point_inside(39.512345, -107.699060, &geometry),
            "expected outside for {geometry}"
        );
    }
}

#[test]
fn test_land_contains_delegates_to_evaluator() {
    let land = Land {
        id: "north".to_string(),
        name: "North field".to_string(),
        geometry: field(),
        devices: vec!["D1".to_string()],
    };
    assert!(land.contains(39.512345, -107.699060));
    assert!(!land.contains(37.7749, -122.4194));
    assert!(land.has_device("D1"));
}

#[test]
fn test_haversine_across_field() {
    let width = haversine_distance_m(MIN_LAT, MIN_LNG, MIN_LAT, MAX_LNG);
    assert!((7_500.0..8_000.0).contains(&width), "width was {width}");
    assert_eq!(haversine_distance_m(MIN_LAT, MIN_LNG, MIN_LAT, MIN_LNG), 0.0);
}

/// Convex polygon approximating a circle, counter-clockwise (lng, lat) vertices
fn regular_polygon(center: (f64, f64), radius: f64, sides: usize) -> Vec<(f64, f64)> {
    (0..sides)
        .map(|i| {
            let angle = 2.0 * std::f64::consts::PI * i as f64 / sides as f64;
            (center.0 + radius * angle.cos(), center.1 + radius * angle.sin())
        })
        .collect()
}

proptest! {
    #[test]
    fn prop_points_well_inside_are_inside(
        lng in -170.0f64..170.0,
        lat in -80.0f64..80.0,
        radius in 0.01f64..5.0,
        sides in 3usize..12,
        fraction in 0.0f64..0.45,
        angle in 0.0f64..std::f64::consts::TAU,
    ) {
        let ring = regular_polygon((lng, lat), radius, sides);
        // cos(pi/3) = 0.5 bounds the inscribed radius from below for sides >= 3
        let r = radius * fraction;
        let point = (lng + r * angle.cos(), lat + r * angle.sin());
        prop_assert!(GeofenceEvaluator::is_point_inside(
            point.1,
            point.0,
            &polygon_feature_collection(&ring)
        ));
    }

    #[test]
    fn prop_points_outside_bounding_circle_are_outside(
        lng in -170.0f64..170.0,
        lat in -80.0f64..80.0,
        radius in 0.01f64..5.0,
        sides in 3usize..12,
        factor in 1.05f64..4.0,
        angle in 0.0f64..std::f64::consts::TAU,
    ) {
        let ring = regular_polygon((lng, lat), radius, sides);
        let r = radius * factor;
        let point = (lng + r * angle.cos(), lat + r * angle.sin());
        prop_assert!(!GeofenceEvaluator::is_point_inside(
            point.1,
            point.0,
            &polygon_feature_collection(&ring)
        ));
    }

    #[test]
    fn prop_rotating_the_ring_keeps_the_answer(
        sides in 3usize..10,
        shift in 0usize..10,
        px in -1.5f64..1.5,
        py in -1.5f64..1.5,
    ) {
        let ring = regular_polygon((0.0, 0.0), 1.0, sides);
        let mut rotated = ring.clone();
        rotated.rotate_left(shift % sides);

        prop_assert_eq!(
            GeofenceEvaluator::is_point_inside(py, px, &polygon_feature_collection(&ring)),
            GeofenceEvaluator::is_point_inside(py, px, &polygon_feature_collection(&rotated))
        );
    }

    #[test]
    fn prop_every_vertex_is_inside(sides in 3usize..12, radius in 0.01f64..5.0) {
        let ring = regular_polygon((10.0, 20.0), radius, sides);
        let geometry = polygon_feature_collection(&ring);
        for (lng, lat) in ring {
            prop_assert!(GeofenceEvaluator::is_point_inside(lat, lng, &geometry));
        }
    }
}
