//! Point-in-polygon evaluation over GeoJSON geometry
//!
//! The evaluator works on raw `serde_json::Value` so that land geometry can be stored
//! exactly as it was authored. Coordinates are planar degrees; no geodesic correction is
//! applied. Every malformed input classifies the point as outside.

use serde_json::Value;

/// Mean earth radius used by [`haversine_distance_m`]
const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Stateless geofence evaluator
pub struct GeofenceEvaluator;

impl GeofenceEvaluator {
    /// Whether (`latitude`, `longitude`) lies inside the single polygon of `geometry`.
    ///
    /// `geometry` must be a FeatureCollection with exactly one Polygon feature. Only the
    /// outer ring is considered. A point exactly on a vertex is inside; other boundary
    /// points follow the even-odd rule.
    pub fn is_point_inside(latitude: f64, longitude: f64, geometry: &Value) -> bool {
        match Self::parse_ring(geometry) {
            Some(ring) => Self::ring_contains(latitude, longitude, &ring),
            None => false,
        }
    }

    /// Extract the outer ring as (lng, lat) pairs, or `None` for degenerate input
    pub fn parse_ring(geometry: &Value) -> Option<Vec<(f64, f64)>> {
        let features = geometry.get("features")?.as_array()?;
        if features.len() != 1 {
            return None;
        }

        let geom = features[0].get("geometry")?;
        if geom.get("type")?.as_str()? != "Polygon" {
            return None;
        }

        let outer = geom.get("coordinates")?.as_array()?.first()?.as_array()?;
        let ring = outer
            .iter()
            .map(|position| {
                let pair = position.as_array()?;
                let lng = pair.first()?.as_f64()?;
                let lat = pair.get(1)?.as_f64()?;
                Some((lng, lat))
            })
            .collect::<Option<Vec<_>>>()?;

        if ring.len() < 3 {
            return None;
        }
        Some(ring)
    }

    /// Even-odd ray casting over an ordered (lng, lat) ring
    pub fn ring_contains(latitude: f64, longitude: f64, ring: &[(f64, f64)]) -> bool {
        if ring.len() < 3 {
            return false;
        }

        if ring
            .iter()
            .any(|&(lng, lat)| lng == longitude && lat == latitude)
        {
            return true;
        }

        let mut inside = false;
        let mut j = ring.len() - 1;
        for i in 0..ring.len() {
            let (xi, yi) = ring[i];
            let (xj, yj) = ring[j];
            let crosses = (yi > latitude) != (yj > latitude)
                && longitude < (xj - xi) * (latitude - yi) / (yj - yi) + xi;
            if crosses {
                inside = !inside;
            }
            j = i;
        }
        inside
    }
}

/// Great-circle distance in metres between two (lat, lng) points.
///
/// Diagnostic only; membership never depends on it.
pub fn haversine_distance_m(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lng2 - lng1).to_radians();

    let a = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_M * c
}

/// Build a single-polygon FeatureCollection from (lng, lat) positions
pub fn polygon_feature_collection(ring: &[(f64, f64)]) -> Value {
    let coordinates: Vec<Value> = ring
        .iter()
        .map(|&(lng, lat)| serde_json::json!([lng, lat]))
        .collect();
    serde_json::json!({
        "type": "FeatureCollection",
        "features": [{
            "type": "Feature",
            "properties": {},
            "geometry": {
                "type": "Polygon",
                "coordinates": [coordinates]
            }
        }]
    })
}
