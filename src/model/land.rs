//! Lands own a geofence polygon and a set of devices

use crate::geofence::GeofenceEvaluator;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Land {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// GeoJSON FeatureCollection holding one Polygon feature
    pub geometry: Value,
    /// Unique ids of the devices placed on this land
    #[serde(default)]
    pub devices: Vec<String>,
}

impl Land {
    pub fn contains(&self, latitude: f64, longitude: f64) -> bool {
        GeofenceEvaluator::is_point_inside(latitude, longitude, &self.geometry)
    }

    pub fn has_device(&self, unique_id: &str) -> bool {
        self.devices.iter().any(|d| d == unique_id)
    }
}
