//! JSON payloads exchanged with devices
//!
//! Inbound payloads are decoded leniently: devices from different vendors disagree on
//! field names, so aliases are accepted and unknown fields are ignored.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Discovery request published by the gateway
///
/// # Examples
/// ```
/// use sensorgate::protocol::DiscoveryRequest;
///
/// let request = DiscoveryRequest::new("admin");
/// let json = serde_json::to_value(&request).unwrap();
/// assert_eq!(json["action"], "discover");
/// assert_eq!(json["initiated_by"], "admin");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiscoveryRequest {
    pub action: String,
    pub timestamp: DateTime<Utc>,
    pub initiated_by: String,
    pub request_id: Uuid,
}

impl DiscoveryRequest {
    pub fn new(initiated_by: impl Into<String>) -> Self {
        Self::at(initiated_by, Utc::now())
    }

    pub fn at(initiated_by: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            action: "discover".to_string(),
            timestamp,
            initiated_by: initiated_by.into(),
            request_id: Uuid::new_v4(),
        }
    }
}

/// Command sent to `devices/{id}/command`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommandEnvelope {
    pub command: String,
    #[serde(default)]
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
    pub command_id: Uuid,
}

impl CommandEnvelope {
    pub fn new(command: impl Into<String>, payload: Value, timestamp: DateTime<Utc>) -> Self {
        Self {
            command: command.into(),
            payload,
            timestamp,
            command_id: Uuid::new_v4(),
        }
    }
}

/// Sensor capability announced in a discovery response
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AdvertisedSensor {
    #[serde(rename = "type", alias = "sensor_type")]
    pub sensor_type: String,
    pub name: Option<String>,
    pub unit: Option<String>,
    pub min_threshold: Option<f64>,
    pub max_threshold: Option<f64>,
    pub calibration_offset: Option<f64>,
    pub enabled: Option<bool>,
}

/// Device answer to a discovery request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct DiscoveryResponse {
    pub device_id: Option<String>,
    pub name: Option<String>,
    #[serde(rename = "type", alias = "device_type")]
    pub device_type: Option<String>,
    #[serde(alias = "firmware")]
    pub firmware_version: Option<String>,
    #[serde(alias = "mac")]
    pub mac_address: Option<String>,
    #[serde(alias = "ip")]
    pub ip_address: Option<String>,
    #[serde(default)]
    pub available_sensors: Vec<AdvertisedSensor>,
    /// Echoed request id; firmware may send any JSON value here
    #[serde(default)]
    pub request_id: Option<Value>,
    /// Device-declared custom topics, keyed by kind
    #[serde(default)]
    pub topics: Option<std::collections::HashMap<String, String>>,
}

impl DiscoveryResponse {
    /// The echoed request id, when it is a UUID string
    pub fn correlation_id(&self) -> Option<Uuid> {
        self.request_id
            .as_ref()
            .and_then(Value::as_str)
            .and_then(|raw| Uuid::parse_str(raw.trim()).ok())
    }
}

/// Periodic telemetry from `devices/{id}/data`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct DataMessage {
    pub device_id: Option<String>,
    /// Vendor sensor key to raw value; non-numeric values are skipped
    #[serde(default)]
    pub sensors: Map<String, Value>,
    pub wifi_rssi: Option<f64>,
    pub rssi: Option<f64>,
    pub uptime: Option<f64>,
    pub free_heap: Option<f64>,
    pub timestamp: Option<Value>,
}

impl DataMessage {
    /// RSSI from the top level, falling back to the sensor map
    pub fn rssi(&self) -> Option<f64> {
        self.wifi_rssi
            .or(self.rssi)
            .or_else(|| self.sensor_number("wifi_signal"))
            .or_else(|| self.sensor_number("wifi_rssi"))
    }

    pub fn uptime_secs(&self) -> Option<f64> {
        self.uptime.or_else(|| self.sensor_number("uptime"))
    }

    pub fn free_heap_bytes(&self) -> Option<f64> {
        self.free_heap.or_else(|| self.sensor_number("free_heap"))
    }

    /// Numeric readings only, in payload order
    pub fn numeric_readings(&self) -> impl Iterator<Item = (&str, f64)> {
        self.sensors
            .iter()
            .filter_map(|(key, value)| value.as_f64().map(|v| (key.as_str(), v)))
    }

    fn sensor_number(&self, key: &str) -> Option<f64> {
        self.sensors.get(key).and_then(Value::as_f64)
    }
}

/// Connectivity report from `devices/{id}/status`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct StatusMessage {
    pub device_id: Option<String>,
    #[serde(default)]
    pub status: String,
    pub uptime: Option<f64>,
    pub free_heap: Option<f64>,
    #[serde(alias = "wifi_rssi")]
    pub rssi: Option<f64>,
}

impl StatusMessage {
    /// Connectivity metrics worth keeping in `status_details`
    pub fn details(&self) -> Map<String, Value> {
        let mut details = Map::new();
        if let Some(uptime) = self.uptime {
            details.insert("uptime".to_string(), Value::from(uptime));
        }
        if let Some(free_heap) = self.free_heap {
            details.insert("free_heap".to_string(), Value::from(free_heap));
        }
        if let Some(rssi) = self.rssi {
            details.insert("rssi".to_string(), Value::from(rssi));
        }
        details
    }
}

/// Position fix from `devices/{id}/gps`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GpsMessage {
    pub device_id: Option<String>,
    #[serde(alias = "lat")]
    pub latitude: f64,
    #[serde(alias = "lng", alias = "lon")]
    pub longitude: f64,
    #[serde(alias = "alt")]
    pub altitude: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_discovery_request_shape() {
        let request = DiscoveryRequest::new("admin");
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["action"], "discover");
        assert!(value["timestamp"].is_string());
        assert!(value["request_id"].is_string());
    }

    #[test]
    fn test_discovery_response_aliases() {
        let response: DiscoveryResponse = serde_json::from_value(json!({
            "device_id": "D1",
            "type": "esp32",
            "firmware": "1.2.3",
            "mac": "AA:BB",
            "available_sensors": [
                {"type": "temp", "unit": "C", "min_threshold": -10.0},
                {"sensor_type": "humidity"}
            ]
        }))
        .unwrap();

        assert_eq!(response.device_type.as_deref(), Some("esp32"));
        assert_eq!(response.firmware_version.as_deref(), Some("1.2.3"));
        assert_eq!(response.mac_address.as_deref(), Some("AA:BB"));
        assert_eq!(response.available_sensors.len(), 2);
        assert_eq!(response.available_sensors[1].sensor_type, "humidity");
        assert_eq!(response.available_sensors[0].calibration_offset, None);
    }

    #[test]
    fn test_discovery_response_request_id_is_lenient() {
        let id = Uuid::new_v4();
        let echoed: DiscoveryResponse =
            serde_json::from_value(json!({"device_id": "D1", "request_id": id.to_string()}))
                .unwrap();
        assert_eq!(echoed.correlation_id(), Some(id));

        for raw in [json!("req-42"), json!(42), json!(null), json!({"id": "x"})] {
            let response: DiscoveryResponse = serde_json::from_value(json!({
                "device_id": "D9",
                "request_id": raw,
                "available_sensors": [{"type": "temperature"}]
            }))
            .unwrap();
            assert_eq!(response.device_id.as_deref(), Some("D9"));
            assert_eq!(response.correlation_id(), None);
        }
    }

    #[test]
    fn test_data_message_rssi_sources() {
        let top: DataMessage = serde_json::from_value(json!({"wifi_rssi": -50})).unwrap();
        assert_eq!(top.rssi(), Some(-50.0));

        let nested: DataMessage =
            serde_json::from_value(json!({"sensors": {"wifi_signal": -85, "temperature": 22}}))
                .unwrap();
        assert_eq!(nested.rssi(), Some(-85.0));
        assert_eq!(nested.uptime_secs(), None);

        let none: DataMessage = serde_json::from_value(json!({})).unwrap();
        assert_eq!(none.rssi(), None);
    }

    #[test]
    fn test_numeric_readings_skip_strings() {
        let data: DataMessage = serde_json::from_value(json!({
            "sensors": {"temperature": 22.5, "label": "barn", "ok": true}
        }))
        .unwrap();
        let readings: Vec<_> = data.numeric_readings().collect();
        assert_eq!(readings, vec![("temperature", 22.5)]);
    }

    #[test]
    fn test_gps_aliases() {
        let gps: GpsMessage =
            serde_json::from_value(json!({"lat": 39.5, "lon": -107.7, "alt": 1800})).unwrap();
        assert_eq!(gps.latitude, 39.5);
        assert_eq!(gps.longitude, -107.7);
        assert_eq!(gps.altitude, Some(1800.0));

        let missing = serde_json::from_value::<GpsMessage>(json!({"lat": 39.5}));
        assert!(missing.is_err());
    }

    #[test]
    fn test_status_details() {
        let status: StatusMessage =
            serde_json::from_value(json!({"status": "online", "uptime": 120, "wifi_rssi": -60}))
                .unwrap();
        let details = status.details();
        assert_eq!(details["uptime"], json!(120.0));
        assert_eq!(details["rssi"], json!(-60.0));
        assert!(!details.contains_key("free_heap"));
    }
}
