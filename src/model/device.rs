//! Device records and upsert reconciliation

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use uuid::Uuid;

/// Connectivity status of a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Online,
    #[default]
    Offline,
    Error,
    Maintenance,
}

impl DeviceStatus {
    /// Status reported by a device: only the literal "online" counts as online
    pub fn from_reported(literal: &str) -> Self {
        if literal == "online" {
            DeviceStatus::Online
        } else {
            DeviceStatus::Offline
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceStatus::Online => "online",
            DeviceStatus::Offline => "offline",
            DeviceStatus::Error => "error",
            DeviceStatus::Maintenance => "maintenance",
        }
    }
}

impl std::fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Last reported position of a device
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoLocation {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: Option<f64>,
    pub recorded_at: DateTime<Utc>,
}

/// Canonical device record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub id: Uuid,
    /// Stable external key announced by the device
    pub unique_id: String,
    pub name: String,
    pub device_type: String,
    pub firmware_version: Option<String>,
    pub mac_address: Option<String>,
    pub ip_address: Option<String>,
    pub status: DeviceStatus,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub health_percentage: u8,
    pub broker_id: Option<String>,
    /// Topic kind ("data", "status", "gps", or a device-specific key) to custom topic
    #[serde(default)]
    pub topic_overrides: HashMap<String, String>,
    #[serde(default)]
    pub status_details: Map<String, Value>,
    pub location: Option<GeoLocation>,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields a discovery response may set on a device
///
/// `None` fields leave the stored value untouched on update.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceUpsert {
    pub unique_id: String,
    pub name: Option<String>,
    pub device_type: Option<String>,
    pub firmware_version: Option<String>,
    pub mac_address: Option<String>,
    pub ip_address: Option<String>,
    pub broker_id: Option<String>,
    pub topic_overrides: Option<HashMap<String, String>>,
    /// Marks the device online and seen at this instant
    pub seen_at: Option<DateTime<Utc>>,
    /// Only applied when the device is created
    pub created_by: Option<String>,
}

impl DeviceUpsert {
    pub fn new(unique_id: impl Into<String>) -> Self {
        Self {
            unique_id: unique_id.into(),
            ..Default::default()
        }
    }
}

impl Device {
    /// Build a fresh device from an upsert
    pub fn from_upsert(upsert: DeviceUpsert, now: DateTime<Utc>) -> Self {
        let name = upsert
            .name
            .clone()
            .unwrap_or_else(|| upsert.unique_id.clone());
        let mut device = Device {
            id: Uuid::new_v4(),
            unique_id: upsert.unique_id.clone(),
            name,
            device_type: upsert
                .device_type
                .clone()
                .unwrap_or_else(|| "unknown".to_string()),
            firmware_version: None,
            mac_address: None,
            ip_address: None,
            status: DeviceStatus::Offline,
            last_seen_at: None,
            health_percentage: 100,
            broker_id: None,
            topic_overrides: HashMap::new(),
            status_details: Map::new(),
            location: None,
            created_by: upsert.created_by.clone(),
            created_at: now,
            updated_at: now,
        };
        device.apply_upsert(upsert, now);
        device
    }

    /// Merge the provided fields into this record
    pub fn apply_upsert(&mut self, upsert: DeviceUpsert, now: DateTime<Utc>) {
        if let Some(name) = upsert.name {
            self.name = name;
        }
        if let Some(device_type) = upsert.device_type {
            self.device_type = device_type;
        }
        if upsert.firmware_version.is_some() {
            self.firmware_version = upsert.firmware_version;
        }
        if upsert.mac_address.is_some() {
            self.mac_address = upsert.mac_address;
        }
        if upsert.ip_address.is_some() {
            self.ip_address = upsert.ip_address;
        }
        if upsert.broker_id.is_some() {
            self.broker_id = upsert.broker_id;
        }
        if let Some(overrides) = upsert.topic_overrides {
            self.topic_overrides = overrides;
        }
        if let Some(seen_at) = upsert.seen_at {
            self.mark_seen(seen_at);
        }
        self.updated_at = now;
    }

    /// Record activity from the device. Maintenance mode is sticky.
    pub fn mark_seen(&mut self, at: DateTime<Utc>) {
        self.last_seen_at = Some(at);
        if self.status != DeviceStatus::Maintenance {
            self.status = DeviceStatus::Online;
        }
    }

    /// Apply a status reported by the device itself
    pub fn apply_reported_status(&mut self, status: DeviceStatus, at: DateTime<Utc>) {
        self.last_seen_at = Some(at);
        if self.status != DeviceStatus::Maintenance {
            self.status = status;
        }
        self.updated_at = at;
    }

    /// Shallow-merge `details` into `status_details`
    pub fn merge_status_details(&mut self, details: Map<String, Value>) {
        for (key, value) in details {
            self.status_details.insert(key, value);
        }
    }

    /// Operator toggle. Leaving maintenance drops to offline until the device reports.
    pub fn set_maintenance(&mut self, on: bool, now: DateTime<Utc>) {
        self.status = match (on, &self.status) {
            (true, _) => DeviceStatus::Maintenance,
            (false, DeviceStatus::Maintenance) => DeviceStatus::Offline,
            (false, current) => *current,
        };
        self.updated_at = now;
    }

    pub fn is_in_maintenance(&self) -> bool {
        self.status == DeviceStatus::Maintenance
    }
}
