//! Sensor records keyed by (device_id, sensor_type)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Inclusive range a reading is expected to stay within
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl Thresholds {
    pub fn new(min: Option<f64>, max: Option<f64>) -> Self {
        Self { min, max }
    }

    /// Missing bounds never fail
    pub fn contains(&self, value: f64) -> bool {
        self.min.map_or(true, |min| value >= min) && self.max.map_or(true, |max| value <= max)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sensor {
    pub id: Uuid,
    pub device_id: Uuid,
    /// Canonical key, e.g. "temperature" or "gps_latitude"
    pub sensor_type: String,
    pub name: String,
    pub unit: Option<String>,
    pub value: Option<f64>,
    pub thresholds: Thresholds,
    pub calibration_offset: f64,
    pub reading_timestamp: Option<DateTime<Utc>>,
    pub enabled: bool,
}

/// Partial sensor update; `None` leaves the stored field as is
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SensorUpsert {
    pub device_id: Uuid,
    pub sensor_type: String,
    pub name: Option<String>,
    pub unit: Option<String>,
    pub value: Option<f64>,
    pub reading_timestamp: Option<DateTime<Utc>>,
    pub min_threshold: Option<f64>,
    pub max_threshold: Option<f64>,
    pub calibration_offset: Option<f64>,
    pub enabled: Option<bool>,
}

impl SensorUpsert {
    pub fn new(device_id: Uuid, sensor_type: impl Into<String>) -> Self {
        Self {
            device_id,
            sensor_type: sensor_type.into(),
            ..Default::default()
        }
    }

    /// A reading update: value and timestamp only
    pub fn reading(
        device_id: Uuid,
        sensor_type: impl Into<String>,
        value: f64,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            value: Some(value),
            reading_timestamp: Some(at),
            ..Self::new(device_id, sensor_type)
        }
    }
}

impl Sensor {
    pub fn from_upsert(upsert: SensorUpsert) -> Self {
        let mut sensor = Sensor {
            id: Uuid::new_v4(),
            device_id: upsert.device_id,
            name: upsert
                .name
                .clone()
                .unwrap_or_else(|| upsert.sensor_type.clone()),
            sensor_type: upsert.sensor_type.clone(),
            unit: None,
            value: None,
            thresholds: Thresholds::default(),
            calibration_offset: 0.0,
            reading_timestamp: None,
            enabled: true,
        };
        sensor.apply_upsert(upsert);
        sensor
    }

    /// Merge an upsert into this row.
    ///
    /// calibration_offset and enabled are only touched when explicitly supplied.
    pub fn apply_upsert(&mut self, upsert: SensorUpsert) {
        if let Some(name) = upsert.name {
            self.name = name;
        }
        if upsert.unit.is_some() {
            self.unit = upsert.unit;
        }
        if let Some(value) = upsert.value {
            self.value = Some(value);
            self.reading_timestamp = upsert.reading_timestamp.or(self.reading_timestamp);
        }
        if upsert.min_threshold.is_some() {
            self.thresholds.min = upsert.min_threshold;
        }
        if upsert.max_threshold.is_some() {
            self.thresholds.max = upsert.max_threshold;
        }
        if let Some(offset) = upsert.calibration_offset {
            self.calibration_offset = offset;
        }
        if let Some(enabled) = upsert.enabled {
            self.enabled = enabled;
        }
    }

    /// Apply the calibration offset to a raw reading
    pub fn calibrate(&self, raw: f64) -> f64 {
        raw + self.calibration_offset
    }

    /// Alerting collaborators consume this; an empty reading is never out of range
    pub fn is_within_thresholds(&self) -> bool {
        self.value.map_or(true, |value| self.thresholds.contains(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thresholds_contains() {
        let t = Thresholds::new(Some(-10.0), Some(40.0));
        assert!(t.contains(-10.0));
        assert!(t.contains(40.0));
        assert!(!t.contains(40.1));
        assert!(!t.contains(-10.5));
        assert!(Thresholds::default().contains(f64::MAX));
        assert!(Thresholds::new(None, Some(5.0)).contains(-1000.0));
    }

    #[test]
    fn test_from_upsert_defaults() {
        let sensor = Sensor::from_upsert(SensorUpsert::new(Uuid::new_v4(), "temperature"));
        assert_eq!(sensor.name, "temperature");
        assert_eq!(sensor.calibration_offset, 0.0);
        assert!(sensor.enabled);
        assert_eq!(sensor.value, None);
        assert!(sensor.is_within_thresholds());
    }

    #[test]
    fn test_reading_preserves_calibration() {
        let device_id = Uuid::new_v4();
        let mut sensor = Sensor::from_upsert(SensorUpsert {
            calibration_offset: Some(1.5),
            enabled: Some(false),
            ..SensorUpsert::new(device_id, "temperature")
        });

        let at = Utc::now();
        sensor.apply_upsert(SensorUpsert::reading(device_id, "temperature", 21.0, at));

        assert_eq!(sensor.calibration_offset, 1.5);
        assert!(!sensor.enabled);
        assert_eq!(sensor.value, Some(21.0));
        assert_eq!(sensor.reading_timestamp, Some(at));
    }

    #[test]
    fn test_calibrate_and_threshold_check() {
        let mut sensor = Sensor::from_upsert(SensorUpsert {
            calibration_offset: Some(-2.0),
            max_threshold: Some(30.0),
            ..SensorUpsert::new(Uuid::new_v4(), "temperature")
        });
        assert_eq!(sensor.calibrate(33.0), 31.0);
        sensor.value = Some(sensor.calibrate(33.0));
        assert!(!sensor.is_within_thresholds());
    }
}
