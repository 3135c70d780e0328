//! Per-topic message handlers
//!
//! Each handler decodes its payload, identifies the device and mutates the stores. A
//! failure carries the [`ProcessingStep`] it happened in; the processor decides how to
//! log and count it.

use crate::clock::Clock;
use crate::discovery::CorrelationRegistry;
use crate::error::{AtStep, GatewayError, ProcessingFailure, ProcessingStep};
use crate::model::{Device, Sensor, SensorUpsert};
use crate::observability::metrics;
use crate::protocol::topics::validate_device_id;
use crate::store::Stores;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

pub mod data;
pub mod discovery;
pub mod gps;
pub mod status;

/// Everything a handler needs besides the message
#[derive(Clone)]
pub struct HandlerContext {
    pub stores: Stores,
    pub clock: Arc<dyn Clock>,
    pub correlation: Arc<CorrelationRegistry>,
    /// Credited with devices created outside any live discovery request
    pub default_user: String,
}

impl HandlerContext {
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}

/// Decode a JSON object payload
pub(crate) fn decode<T: DeserializeOwned>(payload: &[u8]) -> Result<T, ProcessingFailure> {
    let value: Value = serde_json::from_slice(payload)
        .map_err(|e| GatewayError::invalid_message(format!("malformed JSON: {e}")))
        .at_step(ProcessingStep::Decode)?;

    if !value.is_object() {
        return Err(GatewayError::invalid_message("payload is not a JSON object"))
            .at_step(ProcessingStep::Decode);
    }

    serde_json::from_value(value)
        .map_err(|e| GatewayError::invalid_message(format!("unexpected payload shape: {e}")))
        .at_step(ProcessingStep::Decode)
}

/// Device id from the payload, falling back to the topic's id level
pub(crate) fn identify(
    payload_id: Option<&str>,
    topic_id: Option<&str>,
) -> Result<String, ProcessingFailure> {
    let device_id = payload_id
        .filter(|id| !id.is_empty())
        .or(topic_id)
        .ok_or_else(|| GatewayError::invalid_message("no device_id in payload or topic"))
        .at_step(ProcessingStep::Identify)?;

    validate_device_id(device_id)
        .map_err(|e| GatewayError::invalid_message(e.to_string()))
        .at_step(ProcessingStep::Identify)?;

    Ok(device_id.to_string())
}

/// Known device by unique id; unknown devices are never created here
pub(crate) async fn lookup_device(
    ctx: &HandlerContext,
    device_id: &str,
) -> Result<Device, ProcessingFailure> {
    ctx.stores
        .devices
        .find_by_unique_id(device_id)
        .await
        .at_step(ProcessingStep::Lookup)?
        .ok_or_else(|| GatewayError::unknown_device(device_id))
        .at_step(ProcessingStep::Lookup)
}

pub(crate) async fn save_device(
    ctx: &HandlerContext,
    device: &Device,
) -> Result<(), ProcessingFailure> {
    ctx.stores
        .devices
        .save(device)
        .await
        .at_step(ProcessingStep::UpdateDevice)
}

/// Store one calibrated reading.
///
/// Returns `None` when the sensor exists but is disabled. Out-of-range values are
/// stored and reported, never rejected.
pub(crate) async fn record_reading(
    ctx: &HandlerContext,
    device: &Device,
    sensor_type: &str,
    raw: f64,
    at: DateTime<Utc>,
) -> Result<Option<Sensor>, ProcessingFailure> {
    let existing = ctx
        .stores
        .sensors
        .find(device.id, sensor_type)
        .await
        .at_step(ProcessingStep::RecordReading)?;

    let value = match &existing {
        Some(sensor) if !sensor.enabled => {
            debug!(device_id = %device.unique_id, sensor_type, "Skipping disabled sensor");
            return Ok(None);
        }
        Some(sensor) => sensor.calibrate(raw),
        None => raw,
    };

    let sensor = ctx
        .stores
        .sensors
        .upsert(SensorUpsert::reading(device.id, sensor_type, value, at))
        .await
        .at_step(ProcessingStep::RecordReading)?
        .record;
    metrics().sensor_reading_recorded();

    if !sensor.is_within_thresholds() {
        warn!(
            device_id = %device.unique_id,
            sensor_type,
            value,
            min = ?sensor.thresholds.min,
            max = ?sensor.thresholds.max,
            "Sensor reading outside thresholds"
        );
        metrics().threshold_violation();
    }

    Ok(Some(sensor))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct Probe {
        device_id: Option<String>,
    }

    #[test]
    fn test_decode_rejects_malformed_json() {
        let failure = decode::<Probe>(b"{not json").unwrap_err();
        assert_eq!(failure.step, ProcessingStep::Decode);
        assert!(matches!(failure.source, GatewayError::InvalidMessage { .. }));
    }

    #[test]
    fn test_decode_rejects_non_objects() {
        assert!(decode::<Probe>(b"[\"D1\"]").is_err());
        assert!(decode::<Probe>(b"42").is_err());
        let probe = decode::<Probe>(br#"{"device_id":"D1"}"#).unwrap();
        assert_eq!(probe.device_id.as_deref(), Some("D1"));
    }

    #[test]
    fn test_identify_prefers_payload() {
        assert_eq!(identify(Some("P1"), Some("T1")).unwrap(), "P1");
        assert_eq!(identify(None, Some("T1")).unwrap(), "T1");
        assert_eq!(identify(Some(""), Some("T1")).unwrap(), "T1");
    }

    #[test]
    fn test_identify_requires_an_id() {
        let failure = identify(None, None).unwrap_err();
        assert_eq!(failure.step, ProcessingStep::Identify);
        assert!(identify(Some("a/b"), None).is_err());
    }
}
