//! `devices/{id}/data`: health score and sensor readings for a known device

use super::{decode, identify, lookup_device, record_reading, save_device, HandlerContext};
use crate::error::ProcessingFailure;
use crate::processing::health_score::compute_health;
use crate::processing::sensor_types::canonical_sensor_type;
use crate::protocol::messages::DataMessage;
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq)]
pub struct Telemetry {
    pub device_id: String,
    pub health: u8,
    /// Readings actually stored (disabled sensors excluded)
    pub readings: usize,
}

pub async fn handle(
    ctx: &HandlerContext,
    topic_device: Option<&str>,
    payload: &[u8],
) -> Result<Telemetry, ProcessingFailure> {
    let message: DataMessage = decode(payload)?;
    let device_id = identify(message.device_id.as_deref(), topic_device)?;
    let mut device = lookup_device(ctx, &device_id).await?;
    let now = ctx.now();

    let rssi = message.rssi();
    let uptime = message.uptime_secs();
    let free_heap = message.free_heap_bytes();
    let health = compute_health(rssi, uptime, free_heap);

    device.health_percentage = health;
    device.mark_seen(now);
    device.updated_at = now;
    device.merge_status_details(connectivity_details(health, rssi, uptime, free_heap));
    save_device(ctx, &device).await?;

    let mut readings = 0;
    for (vendor_key, raw) in message.numeric_readings() {
        let sensor_type = canonical_sensor_type(vendor_key);
        if record_reading(ctx, &device, sensor_type, raw, now)
            .await?
            .is_some()
        {
            readings += 1;
        }
    }

    Ok(Telemetry {
        device_id,
        health,
        readings,
    })
}

fn connectivity_details(
    health: u8,
    rssi: Option<f64>,
    uptime: Option<f64>,
    free_heap: Option<f64>,
) -> Map<String, Value> {
    let mut details = Map::new();
    details.insert("health_percentage".to_string(), Value::from(health));
    for (key, value) in [("rssi", rssi), ("uptime", uptime), ("free_heap", free_heap)] {
        if let Some(value) = value {
            details.insert(key.to_string(), Value::from(value));
        }
    }
    details
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connectivity_details_skip_absent_metrics() {
        let details = connectivity_details(70, Some(-85.0), None, None);
        assert_eq!(details["health_percentage"], 70);
        assert_eq!(details["rssi"], -85.0);
        assert!(!details.contains_key("uptime"));
        assert!(!details.contains_key("free_heap"));
    }
}
