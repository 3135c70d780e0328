//! `devices/{id}/discovery/response`: create or refresh a device and its sensors

use super::{decode, identify, HandlerContext};
use crate::error::{AtStep, ProcessingFailure, ProcessingStep};
use crate::model::{Device, DeviceUpsert, SensorUpsert};
use crate::observability::metrics;
use crate::processing::sensor_types::canonical_sensor_type;
use crate::protocol::messages::{AdvertisedSensor, DiscoveryResponse};
use tracing::{debug, info};
use uuid::Uuid;

/// What a discovery response changed
#[derive(Debug, Clone)]
pub struct Discovered {
    pub device: Device,
    pub created: bool,
    pub sensors: usize,
    pub attributed_to: String,
}

pub async fn handle(
    ctx: &HandlerContext,
    topic_device: Option<&str>,
    broker_id: Option<&str>,
    payload: &[u8],
) -> Result<Discovered, ProcessingFailure> {
    let response: DiscoveryResponse = decode(payload)?;
    let device_id = identify(response.device_id.as_deref(), topic_device)?;
    let now = ctx.now();

    let attributed_to = ctx
        .correlation
        .resolve(response.correlation_id(), &device_id, now)
        .map(|context| context.initiated_by)
        .unwrap_or_else(|| ctx.default_user.clone());

    let upsert = DeviceUpsert {
        unique_id: device_id.clone(),
        name: response.name.clone(),
        device_type: response.device_type.clone(),
        firmware_version: response.firmware_version.clone(),
        mac_address: response.mac_address.clone(),
        ip_address: response.ip_address.clone(),
        broker_id: broker_id.map(str::to_string),
        topic_overrides: response.topics.clone(),
        seen_at: Some(now),
        created_by: Some(attributed_to.clone()),
    };

    let upserted = ctx
        .stores
        .devices
        .upsert(upsert, now)
        .await
        .at_step(ProcessingStep::UpsertDevice)?;
    metrics().discovery_response_received();
    if upserted.created {
        metrics().device_created();
        info!(device_id = %device_id, initiated_by = %attributed_to, "New device discovered");
    } else {
        debug!(device_id = %device_id, "Known device refreshed by discovery");
    }

    let device = upserted.record;
    for advertised in &response.available_sensors {
        ctx.stores
            .sensors
            .upsert(sensor_upsert(device.id, advertised))
            .await
            .at_step(ProcessingStep::UpsertSensors)?;
    }

    Ok(Discovered {
        device,
        created: upserted.created,
        sensors: response.available_sensors.len(),
        attributed_to,
    })
}

/// Fields the device did not send stay as stored (or default on creation)
fn sensor_upsert(device_id: Uuid, advertised: &AdvertisedSensor) -> SensorUpsert {
    SensorUpsert {
        name: advertised.name.clone(),
        unit: advertised.unit.clone(),
        min_threshold: advertised.min_threshold,
        max_threshold: advertised.max_threshold,
        calibration_offset: advertised.calibration_offset,
        enabled: advertised.enabled,
        ..SensorUpsert::new(device_id, canonical_sensor_type(&advertised.sensor_type))
    }
}
