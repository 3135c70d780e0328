//! `devices/{id}/gps`: device location, coordinate readings and geofence membership

use super::{decode, identify, lookup_device, record_reading, save_device, HandlerContext};
use crate::error::{AtStep, GatewayError, ProcessingFailure, ProcessingStep};
use crate::model::GeoLocation;
use crate::protocol::messages::GpsMessage;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq)]
pub struct LocationFix {
    pub device_id: String,
    /// Land id to membership, for every land the device belongs to
    pub geofence: BTreeMap<String, bool>,
}

pub async fn handle(
    ctx: &HandlerContext,
    topic_device: Option<&str>,
    payload: &[u8],
) -> Result<LocationFix, ProcessingFailure> {
    let message: GpsMessage = decode(payload)?;
    validate_coordinates(message.latitude, message.longitude).at_step(ProcessingStep::Decode)?;
    let device_id = identify(message.device_id.as_deref(), topic_device)?;
    let mut device = lookup_device(ctx, &device_id).await?;
    let now = ctx.now();

    let lands = ctx
        .stores
        .lands
        .lands_for_device(&device.unique_id)
        .await
        .at_step(ProcessingStep::Lookup)?;
    let geofence: BTreeMap<String, bool> = lands
        .iter()
        .map(|land| {
            (
                land.id.clone(),
                land.contains(message.latitude, message.longitude),
            )
        })
        .collect();

    device.location = Some(GeoLocation {
        latitude: message.latitude,
        longitude: message.longitude,
        altitude: message.altitude,
        recorded_at: now,
    });
    device.mark_seen(now);
    device.updated_at = now;

    let membership: Map<String, Value> = geofence
        .iter()
        .map(|(land_id, inside)| (land_id.clone(), Value::Bool(*inside)))
        .collect();
    let mut details = Map::new();
    details.insert("geofence".to_string(), Value::Object(membership));
    device.merge_status_details(details);
    save_device(ctx, &device).await?;

    record_reading(ctx, &device, "gps_latitude", message.latitude, now).await?;
    record_reading(ctx, &device, "gps_longitude", message.longitude, now).await?;
    if let Some(altitude) = message.altitude {
        record_reading(ctx, &device, "gps_altitude", altitude, now).await?;
    }

    Ok(LocationFix {
        device_id,
        geofence,
    })
}

fn validate_coordinates(latitude: f64, longitude: f64) -> Result<(), GatewayError> {
    if !(-90.0..=90.0).contains(&latitude) {
        return Err(GatewayError::invalid_message(format!(
            "latitude {latitude} out of range"
        )));
    }
    if !(-180.0..=180.0).contains(&longitude) {
        return Err(GatewayError::invalid_message(format!(
            "longitude {longitude} out of range"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coordinate_ranges() {
        assert!(validate_coordinates(39.5, -107.7).is_ok());
        assert!(validate_coordinates(90.0, 180.0).is_ok());
        assert!(validate_coordinates(90.5, 0.0).is_err());
        assert!(validate_coordinates(0.0, -180.1).is_err());
        assert!(validate_coordinates(f64::NAN, 0.0).is_err());
    }
}
