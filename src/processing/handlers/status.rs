//! `devices/{id}/status`: reported connectivity for a known device

use super::{decode, identify, lookup_device, save_device, HandlerContext};
use crate::error::ProcessingFailure;
use crate::model::DeviceStatus;
use crate::protocol::messages::StatusMessage;
use serde_json::Value;

pub async fn handle(
    ctx: &HandlerContext,
    topic_device: Option<&str>,
    payload: &[u8],
) -> Result<(String, DeviceStatus), ProcessingFailure> {
    let message: StatusMessage = decode(payload)?;
    let device_id = identify(message.device_id.as_deref(), topic_device)?;
    let mut device = lookup_device(ctx, &device_id).await?;
    let now = ctx.now();

    device.apply_reported_status(DeviceStatus::from_reported(&message.status), now);

    let mut details = message.details();
    details.insert(
        "reported_status".to_string(),
        Value::String(message.status.clone()),
    );
    device.merge_status_details(details);
    save_device(ctx, &device).await?;

    Ok((device_id, device.status))
}
