//! Canonical records for devices, sensors, brokers and lands
//!
//! These are the shapes persisted through the [`crate::store`] traits and shared
//! with the admin process that reads the same state.

pub mod broker;
pub mod device;
pub mod land;
pub mod sensor;

pub use broker::{Broker, BrokerProtocol, BrokerStatus, LastWillConfig, QosLevel, ReconnectPolicy};
pub use device::{Device, DeviceStatus, DeviceUpsert, GeoLocation};
pub use land::Land;
pub use sensor::{Sensor, SensorUpsert, Thresholds};

/// Result of an upsert: the stored record and whether it was newly created
#[derive(Debug, Clone, PartialEq)]
pub struct Upserted<T> {
    pub record: T,
    pub created: bool,
}

impl<T> Upserted<T> {
    pub fn created(record: T) -> Self {
        Self {
            record,
            created: true,
        }
    }

    pub fn updated(record: T) -> Self {
        Self {
            record,
            created: false,
        }
    }
}
