//! Persistence seams for devices, sensors, brokers and lands
//!
//! The gateway never talks to a database directly. Each record kind has an async store
//! trait; [`memory::InMemoryStore`] implements all four for tests and for the standalone
//! binary.

use crate::model::{Broker, Device, DeviceUpsert, Land, Sensor, SensorUpsert, Upserted};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

pub mod memory;

pub use memory::InMemoryStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn not_found(entity: &'static str, key: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            key: key.into(),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait DeviceStore: Send + Sync {
    async fn find_by_unique_id(&self, unique_id: &str) -> StoreResult<Option<Device>>;

    async fn find(&self, id: Uuid) -> StoreResult<Option<Device>>;

    /// Create or merge by `unique_id`
    async fn upsert(&self, upsert: DeviceUpsert, now: DateTime<Utc>)
        -> StoreResult<Upserted<Device>>;

    /// Overwrite an existing device row
    async fn save(&self, device: &Device) -> StoreResult<()>;

    async fn list(&self) -> StoreResult<Vec<Device>>;
}

#[async_trait]
pub trait SensorStore: Send + Sync {
    async fn find(&self, device_id: Uuid, sensor_type: &str) -> StoreResult<Option<Sensor>>;

    /// Create or merge by (device_id, sensor_type)
    async fn upsert(&self, upsert: SensorUpsert) -> StoreResult<Upserted<Sensor>>;

    async fn list_for_device(&self, device_id: Uuid) -> StoreResult<Vec<Sensor>>;
}

#[async_trait]
pub trait BrokerStore: Send + Sync {
    async fn list(&self) -> StoreResult<Vec<Broker>>;

    async fn find(&self, id: &str) -> StoreResult<Option<Broker>>;

    async fn upsert(&self, broker: Broker) -> StoreResult<()>;

    async fn list_active(&self) -> StoreResult<Vec<Broker>> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .filter(Broker::is_active)
            .collect())
    }

    async fn default_broker(&self) -> StoreResult<Option<Broker>> {
        Ok(self.list().await?.into_iter().find(|b| b.is_default))
    }
}

#[async_trait]
pub trait LandStore: Send + Sync {
    async fn list(&self) -> StoreResult<Vec<Land>>;

    async fn find(&self, id: &str) -> StoreResult<Option<Land>>;

    async fn upsert(&self, land: Land) -> StoreResult<()>;

    /// Lands that list the device's unique id
    async fn lands_for_device(&self, unique_id: &str) -> StoreResult<Vec<Land>> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .filter(|land| land.has_device(unique_id))
            .collect())
    }
}

/// The four stores the gateway reads and writes
#[derive(Clone)]
pub struct Stores {
    pub devices: Arc<dyn DeviceStore>,
    pub sensors: Arc<dyn SensorStore>,
    pub brokers: Arc<dyn BrokerStore>,
    pub lands: Arc<dyn LandStore>,
}

impl Stores {
    /// Back every store with the same in-memory instance
    pub fn in_memory(store: Arc<InMemoryStore>) -> Self {
        Self {
            devices: store.clone(),
            sensors: store.clone(),
            brokers: store.clone(),
            lands: store,
        }
    }
}
