//! In-memory store used by tests and the standalone binary

use super::{BrokerStore, DeviceStore, LandStore, SensorStore, StoreError, StoreResult};
use crate::model::{Broker, Device, DeviceUpsert, Land, Sensor, SensorUpsert, Upserted};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

/// All four record kinds behind tokio `RwLock`s
///
/// `mutation_count` increases on every successful write so tests can assert that a
/// rejected message touched nothing.
#[derive(Default)]
pub struct InMemoryStore {
    devices: RwLock<HashMap<String, Device>>,
    sensors: RwLock<HashMap<(Uuid, String), Sensor>>,
    brokers: RwLock<Vec<Broker>>,
    lands: RwLock<Vec<Land>>,
    mutations: AtomicU64,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mutation_count(&self) -> u64 {
        self.mutations.load(Ordering::Relaxed)
    }

    pub async fn device_count(&self) -> usize {
        self.devices.read().await.len()
    }

    pub async fn sensor_count(&self) -> usize {
        self.sensors.read().await.len()
    }

    fn bump(&self) {
        self.mutations.fetch_add(1, Ordering::Relaxed);
    }
}

#[async_trait]
impl DeviceStore for InMemoryStore {
    async fn find_by_unique_id(&self, unique_id: &str) -> StoreResult<Option<Device>> {
        Ok(self.devices.read().await.get(unique_id).cloned())
    }

    async fn find(&self, id: Uuid) -> StoreResult<Option<Device>> {
        Ok(self
            .devices
            .read()
            .await
            .values()
            .find(|d| d.id == id)
            .cloned())
    }

    async fn upsert(
        &self,
        upsert: DeviceUpsert,
        now: DateTime<Utc>,
    ) -> StoreResult<Upserted<Device>> {
        if upsert.unique_id.is_empty() {
            return Err(StoreError::Conflict("device unique_id is empty".to_string()));
        }

        let mut devices = self.devices.write().await;
        let result = match devices.get_mut(&upsert.unique_id) {
            Some(existing) => {
                existing.apply_upsert(upsert, now);
                Upserted::updated(existing.clone())
            }
            None => {
                let device = Device::from_upsert(upsert, now);
                devices.insert(device.unique_id.clone(), device.clone());
                Upserted::created(device)
            }
        };
        self.bump();
        Ok(result)
    }

    async fn save(&self, device: &Device) -> StoreResult<()> {
        let mut devices = self.devices.write().await;
        match devices.get_mut(&device.unique_id) {
            Some(existing) if existing.id == device.id => {
                *existing = device.clone();
                self.bump();
                Ok(())
            }
            Some(_) => Err(StoreError::Conflict(format!(
                "unique_id {} belongs to another device",
                device.unique_id
            ))),
            None => Err(StoreError::not_found("device", device.unique_id.clone())),
        }
    }

    async fn list(&self) -> StoreResult<Vec<Device>> {
        let mut devices: Vec<Device> = self.devices.read().await.values().cloned().collect();
        devices.sort_by(|a, b| a.unique_id.cmp(&b.unique_id));
        Ok(devices)
    }
}

#[async_trait]
impl SensorStore for InMemoryStore {
    async fn find(&self, device_id: Uuid, sensor_type: &str) -> StoreResult<Option<Sensor>> {
        Ok(self
            .sensors
            .read()
            .await
            .get(&(device_id, sensor_type.to_string()))
            .cloned())
    }

    async fn upsert(&self, upsert: SensorUpsert) -> StoreResult<Upserted<Sensor>> {
        let key = (upsert.device_id, upsert.sensor_type.clone());
        let mut sensors = self.sensors.write().await;
        let result = match sensors.get_mut(&key) {
            Some(existing) => {
                existing.apply_upsert(upsert);
                Upserted::updated(existing.clone())
            }
            None => {
                let sensor = Sensor::from_upsert(upsert);
                sensors.insert(key, sensor.clone());
                Upserted::created(sensor)
            }
        };
        self.bump();
        Ok(result)
    }

    async fn list_for_device(&self, device_id: Uuid) -> StoreResult<Vec<Sensor>> {
        let mut sensors: Vec<Sensor> = self
            .sensors
            .read()
            .await
            .values()
            .filter(|s| s.device_id == device_id)
            .cloned()
            .collect();
        sensors.sort_by(|a, b| a.sensor_type.cmp(&b.sensor_type));
        Ok(sensors)
    }
}

#[async_trait]
impl BrokerStore for InMemoryStore {
    async fn list(&self) -> StoreResult<Vec<Broker>> {
        Ok(self.brokers.read().await.clone())
    }

    async fn find(&self, id: &str) -> StoreResult<Option<Broker>> {
        Ok(self.brokers.read().await.iter().find(|b| b.id == id).cloned())
    }

    async fn upsert(&self, broker: Broker) -> StoreResult<()> {
        let mut brokers = self.brokers.write().await;
        match brokers.iter_mut().find(|b| b.id == broker.id) {
            Some(existing) => *existing = broker,
            None => brokers.push(broker),
        }
        self.bump();
        Ok(())
    }
}

#[async_trait]
impl LandStore for InMemoryStore {
    async fn list(&self) -> StoreResult<Vec<Land>> {
        Ok(self.lands.read().await.clone())
    }

    async fn find(&self, id: &str) -> StoreResult<Option<Land>> {
        Ok(self.lands.read().await.iter().find(|l| l.id == id).cloned())
    }

    async fn upsert(&self, land: Land) -> StoreResult<()> {
        let mut lands = self.lands.write().await;
        match lands.iter_mut().find(|l| l.id == land.id) {
            Some(existing) => *existing = land,
            None => lands.push(land),
        }
        self.bump();
        Ok(())
    }
}
