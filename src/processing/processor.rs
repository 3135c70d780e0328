//! Topic dispatch and failure reporting for inbound device messages

use super::dispatch::{Dispatch, DispatchTable, HandlerKind};
use super::handlers::{self, HandlerContext};
use crate::error::{sanitize_payload, AtStep, GatewayResult, ProcessingFailure, ProcessingStep};
use crate::message_span;
use crate::model::{Device, DeviceStatus};
use crate::observability::metrics;
use crate::transport::InboundMessage;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;
use tracing::{debug, info, warn, Instrument};

/// What handling one message did
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessOutcome {
    DeviceDiscovered {
        device_id: String,
        created: bool,
        sensors: usize,
        attributed_to: String,
        /// Custom topics the device declared that nothing subscribed to yet
        new_topics: Vec<String>,
    },
    TelemetryRecorded {
        device_id: String,
        health: u8,
        readings: usize,
    },
    StatusUpdated {
        device_id: String,
        status: DeviceStatus,
    },
    LocationUpdated {
        device_id: String,
        geofence: BTreeMap<String, bool>,
    },
    GlobalDiscoveryObserved,
    CustomHandled {
        device_id: String,
        key: String,
    },
    /// No route for the topic
    Ignored,
}

impl ProcessOutcome {
    pub fn new_topics(&self) -> &[String] {
        match self {
            ProcessOutcome::DeviceDiscovered { new_topics, .. } => new_topics,
            _ => &[],
        }
    }

    pub fn is_discovery_response(&self) -> bool {
        matches!(self, ProcessOutcome::DeviceDiscovered { .. })
    }
}

/// Receives messages on device-declared topics whose key is not data/status/gps
#[async_trait]
pub trait CustomTopicHook: Send + Sync {
    async fn handle(
        &self,
        device: &Device,
        key: &str,
        topic: &str,
        payload: &[u8],
    ) -> GatewayResult<()>;
}

/// Default hook: acknowledge and log
#[derive(Debug, Default)]
pub struct LoggingHook;

#[async_trait]
impl CustomTopicHook for LoggingHook {
    async fn handle(
        &self,
        device: &Device,
        key: &str,
        topic: &str,
        payload: &[u8],
    ) -> GatewayResult<()> {
        info!(
            device_id = %device.unique_id,
            key,
            topic,
            bytes = payload.len(),
            "Custom topic message"
        );
        Ok(())
    }
}

/// Turns (topic, payload) pairs into store mutations
pub struct MessageProcessor {
    ctx: HandlerContext,
    dispatch: RwLock<DispatchTable>,
    custom_hook: Arc<dyn CustomTopicHook>,
}

impl MessageProcessor {
    pub fn new(ctx: HandlerContext) -> Self {
        Self {
            ctx,
            dispatch: RwLock::new(DispatchTable::standard()),
            custom_hook: Arc::new(LoggingHook),
        }
    }

    pub fn with_custom_hook(mut self, hook: Arc<dyn CustomTopicHook>) -> Self {
        self.custom_hook = hook;
        self
    }

    pub fn context(&self) -> &HandlerContext {
        &self.ctx
    }

    /// Handle one message and report the failure step instead of logging it
    pub async fn process(
        &self,
        broker_id: Option<&str>,
        topic: &str,
        payload: &[u8],
    ) -> Result<ProcessOutcome, ProcessingFailure> {
        let resolved = self.read_table().resolve(topic);
        let Some(dispatch) = resolved else {
            debug!(topic, "No route for topic");
            return Ok(ProcessOutcome::Ignored);
        };

        let Dispatch {
            handler,
            device_id,
            custom_key,
        } = dispatch;
        let device_id = device_id.as_deref();

        match handler {
            HandlerKind::Discovery => {
                let discovered =
                    handlers::discovery::handle(&self.ctx, device_id, broker_id, payload).await?;
                let device = &discovered.device;
                let new_topics = self.register_routes(&device.unique_id, &device.topic_overrides);
                Ok(ProcessOutcome::DeviceDiscovered {
                    device_id: discovered.device.unique_id,
                    created: discovered.created,
                    sensors: discovered.sensors,
                    attributed_to: discovered.attributed_to,
                    new_topics,
                })
            }
            HandlerKind::Data => {
                let telemetry = handlers::data::handle(&self.ctx, device_id, payload).await?;
                Ok(ProcessOutcome::TelemetryRecorded {
                    device_id: telemetry.device_id,
                    health: telemetry.health,
                    readings: telemetry.readings,
                })
            }
            HandlerKind::Status => {
                let (device_id, status) =
                    handlers::status::handle(&self.ctx, device_id, payload).await?;
                Ok(ProcessOutcome::StatusUpdated { device_id, status })
            }
            HandlerKind::Gps => {
                let fix = handlers::gps::handle(&self.ctx, device_id, payload).await?;
                Ok(ProcessOutcome::LocationUpdated {
                    device_id: fix.device_id,
                    geofence: fix.geofence,
                })
            }
            HandlerKind::GlobalDiscovery => {
                info!(topic, "Global discovery request observed");
                Ok(ProcessOutcome::GlobalDiscoveryObserved)
            }
            HandlerKind::Custom => {
                let device_id = handlers::identify(None, device_id)?;
                let device = handlers::lookup_device(&self.ctx, &device_id).await?;
                let key = custom_key.unwrap_or_default();
                self.custom_hook
                    .handle(&device, &key, topic, payload)
                    .await
                    .at_step(ProcessingStep::Dispatch)?;
                Ok(ProcessOutcome::CustomHandled { device_id, key })
            }
        }
    }

    /// Handle a received message; failures are logged and counted, never returned
    pub async fn handle_message(
        &self,
        broker_id: &str,
        message: &InboundMessage,
    ) -> Option<ProcessOutcome> {
        let started = Instant::now();
        metrics().message_received(broker_id);

        let span = message_span!(broker_id = %broker_id, topic = %message.topic);
        let result = self
            .process(Some(broker_id), &message.topic, &message.payload)
            .instrument(span)
            .await;

        match result {
            Ok(outcome) => {
                metrics().message_processed(started.elapsed());
                Some(outcome)
            }
            Err(failure) => {
                warn!(
                    broker_id,
                    topic = %message.topic,
                    step = %failure.step,
                    error = %failure.source,
                    payload = %sanitize_payload(&String::from_utf8_lossy(&message.payload)),
                    "Dropped message"
                );
                metrics().message_dropped(failure.source.drop_reason());
                None
            }
        }
    }

    /// Route every stored device's declared topics; returns topics needing a subscription
    pub async fn load_custom_routes(&self) -> GatewayResult<Vec<String>> {
        let devices = self.ctx.stores.devices.list().await?;
        let mut topics = Vec::new();
        for device in &devices {
            topics.extend(self.register_routes(&device.unique_id, &device.topic_overrides));
        }
        Ok(topics)
    }

    /// All device-declared topics currently routed
    pub fn custom_topics(&self) -> Vec<String> {
        self.read_table().custom_topics()
    }

    fn register_routes(&self, device_id: &str, overrides: &HashMap<String, String>) -> Vec<String> {
        let mut table = self.write_table();
        let mut keys: Vec<&String> = overrides.keys().collect();
        keys.sort();

        let mut new_topics = Vec::new();
        for key in keys {
            let topic = &overrides[key];
            match table.register_custom(device_id, key, topic) {
                Ok(true) => {
                    info!(device_id, key = %key, topic = %topic, "Routing device topic");
                    new_topics.push(topic.clone());
                }
                Ok(false) => {}
                Err(e) => {
                    warn!(device_id, key = %key, topic = %topic, error = %e, "Ignoring invalid device topic");
                }
            }
        }
        new_topics
    }

    fn read_table(&self) -> RwLockReadGuard<'_, DispatchTable> {
        self.dispatch
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_table(&self) -> RwLockWriteGuard<'_, DispatchTable> {
        self.dispatch
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
