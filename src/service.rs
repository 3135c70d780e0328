//! The gateway service: stores, processor, supervisor and discovery wired together
//!
//! [`GatewayService`] is the surface the CLI and embedding applications use. The
//! supervisor sits behind an async mutex that the run loop takes once per pass, so
//! commands and discovery requests can interleave with message handling.

use crate::clock::{Clock, SystemClock, Ticker, TokioTicker};
use crate::config::GatewayConfig;
use crate::discovery::{
    CorrelationRegistry, DiscoveryInitiator, DiscoveryTally, StaticUser, UserResolver,
};
use crate::error::{GatewayError, GatewayResult};
use crate::geofence::GeofenceEvaluator;
use crate::lifecycle_span;
use crate::model::{Device, QosLevel};
use crate::observability::metrics;
use crate::processing::{CustomTopicHook, HandlerContext, MessageProcessor};
use crate::protocol::messages::{CommandEnvelope, DiscoveryRequest};
use crate::protocol::topics::{validate_device_id, TopicBuilder};
use crate::store::Stores;
use crate::supervisor::{ConnectionSupervisor, RunOutcome, ShutdownHandle};
use crate::transport::{ConnectionState, Connector};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, Instrument};

/// Collects the collaborators of a [`GatewayService`]; production defaults for
/// everything but the stores and the connector
pub struct GatewayServiceBuilder {
    config: GatewayConfig,
    stores: Stores,
    connector: Arc<dyn Connector>,
    clock: Arc<dyn Clock>,
    ticker: Arc<dyn Ticker>,
    users: Option<Arc<dyn UserResolver>>,
    hook: Option<Arc<dyn CustomTopicHook>>,
}

impl GatewayServiceBuilder {
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_ticker(mut self, ticker: Arc<dyn Ticker>) -> Self {
        self.ticker = ticker;
        self
    }

    pub fn with_user_resolver(mut self, users: Arc<dyn UserResolver>) -> Self {
        self.users = Some(users);
        self
    }

    pub fn with_custom_hook(mut self, hook: Arc<dyn CustomTopicHook>) -> Self {
        self.hook = Some(hook);
        self
    }

    pub fn build(self) -> GatewayService {
        let service = &self.config.service;
        let correlation = Arc::new(CorrelationRegistry::new(service.discovery_ttl()));
        let users = self
            .users
            .unwrap_or_else(|| Arc::new(StaticUser::new(service.default_user.clone())));

        let ctx = HandlerContext {
            stores: self.stores.clone(),
            clock: self.clock.clone(),
            correlation: correlation.clone(),
            default_user: service.default_user.clone(),
        };
        let mut processor = MessageProcessor::new(ctx);
        if let Some(hook) = self.hook {
            processor = processor.with_custom_hook(hook);
        }

        let supervisor = ConnectionSupervisor::new(self.connector, self.ticker)
            .with_poll_interval(service.poll_interval());
        let shutdown = supervisor.shutdown_handle();

        GatewayService {
            initiator: DiscoveryInitiator::new(correlation, self.clock.clone()),
            processor: Arc::new(processor),
            supervisor: Mutex::new(supervisor),
            shutdown,
            users,
            clock: self.clock,
            stores: self.stores,
            config: self.config,
        }
    }
}

pub struct GatewayService {
    config: GatewayConfig,
    stores: Stores,
    processor: Arc<MessageProcessor>,
    supervisor: Mutex<ConnectionSupervisor>,
    initiator: DiscoveryInitiator,
    users: Arc<dyn UserResolver>,
    clock: Arc<dyn Clock>,
    shutdown: ShutdownHandle,
}

impl GatewayService {
    pub fn builder(
        config: GatewayConfig,
        stores: Stores,
        connector: Arc<dyn Connector>,
    ) -> GatewayServiceBuilder {
        GatewayServiceBuilder {
            config,
            stores,
            connector,
            clock: Arc::new(SystemClock),
            ticker: Arc::new(TokioTicker),
            users: None,
            hook: None,
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    pub fn processor(&self) -> &Arc<MessageProcessor> {
        &self.processor
    }

    /// Write the configured brokers and lands into the stores
    pub async fn seed_from_config(&self) -> GatewayResult<()> {
        for broker in &self.config.brokers {
            self.stores.brokers.upsert(broker.clone()).await?;
        }
        for land in self.config.lands()? {
            self.stores.lands.upsert(land).await?;
        }
        info!(
            brokers = self.config.brokers.len(),
            lands = self.config.lands.len(),
            "Stores seeded from configuration"
        );
        Ok(())
    }

    /// Connect every active broker in the store, subscribed to the device topics and
    /// every custom topic already declared by a known device
    pub async fn start(&self) -> GatewayResult<usize> {
        metrics().set_service_state("starting");
        let brokers = self.stores.brokers.list_active().await?;
        if brokers.is_empty() {
            return Err(GatewayError::configuration("no active brokers in the store"));
        }
        let custom_topics = self.processor.load_custom_routes().await?;

        let live = self
            .supervisor
            .lock()
            .await
            .start(brokers, &custom_topics)
            .instrument(lifecycle_span!(phase = "start"))
            .await?;

        metrics().set_service_state("running");
        metrics().update_health_status(true);
        info!(live, custom_topics = custom_topics.len(), "Gateway started");
        Ok(live)
    }

    /// Receive passes until `timeout`, shutdown, or every connection is lost.
    /// Connections are closed before returning.
    pub async fn run(&self, timeout: Option<Duration>) -> RunOutcome {
        let mut pacer = self.supervisor.lock().await.pacer();
        let deadline = timeout.map(|t| pacer.now() + t);

        let outcome = async {
            loop {
                let step = self
                    .supervisor
                    .lock()
                    .await
                    .pass(&self.processor, deadline)
                    .await;
                if let Some(outcome) = step {
                    break outcome;
                }
                if !pacer.tick().await {
                    break RunOutcome::Stopped;
                }
            }
        }
        .instrument(lifecycle_span!(phase = "run"))
        .await;

        info!(?outcome, "Gateway run loop finished");
        self.stop().await;
        outcome
    }

    /// Orderly shutdown. Idempotent.
    pub async fn stop(&self) {
        self.shutdown.trigger();
        self.supervisor.lock().await.stop().await;
        metrics().set_service_state("stopped");
        metrics().update_health_status(false);
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Publish a command envelope to `devices/{id}/command`
    pub async fn publish_command(
        &self,
        device_id: &str,
        command: &str,
        payload: Value,
    ) -> GatewayResult<CommandEnvelope> {
        validate_device_id(device_id).map_err(|e| GatewayError::invalid_message(e.to_string()))?;
        let envelope = CommandEnvelope::new(command, payload, self.clock.now());
        let bytes = serde_json::to_vec(&envelope)?;

        self.supervisor
            .lock()
            .await
            .publish(
                &TopicBuilder::command(device_id),
                bytes,
                QosLevel::AtLeastOnce,
            )
            .await?;

        info!(device_id, command, command_id = %envelope.command_id, "Command published");
        Ok(envelope)
    }

    pub async fn issue_global_discovery(&self) -> GatewayResult<DiscoveryRequest> {
        let user = self.users.current_user();
        let supervisor = self.supervisor.lock().await;
        self.initiator.issue_global(&supervisor, &user).await
    }

    pub async fn issue_targeted_discovery(&self, device_id: &str) -> GatewayResult<DiscoveryRequest> {
        let user = self.users.current_user();
        let supervisor = self.supervisor.lock().await;
        self.initiator
            .issue_targeted(&supervisor, device_id, &user)
            .await
    }

    /// Issue a discovery request and drain responses for up to `timeout`.
    /// A targeted wait ends early once the target has answered.
    pub async fn discover_and_wait(
        &self,
        target: Option<&str>,
        timeout: Duration,
    ) -> GatewayResult<DiscoveryTally> {
        let user = self.users.current_user();
        let mut supervisor = self.supervisor.lock().await;

        match target {
            Some(device_id) => {
                self.initiator
                    .issue_targeted(&supervisor, device_id, &user)
                    .await?;
                Ok(DiscoveryInitiator::await_until(
                    &mut supervisor,
                    &self.processor,
                    timeout,
                    |tally| tally.saw(device_id),
                )
                .await)
            }
            None => {
                self.initiator.issue_global(&supervisor, &user).await?;
                Ok(
                    DiscoveryInitiator::await_responses(&mut supervisor, &self.processor, timeout)
                        .await,
                )
            }
        }
    }

    /// Stored health percentage of a known device
    pub async fn current_device_health(&self, device_id: &str) -> GatewayResult<u8> {
        self.device(device_id)
            .await
            .map(|device| device.health_percentage)
    }

    pub fn is_point_inside_geofence(&self, latitude: f64, longitude: f64, polygon: &Value) -> bool {
        GeofenceEvaluator::is_point_inside(latitude, longitude, polygon)
    }

    /// Put a device into maintenance or take it out again
    pub async fn set_maintenance(&self, device_id: &str, on: bool) -> GatewayResult<Device> {
        let mut device = self.device(device_id).await?;
        device.set_maintenance(on, self.clock.now());
        self.stores.devices.save(&device).await?;
        info!(device_id, maintenance = on, "Maintenance mode changed");
        Ok(device)
    }

    pub async fn restart_broker(&self, broker_id: &str) -> GatewayResult<()> {
        self.supervisor.lock().await.restart_broker(broker_id).await
    }

    pub async fn broker_states(&self) -> BTreeMap<String, ConnectionState> {
        self.supervisor.lock().await.broker_states()
    }

    async fn device(&self, device_id: &str) -> GatewayResult<Device> {
        self.stores
            .devices
            .find_by_unique_id(device_id)
            .await?
            .ok_or_else(|| GatewayError::unknown_device(device_id))
    }
}
