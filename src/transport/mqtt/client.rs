//! Impure I/O for one MQTT broker connection
//!
//! Each [`MqttConnection`] owns a spawned task that polls the rumqttc event loop and
//! forwards inbound publishes into an unbounded channel. The supervisor drains that
//! channel with [`BrokerConnection::try_recv`] so message handling stays on a single
//! task. The poll task never reconnects on its own: the first fault is reported through
//! the channel and the task ends, leaving the retry policy to the supervisor.

use super::connection::{configure_mqtt_options, connect_timeout, to_mqtt_qos, ConnectionState};
use super::message_handler::{EventRoute, MessageHandler};
use super::TransportError;
use crate::model::{Broker, QosLevel};
use crate::transport::{BrokerConnection, Connector, InboundMessage};
use async_trait::async_trait;
use rumqttc::v5::{AsyncClient, EventLoop};
use std::time::Duration;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Capacity of the rumqttc request channel
const REQUEST_CHANNEL_CAPACITY: usize = 64;

/// What the poll task hands to the supervisor
#[derive(Debug)]
enum PollSignal {
    Message(InboundMessage),
    Fault(String),
}

/// A live MQTT v5 connection to one broker
pub struct MqttConnection {
    broker_id: String,
    client: AsyncClient,
    inbound_rx: mpsc::UnboundedReceiver<PollSignal>,
    state_rx: watch::Receiver<ConnectionState>,
    shutdown_tx: watch::Sender<bool>,
    event_loop_handle: Option<JoinHandle<()>>,
    subscriptions: Vec<String>,
}

impl MqttConnection {
    /// Open the connection and wait for a successful ConnAck
    pub async fn connect(broker: &Broker) -> Result<Self, TransportError> {
        let mqtt_options = configure_mqtt_options(broker)?;
        let (client, event_loop) = AsyncClient::new(mqtt_options, REQUEST_CHANNEL_CAPACITY);

        let ((state_tx, state_rx), (shutdown_tx, shutdown_rx)) = Self::setup_connection_channels();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        let handle = tokio::spawn(Self::run_event_loop(
            broker.id.clone(),
            event_loop,
            state_tx,
            inbound_tx,
            shutdown_rx,
        ));

        let mut connection = MqttConnection {
            broker_id: broker.id.clone(),
            client,
            inbound_rx,
            state_rx: state_rx.clone(),
            shutdown_tx,
            event_loop_handle: Some(handle),
            subscriptions: Vec::new(),
        };

        let timeout = connect_timeout(broker);
        if let Err(e) = Self::wait_for_connection_confirmation(state_rx, timeout).await {
            let _ = connection.shutdown_tx.send(true);
            if let Some(handle) = connection.event_loop_handle.take() {
                handle.abort();
            }
            return Err(e);
        }

        info!(broker_id = %broker.id, address = %broker.address(), "MQTT connection established");
        Ok(connection)
    }

    /// Create connection state and shutdown channels
    #[allow(clippy::type_complexity)]
    fn setup_connection_channels() -> (
        (
            watch::Sender<ConnectionState>,
            watch::Receiver<ConnectionState>,
        ),
        (watch::Sender<bool>, watch::Receiver<bool>),
    ) {
        let state_channels = watch::channel(ConnectionState::Connecting);
        let shutdown_channels = watch::channel(false);
        (state_channels, shutdown_channels)
    }

    /// Wait for ConnAck with timeout
    async fn wait_for_connection_confirmation(
        mut state_rx: watch::Receiver<ConnectionState>,
        timeout: Duration,
    ) -> Result<(), TransportError> {
        let timeout_result = tokio::time::timeout(timeout, async {
            loop {
                match &*state_rx.borrow_and_update() {
                    ConnectionState::Subscribed | ConnectionState::Receiving => return Ok(()),
                    ConnectionState::Faulted(reason) | ConnectionState::GaveUp(reason) => {
                        return Err(TransportError::ConnectionFailedStr(reason.clone()));
                    }
                    ConnectionState::Stopped => {
                        return Err(TransportError::ConnectionFailedStr(
                            "Stopped before ConnAck".to_string(),
                        ));
                    }
                    ConnectionState::Connecting | ConnectionState::Reconnecting(_) => {}
                }
                if state_rx.changed().await.is_err() {
                    return Err(TransportError::ConnectionFailedStr(
                        "State channel closed".to_string(),
                    ));
                }
            }
        })
        .await;

        match timeout_result {
            Ok(result) => result,
            Err(_) => Err(TransportError::ConnectTimeout(timeout)),
        }
    }

    /// Poll rumqttc until shutdown or the first fault
    async fn run_event_loop(
        broker_id: String,
        mut event_loop: EventLoop,
        state_tx: watch::Sender<ConnectionState>,
        inbound_tx: mpsc::UnboundedSender<PollSignal>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        debug!(broker_id = %broker_id, "Starting MQTT event loop");

        loop {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!(broker_id = %broker_id, "Shutdown signal received, stopping event loop");
                        let _ = state_tx.send(ConnectionState::Stopped);
                        break;
                    }
                }

                event_result = event_loop.poll() => {
                    match event_result {
                        Ok(event) => {
                            let route = MessageHandler::route_mqtt_event(&event);
                            if !Self::process_event_route(&broker_id, route, &state_tx, &inbound_tx) {
                                break;
                            }
                        }
                        Err(e) => {
                            // A poll error after shutdown is the normal end of a disconnect
                            if *shutdown_rx.borrow() {
                                let _ = state_tx.send(ConnectionState::Stopped);
                                break;
                            }
                            let reason = e.to_string();
                            error!(broker_id = %broker_id, error = %reason, "MQTT event loop error");
                            let _ = state_tx.send(ConnectionState::Faulted(reason.clone()));
                            let _ = inbound_tx.send(PollSignal::Fault(reason));
                            break;
                        }
                    }
                }
            }
        }

        debug!(broker_id = %broker_id, "MQTT event loop stopped");
    }

    /// Act on a routed event. Returns false when the loop must end.
    fn process_event_route(
        broker_id: &str,
        route: EventRoute,
        state_tx: &watch::Sender<ConnectionState>,
        inbound_tx: &mpsc::UnboundedSender<PollSignal>,
    ) -> bool {
        match route {
            EventRoute::ConnectionAcknowledged => {
                let _ = state_tx.send(ConnectionState::Subscribed);
                true
            }
            EventRoute::MessageReceived(message) => {
                debug!(broker_id = %broker_id, topic = %message.topic, "Received MQTT message");
                inbound_tx.send(PollSignal::Message(message)).is_ok()
            }
            EventRoute::ConnectionRefused(reason) | EventRoute::Disconnected(reason) => {
                warn!(broker_id = %broker_id, reason = %reason, "Broker ended the connection");
                let _ = state_tx.send(ConnectionState::Faulted(reason.clone()));
                let _ = inbound_tx.send(PollSignal::Fault(reason));
                false
            }
            EventRoute::SubscriptionConfirmed { packet_id, filters } => {
                debug!(target: "mqtt_transport", broker_id = %broker_id, packet_id, filters, "Subscription confirmed");
                true
            }
            EventRoute::InfrastructureEvent(event_str) => {
                debug!(target: "mqtt_transport", "MQTT event: {}", event_str);
                true
            }
            EventRoute::OutgoingEvent => true,
        }
    }

    /// Current connection state
    pub fn connection_state(&self) -> ConnectionState {
        self.state_rx.borrow().clone()
    }

    fn check_connection_state(&self) -> Result<(), TransportError> {
        let state = self.connection_state();
        if !state.is_live() {
            return Err(TransportError::NotConnected { state });
        }
        Ok(())
    }
}

#[async_trait]
impl BrokerConnection for MqttConnection {
    fn broker_id(&self) -> &str {
        &self.broker_id
    }

    async fn subscribe(&mut self, topic: &str, qos: QosLevel) -> Result<(), TransportError> {
        self.check_connection_state()?;
        self.client
            .subscribe(topic, to_mqtt_qos(qos))
            .await
            .map_err(|e| TransportError::SubscriptionFailed(Box::new(e)))?;
        self.subscriptions.push(topic.to_string());
        debug!(broker_id = %self.broker_id, topic, "Subscribed");
        Ok(())
    }

    fn try_recv(&mut self) -> Result<Option<InboundMessage>, TransportError> {
        match self.inbound_rx.try_recv() {
            Ok(PollSignal::Message(message)) => Ok(Some(message)),
            Ok(PollSignal::Fault(reason)) => Err(TransportError::ConnectionLost(reason)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(TransportError::ConnectionLost(
                "event loop stopped".to_string(),
            )),
        }
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QosLevel,
        retain: bool,
    ) -> Result<(), TransportError> {
        self.check_connection_state()?;
        self.client
            .publish(topic, to_mqtt_qos(qos), retain, payload)
            .await
            .map_err(|e| TransportError::PublishFailed(Box::new(e)))?;
        debug!(broker_id = %self.broker_id, topic, "Published");
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        let Some(handle) = self.event_loop_handle.take() else {
            return Ok(());
        };

        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.client.disconnect().await {
            debug!(broker_id = %self.broker_id, error = %e, "Disconnect request not delivered");
        }

        match tokio::time::timeout(Duration::from_secs(2), handle).await {
            Ok(Ok(())) => {
                info!(broker_id = %self.broker_id, "Event loop task shut down gracefully");
            }
            Ok(Err(e)) if !e.is_cancelled() => {
                warn!(broker_id = %self.broker_id, "Event loop task ended with error: {}", e);
            }
            Err(_) => {
                warn!(broker_id = %self.broker_id, "Event loop task didn't shut down gracefully, forcing abort");
            }
            _ => {}
        }

        Ok(())
    }

    fn subscriptions(&self) -> &[String] {
        &self.subscriptions
    }
}

impl Drop for MqttConnection {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(handle) = self.event_loop_handle.take() {
            handle.abort();
        }
    }
}

/// Production connector
#[derive(Debug, Clone, Copy, Default)]
pub struct MqttConnector;

#[async_trait]
impl Connector for MqttConnector {
    async fn connect(&self, broker: &Broker) -> Result<Box<dyn BrokerConnection>, TransportError> {
        let connection = MqttConnection::connect(broker).await?;
        Ok(Box::new(connection))
    }
}
