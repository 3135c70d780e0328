//! Pure connection state and option building for MQTT brokers
//!
//! Nothing here touches the network; the functions turn a [`Broker`] descriptor into
//! rumqttc options and classify connection lifecycle states.

use crate::model::{Broker, BrokerProtocol, QosLevel};
use rumqttc::v5::mqttbytes::v5::LastWill;
use rumqttc::v5::{mqttbytes::QoS, MqttOptions};
use rumqttc::Transport as RumqttcTransport;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Lifecycle of one broker connection as tracked by the supervisor
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    /// Opening the connection and waiting for ConnAck
    Connecting,
    /// Connected and subscriptions issued
    Subscribed,
    /// At least one message received since the last (re)connect
    Receiving,
    /// Connection lost with reason
    Faulted(String),
    /// Reconnect attempt in progress (1-based)
    Reconnecting(u32),
    /// Reconnect attempts exhausted; absent until restarted
    GaveUp(String),
    /// Closed by `stop()`
    Stopped,
}

impl ConnectionState {
    /// Whether the broker currently has a usable connection
    pub fn is_live(&self) -> bool {
        matches!(self, ConnectionState::Subscribed | ConnectionState::Receiving)
    }

    pub fn label(&self) -> &'static str {
        match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Subscribed => "subscribed",
            ConnectionState::Receiving => "receiving",
            ConnectionState::Faulted(_) => "faulted",
            ConnectionState::Reconnecting(_) => "reconnecting",
            ConnectionState::GaveUp(_) => "gave_up",
            ConnectionState::Stopped => "stopped",
        }
    }
}

/// Transport errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connection failed")]
    ConnectionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Connection failed: {0}")]
    ConnectionFailedStr(String),
    #[error("Publishing failed")]
    PublishFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Subscription failed")]
    SubscriptionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Connection lost: {0}")]
    ConnectionLost(String),
    #[error("No ConnAck within {0:?}")]
    ConnectTimeout(Duration),
    #[error("Not connected - current state: {state:?}")]
    NotConnected { state: ConnectionState },
    #[error("Unsupported broker protocol: {0:?}")]
    UnsupportedProtocol(BrokerProtocol),
}

impl TransportError {
    pub fn connection_failed<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::ConnectionFailed(Box::new(error))
    }
}

/// Map the library-independent QoS onto rumqttc's
pub fn to_mqtt_qos(qos: QosLevel) -> QoS {
    match qos {
        QosLevel::AtMostOnce => QoS::AtMostOnce,
        QosLevel::AtLeastOnce => QoS::AtLeastOnce,
        QosLevel::ExactlyOnce => QoS::ExactlyOnce,
    }
}

/// Unique client id per connection attempt so reconnects never collide at the broker
pub fn build_client_id(broker: &Broker) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}-{}-{}", broker.client_id_prefix, broker.id, &suffix[..8])
}

/// Pure function to configure MQTT options from a broker descriptor
pub fn configure_mqtt_options(broker: &Broker) -> Result<MqttOptions, TransportError> {
    if matches!(broker.protocol, BrokerProtocol::Ws | BrokerProtocol::Wss) {
        return Err(TransportError::UnsupportedProtocol(broker.protocol));
    }

    let mut mqtt_options =
        MqttOptions::new(build_client_id(broker), &broker.host, broker.effective_port());

    if broker.wants_tls() {
        mqtt_options.set_transport(RumqttcTransport::tls_with_default_config());
    }

    if let Some((username, password)) = broker.resolve_credentials() {
        mqtt_options.set_credentials(username, password);
    }

    mqtt_options.set_keep_alive(Duration::from_secs(broker.keepalive_secs.max(5)));
    mqtt_options.set_clean_start(broker.clean_session);
    mqtt_options.set_max_packet_size(Some(256 * 1024));

    if let Some(will) = &broker.last_will {
        // MQTT v5 LastWill takes 5 parameters: topic, payload, qos, retain, properties
        let lwt = LastWill::new(
            will.topic.clone(),
            will.payload.clone(),
            to_mqtt_qos(will.qos),
            will.retain,
            None,
        );
        mqtt_options.set_last_will(lwt);
    }

    Ok(mqtt_options)
}

/// Connect timeout from the descriptor, never zero
pub fn connect_timeout(broker: &Broker) -> Duration {
    Duration::from_secs(broker.connect_timeout_secs.max(1))
}
