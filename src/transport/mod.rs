//! Broker transport seam
//!
//! The supervisor only sees [`BrokerConnection`] and [`Connector`]. The MQTT
//! implementation lives in [`mqtt`]; test doubles live in `crate::testing`.

use crate::model::{Broker, QosLevel};
use async_trait::async_trait;

pub mod mqtt;

pub use mqtt::{ConnectionState, MqttConnection, MqttConnector, TransportError};

/// A message received on a subscribed topic
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub retain: bool,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            retain: false,
        }
    }
}

/// One live connection to one broker
#[async_trait]
pub trait BrokerConnection: Send + Sync {
    fn broker_id(&self) -> &str;

    async fn subscribe(&mut self, topic: &str, qos: QosLevel) -> Result<(), TransportError>;

    /// Next buffered message without waiting.
    ///
    /// `Ok(None)` means nothing is pending. An error means the connection is gone and
    /// must be discarded.
    fn try_recv(&mut self) -> Result<Option<InboundMessage>, TransportError>;

    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QosLevel,
        retain: bool,
    ) -> Result<(), TransportError>;

    async fn disconnect(&mut self) -> Result<(), TransportError>;

    /// Topics subscribed so far, in subscription order
    fn subscriptions(&self) -> &[String];
}

/// Opens connections for broker descriptors
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, broker: &Broker) -> Result<Box<dyn BrokerConnection>, TransportError>;
}
