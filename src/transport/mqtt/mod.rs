//! MQTT v5 implementation of the broker transport
//!
//! The module keeps the pure/impure split:
//!
//! - [`connection`] - connection states, errors and rumqttc option building
//! - [`message_handler`] - routing of rumqttc events
//! - [`client`] - the connection object and its poll task
//!
//! # Usage
//!
//! ```rust,no_run
//! use sensorgate::model::{Broker, QosLevel};
//! use sensorgate::transport::{BrokerConnection, MqttConnection};
//!
//! # tokio_test::block_on(async {
//! let broker = Broker::new("primary", "localhost", 1883);
//! let mut connection = MqttConnection::connect(&broker).await?;
//! connection.subscribe("devices/+/data", QosLevel::AtLeastOnce).await?;
//! while let Some(message) = connection.try_recv()? {
//!     println!("{}", message.topic);
//! }
//! connection.disconnect().await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod client;
pub mod connection;
pub mod message_handler;

pub use client::{MqttConnection, MqttConnector};
pub use connection::{configure_mqtt_options, ConnectionState, TransportError};
pub use message_handler::{EventRoute, MessageHandler};
