//! sensorgate - MQTT device telemetry gateway
//!
//! Connects to one or more MQTT brokers, reconciles the devices and sensors that
//! announce themselves over discovery, records their telemetry and classifies GPS
//! fixes against land geofences.
//!
//! # Overview
//!
//! - [`supervisor::ConnectionSupervisor`] keeps one connection per active broker and
//!   reconnects faulted ones under a bounded policy
//! - [`processing::MessageProcessor`] dispatches `(topic, payload)` pairs to the
//!   discovery, data, status and gps handlers
//! - [`discovery::DiscoveryInitiator`] publishes discovery requests and attributes the
//!   devices that answer
//! - [`geofence::GeofenceEvaluator`] answers point-in-polygon questions
//! - [`service::GatewayService`] wires everything together
//!
//! # Quick Start
//!
//! ```rust
//! use sensorgate::geofence::{polygon_feature_collection, GeofenceEvaluator};
//!
//! let field = polygon_feature_collection(&[
//!     (-107.744122, 39.495387),
//!     (-107.653999, 39.495387),
//!     (-107.653999, 39.529577),
//!     (-107.744122, 39.529577),
//! ]);
//!
//! assert!(GeofenceEvaluator::is_point_inside(39.512345, -107.699060, &field));
//! assert!(!GeofenceEvaluator::is_point_inside(37.7749, -122.4194, &field));
//! ```

pub mod clock;
pub mod config;
pub mod discovery;
pub mod error;
pub mod geofence;
pub mod model;
pub mod observability;
pub mod processing;
pub mod protocol;
pub mod service;
pub mod store;
pub mod supervisor;
pub mod testing;
pub mod transport;

pub use config::{ConfigError, GatewayConfig};
pub use error::{GatewayError, GatewayResult};
pub use geofence::GeofenceEvaluator;
pub use processing::{MessageProcessor, ProcessOutcome};
pub use service::{GatewayService, GatewayServiceBuilder};
pub use supervisor::{ConnectionSupervisor, RunOutcome, ShutdownHandle};
pub use transport::mqtt::MqttConnector;
