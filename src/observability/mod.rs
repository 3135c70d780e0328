//! Structured logging, gateway metrics and the HTTP health endpoint

pub mod health;
pub mod logging;
pub mod metrics;

pub use health::{HealthCheck, HealthServer};
pub use logging::{init_default_logging, init_logging, LogFormat};
pub use metrics::{metrics, MetricsCollector, MetricsSnapshot};

pub use crate::{lifecycle_span, message_span, mqtt_span};
