//! Inbound message processing
//!
//! A [`MessageProcessor`] resolves each topic through the [`DispatchTable`] and hands
//! the payload to the matching handler. Handlers are independent of the broker the
//! message arrived on.

pub mod dispatch;
pub mod handlers;
pub mod health_score;
pub mod processor;
pub mod sensor_types;

pub use dispatch::{Dispatch, DispatchTable, HandlerKind};
pub use handlers::HandlerContext;
pub use health_score::compute_health;
pub use processor::{CustomTopicHook, LoggingHook, MessageProcessor, ProcessOutcome};
pub use sensor_types::canonical_sensor_type;
