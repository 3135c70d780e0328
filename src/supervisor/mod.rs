//! Broker connection supervision

pub mod reconnect;
pub mod registry;
#[allow(clippy::module_inception)]
pub mod supervisor;

pub use reconnect::{ConnectionEvent, ReconnectPlanner, ReconnectionDecision};
pub use registry::ConnectionRegistry;
pub use supervisor::{
    ConnectionSupervisor, Pacer, PassReport, RunOutcome, ShutdownHandle, DEFAULT_POLL_INTERVAL,
};
