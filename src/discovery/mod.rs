//! Discovery requests and attribution of the devices that answer them

pub mod correlation;
pub mod initiator;

pub use correlation::{CorrelationContext, CorrelationRegistry, DEFAULT_CORRELATION_TTL};
pub use initiator::{DiscoveryInitiator, DiscoveryTally, StaticUser, UserResolver};
