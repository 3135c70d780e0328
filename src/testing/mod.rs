//! Testing utilities and mock implementations
//!
//! This module provides mock brokers, clocks and hooks for exercising the gateway
//! without a real MQTT broker.

pub mod mocks;

pub use crate::discovery::StaticUser;
pub use mocks::*;
