//! Device-facing wire protocol: topics and JSON payloads

pub mod messages;
pub mod topics;

pub use messages::*;
pub use topics::*;
