//! Error taxonomy for the gateway
//!
//! Message-level faults (`InvalidMessage`, `UnknownDevice`, store failures while
//! handling a message) are logged and dropped by the processor. Connection faults are
//! handled by the supervisor. Only configuration and discovery-issuance errors reach
//! callers.

use crate::config::ConfigError;
use crate::store::StoreError;
use crate::transport::TransportError;
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

/// Main error type for gateway operations
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Connection fault on broker {broker_id}: {reason}")]
    ConnectionFault { broker_id: String, reason: String },

    #[error("Invalid message: {reason}")]
    InvalidMessage { reason: String },

    #[error("Unknown device: {device_id}")]
    UnknownDevice { device_id: String },

    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl GatewayError {
    /// Create connection fault error
    pub fn connection_fault<B: Into<String>, R: Into<String>>(broker_id: B, reason: R) -> Self {
        Self::ConnectionFault {
            broker_id: broker_id.into(),
            reason: reason.into(),
        }
    }

    /// Create invalid message error
    pub fn invalid_message<S: Into<String>>(reason: S) -> Self {
        Self::InvalidMessage {
            reason: reason.into(),
        }
    }

    /// Create unknown device error
    pub fn unknown_device<S: Into<String>>(device_id: S) -> Self {
        Self::UnknownDevice {
            device_id: device_id.into(),
        }
    }

    /// Create configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::ConfigurationError {
            message: message.into(),
        }
    }

    /// Metrics bucket for a dropped message
    pub fn drop_reason(&self) -> DropReason {
        match self {
            GatewayError::InvalidMessage { .. } | GatewayError::Serialization(_) => {
                DropReason::Invalid
            }
            GatewayError::UnknownDevice { .. } => DropReason::UnknownDevice,
            GatewayError::Store(_) => DropReason::StoreFailure,
            _ => DropReason::Other,
        }
    }
}

/// Why a message was dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    Invalid,
    UnknownDevice,
    StoreFailure,
    Other,
}

/// How far message processing got before failing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingStep {
    Dispatch,
    Decode,
    Identify,
    Lookup,
    UpsertDevice,
    UpsertSensors,
    UpdateDevice,
    RecordReading,
}

impl ProcessingStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStep::Dispatch => "dispatch",
            ProcessingStep::Decode => "decode",
            ProcessingStep::Identify => "identify",
            ProcessingStep::Lookup => "lookup",
            ProcessingStep::UpsertDevice => "upsert-device",
            ProcessingStep::UpsertSensors => "upsert-sensors",
            ProcessingStep::UpdateDevice => "update-device",
            ProcessingStep::RecordReading => "record-reading",
        }
    }
}

impl std::fmt::Display for ProcessingStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A gateway error annotated with the processing step it occurred in
#[derive(Debug, Error)]
#[error("{source} (at step {step})")]
pub struct ProcessingFailure {
    pub step: ProcessingStep,
    #[source]
    pub source: GatewayError,
}

impl ProcessingFailure {
    pub fn new(step: ProcessingStep, source: impl Into<GatewayError>) -> Self {
        Self {
            step,
            source: source.into(),
        }
    }
}

/// Attach a [`ProcessingStep`] to any error convertible into [`GatewayError`]
pub trait AtStep<T> {
    fn at_step(self, step: ProcessingStep) -> Result<T, ProcessingFailure>;
}

impl<T, E: Into<GatewayError>> AtStep<T> for Result<T, E> {
    fn at_step(self, step: ProcessingStep) -> Result<T, ProcessingFailure> {
        self.map_err(|e| ProcessingFailure::new(step, e))
    }
}

/// Longest sanitized payload, suffix included
pub const MAX_LOGGED_PAYLOAD: usize = 200;

static SECRET_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)("?(?:password|passwd|token|api_key|secret|key)"?\s*[=:]\s*)("[^"]*"|[^\s,}]+)"#)
        .expect("secret pattern is a valid regex")
});

/// Redact credentials and truncate a payload before it is logged
pub fn sanitize_payload(payload: &str) -> String {
    let mut sanitized = SECRET_PATTERN.replace_all(payload, "${1}***").to_string();

    if sanitized.chars().count() > MAX_LOGGED_PAYLOAD {
        let truncate_suffix = "...[truncated]";
        let keep = MAX_LOGGED_PAYLOAD - truncate_suffix.len();
        sanitized = sanitized.chars().take(keep).collect::<String>() + truncate_suffix;
    }

    sanitized
}

/// Result type for gateway operations
pub type GatewayResult<T> = Result<T, GatewayError>;
