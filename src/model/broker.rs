//! Broker connection descriptors
//!
//! A broker is admin-created (or seeded from the config file). The supervisor keeps a
//! connection open to every broker whose status is `active`.

use serde::{Deserialize, Serialize};
use url::Url;

/// Transport scheme of a broker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BrokerProtocol {
    #[default]
    Mqtt,
    Mqtts,
    Ws,
    Wss,
}

impl BrokerProtocol {
    pub fn default_port(&self) -> u16 {
        match self {
            BrokerProtocol::Mqtt => 1883,
            BrokerProtocol::Mqtts => 8883,
            BrokerProtocol::Ws => 8080,
            BrokerProtocol::Wss => 8443,
        }
    }

    pub fn is_secure(&self) -> bool {
        matches!(self, BrokerProtocol::Mqtts | BrokerProtocol::Wss)
    }

    fn from_scheme(scheme: &str) -> Option<Self> {
        match scheme {
            "mqtt" | "tcp" => Some(BrokerProtocol::Mqtt),
            "mqtts" | "ssl" => Some(BrokerProtocol::Mqtts),
            "ws" => Some(BrokerProtocol::Ws),
            "wss" => Some(BrokerProtocol::Wss),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BrokerStatus {
    #[default]
    Active,
    Inactive,
}

/// Transport delivery guarantee, kept independent of the MQTT client library
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(try_from = "u8", into = "u8")]
pub enum QosLevel {
    AtMostOnce,
    #[default]
    AtLeastOnce,
    ExactlyOnce,
}

impl TryFrom<u8> for QosLevel {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(QosLevel::AtMostOnce),
            1 => Ok(QosLevel::AtLeastOnce),
            2 => Ok(QosLevel::ExactlyOnce),
            other => Err(format!("QoS must be 0, 1 or 2, got {other}")),
        }
    }
}

impl From<QosLevel> for u8 {
    fn from(qos: QosLevel) -> Self {
        match qos {
            QosLevel::AtMostOnce => 0,
            QosLevel::AtLeastOnce => 1,
            QosLevel::ExactlyOnce => 2,
        }
    }
}

/// Auto-reconnect policy applied by the supervisor after a connection fault
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconnectPolicy {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Total reconnect attempts before the broker is left absent
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay between consecutive attempts; the first attempt is immediate
    #[serde(default = "default_reconnect_delay_ms")]
    pub delay_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: default_max_attempts(),
            delay_ms: default_reconnect_delay_ms(),
        }
    }
}

impl ReconnectPolicy {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }
}

/// Last-will message the broker publishes if this client vanishes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastWillConfig {
    pub topic: String,
    pub payload: String,
    #[serde(default)]
    pub qos: QosLevel,
    #[serde(default)]
    pub retain: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Broker {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Alternative to host/port/protocol, e.g. `mqtts://broker.example.com:8883`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub protocol: BrokerProtocol,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Environment variable containing the username
    pub username_env: Option<String>,
    /// Environment variable containing the password
    pub password_env: Option<String>,
    #[serde(default)]
    pub use_tls: bool,
    #[serde(default = "default_keepalive")]
    pub keepalive_secs: u64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_true")]
    pub clean_session: bool,
    #[serde(default)]
    pub qos: QosLevel,
    #[serde(default = "default_client_id_prefix")]
    pub client_id_prefix: String,
    #[serde(default)]
    pub reconnect: ReconnectPolicy,
    pub last_will: Option<LastWillConfig>,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    pub status: BrokerStatus,
}

fn default_true() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    5
}

fn default_reconnect_delay_ms() -> u64 {
    5000
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_keepalive() -> u64 {
    60
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_client_id_prefix() -> String {
    "sensorgate".to_string()
}

impl Broker {
    /// Minimal active broker on `host:port`
    pub fn new(id: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            url: None,
            host: host.into(),
            port: Some(port),
            protocol: BrokerProtocol::Mqtt,
            username: None,
            password: None,
            username_env: None,
            password_env: None,
            use_tls: false,
            keepalive_secs: default_keepalive(),
            connect_timeout_secs: default_connect_timeout(),
            clean_session: true,
            qos: QosLevel::AtLeastOnce,
            client_id_prefix: default_client_id_prefix(),
            reconnect: ReconnectPolicy::default(),
            last_will: None,
            is_default: false,
            status: BrokerStatus::Active,
        }
    }

    /// Fold the optional `url` field into host/port/protocol
    pub fn resolve_url(&mut self) -> Result<(), String> {
        let Some(raw) = self.url.clone() else {
            return Ok(());
        };
        let url = Url::parse(&raw).map_err(|e| format!("invalid broker url '{raw}': {e}"))?;
        let protocol = BrokerProtocol::from_scheme(url.scheme())
            .ok_or_else(|| format!("unsupported broker url scheme '{}'", url.scheme()))?;
        let host = url
            .host_str()
            .ok_or_else(|| format!("broker url '{raw}' has no host"))?;

        self.protocol = protocol;
        self.host = host.to_string();
        self.port = Some(url.port().unwrap_or(protocol.default_port()));
        if !url.username().is_empty() {
            self.username = Some(url.username().to_string());
        }
        if let Some(password) = url.password() {
            self.password = Some(password.to_string());
        }
        Ok(())
    }

    pub fn effective_port(&self) -> u16 {
        self.port.unwrap_or(self.protocol.default_port())
    }

    pub fn wants_tls(&self) -> bool {
        self.use_tls || self.protocol.is_secure()
    }

    pub fn is_active(&self) -> bool {
        self.status == BrokerStatus::Active
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.effective_port())
    }

    /// Inline credentials win over environment variables
    pub fn resolve_credentials(&self) -> Option<(String, String)> {
        let username = self
            .username
            .clone()
            .or_else(|| self.username_env.as_ref().and_then(|n| std::env::var(n).ok()))?;
        let password = self
            .password
            .clone()
            .or_else(|| self.password_env.as_ref().and_then(|n| std::env::var(n).ok()))
            .unwrap_or_default();
        Some((username, password))
    }
}
