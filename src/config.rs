//! Gateway configuration
//!
//! The TOML file seeds brokers and lands into the stores and tunes the service loop.
//! Broker credentials named by `username_env`/`password_env` are resolved at connect
//! time, not at load time.

use crate::model::{Broker, Land};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct GatewayConfig {
    #[serde(default)]
    pub service: ServiceSection,
    #[serde(default)]
    pub brokers: Vec<Broker>,
    #[serde(default)]
    pub lands: Vec<LandConfig>,
}

/// Service loop tuning
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceSection {
    /// User credited with devices created outside any discovery request
    #[serde(default = "default_user")]
    pub default_user: String,
    /// Sleep between receive passes
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Stop the run loop after this many seconds (None = run until signalled)
    pub run_timeout_secs: Option<u64>,
    /// Lifetime of a discovery correlation context
    #[serde(default = "default_discovery_ttl_secs")]
    pub discovery_ttl_secs: u64,
    /// Port for the HTTP health endpoint (None = disabled)
    pub health_port: Option<u16>,
}

impl Default for ServiceSection {
    fn default() -> Self {
        Self {
            default_user: default_user(),
            poll_interval_ms: default_poll_interval_ms(),
            run_timeout_secs: None,
            discovery_ttl_secs: default_discovery_ttl_secs(),
            health_port: None,
        }
    }
}

impl ServiceSection {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn run_timeout(&self) -> Option<Duration> {
        self.run_timeout_secs.map(Duration::from_secs)
    }

    pub fn discovery_ttl(&self) -> Duration {
        Duration::from_secs(self.discovery_ttl_secs)
    }
}

fn default_user() -> String {
    "system".to_string()
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_discovery_ttl_secs() -> u64 {
    300
}

/// A land as written in the config file.
///
/// `geometry` may be an inline table or a string holding GeoJSON text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LandConfig {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub geometry: Value,
    #[serde(default)]
    pub devices: Vec<String>,
}

impl LandConfig {
    pub fn to_land(&self) -> Result<Land, ConfigError> {
        let geometry = match &self.geometry {
            Value::String(text) => serde_json::from_str(text).map_err(|e| {
                ConfigError::InvalidConfig(format!(
                    "Land '{}' geometry is not valid JSON: {e}",
                    self.id
                ))
            })?,
            other => other.clone(),
        };

        Ok(Land {
            id: self.id.clone(),
            name: if self.name.is_empty() {
                self.id.clone()
            } else {
                self.name.clone()
            },
            geometry,
            devices: self.devices.clone(),
        })
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl GatewayConfig {
    /// Load configuration from TOML file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse, normalise and validate configuration text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let mut config: GatewayConfig = toml::from_str(content)?;
        config.normalize()?;
        config.validate()?;
        Ok(config)
    }

    /// Fold broker URLs into host/port/protocol and default empty names
    fn normalize(&mut self) -> Result<(), ConfigError> {
        for broker in &mut self.brokers {
            broker.resolve_url().map_err(ConfigError::InvalidConfig)?;
            if broker.name.is_empty() {
                broker.name = broker.id.clone();
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for broker in &self.brokers {
            if broker.id.trim().is_empty() {
                return Err(ConfigError::InvalidConfig(
                    "Broker id cannot be empty".to_string(),
                ));
            }
            if !seen.insert(broker.id.as_str()) {
                return Err(ConfigError::InvalidConfig(format!(
                    "Duplicate broker id '{}'",
                    broker.id
                )));
            }
            if broker.port == Some(0) {
                return Err(ConfigError::InvalidConfig(format!(
                    "Broker '{}' port must be non-zero",
                    broker.id
                )));
            }
        }

        let defaults = self.brokers.iter().filter(|b| b.is_default).count();
        if defaults > 1 {
            return Err(ConfigError::InvalidConfig(format!(
                "At most one default broker allowed, found {defaults}"
            )));
        }

        if self.service.poll_interval_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "poll_interval_ms must be greater than 0".to_string(),
            ));
        }

        for land in &self.lands {
            land.to_land()?;
        }

        Ok(())
    }

    /// Lands with geometry parsed
    pub fn lands(&self) -> Result<Vec<Land>, ConfigError> {
        self.lands.iter().map(LandConfig::to_land).collect()
    }

    /// Create a test configuration for unit testing
    #[cfg(test)]
    pub fn test_config() -> Self {
        let toml_content = r#"
[service]
default_user = "tester"

[[brokers]]
id = "primary"
host = "localhost"
port = 1883
is_default = true
"#;
        Self::from_toml_str(toml_content).expect("Test config should parse")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BrokerProtocol, BrokerStatus, QosLevel};

    #[test]
    fn test_full_config() {
        let toml_content = r#"
[service]
default_user = "ops"
poll_interval_ms = 50
run_timeout_secs = 60
health_port = 8080

[[brokers]]
id = "primary"
host = "mqtt.example.com"
port = 1883
username_env = "MQTT_USERNAME"
password_env = "MQTT_PASSWORD"
qos = 2
is_default = true
[brokers.reconnect]
max_attempts = 3
delay_ms = 100
[brokers.last_will]
topic = "sensorgate/status"
payload = "offline"

[[brokers]]
id = "backup"
url = "mqtts://backup.example.com"
status = "inactive"

[[lands]]
id = "north-field"
devices = ["D1"]
geometry = '{"type":"FeatureCollection","features":[]}'
"#;

        let config = GatewayConfig::from_toml_str(toml_content).unwrap();
        assert_eq!(config.service.default_user, "ops");
        assert_eq!(config.service.poll_interval(), Duration::from_millis(50));
        assert_eq!(config.service.run_timeout(), Some(Duration::from_secs(60)));
        assert_eq!(config.service.discovery_ttl(), Duration::from_secs(300));

        let primary = &config.brokers[0];
        assert_eq!(primary.qos, QosLevel::ExactlyOnce);
        assert_eq!(primary.reconnect.max_attempts, 3);
        assert!(primary.reconnect.enabled);
        assert_eq!(primary.keepalive_secs, 60);
        assert_eq!(primary.name, "primary");
        assert_eq!(
            primary.last_will.as_ref().map(|w| w.payload.as_str()),
            Some("offline")
        );

        let backup = &config.brokers[1];
        assert_eq!(backup.protocol, BrokerProtocol::Mqtts);
        assert_eq!(backup.effective_port(), 8883);
        assert_eq!(backup.status, BrokerStatus::Inactive);

        let lands = config.lands().unwrap();
        assert_eq!(lands[0].name, "north-field");
        assert!(lands[0].geometry.is_object());
    }

    #[test]
    fn test_defaults_without_service_section() {
        let config = GatewayConfig::from_toml_str("").unwrap();
        assert_eq!(config.service, ServiceSection::default());
        assert!(config.brokers.is_empty());
    }

    #[test]
    fn test_duplicate_broker_ids_rejected() {
        let toml_content = r#"
[[brokers]]
id = "a"
[[brokers]]
id = "a"
"#;
        let result = GatewayConfig::from_toml_str(toml_content);
        assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));
    }

    #[test]
    fn test_two_default_brokers_rejected() {
        let toml_content = r#"
[[brokers]]
id = "a"
is_default = true
[[brokers]]
id = "b"
is_default = true
"#;
        assert!(GatewayConfig::from_toml_str(toml_content).is_err());
    }

    #[test]
    fn test_invalid_qos_rejected() {
        let toml_content = r#"
[[brokers]]
id = "a"
qos = 3
"#;
        assert!(matches!(
            GatewayConfig::from_toml_str(toml_content),
            Err(ConfigError::TomlParse(_))
        ));
    }

    #[test]
    fn test_zero_port_rejected() {
        let toml_content = r#"
[[brokers]]
id = "a"
port = 0
"#;
        assert!(GatewayConfig::from_toml_str(toml_content).is_err());
    }

    #[test]
    fn test_bad_land_geometry_rejected() {
        let toml_content = r#"
[[lands]]
id = "field"
geometry = "{not json"
"#;
        assert!(matches!(
            GatewayConfig::from_toml_str(toml_content),
            Err(ConfigError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_inline_table_geometry() {
        let toml_content = r#"
[[lands]]
id = "field"
[lands.geometry]
type = "FeatureCollection"
features = []
"#;
        let config = GatewayConfig::from_toml_str(toml_content).unwrap();
        let lands = config.lands().unwrap();
        assert_eq!(lands[0].geometry["type"], "FeatureCollection");
    }

    #[test]
    fn test_test_config() {
        let config = GatewayConfig::test_config();
        assert_eq!(config.brokers.len(), 1);
        assert!(config.brokers[0].is_default);
    }
}
