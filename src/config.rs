//! Configuration for the edge session client
//!
//! A single immutable snapshot assembled before the agent runs. Validation
//! happens once at construction; a configuration that passes `validate` can
//! no longer fail for configuration reasons at runtime.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

fn default_port() -> u16 {
    1883
}

fn default_keepalive() -> u64 {
    60
}

fn default_reconnect_initial() -> u64 {
    100
}

fn default_reconnect_max() -> u64 {
    60_000
}

fn default_true() -> bool {
    true
}

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EdgeConfig {
    pub device: DeviceSection,
    pub mqtt: MqttSection,
    #[serde(default)]
    pub events: EventsSection,
}

/// Device identity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceSection {
    /// Device identifier, also used as the MQTT client id. An empty id gets
    /// a generated one at connect time.
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub description: String,
}

/// Broker endpoint and session parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MqttSection {
    /// Broker hostname or IP address.
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub transport: TransportKind,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Maximum idle interval before the client sends a liveness ping.
    #[serde(default = "default_keepalive")]
    pub keepalive_secs: u64,
    /// First reconnect delay; doubles on every failed attempt.
    #[serde(default = "default_reconnect_initial")]
    pub reconnect_initial_ms: u64,
    /// Upper bound for the reconnect delay.
    #[serde(default = "default_reconnect_max")]
    pub reconnect_max_ms: u64,
    pub tls: Option<TlsSection>,
    pub last_will: Option<LastWillSection>,
}

/// Wire transport selection.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Tcp,
    Ssl,
}

/// TLS parameters. Present and enabled requires a CA bundle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TlsSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Path to the CA bundle in PEM format.
    pub ca_certs: Option<String>,
    pub cert_file: Option<String>,
    pub key_file: Option<String>,
    /// Accepted for compatibility; peer verification stays enabled.
    #[serde(default)]
    pub insecure: bool,
}

/// Message the broker publishes on the client's behalf after an unclean
/// disconnect.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LastWillSection {
    pub topic: String,
    #[serde(default)]
    pub payload: String,
    #[serde(default)]
    pub qos: u8,
    #[serde(default)]
    pub retain: bool,
}

/// Intervals for the application's periodic events. An absent interval means
/// the event is never scheduled.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EventsSection {
    pub heartbeat_interval_ms: Option<u64>,
    pub recovery_interval_ms: Option<u64>,
}

/// Configuration errors. The only fatal error class in the crate.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("TLS is enabled but no CA bundle is configured")]
    TlsWithoutCa,
    #[error("broker address must not be empty")]
    EmptyBrokerAddress,
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl EdgeConfig {
    /// Load and validate configuration from a TOML file.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: EdgeConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the snapshot. Called once before any network or scheduler
    /// activity begins.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mqtt.host.trim().is_empty() {
            return Err(ConfigError::EmptyBrokerAddress);
        }

        if self.tls_enabled() {
            let has_ca = self
                .mqtt
                .tls
                .as_ref()
                .and_then(|tls| tls.ca_certs.as_deref())
                .is_some_and(|ca| !ca.is_empty());
            if !has_ca {
                return Err(ConfigError::TlsWithoutCa);
            }
        }

        if let Some(will) = &self.mqtt.last_will {
            if will.topic.is_empty() {
                return Err(ConfigError::InvalidConfig(
                    "last-will topic must not be empty".to_string(),
                ));
            }
            if will.qos > 2 {
                return Err(ConfigError::InvalidConfig(format!(
                    "last-will qos {} out of range 0..=2",
                    will.qos
                )));
            }
        }

        if self.mqtt.reconnect_initial_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "reconnect_initial_ms must be greater than 0".to_string(),
            ));
        }
        if self.mqtt.reconnect_max_ms < self.mqtt.reconnect_initial_ms {
            return Err(ConfigError::InvalidConfig(
                "reconnect_max_ms must not be below reconnect_initial_ms".to_string(),
            ));
        }

        Ok(())
    }

    /// Whether the session must use TLS, either via the dedicated section or
    /// the `ssl` transport kind.
    pub fn tls_enabled(&self) -> bool {
        self.mqtt.transport == TransportKind::Ssl
            || self.mqtt.tls.as_ref().is_some_and(|tls| tls.enabled)
    }

    /// Create a minimal valid configuration for unit testing.
    #[cfg(test)]
    pub fn test_config() -> Self {
        let toml_content = r#"
[device]
id = "test-device"

[mqtt]
host = "localhost"
"#;
        toml::from_str(toml_content).expect("test config should parse")
    }
}
