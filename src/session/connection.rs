//! Connection state and transport option assembly
//!
//! Pure pieces of the connection lifecycle: the observable state machine,
//! the bounded-exponential reconnect policy, and the translation of the
//! validated configuration into rumqttc options (credentials, TLS, last
//! will, keepalive).

use std::time::Duration;

use rumqttc::v5::mqttbytes::v5::LastWill;
use rumqttc::v5::mqttbytes::QoS;
use rumqttc::v5::MqttOptions;
use rumqttc::{TlsConfiguration, Transport as WireTransport};
use tracing::warn;

use crate::config::{ConfigError, EdgeConfig, MqttSection};

/// Observable connection state. Transitions happen only through
/// session-internal events; user code reads, never writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// No broker session, with the reason for the last teardown.
    Disconnected(String),
    /// Connection initiated, ConnAck pending.
    Connecting,
    /// Broker accepted the session.
    Connected,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

/// Bounded exponential reconnect policy: the delay doubles from the initial
/// value on every failed attempt and saturates at the maximum.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl ReconnectConfig {
    pub fn from_mqtt(mqtt: &MqttSection) -> Self {
        Self {
            initial_delay: Duration::from_millis(mqtt.reconnect_initial_ms),
            max_delay: Duration::from_millis(mqtt.reconnect_max_ms),
        }
    }

    /// Delay before the given attempt (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let initial_ms = self.initial_delay.as_millis() as u64;
        let max_ms = self.max_delay.as_millis() as u64;
        let exponent = attempt.saturating_sub(1).min(31);
        let delay_ms = initial_ms.saturating_mul(1u64 << exponent);
        Duration::from_millis(delay_ms.min(max_ms))
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(60),
        }
    }
}

/// Map a numeric QoS level onto the wire type.
pub fn qos_from_level(level: u8) -> Option<QoS> {
    match level {
        0 => Some(QoS::AtMostOnce),
        1 => Some(QoS::AtLeastOnce),
        2 => Some(QoS::ExactlyOnce),
        _ => None,
    }
}

/// Client id from configuration, generated when the device id is empty so
/// concurrent anonymous clients don't collide at the broker.
pub fn effective_client_id(config: &EdgeConfig) -> String {
    let id = config.device.id.trim();
    if !id.is_empty() {
        return id.to_string();
    }
    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    format!("edge-{timestamp}")
}

/// Assemble rumqttc options from the validated configuration.
///
/// Reads TLS material from disk, so this is the last point where a
/// configuration problem can surface; everything after is transport codes.
pub fn configure_mqtt_options(config: &EdgeConfig) -> Result<MqttOptions, ConfigError> {
    let client_id = effective_client_id(config);
    let mut options = MqttOptions::new(client_id, &config.mqtt.host, config.mqtt.port);

    options.set_keep_alive(Duration::from_secs(config.mqtt.keepalive_secs));

    // Large enough for bulky sensor payloads; the broker default is tiny.
    options.set_max_packet_size(Some(256 * 1024));

    if let Some(username) = &config.mqtt.username {
        let password = config.mqtt.password.clone().unwrap_or_default();
        options.set_credentials(username, password);
    }

    if config.tls_enabled() {
        // validate() guarantees the CA bundle is configured here.
        let tls = config
            .mqtt
            .tls
            .as_ref()
            .ok_or(ConfigError::TlsWithoutCa)?;
        let ca_path = tls.ca_certs.as_deref().ok_or(ConfigError::TlsWithoutCa)?;
        let ca = std::fs::read(ca_path)?;

        let client_auth = match (&tls.cert_file, &tls.key_file) {
            (Some(cert), Some(key)) => Some((std::fs::read(cert)?, std::fs::read(key)?)),
            (None, None) => None,
            _ => {
                return Err(ConfigError::InvalidConfig(
                    "client cert and key must be configured together".to_string(),
                ))
            }
        };

        if tls.insecure {
            warn!("tls.insecure is set but peer verification remains enabled");
        }

        options.set_transport(WireTransport::Tls(TlsConfiguration::Simple {
            ca,
            alpn: None,
            client_auth,
        }));
    }

    if let Some(will) = &config.mqtt.last_will {
        let qos = qos_from_level(will.qos).ok_or_else(|| {
            ConfigError::InvalidConfig(format!("last-will qos {} out of range 0..=2", will.qos))
        })?;
        options.set_last_will(LastWill::new(
            will.topic.clone(),
            will.payload.clone(),
            qos,
            will.retain,
            None,
        ));
    }

    Ok(options)
}
