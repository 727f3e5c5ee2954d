//! Error taxonomy for the edge session client
//!
//! Three classes with distinct propagation rules: configuration errors are
//! fatal and can only occur before any network activity, transport errors
//! carry a broker-style numeric code and are reported rather than raised,
//! handler errors are caught and logged at the boundary that invoked the
//! callback.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use thiserror::Error;

use crate::config::ConfigError;

/// Broker-style numeric result codes for transport operations.
///
/// The values track the conventional MQTT client error numbering so they can
/// be logged and compared against broker-side diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TransportCode {
    Protocol = 2,
    Invalid = 3,
    NoConnection = 4,
    ConnectionRefused = 5,
    ConnectionLost = 7,
    Tls = 8,
    PayloadTooLarge = 9,
    AuthRejected = 11,
    Unknown = 13,
    QueueFull = 15,
}

impl TransportCode {
    /// Numeric value as reported in logs and status payloads.
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for TransportCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransportCode::Protocol => "protocol",
            TransportCode::Invalid => "invalid",
            TransportCode::NoConnection => "no-connection",
            TransportCode::ConnectionRefused => "connection-refused",
            TransportCode::ConnectionLost => "connection-lost",
            TransportCode::Tls => "tls",
            TransportCode::PayloadTooLarge => "payload-too-large",
            TransportCode::AuthRejected => "auth-rejected",
            TransportCode::Unknown => "unknown",
            TransportCode::QueueFull => "queue-full",
        };
        write!(f, "{} ({})", name, self.as_u8())
    }
}

/// Non-fatal transport failure carrying a broker-style code.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("transport error {code}: {detail}")]
pub struct TransportError {
    pub code: TransportCode,
    pub detail: String,
}

impl TransportError {
    pub fn new(code: TransportCode, detail: impl Into<String>) -> Self {
        Self {
            code,
            detail: detail.into(),
        }
    }

    /// The session is not connected and the operation was not applied.
    pub fn no_connection(detail: impl Into<String>) -> Self {
        Self::new(TransportCode::NoConnection, detail)
    }

    pub fn refused(detail: impl Into<String>) -> Self {
        Self::new(TransportCode::ConnectionRefused, detail)
    }

    pub fn auth_rejected(detail: impl Into<String>) -> Self {
        Self::new(TransportCode::AuthRejected, detail)
    }

    pub fn invalid(detail: impl Into<String>) -> Self {
        Self::new(TransportCode::Invalid, detail)
    }
}

/// Failure reported by a registered callback.
///
/// Caught at the dispatch or scheduler boundary, logged, never propagated.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    pub fn msg(detail: impl Into<String>) -> Self {
        Self(detail.into())
    }
}

impl From<&str> for HandlerError {
    fn from(detail: &str) -> Self {
        Self(detail.to_string())
    }
}

impl From<String> for HandlerError {
    fn from(detail: String) -> Self {
        Self(detail)
    }
}

/// Boxed future returned by message handlers and periodic task callbacks.
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<(), HandlerError>> + Send>>;

/// Top-level error type for edge session operations.
#[derive(Debug, Error)]
pub enum EdgeError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Result type for edge session operations.
pub type EdgeResult<T> = Result<T, EdgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_code_values() {
        assert_eq!(TransportCode::NoConnection.as_u8(), 4);
        assert_eq!(TransportCode::ConnectionRefused.as_u8(), 5);
        assert_eq!(TransportCode::AuthRejected.as_u8(), 11);
        assert_eq!(TransportCode::QueueFull.as_u8(), 15);
    }

    #[test]
    fn test_transport_error_display() {
        let err = TransportError::no_connection("session not established");
        let rendered = err.to_string();
        assert!(rendered.contains("no-connection"));
        assert!(rendered.contains("session not established"));
    }

    #[test]
    fn test_handler_error_from_str() {
        let err: HandlerError = "payload was not valid UTF-8".into();
        assert_eq!(err.to_string(), "payload was not valid UTF-8");
    }

    #[test]
    fn test_edge_error_wraps_transport() {
        let err: EdgeError = TransportError::refused("broker closed the socket").into();
        assert!(matches!(err, EdgeError::Transport(_)));
        assert!(err.to_string().contains("connection-refused"));
    }
}
