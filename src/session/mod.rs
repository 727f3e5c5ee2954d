//! Connection session management
//!
//! The session keeps a persistent broker connection alive and consistent:
//!
//! - [`registry`] - the topic subscription registry replayed on reconnect
//! - [`dispatch`] - per-topic and fallback handler dispatch for inbound
//!   messages
//! - [`connection`] - connection state, reconnect backoff, transport options
//! - [`events`] - pure routing of network events plus the notice channel
//!   into the run loop
//! - [`client`] - the session itself and the reconnect supervisor

pub mod client;
pub mod connection;
pub mod dispatch;
pub mod events;
pub mod registry;

pub use client::{MqttSession, Session};
pub use connection::{qos_from_level, ConnectionState, ReconnectConfig};
pub use dispatch::{
    topic_matches_filter, validate_filter, DispatchTable, FilterError, InboundMessage,
    MessageHandler,
};
pub use events::{EventRoute, SessionNotice};
pub use registry::{TopicRegistry, TopicSubscription};
