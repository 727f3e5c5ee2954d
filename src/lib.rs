//! Edgelink - edge-device MQTT session client
//!
//! Maintains a persistent publish/subscribe session with a broker,
//! re-subscribes after every reconnect, dispatches inbound messages to
//! per-topic and catch-all handlers, and drives periodic application events
//! on independent intervals.
//!
//! # Overview
//!
//! - [`session`] - connection lifecycle, subscription registry with replay
//!   on reconnect, inbound message dispatch
//! - [`scheduler`] - named periodic tasks on a cooperative timer loop
//! - [`agent`] - the run loop tying session, dispatch and scheduler together
//! - [`status`] - the optional status display contract
//! - [`config`] / [`error`] / [`observability`] - configuration snapshot,
//!   error taxonomy, structured logging
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use edgelink::agent::EdgeAgent;
//! use edgelink::config::EdgeConfig;
//!
//! # tokio_test::block_on(async {
//! let config: EdgeConfig = toml::from_str(
//!     r#"
//! [device]
//! id = "sensor-7"
//!
//! [mqtt]
//! host = "broker.local"
//! "#,
//! )?;
//!
//! let mut agent = EdgeAgent::new(config)?;
//! let session = agent.session();
//!
//! agent.register_topic_handler(
//!     "devices/sensor-7/cmd/#",
//!     Arc::new(|msg| {
//!         Box::pin(async move {
//!             println!("command on {}", msg.topic);
//!             Ok(())
//!         })
//!     }),
//! )?;
//!
//! agent.register_periodic_task(
//!     "heartbeat",
//!     Some(Duration::from_secs(1)),
//!     Arc::new(move || {
//!         let session = session.clone();
//!         Box::pin(async move {
//!             session
//!                 .publish(
//!                     "devices/sensor-7/heartbeat",
//!                     "beat",
//!                     rumqttc::v5::mqttbytes::QoS::AtMostOnce,
//!                     false,
//!                 )
//!                 .await
//!                 .ok();
//!             Ok(())
//!         })
//!     }),
//! );
//!
//! agent.run().await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod agent;
pub mod config;
pub mod error;
pub mod observability;
pub mod scheduler;
pub mod session;
pub mod status;
pub mod testing;
pub mod transport;

pub use agent::{EdgeAgent, ShutdownTrigger};
pub use config::{ConfigError, EdgeConfig};
pub use error::{EdgeError, EdgeResult, HandlerError, TransportCode, TransportError};
pub use scheduler::{PeriodicScheduler, TaskCallback, TaskSet};
pub use session::{
    ConnectionState, DispatchTable, InboundMessage, MessageHandler, MqttSession, Session,
    TopicRegistry, TopicSubscription,
};
pub use status::{StatusSink, TriggerMap};
pub use transport::{MqttTransport, Transport};
