//! Transport seam over the wire-protocol client
//!
//! The session layer only needs the subscribe/unsubscribe/publish/disconnect
//! primitives. Putting them behind a trait enables dependency injection and
//! testing without a broker; the MQTT implementation is a thin wrapper over
//! the rumqttc async client.

use async_trait::async_trait;
use bytes::Bytes;
use rumqttc::v5::mqttbytes::QoS;
use rumqttc::v5::{AsyncClient, ClientError};

use crate::error::{TransportCode, TransportError};

/// Wire primitives the session layer drives.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Issue a subscribe request for a topic filter.
    async fn subscribe(&self, filter: &str, qos: QoS) -> Result<(), TransportError>;

    /// Issue an unsubscribe request for a topic filter.
    async fn unsubscribe(&self, filter: &str) -> Result<(), TransportError>;

    /// Publish a message. The request is queued even while the network loop
    /// is re-establishing the connection.
    async fn publish(
        &self,
        topic: &str,
        payload: Bytes,
        qos: QoS,
        retain: bool,
    ) -> Result<(), TransportError>;

    /// Request a clean disconnect from the broker.
    async fn disconnect(&self) -> Result<(), TransportError>;
}

/// MQTT implementation of [`Transport`] backed by `rumqttc::v5::AsyncClient`.
///
/// Cloning is cheap; all clones feed the same event loop.
#[derive(Clone)]
pub struct MqttTransport {
    client: AsyncClient,
}

impl MqttTransport {
    pub fn new(client: AsyncClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for MqttTransport {
    async fn subscribe(&self, filter: &str, qos: QoS) -> Result<(), TransportError> {
        self.client
            .subscribe(filter, qos)
            .await
            .map_err(map_client_error)
    }

    async fn unsubscribe(&self, filter: &str) -> Result<(), TransportError> {
        self.client
            .unsubscribe(filter)
            .await
            .map_err(map_client_error)
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Bytes,
        qos: QoS,
        retain: bool,
    ) -> Result<(), TransportError> {
        self.client
            .publish(topic, qos, retain, payload)
            .await
            .map_err(map_client_error)
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.client.disconnect().await.map_err(map_client_error)
    }
}

/// Map a rumqttc client error onto a transport code.
fn map_client_error(err: ClientError) -> TransportError {
    match err {
        // The event loop has gone away; nothing will drain the queue.
        ClientError::Request(_) => {
            TransportError::new(TransportCode::NoConnection, "network loop not running")
        }
        ClientError::TryRequest(_) => {
            TransportError::new(TransportCode::QueueFull, "request queue full")
        }
    }
}
