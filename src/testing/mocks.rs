//! Mock implementations for testing
//!
//! Provides a mock transport and a mock status sink so session, scheduler
//! and agent behavior can be tested without external dependencies.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use rumqttc::v5::mqttbytes::QoS;
use tokio::sync::Mutex;

use crate::error::{HandlerError, TransportCode, TransportError};
use crate::status::StatusSink;
use crate::transport::Transport;

/// A recorded publish: topic, payload, qos, retain.
pub type PublishedMessage = (String, Bytes, QoS, bool);

/// Mock transport recording every wire operation.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    subscribes: Arc<Mutex<Vec<(String, QoS)>>>,
    unsubscribes: Arc<Mutex<Vec<String>>>,
    publishes: Arc<Mutex<Vec<PublishedMessage>>>,
    disconnects: Arc<Mutex<u32>>,
    fail_filters: Arc<Mutex<HashSet<String>>>,
    fail_all: Arc<Mutex<bool>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation fail.
    pub async fn set_failing(&self, failing: bool) {
        *self.fail_all.lock().await = failing;
    }

    /// Make subscribe/unsubscribe fail for one specific filter.
    pub async fn fail_filter(&self, filter: impl Into<String>) {
        self.fail_filters.lock().await.insert(filter.into());
    }

    pub async fn get_subscribes(&self) -> Vec<(String, QoS)> {
        self.subscribes.lock().await.clone()
    }

    pub async fn get_unsubscribes(&self) -> Vec<String> {
        self.unsubscribes.lock().await.clone()
    }

    pub async fn get_publishes(&self) -> Vec<PublishedMessage> {
        self.publishes.lock().await.clone()
    }

    pub async fn disconnect_count(&self) -> u32 {
        *self.disconnects.lock().await
    }

    pub async fn clear_history(&self) {
        self.subscribes.lock().await.clear();
        self.unsubscribes.lock().await.clear();
        self.publishes.lock().await.clear();
    }

    async fn should_fail(&self, filter: &str) -> bool {
        *self.fail_all.lock().await || self.fail_filters.lock().await.contains(filter)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn subscribe(&self, filter: &str, qos: QoS) -> Result<(), TransportError> {
        if self.should_fail(filter).await {
            return Err(TransportError::new(
                TransportCode::Unknown,
                "mock subscribe failure",
            ));
        }
        self.subscribes
            .lock()
            .await
            .push((filter.to_string(), qos));
        Ok(())
    }

    async fn unsubscribe(&self, filter: &str) -> Result<(), TransportError> {
        if self.should_fail(filter).await {
            return Err(TransportError::new(
                TransportCode::Unknown,
                "mock unsubscribe failure",
            ));
        }
        self.unsubscribes.lock().await.push(filter.to_string());
        Ok(())
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Bytes,
        qos: QoS,
        retain: bool,
    ) -> Result<(), TransportError> {
        if self.should_fail(topic).await {
            return Err(TransportError::new(
                TransportCode::Unknown,
                "mock publish failure",
            ));
        }
        self.publishes
            .lock()
            .await
            .push((topic.to_string(), payload, qos, retain));
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        *self.disconnects.lock().await += 1;
        Ok(())
    }
}

/// Mock status sink counting refreshes and connection transitions.
#[derive(Debug, Default)]
pub struct MockSink {
    inits: AtomicUsize,
    refreshes: AtomicUsize,
    transitions: std::sync::Mutex<Vec<bool>>,
    fail_init: bool,
}

impl MockSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_failing_init() -> Self {
        Self {
            fail_init: true,
            ..Self::default()
        }
    }

    pub fn init_count(&self) -> usize {
        self.inits.load(Ordering::SeqCst)
    }

    pub fn refresh_count(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }

    pub fn transitions(&self) -> Vec<bool> {
        self.transitions.lock().unwrap().clone()
    }
}

impl StatusSink for MockSink {
    fn init(&self) -> Result<(), HandlerError> {
        self.inits.fetch_add(1, Ordering::SeqCst);
        if self.fail_init {
            return Err(HandlerError::msg("mock init failure"));
        }
        Ok(())
    }

    fn refresh(&self) {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
    }

    fn connection_changed(&self, connected: bool) {
        self.transitions.lock().unwrap().push(connected);
    }
}
