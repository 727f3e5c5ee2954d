//! Connection session
//!
//! [`Session`] is the policy layer over the wire primitives: it owns the
//! subscription registry, implements the persist-then-apply subscription
//! contract, and replays the registry after every reconnect. [`MqttSession`]
//! wires a `Session` to the rumqttc event loop and runs the reconnect
//! supervisor that drives the state machine.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use rumqttc::v5::mqttbytes::QoS;
use rumqttc::v5::{AsyncClient, EventLoop};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::{ConfigError, EdgeConfig};
use crate::error::{TransportCode, TransportError};
use crate::session::connection::{configure_mqtt_options, ConnectionState, ReconnectConfig};
use crate::session::dispatch::{validate_filter, InboundMessage};
use crate::session::events::{
    route_mqtt_event, EventRoute, NoticeForwarder, SessionNotice, NOTICE_QUEUE_DEPTH,
};
use crate::session::registry::{TopicRegistry, TopicSubscription};
use crate::transport::{MqttTransport, Transport};

/// How long to wait for the broker's connection acknowledgment before
/// reporting the initial connect as failed. The supervisor keeps retrying
/// either way.
const CONNACK_TIMEOUT: Duration = Duration::from_secs(30);

/// Bound on waiting for the network loop to wind down during `stop`.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Policy layer over a [`Transport`]: tracked subscriptions, connection
/// state, and the operations the application calls.
///
/// Cheap to clone; clones share the registry and observe the same state.
#[derive(Clone)]
pub struct Session<T: Transport> {
    transport: T,
    registry: Arc<Mutex<TopicRegistry>>,
    state_rx: watch::Receiver<ConnectionState>,
}

impl<T: Transport> Session<T> {
    pub fn new(transport: T, state_rx: watch::Receiver<ConnectionState>) -> Self {
        Self {
            transport,
            registry: Arc::new(Mutex::new(TopicRegistry::new())),
            state_rx,
        }
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.state_rx.borrow().clone()
    }

    /// Whether the broker has acknowledged the session.
    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Ordered snapshot of the tracked subscriptions.
    pub async fn subscriptions(&self) -> Vec<TopicSubscription> {
        self.registry.lock().await.all()
    }

    /// Subscribe to a topic filter.
    ///
    /// The desired subscription is recorded in the registry first, then
    /// applied to the transport when connected. A subscribe while
    /// disconnected reports a no-connection code but the intent is kept and
    /// covered by the replay on the next reconnect.
    pub async fn subscribe(&self, filter: &str, qos: QoS) -> Result<(), TransportError> {
        validate_filter(filter)
            .map_err(|e| TransportError::invalid(format!("filter '{filter}': {e}")))?;

        self.registry.lock().await.upsert(filter, qos);

        if !self.is_connected() {
            debug!(filter = %filter, "subscription recorded while offline, will apply on reconnect");
            return Err(TransportError::no_connection(
                "not connected; subscription recorded for replay",
            ));
        }

        match self.transport.subscribe(filter, qos).await {
            Ok(()) => {
                debug!(filter = %filter, qos = ?qos, "subscribed");
                Ok(())
            }
            Err(err) => {
                error!(filter = %filter, code = %err.code, "subscribe failed: {}", err.detail);
                Err(err)
            }
        }
    }

    /// Unsubscribe from a topic filter.
    ///
    /// Returns `None` when the filter was never tracked. The registry entry
    /// is removed unconditionally so the filter is not replayed on
    /// reconnect.
    pub async fn unsubscribe(&self, filter: &str) -> Option<Result<(), TransportError>> {
        self.registry.lock().await.remove(filter)?;

        if !self.is_connected() {
            debug!(filter = %filter, "unsubscribed while offline, entry dropped from registry");
            return Some(Ok(()));
        }

        match self.transport.unsubscribe(filter).await {
            Ok(()) => {
                debug!(filter = %filter, "unsubscribed");
                Some(Ok(()))
            }
            Err(err) => {
                error!(filter = %filter, code = %err.code, "unsubscribe failed: {}", err.detail);
                Some(Err(err))
            }
        }
    }

    /// Unsubscribe from every tracked filter, one at a time. Per-filter
    /// failures are logged and do not stop the remaining unsubscriptions.
    pub async fn unsubscribe_all(&self) {
        let snapshot = self.subscriptions().await;
        for entry in snapshot {
            if let Some(Err(err)) = self.unsubscribe(&entry.filter).await {
                error!(filter = %entry.filter, code = %err.code, "unsubscribe-all: entry failed");
            }
        }
    }

    /// Publish a message.
    ///
    /// Never silently drops: while disconnected the request is queued by the
    /// transport and flushed once the reconnect supervisor re-establishes
    /// the session.
    pub async fn publish(
        &self,
        topic: &str,
        payload: impl Into<Bytes> + Send,
        qos: QoS,
        retain: bool,
    ) -> Result<(), TransportError> {
        if !self.is_connected() {
            debug!(topic = %topic, "publishing while disconnected, request queued until the session re-establishes");
        }

        match self.transport.publish(topic, payload.into(), qos, retain).await {
            Ok(()) => {
                debug!(topic = %topic, "published");
                Ok(())
            }
            Err(err) => {
                error!(topic = %topic, code = %err.code, "publish failed: {}", err.detail);
                Err(err)
            }
        }
    }

    /// Re-issue every tracked subscription in registry order. Each request
    /// is independent; a failed entry is logged and the rest still go out.
    /// Returns the number of successfully re-applied entries.
    pub async fn replay_subscriptions(&self) -> usize {
        let snapshot = self.subscriptions().await;
        let mut applied = 0;
        for entry in &snapshot {
            match self.transport.subscribe(&entry.filter, entry.qos).await {
                Ok(()) => {
                    debug!(filter = %entry.filter, "re-subscribed");
                    applied += 1;
                }
                Err(err) => {
                    error!(filter = %entry.filter, code = %err.code, "re-subscribe failed: {}", err.detail);
                }
            }
        }
        if !snapshot.is_empty() {
            info!(
                applied,
                tracked = snapshot.len(),
                "subscription replay complete"
            );
        }
        applied
    }
}

/// Wait until the state machine reaches Connected, or report the failure
/// reason / timeout.
async fn wait_for_connection_confirmation(
    mut state_rx: watch::Receiver<ConnectionState>,
    timeout: Duration,
) -> Result<(), TransportError> {
    let outcome = tokio::time::timeout(timeout, async {
        loop {
            let state = state_rx.borrow_and_update().clone();
            match state {
                ConnectionState::Connected => return Ok(()),
                ConnectionState::Disconnected(reason) => {
                    return Err(TransportError::refused(reason));
                }
                ConnectionState::Connecting => {}
            }
            if state_rx.changed().await.is_err() {
                return Err(TransportError::no_connection("state channel closed"));
            }
        }
    })
    .await;

    match outcome {
        Ok(result) => result,
        Err(_) => Err(TransportError::no_connection(
            "no connection acknowledgment before timeout",
        )),
    }
}

/// Sleep that aborts early on shutdown. Returns false when shutdown was
/// requested.
async fn interruptible_sleep(mut shutdown_rx: watch::Receiver<bool>, delay: Duration) -> bool {
    tokio::select! {
        _ = shutdown_rx.changed() => !*shutdown_rx.borrow(),
        _ = tokio::time::sleep(delay) => true,
    }
}

/// MQTT-backed connection session.
///
/// Owns the event loop and the reconnect supervisor. Application code works
/// through [`MqttSession::handle`] clones, which stay valid across
/// reconnects.
pub struct MqttSession {
    session: Session<MqttTransport>,
    transport: MqttTransport,
    event_loop: Option<EventLoop>,
    state_tx: watch::Sender<ConnectionState>,
    shutdown_tx: Option<watch::Sender<bool>>,
    supervisor: Option<JoinHandle<()>>,
    notice_tx: mpsc::Sender<SessionNotice>,
    reconnect: ReconnectConfig,
}

impl MqttSession {
    /// Build a session from validated configuration. This is the hard
    /// failure point: a configuration problem surfaces here, before any
    /// network activity.
    pub fn new(config: &EdgeConfig) -> Result<(Self, mpsc::Receiver<SessionNotice>), ConfigError> {
        config.validate()?;
        let options = configure_mqtt_options(config)?;

        let (client, event_loop) = AsyncClient::new(options, 10);
        let transport = MqttTransport::new(client);

        let (state_tx, state_rx) =
            watch::channel(ConnectionState::Disconnected("not started".to_string()));
        let (notice_tx, notice_rx) = mpsc::channel(NOTICE_QUEUE_DEPTH);

        let session = Session::new(transport.clone(), state_rx);

        Ok((
            Self {
                session,
                transport,
                event_loop: Some(event_loop),
                state_tx,
                shutdown_tx: None,
                supervisor: None,
                notice_tx,
                reconnect: ReconnectConfig::from_mqtt(&config.mqtt),
            },
            notice_rx,
        ))
    }

    /// Clone of the policy-layer session for application use.
    pub fn handle(&self) -> Session<MqttTransport> {
        self.session.clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.session.state()
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_connected()
    }

    /// Start the network loop and wait for the broker's acknowledgment.
    ///
    /// A failure here is a report, not a verdict: the supervisor keeps
    /// retrying with bounded backoff, and the caller decides whether to
    /// proceed.
    pub async fn connect(&mut self) -> Result<(), TransportError> {
        let event_loop = self.event_loop.take().ok_or_else(|| {
            TransportError::new(TransportCode::Invalid, "network loop already started")
        })?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        self.shutdown_tx = Some(shutdown_tx);

        let _ = self.state_tx.send(ConnectionState::Connecting);

        let supervisor = tokio::spawn(run_supervisor(
            event_loop,
            self.session.clone(),
            self.state_tx.clone(),
            shutdown_rx,
            NoticeForwarder::new(self.notice_tx.clone()),
            self.reconnect.clone(),
        ));
        self.supervisor = Some(supervisor);

        wait_for_connection_confirmation(self.session.state_receiver(), CONNACK_TIMEOUT).await
    }

    /// Stop the network loop and issue a clean disconnect. Safe to call
    /// more than once.
    pub async fn stop(&mut self) {
        let Some(shutdown_tx) = self.shutdown_tx.take() else {
            return;
        };
        let _ = shutdown_tx.send(true);

        if let Err(err) = self.transport.disconnect().await {
            debug!(code = %err.code, "disconnect request not delivered: {}", err.detail);
        }

        if let Some(mut supervisor) = self.supervisor.take() {
            match tokio::time::timeout(SHUTDOWN_GRACE, &mut supervisor).await {
                Ok(Ok(())) => info!("network loop shut down cleanly"),
                Ok(Err(join_err)) if !join_err.is_cancelled() => {
                    warn!("network loop ended with error: {join_err}");
                }
                Ok(Err(_)) => {}
                Err(_) => {
                    warn!("network loop did not stop in time, aborting");
                    supervisor.abort();
                }
            }
        }

        let _ = self
            .state_tx
            .send(ConnectionState::Disconnected("stopped".to_string()));
        debug!("disconnected from broker");
    }
}

impl Drop for MqttSession {
    fn drop(&mut self) {
        if let Some(shutdown_tx) = &self.shutdown_tx {
            let _ = shutdown_tx.send(true);
        }
        // Cannot await in Drop; callers wanting a clean disconnect use stop().
        if let Some(supervisor) = self.supervisor.take() {
            supervisor.abort();
        }
    }
}

/// The reconnect supervisor: polls the event loop, applies the state
/// machine, replays subscriptions on every accepted ConnAck, and backs off
/// between failed attempts. The same client and event loop are reused
/// across reconnects; the event loop retries the connection on the next
/// poll and keeps queued requests.
async fn run_supervisor(
    mut event_loop: EventLoop,
    session: Session<MqttTransport>,
    state_tx: watch::Sender<ConnectionState>,
    mut shutdown_rx: watch::Receiver<bool>,
    notices: NoticeForwarder,
    reconnect: ReconnectConfig,
) {
    info!("network loop started");
    let mut attempts = 0u32;
    let mut was_connected = false;

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    info!("shutdown signal received, stopping network loop");
                    break;
                }
            }

            event = event_loop.poll() => match event {
                Ok(event) => match route_mqtt_event(&event) {
                    EventRoute::ConnectionAcknowledged { outcome: Ok(()) } => {
                        let _ = state_tx.send(ConnectionState::Connected);
                        attempts = 0;
                        was_connected = true;
                        let applied = session.replay_subscriptions().await;
                        info!(resubscribed = applied, "session established");
                        notices.lifecycle(SessionNotice::Connected).await;
                    }
                    EventRoute::ConnectionAcknowledged { outcome: Err(err) } => {
                        warn!(code = %err.code, "broker rejected the connection: {}", err.detail);
                        let _ = state_tx.send(ConnectionState::Disconnected(err.detail.clone()));
                        if was_connected {
                            was_connected = false;
                            notices
                                .lifecycle(SessionNotice::Disconnected { reason: err.detail })
                                .await;
                        }
                    }
                    EventRoute::MessageReceived { topic, payload, .. } => {
                        notices.message(InboundMessage::new(topic, payload));
                    }
                    EventRoute::Disconnected => {
                        let reason = "broker closed the session".to_string();
                        warn!("{reason}");
                        let _ = state_tx.send(ConnectionState::Disconnected(reason.clone()));
                        if was_connected {
                            was_connected = false;
                            notices.lifecycle(SessionNotice::Disconnected { reason }).await;
                        }
                    }
                    EventRoute::SubscriptionConfirmed { packet_id } => {
                        debug!(packet_id, "subscription confirmed");
                    }
                    EventRoute::InfrastructureEvent(event) => {
                        debug!(target: "edgelink::session", "event: {event}");
                    }
                    EventRoute::OutgoingEvent => {}
                },
                Err(err) => {
                    let reason = err.to_string();
                    let _ = state_tx.send(ConnectionState::Disconnected(reason.clone()));
                    if was_connected {
                        was_connected = false;
                        notices
                            .lifecycle(SessionNotice::Disconnected { reason: reason.clone() })
                            .await;
                    }

                    attempts = attempts.saturating_add(1);
                    let delay = reconnect.delay_for(attempts);
                    warn!(
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        "connection lost: {reason}; retrying"
                    );

                    if !interruptible_sleep(shutdown_rx.clone(), delay).await {
                        info!("shutdown signal received during reconnect delay");
                        break;
                    }
                    let _ = state_tx.send(ConnectionState::Connecting);
                }
            }
        }
    }
    info!("network loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::mocks::MockTransport;

    fn session_with_state(
        transport: MockTransport,
        state: ConnectionState,
    ) -> (Session<MockTransport>, watch::Sender<ConnectionState>) {
        let (state_tx, state_rx) = watch::channel(state);
        (Session::new(transport, state_rx), state_tx)
    }

    #[tokio::test]
    async fn test_subscribe_persists_then_applies_when_connected() {
        let transport = MockTransport::new();
        let (session, _state_tx) =
            session_with_state(transport.clone(), ConnectionState::Connected);

        session.subscribe("devices/+/telemetry", QoS::AtLeastOnce).await.unwrap();

        let tracked = session.subscriptions().await;
        assert_eq!(tracked.len(), 1);
        assert_eq!(tracked[0].filter, "devices/+/telemetry");

        let issued = transport.get_subscribes().await;
        assert_eq!(issued, vec![("devices/+/telemetry".to_string(), QoS::AtLeastOnce)]);
    }

    #[tokio::test]
    async fn test_subscribe_offline_keeps_intent() {
        let transport = MockTransport::new();
        let (session, _state_tx) = session_with_state(
            transport.clone(),
            ConnectionState::Disconnected("down".to_string()),
        );

        let result = session.subscribe("a/b", QoS::AtMostOnce).await;
        let err = result.unwrap_err();
        assert_eq!(err.code, TransportCode::NoConnection);

        // Intent recorded, nothing sent on the wire.
        assert_eq!(session.subscriptions().await.len(), 1);
        assert!(transport.get_subscribes().await.is_empty());
    }

    #[tokio::test]
    async fn test_subscribe_rejects_invalid_filter() {
        let transport = MockTransport::new();
        let (session, _state_tx) =
            session_with_state(transport.clone(), ConnectionState::Connected);

        let err = session.subscribe("a/#/b", QoS::AtMostOnce).await.unwrap_err();
        assert_eq!(err.code, TransportCode::Invalid);
        assert!(session.subscriptions().await.is_empty());
    }

    #[tokio::test]
    async fn test_replay_applies_latest_qos_once_per_filter() {
        let transport = MockTransport::new();
        let (session, _state_tx) =
            session_with_state(transport.clone(), ConnectionState::Connected);

        session.subscribe("a/b", QoS::AtMostOnce).await.unwrap();
        session.subscribe("c/d", QoS::AtMostOnce).await.unwrap();
        session.subscribe("a/b", QoS::ExactlyOnce).await.unwrap();

        transport.clear_history().await;
        let applied = session.replay_subscriptions().await;

        assert_eq!(applied, 2);
        let issued = transport.get_subscribes().await;
        assert_eq!(
            issued,
            vec![
                ("a/b".to_string(), QoS::ExactlyOnce),
                ("c/d".to_string(), QoS::AtMostOnce),
            ]
        );
    }

    #[tokio::test]
    async fn test_replay_continues_past_failures() {
        let transport = MockTransport::new();
        transport.fail_filter("b/2").await;
        let (session, _state_tx) =
            session_with_state(transport.clone(), ConnectionState::Connected);

        session.subscribe("a/1", QoS::AtMostOnce).await.unwrap();
        session.subscribe("c/3", QoS::AtMostOnce).await.unwrap();
        {
            // Track a filter the transport will reject during replay.
            let mut registry = session.registry.lock().await;
            registry.upsert("b/2", QoS::AtMostOnce);
        }

        transport.clear_history().await;
        let applied = session.replay_subscriptions().await;

        assert_eq!(applied, 2);
        let issued: Vec<String> = transport
            .get_subscribes()
            .await
            .into_iter()
            .map(|(f, _)| f)
            .collect();
        // The failing entry was attempted and skipped; order preserved.
        assert_eq!(issued, vec!["a/1", "c/3"]);
    }

    #[tokio::test]
    async fn test_unsubscribe_removes_from_replay() {
        let transport = MockTransport::new();
        let (session, _state_tx) =
            session_with_state(transport.clone(), ConnectionState::Connected);

        session.subscribe("a/b", QoS::AtMostOnce).await.unwrap();
        session.subscribe("c/d", QoS::AtMostOnce).await.unwrap();
        session.unsubscribe("a/b").await.unwrap().unwrap();

        transport.clear_history().await;
        session.replay_subscriptions().await;

        let issued: Vec<String> = transport
            .get_subscribes()
            .await
            .into_iter()
            .map(|(f, _)| f)
            .collect();
        assert_eq!(issued, vec!["c/d"]);
        assert_eq!(transport.get_unsubscribes().await, vec!["a/b"]);
    }

    #[tokio::test]
    async fn test_unsubscribe_unknown_filter_is_noop() {
        let transport = MockTransport::new();
        let (session, _state_tx) =
            session_with_state(transport.clone(), ConnectionState::Connected);

        assert!(session.unsubscribe("never/subscribed").await.is_none());
        assert!(transport.get_unsubscribes().await.is_empty());
    }

    #[tokio::test]
    async fn test_unsubscribe_all_survives_partial_failure() {
        let transport = MockTransport::new();
        transport.fail_filter("b/2").await;
        let (session, _state_tx) =
            session_with_state(transport.clone(), ConnectionState::Connected);

        session.subscribe("a/1", QoS::AtMostOnce).await.unwrap();
        session.subscribe("b/2", QoS::AtMostOnce).await.ok();
        session.subscribe("c/3", QoS::AtMostOnce).await.unwrap();

        session.unsubscribe_all().await;

        assert!(session.subscriptions().await.is_empty());
        // The failing filter was still attempted.
        assert_eq!(transport.get_unsubscribes().await.len(), 2);
    }

    #[tokio::test]
    async fn test_disconnect_keeps_registry() {
        let transport = MockTransport::new();
        let (session, state_tx) =
            session_with_state(transport.clone(), ConnectionState::Connected);

        session.subscribe("a/b", QoS::AtMostOnce).await.unwrap();
        state_tx
            .send(ConnectionState::Disconnected("lost".to_string()))
            .unwrap();

        assert!(!session.is_connected());
        assert_eq!(session.subscriptions().await.len(), 1);
    }

    #[tokio::test]
    async fn test_publish_while_disconnected_still_queues() {
        let transport = MockTransport::new();
        let (session, _state_tx) = session_with_state(
            transport.clone(),
            ConnectionState::Disconnected("down".to_string()),
        );

        session
            .publish("devices/d/heartbeat", "beat", QoS::AtMostOnce, false)
            .await
            .unwrap();

        assert_eq!(transport.get_publishes().await.len(), 1);
    }

    #[tokio::test]
    async fn test_wait_for_confirmation_success() {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let _ = state_tx.send(ConnectionState::Connected);
        });

        let result =
            wait_for_connection_confirmation(state_rx, Duration::from_millis(200)).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_wait_for_confirmation_reports_rejection() {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let _ = state_tx.send(ConnectionState::Disconnected("NotAuthorized".to_string()));
        });

        let err = wait_for_connection_confirmation(state_rx, Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(err.detail.contains("NotAuthorized"));
    }

    #[tokio::test]
    async fn test_wait_for_confirmation_times_out() {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        // Keep the sender alive without ever confirming.
        let _keepalive = state_tx;

        let err = wait_for_connection_confirmation(state_rx, Duration::from_millis(20))
            .await
            .unwrap_err();
        assert_eq!(err.code, TransportCode::NoConnection);
    }

    #[tokio::test]
    async fn test_interruptible_sleep() {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        assert!(interruptible_sleep(shutdown_rx.clone(), Duration::from_millis(5)).await);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            let _ = shutdown_tx.send(true);
        });
        assert!(!interruptible_sleep(shutdown_rx, Duration::from_secs(10)).await);
    }

    #[test]
    fn test_mqtt_session_rejects_invalid_config() {
        let mut config = EdgeConfig::test_config();
        config.mqtt.tls = Some(crate::config::TlsSection {
            enabled: true,
            ca_certs: None,
            cert_file: None,
            key_file: None,
            insecure: false,
        });

        assert!(matches!(
            MqttSession::new(&config),
            Err(ConfigError::TlsWithoutCa)
        ));
    }

    #[tokio::test]
    async fn test_mqtt_session_stop_before_connect_is_noop() {
        let config = EdgeConfig::test_config();
        let (mut session, _notices) = MqttSession::new(&config).unwrap();
        assert!(!session.is_connected());
        session.stop().await;
        session.stop().await;
    }
}
