//! Network event routing
//!
//! Pure routing of rumqttc events into session-level decisions, plus the
//! notice channel that carries connect/disconnect/message notifications from
//! the network loop to the run loop. Keeping dispatch on the run loop side
//! of the channel preserves single-writer access to the handler tables.

use bytes::Bytes;
use rumqttc::v5::mqttbytes::v5::{ConnectReturnCode, Packet};
use rumqttc::v5::Event;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

use crate::error::TransportError;
use crate::session::dispatch::InboundMessage;

/// Depth of the notice queue between the network loop and the run loop.
pub const NOTICE_QUEUE_DEPTH: usize = 128;

/// Routing decision for a single network event.
#[derive(Debug)]
pub enum EventRoute {
    /// Broker answered the connection request.
    ConnectionAcknowledged {
        outcome: Result<(), TransportError>,
    },
    /// Message received on a subscribed topic.
    MessageReceived {
        topic: String,
        payload: Bytes,
        retain: bool,
    },
    /// Broker closed the session.
    Disconnected,
    /// Subscribe request acknowledged.
    SubscriptionConfirmed { packet_id: u16 },
    /// Ping responses and other protocol bookkeeping.
    InfrastructureEvent(String),
    /// Outgoing traffic, handled by the event loop itself.
    OutgoingEvent,
}

/// Classify a ConnAck return code into an accept/reject outcome.
pub fn classify_connack(code: ConnectReturnCode) -> Result<(), TransportError> {
    match code {
        ConnectReturnCode::Success => Ok(()),
        ConnectReturnCode::BadUserNamePassword | ConnectReturnCode::NotAuthorized => {
            Err(TransportError::auth_rejected(format!("{code:?}")))
        }
        other => Err(TransportError::refused(format!("{other:?}"))),
    }
}

/// Route a network event to the session-level decision.
pub fn route_mqtt_event(event: &Event) -> EventRoute {
    match event {
        Event::Incoming(incoming) => match incoming {
            Packet::ConnAck(connack) => EventRoute::ConnectionAcknowledged {
                outcome: classify_connack(connack.code),
            },
            Packet::Publish(publish) => EventRoute::MessageReceived {
                topic: String::from_utf8_lossy(&publish.topic).to_string(),
                payload: publish.payload.clone(),
                retain: publish.retain,
            },
            Packet::Disconnect(_) => EventRoute::Disconnected,
            Packet::SubAck(suback) => EventRoute::SubscriptionConfirmed {
                packet_id: suback.pkid,
            },
            other => EventRoute::InfrastructureEvent(format!("{other:?}")),
        },
        Event::Outgoing(_) => EventRoute::OutgoingEvent,
    }
}

/// Notification delivered to the run loop.
#[derive(Debug)]
pub enum SessionNotice {
    /// Session established and subscriptions replayed.
    Connected,
    /// Session lost; the registry stays intact.
    Disconnected { reason: String },
    /// Inbound message for dispatch.
    Message(InboundMessage),
}

/// Sender side of the notice channel.
///
/// Lifecycle notices must not be lost and are awaited; message notices are
/// dropped with a warning when the run loop falls behind, so the network
/// task never blocks indefinitely on dispatch.
#[derive(Clone)]
pub struct NoticeForwarder {
    tx: mpsc::Sender<SessionNotice>,
}

impl NoticeForwarder {
    pub fn new(tx: mpsc::Sender<SessionNotice>) -> Self {
        Self { tx }
    }

    pub async fn lifecycle(&self, notice: SessionNotice) {
        if self.tx.send(notice).await.is_err() {
            debug!("run loop stopped, dropping lifecycle notice");
        }
    }

    pub fn message(&self, message: InboundMessage) {
        match self.tx.try_send(SessionNotice::Message(message)) {
            Ok(()) => {}
            Err(TrySendError::Full(SessionNotice::Message(dropped))) => {
                warn!(topic = %dropped.topic, "notice queue full, dropping inbound message");
            }
            Err(_) => {
                debug!("run loop stopped, dropping inbound message");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rumqttc::v5::mqttbytes::v5::{ConnAck, Disconnect, DisconnectReasonCode, Publish};
    use rumqttc::v5::mqttbytes::QoS;

    use crate::error::TransportCode;

    #[test]
    fn test_classify_connack() {
        assert!(classify_connack(ConnectReturnCode::Success).is_ok());

        let err = classify_connack(ConnectReturnCode::NotAuthorized).unwrap_err();
        assert_eq!(err.code, TransportCode::AuthRejected);

        let err = classify_connack(ConnectReturnCode::BadUserNamePassword).unwrap_err();
        assert_eq!(err.code, TransportCode::AuthRejected);
    }

    #[test]
    fn test_route_connack() {
        let connack = Event::Incoming(Packet::ConnAck(ConnAck {
            session_present: false,
            code: ConnectReturnCode::Success,
            properties: None,
        }));
        assert!(matches!(
            route_mqtt_event(&connack),
            EventRoute::ConnectionAcknowledged { outcome: Ok(()) }
        ));
    }

    #[test]
    fn test_route_disconnect() {
        let disconnect = Event::Incoming(Packet::Disconnect(Disconnect {
            reason_code: DisconnectReasonCode::NormalDisconnection,
            properties: None,
        }));
        assert!(matches!(
            route_mqtt_event(&disconnect),
            EventRoute::Disconnected
        ));
    }

    #[test]
    fn test_route_publish() {
        let publish = Event::Incoming(Packet::Publish(Publish {
            dup: false,
            qos: QoS::AtLeastOnce,
            retain: false,
            topic: Bytes::from("devices/d1/cmd/reboot"),
            pkid: 1,
            payload: Bytes::from("now"),
            properties: None,
        }));

        match route_mqtt_event(&publish) {
            EventRoute::MessageReceived {
                topic,
                payload,
                retain,
            } => {
                assert_eq!(topic, "devices/d1/cmd/reboot");
                assert_eq!(payload, Bytes::from("now"));
                assert!(!retain);
            }
            other => panic!("expected MessageReceived, got {other:?}"),
        }
    }

    #[test]
    fn test_route_outgoing() {
        let outgoing = Event::Outgoing(rumqttc::Outgoing::PingReq);
        assert!(matches!(
            route_mqtt_event(&outgoing),
            EventRoute::OutgoingEvent
        ));
    }

    #[tokio::test]
    async fn test_forwarder_delivers_lifecycle_and_messages() {
        let (tx, mut rx) = mpsc::channel(8);
        let forwarder = NoticeForwarder::new(tx);

        forwarder.lifecycle(SessionNotice::Connected).await;
        forwarder.message(InboundMessage::new("a/b", "hi"));

        assert!(matches!(rx.recv().await, Some(SessionNotice::Connected)));
        match rx.recv().await {
            Some(SessionNotice::Message(msg)) => assert_eq!(msg.topic, "a/b"),
            other => panic!("expected message notice, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_forwarder_drops_messages_when_queue_full() {
        let (tx, mut rx) = mpsc::channel(1);
        let forwarder = NoticeForwarder::new(tx);

        forwarder.message(InboundMessage::new("a/1", "x"));
        forwarder.message(InboundMessage::new("a/2", "y"));

        match rx.recv().await {
            Some(SessionNotice::Message(msg)) => assert_eq!(msg.topic, "a/1"),
            other => panic!("expected first message, got {other:?}"),
        }
        assert!(rx.try_recv().is_err());
    }
}
