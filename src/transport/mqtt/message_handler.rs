//! Pure routing of broker events
//!
//! Turns rumqttc events into [`EventRoute`] decisions the link supervisor acts on.

use bytes::Bytes;
use rumqttc::{Event, Outgoing, Packet, QoS, SubscribeReasonCode};
use tracing::debug;

/// Pure message routing decisions based on broker events
pub struct MessageHandler;

impl MessageHandler {
    /// Route broker event to the appropriate handler
    pub fn route_mqtt_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(incoming) => match incoming {
                Packet::ConnAck(connack) => EventRoute::ConnectionAcknowledged {
                    session_present: connack.session_present,
                },
                Packet::Publish(publish) => EventRoute::MessageReceived {
                    topic: publish.topic.clone(),
                    payload: publish.payload.clone(),
                },
                Packet::Disconnect => EventRoute::Disconnected,
                Packet::SubAck(suback) => EventRoute::SubscriptionConfirmed {
                    packet_id: suback.pkid,
                    return_codes: suback.return_codes.clone(),
                },
                other => EventRoute::InfrastructureEvent(format!("{other:?}")),
            },
            Event::Outgoing(Outgoing::Disconnect) => EventRoute::DisconnectSent,
            Event::Outgoing(_) => EventRoute::OutgoingEvent,
        }
    }

    /// Only payloads on the link's own report topic reach the classifier
    pub fn should_process_message(topic: &str, expected_topic: &str) -> bool {
        if topic != expected_topic {
            debug!(topic, expected_topic, "Ignoring message on unexpected topic");
            return false;
        }
        true
    }

    /// The printer broker speaks QoS 0 for both reports and requests
    pub fn qos() -> QoS {
        QoS::AtMostOnce
    }

    /// Validate subscription success from SubAck
    pub fn validate_subscription_success(
        return_codes: &[SubscribeReasonCode],
    ) -> Result<(), String> {
        if return_codes
            .iter()
            .any(|code| matches!(code, SubscribeReasonCode::Failure))
        {
            Err(format!(
                "Subscription failed with return codes: {return_codes:?}"
            ))
        } else {
            Ok(())
        }
    }
}

/// Routing decisions for broker events
#[derive(Debug, Clone)]
pub enum EventRoute {
    /// Broker handshake completed
    ConnectionAcknowledged { session_present: bool },
    /// Message received on a subscribed topic
    MessageReceived { topic: String, payload: Bytes },
    /// Broker closed the session
    Disconnected,
    /// Our own DISCONNECT went out; the link is closing
    DisconnectSent,
    SubscriptionConfirmed {
        packet_id: u16,
        return_codes: Vec<SubscribeReasonCode>,
    },
    /// PingResp, UnsubAck, PubAck
    InfrastructureEvent(String),
    OutgoingEvent,
}
