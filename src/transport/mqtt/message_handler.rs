//! Pure message routing and envelope codec for MQTT events
//!
//! This module contains pure functions for classifying rumqttc events and for
//! converting envelopes to and from their MQTT payload form.

use crate::protocol::MessageEnvelope;
use crate::transport::BusError;
use rumqttc::v5::mqttbytes::v5::{Packet, SubscribeReasonCode};
use rumqttc::v5::Event;
use rumqttc::Outgoing;

/// Pure message routing decisions based on MQTT events
pub struct MessageHandler;

impl MessageHandler {
    /// Route MQTT event to appropriate handler (pure routing decision)
    pub fn route_mqtt_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(incoming) => match incoming {
                Packet::ConnAck(_) => EventRoute::ConnectionAcknowledged,
                Packet::Publish(publish) => EventRoute::MessageReceived {
                    topic: String::from_utf8_lossy(&publish.topic).to_string(),
                    payload: publish.payload.to_vec(),
                },
                Packet::Disconnect(_) => EventRoute::Disconnected,
                Packet::SubAck(suback) => EventRoute::SubscriptionConfirmed {
                    packet_id: suback.pkid,
                    accepted: Self::subscription_accepted(&suback.return_codes),
                },
                other => EventRoute::InfrastructureEvent(format!("{other:?}")),
            },
            Event::Outgoing(Outgoing::Disconnect) => EventRoute::DisconnectSent,
            Event::Outgoing(_) => EventRoute::OutgoingEvent,
        }
    }

    /// Every requested filter was granted by the broker
    pub fn subscription_accepted(return_codes: &[SubscribeReasonCode]) -> bool {
        return_codes
            .iter()
            .all(|code| matches!(code, SubscribeReasonCode::Success(_)))
    }

    /// Decode an MQTT payload into an envelope, stamping the topic it arrived on
    pub fn decode_envelope(topic: &str, payload: &[u8]) -> Result<MessageEnvelope, BusError> {
        let mut envelope: MessageEnvelope = serde_json::from_slice(payload).map_err(|e| {
            BusError::Received(format!("Failed to decode envelope on {topic}: {e}"))
        })?;
        envelope.received_topic = topic.to_string();
        Ok(envelope)
    }

    /// Encode an envelope as the MQTT payload
    pub fn encode_envelope(envelope: &MessageEnvelope) -> Result<Vec<u8>, BusError> {
        serde_json::to_vec(envelope).map_err(BusError::EnvelopeEncoding)
    }
}

/// Routing decisions for MQTT events
#[derive(Debug, Clone)]
pub enum EventRoute {
    /// Connection acknowledged - ready to publish/subscribe
    ConnectionAcknowledged,
    /// Message received on a subscribed topic
    MessageReceived { topic: String, payload: Vec<u8> },
    /// MQTT broker disconnected us
    Disconnected,
    /// Our own DISCONNECT went out
    DisconnectSent,
    /// Subscription acknowledged by the broker
    SubscriptionConfirmed { packet_id: u16, accepted: bool },
    /// Infrastructure event (PingResp, etc.)
    InfrastructureEvent(String),
    /// Outgoing event (handled automatically)
    OutgoingEvent,
}
