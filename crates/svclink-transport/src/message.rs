use std::collections::HashMap;

use crate::ack::AckGate;

/// The unit a transport carries: an opaque payload plus the routing and
/// delivery metadata every supported broker can express.
///
/// Outbound messages are built by the protocol layer; inbound messages are
/// built by the transport binding, which fills the delivery-side fields
/// (`redelivered`, `ack`) from the broker's own primitives.
#[derive(Debug, Default)]
pub struct Message {
    /// Destination topic / routing path.
    pub topic: String,
    /// Where replies to this message should be published. Empty if none.
    pub response_topic: String,
    /// Broker-level correlation token. Empty if none.
    pub correlation_data: Vec<u8>,
    /// MIME type of `payload`.
    pub content_type: String,
    /// Transport-specific key/value metadata (user properties, AMQP headers).
    pub metadata: HashMap<String, String>,
    /// Opaque payload bytes.
    pub payload: Vec<u8>,
    /// Ask the broker to retain this message for late subscribers.
    pub retain: bool,
    /// Set by the binding when the broker flags this delivery as a redelivery.
    pub redelivered: bool,
    /// Present when the delivery requires manual acknowledgment.
    pub ack: Option<AckGate>,
}

impl Message {
    /// Build an outbound message with just a topic and payload.
    pub fn to_topic(topic: impl Into<String>, payload: Vec<u8>) -> Self {
        Message {
            topic: topic.into(),
            payload,
            ..Message::default()
        }
    }

    /// Copy of this message for fan-out delivery. The ack gate is not
    /// copied — each delivery owns its own gate or none at all.
    pub fn fan_copy(&self) -> Self {
        Message {
            topic: self.topic.clone(),
            response_topic: self.response_topic.clone(),
            correlation_data: self.correlation_data.clone(),
            content_type: self.content_type.clone(),
            metadata: self.metadata.clone(),
            payload: self.payload.clone(),
            retain: self.retain,
            redelivered: self.redelivered,
            ack: None,
        }
    }
}
