use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use svclink_transport::AckGate;

use crate::error::ProtocolError;
use crate::types::{header, now_ms, Encoding, HeaderValue};

/// The message envelope exchanged between nodes.
///
/// Wire fields are carried in the structured encoding; the signature and
/// the transport-observed fields (`redelivered`, `needs_ack`, routing key)
/// travel outside it and are never part of the signed payload.
#[derive(Debug, Serialize, Deserialize)]
pub struct Event {
    /// 16-byte trace id; empty when tracing is disabled.
    #[serde(rename = "trace_id")]
    pub trace_id: Vec<u8>,
    /// 8-byte span id, regenerated per event.
    #[serde(rename = "span_id")]
    pub span_id: Vec<u8>,
    /// UUID of the creating node.
    #[serde(rename = "nuuid")]
    pub node_uuid: String,
    /// Name of the creating node.
    #[serde(rename = "node")]
    pub node_name: String,
    /// Creation timestamp (Unix ms). 0 until `prepare()` runs.
    #[serde(rename = "ts")]
    pub ts: u64,
    /// Reply address. Empty means this is not an RPC-style event.
    #[serde(rename = "rt")]
    pub reply_to: String,
    /// Protocol metadata headers.
    #[serde(rename = "headers")]
    pub headers: BTreeMap<String, HeaderValue>,
    /// Opaque encoded payload. Only meaningful after explicit marshaling.
    #[serde(rename = "b")]
    pub body: Vec<u8>,

    /// Typed signature packet. Empty means unsigned. Carried in the wire
    /// prefix, never inside the encoded envelope.
    #[serde(skip)]
    pub signature: Vec<u8>,

    // Transport-only fields, filled by the receiving binding.
    #[serde(skip)]
    pub redelivered: bool,
    #[serde(skip)]
    pub needs_ack: bool,
    /// Retain on the broker until this timestamp (Unix ms).
    #[serde(skip)]
    pub retain_until: Option<u64>,
    /// Topic/routing key the transport actually delivered this on.
    #[serde(skip)]
    pub routing_key: String,

    #[serde(skip)]
    pub(crate) encoding: Encoding,
    #[serde(skip)]
    ack_gate: Option<AckGate>,
}

impl Event {
    /// Blank event stamped with its creator's identity.
    ///
    /// Normally built through `Node::new_event`, which also fills the trace
    /// context and the node's configured encoding.
    pub fn new(node_name: &str, node_uuid: &str, encoding: Encoding) -> Self {
        let mut headers = BTreeMap::new();
        headers.insert(header::NODE_NAME.to_string(), HeaderValue::from(node_name));
        headers.insert(header::NODE_UUID.to_string(), HeaderValue::from(node_uuid));
        Event {
            trace_id: Vec::new(),
            span_id: Vec::new(),
            node_uuid: node_uuid.to_string(),
            node_name: node_name.to_string(),
            ts: 0,
            reply_to: String::new(),
            headers,
            body: Vec::new(),
            signature: Vec::new(),
            redelivered: false,
            needs_ack: false,
            retain_until: None,
            routing_key: String::new(),
            encoding,
            ack_gate: None,
        }
    }

    /// Encode `value` with the configured encoding and store it as the body.
    pub fn marshal<T: Serialize>(&mut self, value: &T) -> Result<(), ProtocolError> {
        self.body = self.encoding.encode(value)?;
        Ok(())
    }

    /// Decode the body into a structured value.
    pub fn unmarshal<T: serde::de::DeserializeOwned>(&self) -> Result<T, ProtocolError> {
        self.encoding.decode(&self.body)
    }

    /// Compute the content hash and creation timestamp, once.
    ///
    /// Idempotent: values already present are never recomputed, so a relayed
    /// event keeps its original hash and timestamp. Must run (directly or
    /// via send) before wire serialization.
    pub fn prepare(&mut self) {
        if !self.headers.contains_key(header::SHA256) {
            let digest = Sha256::digest(&self.body);
            self.headers.insert(
                header::SHA256.to_string(),
                HeaderValue::Str(hex::encode(digest)),
            );
        }
        if self.ts == 0 {
            self.ts = now_ms();
        }
        self.headers
            .entry(header::TS.to_string())
            .or_insert(HeaderValue::Ts(self.ts));
    }

    /// Whether `prepare()` has run.
    pub fn is_prepared(&self) -> bool {
        self.headers.contains_key(header::SHA256) && self.headers.contains_key(header::TS)
    }

    pub fn header(&self, key: &str) -> Option<&HeaderValue> {
        self.headers.get(key)
    }

    pub fn set_header(&mut self, key: &str, value: impl Into<HeaderValue>) {
        self.headers.insert(key.to_string(), value.into());
    }

    /// Hex SHA-256 of the body, present after `prepare()`.
    pub fn content_hash(&self) -> Option<&str> {
        self.headers.get(header::SHA256)?.as_str()
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.headers.get(header::CORRELATION_ID)?.as_str()
    }

    pub fn set_correlation_id(&mut self, id: &str) {
        self.set_header(header::CORRELATION_ID, id);
    }

    /// Creator's name as carried in the headers (survives relaying even if
    /// intermediate hops rewrite the envelope fields).
    pub fn origin_name(&self) -> Option<&str> {
        self.headers.get(header::NODE_NAME)?.as_str()
    }

    /// Ask the broker to retain this event for `ttl` past now.
    pub fn retain_for(&mut self, ttl: Duration) {
        self.retain_until = Some(now_ms() + ttl.as_millis() as u64);
    }

    /// Whether the retention window is still open.
    pub fn is_retained(&self) -> bool {
        self.retain_until.is_some_and(|until| until > now_ms())
    }

    /// Attach the single-use acknowledgment gate. Done by the receiving
    /// side for deliveries that require manual acknowledgment.
    pub fn attach_ack(&mut self, gate: AckGate) {
        self.ack_gate = Some(gate);
        self.needs_ack = true;
    }

    /// Confirm processing. Harmless on an auto-ack or already-resolved event.
    pub fn ack(&self) {
        if let Some(gate) = &self.ack_gate {
            gate.ack();
        }
    }

    /// Reject processing; `drop = false` asks for a requeue.
    ///
    /// Nacking an event that is not pending acknowledgment — auto-ack, or
    /// already resolved — is a caller bug and returns an error.
    pub fn nack(&self, drop: bool) -> Result<(), ProtocolError> {
        match &self.ack_gate {
            Some(gate) => gate.nack(drop).map_err(Into::into),
            None => Err(ProtocolError::AckNotPending),
        }
    }
}

/// Equality over the wire-carried envelope only; signature and
/// transport-side state are deliberately excluded.
impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.trace_id == other.trace_id
            && self.span_id == other.span_id
            && self.node_uuid == other.node_uuid
            && self.node_name == other.node_name
            && self.ts == other.ts
            && self.reply_to == other.reply_to
            && self.headers == other.headers
            && self.body == other.body
    }
}
