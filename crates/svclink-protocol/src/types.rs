use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// Well-known header keys.
pub mod header {
    /// Name of the node that created the event.
    pub const NODE_NAME: &str = "node-name";
    /// UUID of the node that created the event.
    pub const NODE_UUID: &str = "node-uuid";
    /// Token linking a reply back to its originating request.
    pub const CORRELATION_ID: &str = "correlation-id";
    /// Creation timestamp, set by `prepare()`.
    pub const TS: &str = "ts";
    /// Hex SHA-256 of the event body, set by `prepare()`.
    pub const SHA256: &str = "sha256";
}

/// A typed header value.
///
/// Replaces the dynamic string-to-anything bag with a closed union the
/// compiler can check. Nested maps cover structured protocol metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HeaderValue {
    Str(String),
    Int(i64),
    Float(f64),
    /// Unix timestamp in milliseconds.
    Ts(u64),
    Map(BTreeMap<String, HeaderValue>),
}

impl HeaderValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            HeaderValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            HeaderValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            HeaderValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_ts(&self) -> Option<u64> {
        match self {
            HeaderValue::Ts(t) => Some(*t),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, HeaderValue>> {
        match self {
            HeaderValue::Map(m) => Some(m),
            _ => None,
        }
    }
}

impl From<&str> for HeaderValue {
    fn from(s: &str) -> Self {
        HeaderValue::Str(s.to_string())
    }
}

impl From<String> for HeaderValue {
    fn from(s: String) -> Self {
        HeaderValue::Str(s)
    }
}

impl From<i64> for HeaderValue {
    fn from(i: i64) -> Self {
        HeaderValue::Int(i)
    }
}

impl From<f64> for HeaderValue {
    fn from(f: f64) -> Self {
        HeaderValue::Float(f)
    }
}

/// Service descriptor a node advertises through its heartbeat.
///
/// Purely declarative; discovery listeners decide what to do with it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Service {
    /// Path relative to the node's event root.
    pub path: String,
    /// Human-readable description.
    pub description: String,
    /// Optional default parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub defaults: Option<HeaderValue>,
}

/// Structured encoding for event envelopes and bodies.
///
/// MessagePack is the default: compact and deterministic, which the
/// signature scheme depends on. JSON is the debug-friendly alternate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Encoding {
    #[default]
    MsgPack,
    Json,
}

impl Encoding {
    pub fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError> {
        match self {
            Encoding::MsgPack => rmp_serde::to_vec_named(value).map_err(Into::into),
            Encoding::Json => {
                serde_json::to_vec(value).map_err(|e| ProtocolError::Serialization(e.to_string()))
            }
        }
    }

    pub fn decode<T: serde::de::DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError> {
        match self {
            Encoding::MsgPack => rmp_serde::from_slice(data).map_err(Into::into),
            Encoding::Json => serde_json::from_slice(data)
                .map_err(|e| ProtocolError::Deserialization(e.to_string())),
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            Encoding::MsgPack => "application/msgpack",
            Encoding::Json => "application/json",
        }
    }
}

/// Current Unix time in milliseconds.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
