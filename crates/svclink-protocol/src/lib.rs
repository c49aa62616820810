//! Svclink protocol layer.
//!
//! Signed, traceable, self-describing events over any pub/sub transport
//! implementing the `svclink-transport` contract.
//!
//! Wire format: `<sig_len:1><signature packet><encoded envelope>`,
//! MessagePack (compact binary) by default.
//! Crypto: Ed25519 signatures, pluggable via the `Signer`/`Verifier` traits.

pub mod codec;
pub mod error;
pub mod event;
pub mod heartbeat;
pub mod identity;
pub mod node;
pub mod signature;
pub mod types;

pub use codec::VerifierLookup;
pub use error::ProtocolError;
pub use event::Event;
pub use heartbeat::Heartbeat;
pub use identity::{derive_node_uuid, TraceContext, NODE_NAMESPACE, SPAN_ID_LEN, TRACE_ID_LEN};
pub use node::{KeyStore, Node, NodeConfig};
pub use signature::{
    encode_packet, parse_packet, Ed25519Signer, Ed25519Verifier, Signer, Verifier,
    SIG_TYPE_ED25519, SIG_TYPE_X509,
};
pub use types::{header, now_ms, Encoding, HeaderValue, Service};

pub use svclink_transport::{
    AckGate, AckSignal, Hooks, MemoryTransport, Message, Transport, TransportError,
};
