use svclink_transport::{AckMisuse, TransportError};

/// Protocol-level errors for svclink.
///
/// Wraps transport errors and adds wire-format, signature, acknowledgment,
/// and reply-routing variants. Nothing here is retried internally — every
/// error is returned to the immediate caller.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("event data too short: {len} bytes")]
    TooShort { len: usize },

    #[error("event data too short for declared signature [{sig_len} {len}]")]
    TruncatedSignature { sig_len: usize, len: usize },

    #[error("signature invalid")]
    SignatureInvalid,

    #[error("no verifier available for node {node_name} ({node_uuid})")]
    NoVerifier { node_name: String, node_uuid: String },

    #[error("signature type 0 is invalid")]
    InvalidSignatureType,

    #[error("signature type {0} unsupported")]
    UnknownSignatureType(u8),

    #[error("signature packet too short: {len} bytes")]
    SignaturePacketTooShort { len: usize },

    #[error("signature length mismatch: {declared}/{actual}")]
    SignatureLengthMismatch { declared: usize, actual: usize },

    #[error("signer defined but produced an implausibly short signature ({len} bytes)")]
    SignatureTooShort { len: usize },

    #[error("wrong key size [{len}:{want}]")]
    KeySize { len: usize, want: usize },

    #[error("cannot sign: no signer configured")]
    NoSigner,

    #[error("event is not pending acknowledgment")]
    AckNotPending,

    #[error("event has no reply address")]
    NoReplyTo,

    #[error("no correlation material to build a reply from")]
    NoCorrelation,

    #[error("event not prepared: call prepare() before serializing")]
    Unprepared,

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("deserialization error: {0}")]
    Deserialization(String),
}

impl From<AckMisuse> for ProtocolError {
    fn from(_: AckMisuse) -> Self {
        ProtocolError::AckNotPending
    }
}

impl From<rmp_serde::encode::Error> for ProtocolError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        ProtocolError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for ProtocolError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        ProtocolError::Deserialization(e.to_string())
    }
}
