/// Node identity and trace/span id generation.
use rand::RngCore;
use uuid::Uuid;

/// Process-wide namespace for deterministic node UUID derivation.
/// Read-only; changing it would break identity stability across releases.
pub const NODE_NAMESPACE: Uuid = uuid::uuid!("63082cd1-0f91-48cd-923a-f1523a26549b");

/// Trace id length in bytes (W3C-style 128-bit trace).
pub const TRACE_ID_LEN: usize = 16;
/// Span id length in bytes.
pub const SPAN_ID_LEN: usize = 8;

/// Derive a node UUID from its name. Pure: same name, same UUID.
pub fn derive_node_uuid(name: &str) -> Uuid {
    Uuid::new_v5(&NODE_NAMESPACE, name.as_bytes())
}

/// Trace context propagated across causally related events.
///
/// Empty ids mean tracing is disabled for the event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TraceContext {
    pub trace_id: Vec<u8>,
    pub span_id: Vec<u8>,
}

impl TraceContext {
    /// Fresh trace: new 16-byte trace id and 8-byte span id.
    pub fn generate() -> Self {
        TraceContext {
            trace_id: random_blob(TRACE_ID_LEN),
            span_id: random_blob(SPAN_ID_LEN),
        }
    }

    /// Continue an existing trace with a fresh span id.
    pub fn with_trace_id(trace_id: Vec<u8>) -> Self {
        let span_id = if trace_id.is_empty() {
            Vec::new()
        } else {
            random_blob(SPAN_ID_LEN)
        };
        TraceContext { trace_id, span_id }
    }

    pub fn is_empty(&self) -> bool {
        self.trace_id.is_empty()
    }
}

/// Cryptographically random bytes.
pub(crate) fn random_blob(n: usize) -> Vec<u8> {
    let mut buf = vec![0u8; n];
    rand::rng().fill_bytes(&mut buf);
    buf
}

/// Render random bytes as a topic-safe token (hex: only `[0-9a-f]`).
pub(crate) fn topic_token(data: &[u8]) -> String {
    hex::encode(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_uuid_is_deterministic() {
        let a = derive_node_uuid("sensor@house1");
        let b = derive_node_uuid("sensor@house1");
        assert_eq!(a, b);
        assert_eq!(a.get_version_num(), 5);
    }

    #[test]
    fn derived_uuid_differs_per_name() {
        assert_ne!(derive_node_uuid("alpha"), derive_node_uuid("beta"));
    }

    #[test]
    fn generated_trace_has_correct_lengths() {
        let ctx = TraceContext::generate();
        assert_eq!(ctx.trace_id.len(), TRACE_ID_LEN);
        assert_eq!(ctx.span_id.len(), SPAN_ID_LEN);
        assert!(!ctx.is_empty());
    }

    #[test]
    fn with_trace_id_generates_fresh_span() {
        let trace = vec![7u8; TRACE_ID_LEN];
        let a = TraceContext::with_trace_id(trace.clone());
        let b = TraceContext::with_trace_id(trace.clone());
        assert_eq!(a.trace_id, trace);
        assert_eq!(a.span_id.len(), SPAN_ID_LEN);
        assert_ne!(a.span_id, b.span_id, "span ids must be regenerated");
    }

    #[test]
    fn empty_trace_id_stays_empty() {
        let ctx = TraceContext::with_trace_id(Vec::new());
        assert!(ctx.is_empty());
        assert!(ctx.span_id.is_empty());
    }

    #[test]
    fn topic_token_is_topic_safe() {
        let token = topic_token(&random_blob(16));
        assert_eq!(token.len(), 32);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
        assert!(!token.contains('/'));
    }
}
