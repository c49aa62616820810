/// Errors returned by a transport binding.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("publish to {topic} failed: {reason}")]
    Publish { topic: String, reason: String },

    #[error("subscribe to {filter} failed: {reason}")]
    Subscribe { filter: String, reason: String },

    #[error("transport is not connected")]
    NotConnected,

    #[error("connection lost: {0}")]
    ConnectionLost(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_publish() {
        let err = TransportError::Publish {
            topic: "events/x".into(),
            reason: "broker gone".into(),
        };
        assert_eq!(err.to_string(), "publish to events/x failed: broker gone");
    }

    #[test]
    fn display_not_connected() {
        assert_eq!(
            TransportError::NotConnected.to_string(),
            "transport is not connected"
        );
    }
}
