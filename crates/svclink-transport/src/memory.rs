/// In-memory transport — the reference binding.
///
/// A single process-local "broker": topic routing with MQTT-style `+`/`#`
/// wildcards, retained messages, and a last-will registered at connect time.
/// Used by the test suite and as the template for real broker bindings.
use std::collections::BTreeMap;
use std::sync::Mutex;

use tokio::sync::{mpsc, oneshot};

use crate::ack::{AckGate, AckSignal};
use crate::error::TransportError;
use crate::message::Message;
use crate::{Hooks, Transport};

/// One publish as observed by the broker, for test inspection.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishRecord {
    pub topic: String,
    pub payload: Vec<u8>,
    pub retain: bool,
}

struct Subscription {
    filter: String,
    sender: mpsc::Sender<Message>,
}

#[derive(Default)]
struct Inner {
    connected: bool,
    presence_topic: String,
    hooks: Hooks,
    subscriptions: Vec<Subscription>,
    retained: BTreeMap<String, Message>,
    published: Vec<PublishRecord>,
}

#[derive(Default)]
pub struct MemoryTransport {
    inner: Mutex<Inner>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        MemoryTransport::default()
    }

    /// Deliver a message as if it arrived from a remote peer.
    ///
    /// The first matching subscription receives the message itself
    /// (including its ack gate, if any); further matches get gate-less
    /// copies.
    pub async fn inject(&self, message: Message) {
        let senders: Vec<mpsc::Sender<Message>> = {
            let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            inner
                .subscriptions
                .iter()
                .filter(|s| filter_matches(&s.filter, &message.topic))
                .map(|s| s.sender.clone())
                .collect()
        };

        let template = message.fan_copy();
        let mut original = Some(message);
        for tx in senders {
            let msg = match original.take() {
                Some(m) => m,
                None => template.fan_copy(),
            };
            if let Err(mpsc::error::SendError(m)) = tx.send(msg).await {
                // Subscriber gone; if that was the original, offer it to
                // the next match so the ack gate is not lost.
                if m.ack.is_some() {
                    original = Some(m);
                }
            }
        }

        self.prune_closed();
    }

    /// Deliver a message that requires manual acknowledgment and return the
    /// receiver a broker-side consumer would wait on.
    pub async fn inject_with_ack(&self, mut message: Message) -> oneshot::Receiver<AckSignal> {
        let (gate, rx) = AckGate::pair();
        message.ack = Some(gate);
        self.inject(message).await;
        rx
    }

    /// Every publish accepted so far, oldest first.
    pub fn published(&self) -> Vec<PublishRecord> {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .published
            .clone()
    }

    /// Retained payload currently stored for `topic`, if any.
    pub fn retained_payload(&self, topic: &str) -> Option<Vec<u8>> {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retained
            .get(topic)
            .map(|m| m.payload.clone())
    }

    /// Simulate an ungraceful connection loss: the registered last-will
    /// clears the retained presence message, subscription channels close,
    /// and the connection-lost hook fires.
    pub async fn drop_connection(&self, reason: &str) {
        let err = TransportError::ConnectionLost(reason.to_string());
        let (hook_set, presence) = {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            inner.connected = false;
            // Last-will: an empty retained publish clears the presence topic.
            let presence = inner.presence_topic.clone();
            inner.retained.remove(&presence);
            inner.subscriptions.clear();
            (inner.hooks.on_connection_lost.is_some(), presence)
        };
        tracing::debug!(topic = %presence, "connection dropped, presence cleared");
        if hook_set {
            let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(hook) = &inner.hooks.on_connection_lost {
                hook(&err);
            }
        }
    }

    fn prune_closed(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.subscriptions.retain(|s| !s.sender.is_closed());
    }

    fn record_and_retain(&self, message: &Message) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.published.push(PublishRecord {
            topic: message.topic.clone(),
            payload: message.payload.clone(),
            retain: message.retain,
        });
        if message.retain {
            if message.payload.is_empty() {
                // MQTT semantics: empty retained payload clears the slot.
                inner.retained.remove(&message.topic);
            } else {
                inner
                    .retained
                    .insert(message.topic.clone(), message.fan_copy());
            }
        }
    }
}

#[async_trait::async_trait]
impl Transport for MemoryTransport {
    async fn connect(&self, hooks: Hooks, presence_topic: &str) -> Result<(), TransportError> {
        let connected_hook_set = {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            inner.connected = true;
            inner.presence_topic = presence_topic.to_string();
            inner.hooks = hooks;
            inner.hooks.on_connected.is_some()
        };
        if connected_hook_set {
            let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(hook) = &inner.hooks.on_connected {
                hook();
            }
        }
        Ok(())
    }

    async fn publish(&self, message: Message) -> Result<(), TransportError> {
        if !self.inner.lock().unwrap_or_else(|e| e.into_inner()).connected {
            return Err(TransportError::NotConnected);
        }
        self.record_and_retain(&message);
        self.inject(message).await;
        Ok(())
    }

    async fn subscribe(
        &self,
        filter: &str,
        sender: mpsc::Sender<Message>,
    ) -> Result<(), TransportError> {
        let retained: Vec<Message> = {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            if !inner.connected {
                return Err(TransportError::NotConnected);
            }
            let matches = inner
                .retained
                .values()
                .filter(|m| filter_matches(filter, &m.topic))
                .map(Message::fan_copy)
                .collect();
            inner.subscriptions.push(Subscription {
                filter: filter.to_string(),
                sender: sender.clone(),
            });
            matches
        };
        for msg in retained {
            if sender.send(msg).await.is_err() {
                break;
            }
        }
        Ok(())
    }

    async fn heartbeat_message(&self, mut message: Message) -> Result<(), TransportError> {
        let presence = {
            let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            if !inner.connected {
                return Err(TransportError::NotConnected);
            }
            inner.presence_topic.clone()
        };
        message.topic = presence;
        message.retain = true;
        self.publish(message).await
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.connected = false;
        // Graceful shutdown: no last-will, subscription channels just close.
        inner.subscriptions.clear();
        Ok(())
    }
}

/// MQTT-style topic filter matching: `+` matches one level, a trailing `#`
/// matches the remainder (including zero levels).
fn filter_matches(filter: &str, topic: &str) -> bool {
    let mut f = filter.split('/');
    let mut t = topic.split('/');
    loop {
        match (f.next(), t.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => continue,
            (Some(fl), Some(tl)) if fl == tl => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}
