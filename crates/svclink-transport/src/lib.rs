//! svclink transport contract.
//!
//! Defines the capability surface the protocol core publishes through and
//! subscribes from: [`Message`], [`Hooks`], the [`Transport`] trait, and the
//! single-use [`AckGate`] bridging broker-level acknowledgment. Concrete
//! broker bindings (MQTT, AMQP) live outside this workspace; the in-memory
//! [`MemoryTransport`] is the reference binding and the one tests run on.

mod ack;
mod error;
mod memory;
mod message;

pub use ack::{AckGate, AckMisuse, AckSignal};
pub use error::TransportError;
pub use memory::MemoryTransport;
pub use message::Message;

use tokio::sync::mpsc;

/// Connection lifecycle callbacks a binding invokes.
#[derive(Default)]
pub struct Hooks {
    /// Called once the broker connection is up (and after each reconnect,
    /// for bindings that reconnect internally).
    pub on_connected: Option<Box<dyn Fn() + Send + Sync>>,
    /// Called when the connection is lost with the terminal error.
    pub on_connection_lost: Option<Box<dyn Fn(&TransportError) + Send + Sync>>,
}

impl std::fmt::Debug for Hooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hooks")
            .field("on_connected", &self.on_connected.is_some())
            .field("on_connection_lost", &self.on_connection_lost.is_some())
            .finish()
    }
}

/// A pub/sub broker binding.
///
/// Implementations own reconnection, timeouts, and retry policy — none of
/// that is retried above this trait. A subscription channel being closed is
/// the sentinel for "no more messages will arrive on this subscription".
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Connect to the broker. Called exactly once, before any other method.
    ///
    /// `presence_topic` is where the binding should register a last-will
    /// message that clears the node's retained presence on ungraceful
    /// disconnect.
    async fn connect(&self, hooks: Hooks, presence_topic: &str) -> Result<(), TransportError>;

    /// Publish one message. May block until the broker accepts it.
    async fn publish(&self, message: Message) -> Result<(), TransportError>;

    /// Register a subscription pushing inbound messages onto `sender`.
    ///
    /// The binding closes the channel when the subscription can no longer
    /// receive (for example after a disconnect).
    async fn subscribe(
        &self,
        filter: &str,
        sender: mpsc::Sender<Message>,
    ) -> Result<(), TransportError>;

    /// Publish a retained presence message to the registered presence topic.
    async fn heartbeat_message(&self, message: Message) -> Result<(), TransportError>;

    /// Tear down the connection gracefully (no last-will is sent).
    async fn disconnect(&self) -> Result<(), TransportError>;
}
