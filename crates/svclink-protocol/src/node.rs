use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use svclink_transport::{Hooks, Message, Transport};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::codec::VerifierLookup;
use crate::error::ProtocolError;
use crate::event::Event;
use crate::identity::{derive_node_uuid, random_blob, topic_token, TraceContext};
use crate::signature::{
    encode_packet, parse_packet, Ed25519Signer, Signer, SIG_TYPE_ED25519, SIG_TYPE_X509,
};
use crate::types::{now_ms, Encoding, HeaderValue, Service};

/// Default presence TTL; the heartbeat interval is a third of it.
const DEFAULT_TTL: Duration = Duration::from_secs(120);

/// Key-store callback for automatic signer setup.
///
/// Called with `None` it returns the currently stored keypair (if any);
/// called with `Some(new)` it persists the new keypair.
pub type KeyStore = Arc<dyn Fn(Option<&[u8]>) -> Option<Vec<u8>> + Send + Sync>;

/// Node configuration. Name and transport are required; everything else
/// has a sensible default.
pub struct NodeConfig {
    name: String,
    uuid: Option<Uuid>,
    transport: Arc<dyn Transport>,
    auto_heartbeat: bool,
    ttl: Duration,
    signer: Option<Arc<dyn Signer>>,
    auto_signer: Option<KeyStore>,
    verifier_lookup: Option<VerifierLookup>,
    encoding: Encoding,
    event_root: String,
    auto_trace: bool,
}

impl NodeConfig {
    /// Start from a node name (preferably `fqdn@service[:instance]`) and a
    /// transport.
    pub fn new(name: impl Into<String>, transport: Arc<dyn Transport>) -> Self {
        NodeConfig {
            name: name.into(),
            uuid: None,
            transport,
            auto_heartbeat: false,
            ttl: DEFAULT_TTL,
            signer: None,
            auto_signer: None,
            verifier_lookup: None,
            encoding: Encoding::default(),
            event_root: String::new(),
            auto_trace: true,
        }
    }

    /// Explicit node UUID instead of the name-derived one.
    pub fn uuid(mut self, uuid: Uuid) -> Self {
        self.uuid = Some(uuid);
        self
    }

    /// Publish presence heartbeats automatically after connecting.
    pub fn auto_heartbeat(mut self, enabled: bool) -> Self {
        self.auto_heartbeat = enabled;
        self
    }

    /// Presence TTL; heartbeats are published every TTL/3.
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Sign outgoing events with this signer. Mutually exclusive with
    /// [`auto_signer`](Self::auto_signer).
    pub fn signer(mut self, signer: Arc<dyn Signer>) -> Self {
        self.signer = Some(signer);
        self
    }

    /// Set up Ed25519 signing automatically: load the keypair from the
    /// store, or generate one and persist it.
    pub fn auto_signer(mut self, store: KeyStore) -> Self {
        self.auto_signer = Some(store);
        self
    }

    /// How to find the verifier for a received event's creator.
    pub fn verifier_lookup(mut self, lookup: VerifierLookup) -> Self {
        self.verifier_lookup = Some(lookup);
        self
    }

    /// Envelope/body encoding override.
    pub fn encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// Prefix added to every event path (trailing `/` not required).
    pub fn event_root(mut self, root: impl Into<String>) -> Self {
        self.event_root = root.into();
        self
    }

    /// Generate a fresh trace context for every new event (on by default).
    pub fn auto_trace(mut self, enabled: bool) -> Self {
        self.auto_trace = enabled;
        self
    }
}

#[derive(Default)]
pub(crate) struct NodeState {
    pub(crate) services: BTreeMap<String, Service>,
    pub(crate) info: BTreeMap<String, HeaderValue>,
}

/// A named, identified participant that creates, signs, sends, and
/// receives events.
///
/// Constructed once at process start; the transport and signer are
/// immutable afterwards. The service registry and info map are the only
/// mutable state, guarded by a read/write lock.
pub struct Node {
    pub(crate) name: String,
    pub(crate) uuid: Uuid,
    pub(crate) ttl: Duration,
    pub(crate) state: RwLock<NodeState>,
    pub(crate) signer: Option<Arc<dyn Signer>>,
    pub(crate) verifier_lookup: Option<VerifierLookup>,
    pub(crate) encoding: Encoding,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) event_root: String,
    pub(crate) auto_trace: bool,
    pub(crate) shutdown: CancellationToken,
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.name)
            .field("uuid", &self.uuid)
            .field("ttl", &self.ttl)
            .field("encoding", &self.encoding)
            .field("event_root", &self.event_root)
            .field("auto_trace", &self.auto_trace)
            .finish_non_exhaustive()
    }
}

impl Node {
    /// Build a node from its configuration and connect the transport.
    ///
    /// The transport must not be connected beforehand — presence and
    /// last-will registration happen here. Starts the heartbeat task if
    /// enabled; it stops when [`shutdown`](Self::shutdown) is called.
    pub async fn connect(config: NodeConfig) -> Result<Arc<Node>, ProtocolError> {
        if config.name.is_empty() {
            return Err(ProtocolError::Config("node name is required".into()));
        }
        let signer = resolve_signer(config.signer, config.auto_signer)?;
        let uuid = config
            .uuid
            .unwrap_or_else(|| derive_node_uuid(&config.name));

        let node = Arc::new(Node {
            name: config.name,
            uuid,
            ttl: config.ttl,
            state: RwLock::new(NodeState::default()),
            signer,
            verifier_lookup: config.verifier_lookup,
            encoding: config.encoding,
            transport: config.transport,
            event_root: config.event_root,
            auto_trace: config.auto_trace,
            shutdown: CancellationToken::new(),
        });

        let name = node.name.clone();
        let lost_name = node.name.clone();
        let hooks = Hooks {
            on_connected: Some(Box::new(move || {
                tracing::debug!(node = %name, "transport connected");
            })),
            on_connection_lost: Some(Box::new(move |err| {
                tracing::warn!(node = %lost_name, error = %err, "transport connection lost");
            })),
        };
        node.transport
            .connect(hooks, &node.heartbeat_path())
            .await?;

        if config.auto_heartbeat {
            tokio::spawn(node.clone().heartbeat_loop());
        }
        Ok(node)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Public key of the configured signer, if any.
    pub fn public_key(&self) -> Option<Vec<u8>> {
        self.signer.as_ref().map(|s| s.public_key())
    }

    /// Full topic for a node-relative event path.
    pub fn event_path(&self, path: &str) -> String {
        if self.event_root.is_empty() {
            path.to_string()
        } else {
            format!("{}/{}", self.event_root.trim_end_matches('/'), path)
        }
    }

    /// The per-node discovery path where presence is retained.
    pub fn heartbeat_path(&self) -> String {
        self.event_path(&format!("discovery/node-{}", self.name))
    }

    /// New event stamped with this node's identity and a fresh trace
    /// context (when auto-tracing is on).
    pub fn new_event(&self) -> Event {
        let trace = if self.auto_trace {
            TraceContext::generate()
        } else {
            TraceContext::default()
        };
        self.new_event_with_trace(trace)
    }

    /// New event continuing an explicit trace context. A context with a
    /// trace id but no span id gets a fresh span id.
    pub fn new_event_with_trace(&self, trace: TraceContext) -> Event {
        let trace = if !trace.trace_id.is_empty() && trace.span_id.is_empty() {
            TraceContext::with_trace_id(trace.trace_id)
        } else {
            trace
        };
        let mut ev = Event::new(&self.name, &self.uuid.to_string(), self.encoding);
        ev.trace_id = trace.trace_id;
        ev.span_id = trace.span_id;
        ev
    }

    /// Build a reply skeleton for a received event.
    ///
    /// Inherits the trace id (with a fresh span id), copies the reply
    /// address so further hops remain possible, and carries the original's
    /// correlation id — synthesizing one from the origin's name when the
    /// original has none. Fails when there is no correlation material at
    /// all: such a reply could never be routed back.
    pub fn prepare_reply(&self, original: &Event) -> Result<Event, ProtocolError> {
        let mut reply = if original.trace_id.is_empty() {
            self.new_event()
        } else {
            self.new_event_with_trace(TraceContext::with_trace_id(original.trace_id.clone()))
        };
        reply.reply_to = original.reply_to.clone();

        if let Some(cid) = original.correlation_id() {
            let cid = cid.to_string();
            reply.set_correlation_id(&cid);
        } else {
            let origin = original
                .origin_name()
                .filter(|name| !name.is_empty())
                .map(str::to_string)
                .or_else(|| {
                    (!original.node_name.is_empty()).then(|| original.node_name.clone())
                })
                .ok_or(ProtocolError::NoCorrelation)?;
            reply.set_correlation_id(&format!("{origin}-{}", now_ms()));
        }
        Ok(reply)
    }

    /// Sign an event in place, storing the signature packet on the event.
    ///
    /// `send_event` signs automatically; this is for callers that carry
    /// events through side channels. The signature covers the encoded
    /// envelope, so the event must be prepared first.
    pub fn sign_event(&self, event: &mut Event) -> Result<(), ProtocolError> {
        let signer = self.signer.as_ref().ok_or(ProtocolError::NoSigner)?;
        if !event.is_prepared() {
            return Err(ProtocolError::Unprepared);
        }
        let data = self.encoding.encode(event)?;
        let raw = signer.sign(&data);
        if raw.len() < 8 {
            return Err(ProtocolError::SignatureTooShort { len: raw.len() });
        }
        event.signature = encode_packet(signer.sig_type(), &raw)?;
        Ok(())
    }

    /// Verify an event's stored signature against its creator's key.
    ///
    /// Re-encodes the envelope; the encoding is deterministic, so the bytes
    /// match what the creator signed. Same lookup rules as the wire codec:
    /// an unknown creator is a configuration error, not a bad signature.
    pub fn verify_event(&self, event: &Event) -> Result<(), ProtocolError> {
        let (sig_type, raw) = parse_packet(&event.signature)?;
        match sig_type {
            0 => Err(ProtocolError::InvalidSignatureType),
            SIG_TYPE_ED25519 | SIG_TYPE_X509 => {
                let no_verifier = || ProtocolError::NoVerifier {
                    node_name: event.node_name.clone(),
                    node_uuid: event.node_uuid.clone(),
                };
                let lookup = self.verifier_lookup.as_ref().ok_or_else(no_verifier)?;
                let verifier =
                    lookup(&event.node_name, &event.node_uuid).ok_or_else(no_verifier)?;
                let data = self.encoding.encode(event)?;
                if verifier.sig_type() != sig_type || !verifier.verify(&data, raw) {
                    return Err(ProtocolError::SignatureInvalid);
                }
                Ok(())
            }
            other => Err(ProtocolError::UnknownSignatureType(other)),
        }
    }

    /// Prepare, sign (when a signer is configured), and publish an event.
    pub async fn send_event(&self, path: &str, mut event: Event) -> Result<(), ProtocolError> {
        event.prepare();
        let payload = event.serialize(self.signer.as_deref())?;
        let message = self.outbound_message(self.event_path(path), &event, payload);
        self.transport.publish(message).await?;
        Ok(())
    }

    /// Publish a reply to the original event's reply address.
    ///
    /// The reply's own reply address is cleared — the conversation ends at
    /// the original sender unless it explicitly starts a new exchange.
    pub async fn send_reply(&self, original: &Event, mut reply: Event) -> Result<(), ProtocolError> {
        if original.reply_to.is_empty() {
            return Err(ProtocolError::NoReplyTo);
        }
        reply.reply_to.clear();
        reply.prepare();
        let payload = reply.serialize(self.signer.as_deref())?;
        let message = self.outbound_message(original.reply_to.clone(), &reply, payload);
        self.transport.publish(message).await?;
        Ok(())
    }

    /// Subscribe to a topic filter under the event root.
    ///
    /// Inbound messages are decoded, verified, and enriched with their
    /// transport metadata before delivery. Undecodable or badly signed
    /// messages are dropped with a warning — they never reach the
    /// application. The channel closes when the transport closes the
    /// underlying subscription.
    pub async fn subscribe(&self, filter: &str) -> Result<mpsc::Receiver<Event>, ProtocolError> {
        let (raw_tx, mut raw_rx) = mpsc::channel::<Message>(64);
        self.transport
            .subscribe(&self.event_path(filter), raw_tx)
            .await?;

        let (ev_tx, ev_rx) = mpsc::channel(64);
        let lookup = self.verifier_lookup.clone();
        let encoding = self.encoding;
        tokio::spawn(async move {
            while let Some(message) = raw_rx.recv().await {
                match event_from_message(message, lookup.as_ref(), encoding) {
                    Ok(event) => {
                        if ev_tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, "dropping undeliverable event"),
                }
            }
            // Binding closed the raw channel; dropping ev_tx closes ours.
        });
        Ok(ev_rx)
    }

    /// Randomly generated per-request reply address and its subscription.
    ///
    /// Returns the full path to advertise as an event's `reply_to` and the
    /// channel replies arrive on.
    pub async fn reply_channel(
        &self,
    ) -> Result<(String, mpsc::Receiver<Event>), ProtocolError> {
        let token = topic_token(&random_blob(16));
        let relative = format!("reply/node-{}/{}", self.name, token);
        let rx = self.subscribe(&format!("{relative}/#")).await?;
        Ok((self.event_path(&relative), rx))
    }

    /// Advertise a service in the discovery heartbeat.
    pub fn register_service(&self, name: impl Into<String>, service: Service) {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        state.services.insert(name.into(), service);
    }

    /// Snapshot of the advertised services.
    pub fn services(&self) -> BTreeMap<String, Service> {
        self.state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .services
            .clone()
    }

    /// Set an arbitrary info entry carried in the heartbeat.
    pub fn set_info(&self, key: impl Into<String>, value: impl Into<HeaderValue>) {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        state.info.insert(key.into(), value.into());
    }

    pub fn info(&self) -> BTreeMap<String, HeaderValue> {
        self.state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .info
            .clone()
    }

    /// Stop the heartbeat loop and disconnect the transport.
    pub async fn shutdown(&self) -> Result<(), ProtocolError> {
        self.shutdown.cancel();
        self.transport.disconnect().await?;
        Ok(())
    }

    fn outbound_message(&self, topic: String, event: &Event, payload: Vec<u8>) -> Message {
        Message {
            topic,
            response_topic: event.reply_to.clone(),
            correlation_data: event
                .correlation_id()
                .map(|s| s.as_bytes().to_vec())
                .unwrap_or_default(),
            content_type: self.encoding.content_type().to_string(),
            metadata: HashMap::new(),
            payload,
            retain: event.is_retained(),
            redelivered: false,
            ack: None,
        }
    }
}

/// Turn a delivered transport message into an event: decode and verify the
/// payload, then map the delivery metadata the envelope itself cannot carry.
fn event_from_message(
    mut message: Message,
    lookup: Option<&VerifierLookup>,
    encoding: Encoding,
) -> Result<Event, ProtocolError> {
    let mut event = Event::deserialize(&message.payload, lookup, encoding)?;
    event.routing_key = message.topic.clone();
    if event.reply_to.is_empty() && !message.response_topic.is_empty() {
        event.reply_to = message.response_topic.clone();
    }
    if event.correlation_id().is_none() && !message.correlation_data.is_empty() {
        let cid = String::from_utf8_lossy(&message.correlation_data).into_owned();
        event.set_correlation_id(&cid);
    }
    event.redelivered = message.redelivered;
    if let Some(gate) = message.ack.take() {
        event.attach_ack(gate);
    }
    Ok(event)
}

fn resolve_signer(
    signer: Option<Arc<dyn Signer>>,
    auto_signer: Option<KeyStore>,
) -> Result<Option<Arc<dyn Signer>>, ProtocolError> {
    match (signer, auto_signer) {
        (Some(_), Some(_)) => Err(ProtocolError::Config(
            "signer and auto_signer are mutually exclusive".into(),
        )),
        (Some(signer), None) => Ok(Some(signer)),
        (None, Some(store)) => match store(None) {
            Some(stored) => Ok(Some(Arc::new(Ed25519Signer::from_keypair_bytes(&stored)?))),
            None => {
                let signer = Ed25519Signer::generate();
                store(Some(&signer.private_key()));
                Ok(Some(Arc::new(signer)))
            }
        },
        (None, None) => Ok(None),
    }
}
