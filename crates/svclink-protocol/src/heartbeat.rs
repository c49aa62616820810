//! Presence heartbeats and discovery payloads.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::event::Event;
use crate::node::Node;
use crate::signature::encode_packet;
use crate::types::{now_ms, HeaderValue, Service};

/// Discovery payload a node publishes (retained) on its presence topic.
///
/// Listeners reconstruct a directory of live nodes from these; the
/// `node-pubkey` packet lets them verify the node's signed events without
/// out-of-band key exchange.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Heartbeat {
    #[serde(rename = "node-name")]
    pub node_name: String,
    #[serde(rename = "node-uuid")]
    pub node_uuid: String,
    #[serde(rename = "node-info", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_info: BTreeMap<String, HeaderValue>,
    /// Hex-encoded `<type:1><len:1><key>` packet; empty when unsigned.
    #[serde(rename = "node-pubkey", default, skip_serializing_if = "String::is_empty")]
    pub node_pubkey: String,
    /// When this heartbeat was generated (Unix ms).
    #[serde(rename = "ts")]
    pub ts: u64,
    /// Seconds between heartbeats.
    #[serde(rename = "hb-interval")]
    pub hb_interval: u64,
    /// Seconds after which a silent node should be considered gone.
    #[serde(rename = "ttl")]
    pub ttl: u64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub services: BTreeMap<String, Service>,
}

impl Node {
    /// Build the current presence event: a snapshot of the registry plus
    /// identity, public key, and liveness parameters, retained for one TTL.
    pub fn new_heartbeat(&self) -> Result<Event, ProtocolError> {
        let (info, services) = {
            let state = self.state.read().unwrap_or_else(|e| e.into_inner());
            (state.info.clone(), state.services.clone())
        };
        let node_pubkey = match &self.signer {
            Some(signer) => hex::encode(encode_packet(signer.sig_type(), &signer.public_key())?),
            None => String::new(),
        };
        let hb = Heartbeat {
            node_name: self.name.clone(),
            node_uuid: self.uuid.to_string(),
            node_info: info,
            node_pubkey,
            ts: now_ms(),
            hb_interval: (self.ttl / 3).as_secs(),
            ttl: self.ttl.as_secs(),
            services,
        };

        let mut event = self.new_event();
        event.marshal(&hb)?;
        event.retain_for(self.ttl);
        event.prepare();
        Ok(event)
    }

    /// Publish one heartbeat on the presence topic.
    pub async fn publish_heartbeat(&self) -> Result<(), ProtocolError> {
        let event = self.new_heartbeat()?;
        let payload = event.serialize(self.signer.as_deref())?;
        let mut message = svclink_transport::Message::to_topic("", payload);
        message.content_type = self.encoding.content_type().to_string();
        message.retain = true;
        self.transport.heartbeat_message(message).await?;
        Ok(())
    }

    /// Periodic heartbeat publisher, spawned by `Node::connect` when
    /// auto-heartbeat is enabled.
    ///
    /// A failed publish is logged and the loop keeps going; transient
    /// broker trouble must not kill presence for good. Stops when the
    /// node's shutdown token is cancelled.
    pub(crate) async fn heartbeat_loop(self: Arc<Self>) {
        let interval = self.ttl / 3;
        tracing::debug!(node = %self.name, ?interval, "heartbeat loop started");
        loop {
            if let Err(e) = self.publish_heartbeat().await {
                tracing::warn!(node = %self.name, error = %e, "heartbeat publish failed");
            }
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }
        tracing::debug!(node = %self.name, "heartbeat loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeConfig;
    use crate::signature::{parse_packet, Ed25519Signer, Verifier, SIG_TYPE_ED25519};
    use crate::types::Encoding;
    use std::time::Duration;
    use svclink_transport::MemoryTransport;

    #[tokio::test]
    async fn heartbeat_snapshots_registry_and_identity() {
        let node = Node::connect(
            NodeConfig::new("hbnode", Arc::new(MemoryTransport::new()))
                .ttl(Duration::from_secs(30)),
        )
        .await
        .unwrap();
        node.register_service(
            "echo",
            Service {
                path: "rpc/echo".into(),
                description: "echoes requests".into(),
                defaults: None,
            },
        );
        node.set_info("version", "1.2.0");

        let event = node.new_heartbeat().unwrap();
        assert!(event.is_prepared());
        assert!(event.is_retained());

        let hb: Heartbeat = event.unmarshal().unwrap();
        assert_eq!(hb.node_name, "hbnode");
        assert_eq!(hb.node_uuid, node.uuid().to_string());
        assert_eq!(hb.ttl, 30);
        assert_eq!(hb.hb_interval, 10);
        assert!(hb.ts > 0);
        assert_eq!(hb.services["echo"].path, "rpc/echo");
        assert_eq!(
            hb.node_info.get("version").and_then(HeaderValue::as_str),
            Some("1.2.0")
        );
        assert!(hb.node_pubkey.is_empty(), "unsigned node announces no key");
    }

    #[tokio::test]
    async fn heartbeat_announces_public_key_packet() {
        let signer = Arc::new(Ed25519Signer::generate());
        let pubkey = signer.public_key();
        let node = Node::connect(
            NodeConfig::new("keyed", Arc::new(MemoryTransport::new())).signer(signer),
        )
        .await
        .unwrap();

        let hb: Heartbeat = node.new_heartbeat().unwrap().unmarshal().unwrap();
        let packet = hex::decode(&hb.node_pubkey).expect("hex packet");
        let (sig_type, key) = parse_packet(&packet).expect("valid packet");
        assert_eq!(sig_type, SIG_TYPE_ED25519);
        assert_eq!(key, &pubkey[..]);
    }

    #[tokio::test]
    async fn publish_heartbeat_lands_retained_on_presence_topic() {
        let tr = Arc::new(MemoryTransport::new());
        let node = Node::connect(NodeConfig::new("present", tr.clone()))
            .await
            .unwrap();

        node.publish_heartbeat().await.unwrap();

        let payload = tr
            .retained_payload("discovery/node-present")
            .expect("retained presence");
        let event = Event::deserialize(&payload, None, Encoding::MsgPack).unwrap();
        let hb: Heartbeat = event.unmarshal().unwrap();
        assert_eq!(hb.node_name, "present");
    }

    #[tokio::test]
    async fn auto_heartbeat_repeats_until_shutdown() {
        let tr = Arc::new(MemoryTransport::new());
        let node = Node::connect(
            NodeConfig::new("looper", tr.clone())
                .auto_heartbeat(true)
                .ttl(Duration::from_millis(150)),
        )
        .await
        .unwrap();

        tokio::time::sleep(Duration::from_millis(180)).await;
        let before = tr.published().len();
        assert!(before >= 2, "expected repeated heartbeats, got {before}");

        node.shutdown().await.unwrap();
        tokio::time::sleep(Duration::from_millis(120)).await;
        // One in-flight publish may still land after cancel; no more after.
        let after = tr.published().len();
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(tr.published().len(), after, "loop must stop after shutdown");
    }
}
