//! Store-and-forward gossip overlay (spec §4.4): end-to-end-encrypted
//! mailbox delivery across connected peers, bounded by hop count and TTL.
//! Avoids a circular dependency on `lib-p2p` by routing outbound hops
//! through a narrow [`GossipPeerSender`] capability handle (spec §9) rather
//! than the full P2P manager.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use rsa::RsaPrivateKey;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex};

use lib_identity::NodeId;
use lib_wire::Envelope;

use crate::TransportError;

pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 3600);
pub const DEFAULT_MAX_HOPS: u8 = 5;
pub const DEFAULT_FANOUT: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Normal,
    High,
}

/// A gossip message as it crosses the wire: the payload is already
/// end-to-end encrypted for `destination` (spec §4.4, §8 S6) — intermediate
/// hops cannot read it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GossipMessage {
    pub msg_id: String,
    pub source: String,
    pub destination: String,
    /// Base64 of the [`lib_crypto`] hybrid-encryption blob.
    pub payload: String,
    pub priority: Priority,
    pub expires_unix: u64,
    pub max_hops: u8,
    pub hops_seen: Vec<String>,
}

/// Capability handle for emitting a gossip message to one connected peer,
/// implemented by `lib-p2p` and injected here rather than depending on it.
#[async_trait]
pub trait GossipPeerSender: Send + Sync {
    /// The NodeIds of peers currently reachable for a forwarding hop.
    async fn connected_peer_ids(&self) -> Vec<NodeId>;
    /// Best-effort send of a raw gossip envelope to `peer`.
    async fn send_gossip(&self, peer: &NodeId, message: &GossipMessage);
}

/// Resolves a destination's certificate for hybrid encryption: local cache
/// first, then the DHT under `"cert:" + destination` (spec §4.4).
#[async_trait]
pub trait CertResolver: Send + Sync {
    async fn resolve(&self, node_id: &NodeId) -> Option<rsa::RsaPublicKey>;
}

struct SeenEntry {
    first_seen: std::time::Instant,
}

pub struct GossipOverlay {
    self_id: NodeId,
    private_key: RsaPrivateKey,
    fanout: usize,
    seen: Mutex<HashMap<String, SeenEntry>>,
    inboxes: Mutex<HashMap<NodeId, mpsc::UnboundedSender<Envelope>>>,
    peer_sender: Arc<dyn GossipPeerSender>,
    cert_resolver: Arc<dyn CertResolver>,
}

impl GossipOverlay {
    pub fn new(
        self_id: NodeId,
        private_key: RsaPrivateKey,
        peer_sender: Arc<dyn GossipPeerSender>,
        cert_resolver: Arc<dyn CertResolver>,
    ) -> Self {
        Self {
            self_id,
            private_key,
            fanout: DEFAULT_FANOUT,
            seen: Mutex::new(HashMap::new()),
            inboxes: Mutex::new(HashMap::new()),
            peer_sender,
            cert_resolver,
        }
    }

    /// Registers an inbox for a local "connection" over gossip, so a
    /// [`crate::PeerConnection`]-style reader can await delivered envelopes.
    pub async fn register_inbox(&self, conversation_peer: NodeId) -> mpsc::UnboundedReceiver<Envelope> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inboxes.lock().await.insert(conversation_peer, tx);
        rx
    }

    /// Encrypts `message` for `destination` and injects it into the overlay
    /// via any currently connected peer (spec §4.5 "gossip (mailbox-style)").
    pub async fn emit(&self, destination: &NodeId, message: &Envelope) -> Result<(), TransportError> {
        let public_key = self
            .cert_resolver
            .resolve(destination)
            .await
            .ok_or_else(|| TransportError::HandshakeFailed(format!("no certificate known for {destination}")))?;

        let plaintext = serde_json::to_vec(message).map_err(lib_wire::WireError::InvalidJson)?;
        let blob = lib_crypto::hybrid_encrypt(&plaintext, &public_key)
            .map_err(|e| TransportError::HandshakeFailed(e.to_string()))?;

        use base64::Engine;
        let gossip_message = GossipMessage {
            msg_id: new_msg_id(),
            source: self.self_id.as_str().to_string(),
            destination: destination.as_str().to_string(),
            payload: base64::engine::general_purpose::STANDARD.encode(blob),
            priority: Priority::Normal,
            expires_unix: now_unix() + DEFAULT_TTL.as_secs(),
            max_hops: DEFAULT_MAX_HOPS,
            hops_seen: vec![self.self_id.as_str().to_string()],
        };

        self.mark_seen(&gossip_message.msg_id).await;
        self.forward(&gossip_message).await;
        Ok(())
    }

    /// Handles a gossip message received from a peer: dedup, deliver-if-mine,
    /// else forward (spec §4.4, §8 S6).
    pub async fn on_receive(&self, mut message: GossipMessage) {
        if self.already_seen(&message.msg_id).await {
            return;
        }
        if message.hops_seen.len() as u8 >= message.max_hops {
            return;
        }
        if now_unix() > message.expires_unix {
            return;
        }
        self.mark_seen(&message.msg_id).await;

        if message.destination == self.self_id.as_str() {
            self.deliver(&message).await;
            return;
        }

        message.hops_seen.push(self.self_id.as_str().to_string());
        self.forward(&message).await;
    }

    async fn deliver(&self, message: &GossipMessage) {
        use base64::Engine;
        let Ok(blob) = base64::engine::general_purpose::STANDARD.decode(&message.payload) else {
            tracing::warn!("gossip payload was not valid base64");
            return;
        };
        let Ok(plaintext) = lib_crypto::hybrid_decrypt(&blob, &self.private_key) else {
            tracing::warn!("gossip payload failed to decrypt; not addressed to us or tampered");
            return;
        };
        let Ok(envelope) = serde_json::from_slice::<Envelope>(&plaintext) else {
            tracing::warn!("gossip payload decrypted but was not a valid envelope");
            return;
        };

        let Ok(source) = NodeId::parse(&message.source) else { return };
        let inboxes = self.inboxes.lock().await;
        if let Some(tx) = inboxes.get(&source) {
            let _ = tx.send(envelope);
        }
    }

    async fn forward(&self, message: &GossipMessage) {
        let mut peers = self.peer_sender.connected_peer_ids().await;
        peers.retain(|p| !message.hops_seen.iter().any(|seen| seen == p.as_str()));
        peers.truncate(self.fanout);
        for peer in peers {
            self.peer_sender.send_gossip(&peer, message).await;
        }
    }

    async fn already_seen(&self, msg_id: &str) -> bool {
        self.seen.lock().await.contains_key(msg_id)
    }

    async fn mark_seen(&self, msg_id: &str) {
        self.seen.lock().await.insert(msg_id.to_string(), SeenEntry { first_seen: std::time::Instant::now() });
    }

    /// Drops dedup entries older than `DEFAULT_TTL`, preventing unbounded
    /// growth of the seen-set over a long-running node.
    pub async fn sweep_seen(&self) {
        let mut seen = self.seen.lock().await;
        seen.retain(|_, entry| entry.first_seen.elapsed() < DEFAULT_TTL);
    }
}

fn new_msg_id() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn now_unix() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct NoopSender {
        peers: Vec<NodeId>,
        forwarded: AtomicUsize,
    }

    #[async_trait]
    impl GossipPeerSender for NoopSender {
        async fn connected_peer_ids(&self) -> Vec<NodeId> {
            self.peers.clone()
        }
        async fn send_gossip(&self, _peer: &NodeId, _message: &GossipMessage) {
            self.forwarded.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct StaticResolver(Option<rsa::RsaPublicKey>);

    #[async_trait]
    impl CertResolver for StaticResolver {
        async fn resolve(&self, _node_id: &NodeId) -> Option<rsa::RsaPublicKey> {
            self.0.clone()
        }
    }

    fn id(v: u8) -> NodeId {
        NodeId::parse(&format!("dpc-node-{:032x}", v)).unwrap()
    }

    #[tokio::test]
    async fn duplicate_msg_id_is_not_forwarded_twice() {
        let keypair = lib_crypto::RsaKeyPair::generate().unwrap();
        let sender = Arc::new(NoopSender { peers: vec![id(2), id(3)], forwarded: AtomicUsize::new(0) });
        let resolver = Arc::new(StaticResolver(Some(keypair.public.clone())));
        let overlay = GossipOverlay::new(id(1), keypair.private.clone(), sender.clone(), resolver);

        let message = GossipMessage {
            msg_id: "dup".into(),
            source: id(9).as_str().to_string(),
            destination: id(99).as_str().to_string(),
            payload: "irrelevant".into(),
            priority: Priority::Normal,
            expires_unix: now_unix() + 60,
            max_hops: 5,
            hops_seen: vec![id(9).as_str().to_string()],
        };

        overlay.on_receive(message.clone()).await;
        overlay.on_receive(message).await;
        assert_eq!(sender.forwarded.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn message_at_destination_is_not_forwarded() {
        let keypair = lib_crypto::RsaKeyPair::generate().unwrap();
        let sender = Arc::new(NoopSender { peers: vec![id(2)], forwarded: AtomicUsize::new(0) });
        let resolver = Arc::new(StaticResolver(Some(keypair.public.clone())));
        let overlay = GossipOverlay::new(id(1), keypair.private.clone(), sender.clone(), resolver);

        let envelope = Envelope::new("SEND_TEXT", serde_json::json!({"text": "hi"}));
        overlay.register_inbox(id(9)).await;

        let plaintext = serde_json::to_vec(&envelope).unwrap();
        let blob = lib_crypto::hybrid_encrypt(&plaintext, &keypair.public).unwrap();
        use base64::Engine;
        let message = GossipMessage {
            msg_id: "m1".into(),
            source: id(9).as_str().to_string(),
            destination: id(1).as_str().to_string(),
            payload: base64::engine::general_purpose::STANDARD.encode(blob),
            priority: Priority::Normal,
            expires_unix: now_unix() + 60,
            max_hops: 5,
            hops_seen: vec![id(9).as_str().to_string()],
        };

        overlay.on_receive(message).await;
        assert_eq!(sender.forwarded.load(Ordering::SeqCst), 0);
    }
}
