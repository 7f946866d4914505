//! The P2P manager itself (spec §4.5): dial strategy, HELLO handshake, and
//! message dispatch on top of the [`PeerTable`].

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, mpsc, OnceCell};

use lib_dht::DhtServer;
use lib_identity::{Identity, IdentityCertificate, IdentityStore, NodeId};
use lib_transport::gossip::{CertResolver, GossipOverlay, GossipPeerSender, GossipMessage};
use lib_transport::tls::TlsTransport;
use lib_transport::dtls::DtlsTransport;
use lib_transport::PeerConnection;
use lib_wire::Envelope;

use crate::peer_table::PeerHandle;
use crate::{Hello, P2pError, PeerTable, COMMAND_HELLO, DialUri};

const OUTGOING_CHANNEL_CAPACITY: usize = 64;
const INBOUND_CHANNEL_CAPACITY: usize = 256;

/// Narrow capability handle for step 2 of the dial strategy (UDP
/// hole-punch + DTLS): resolves a punched, peer-connected UDP socket for
/// `target` without `lib-p2p` depending on STUN/Hub signaling directly
/// (spec §9).
#[async_trait]
pub trait HolePunchDialer: Send + Sync {
    async fn punch(&self, target: &NodeId) -> Option<(UdpSocket, SocketAddr)>;
}

/// Narrow capability handle for step 3 of the dial strategy (WebRTC via
/// Hub): returns an already-open datachannel transport for `target`.
#[async_trait]
pub trait WebRtcDialer: Send + Sync {
    async fn dial(&self, target: &NodeId) -> Option<Box<dyn PeerConnection>>;
}

/// Holds the [`PeerTable`], dials peers through the fallback chain of
/// spec §4.5, performs the `HELLO` handshake, and fans inbound envelopes
/// out to every subscriber via a broadcast channel.
pub struct P2pManager {
    identity: Arc<Identity>,
    identity_store: Arc<IdentityStore>,
    peer_table: PeerTable,
    inbound_tx: broadcast::Sender<(NodeId, Envelope)>,
    gossip: OnceCell<Arc<GossipOverlay>>,
    dht: Option<Arc<DhtServer>>,
    hole_punch_dialer: Option<Arc<dyn HolePunchDialer>>,
    webrtc_dialer: Option<Arc<dyn WebRtcDialer>>,
}

impl P2pManager {
    pub fn new(
        identity: Arc<Identity>,
        identity_store: Arc<IdentityStore>,
        dht: Option<Arc<DhtServer>>,
        hole_punch_dialer: Option<Arc<dyn HolePunchDialer>>,
        webrtc_dialer: Option<Arc<dyn WebRtcDialer>>,
    ) -> Self {
        let (inbound_tx, _) = broadcast::channel(INBOUND_CHANNEL_CAPACITY);
        Self {
            identity,
            identity_store,
            peer_table: PeerTable::new(),
            inbound_tx,
            gossip: OnceCell::new(),
            dht,
            hole_punch_dialer,
            webrtc_dialer,
        }
    }

    /// Wires in the gossip overlay once this manager is held behind an
    /// `Arc` (the overlay needs `Arc<dyn GossipPeerSender + CertResolver>`,
    /// which this manager itself implements — see the trait impls below).
    pub async fn attach_gossip(&self, gossip: Arc<GossipOverlay>) {
        let _ = self.gossip.set(gossip);
    }

    /// The attached gossip overlay, if [`P2pManager::attach_gossip`] has
    /// run — lets the owning process drive its periodic seen-set sweep.
    pub fn gossip_overlay(&self) -> Option<Arc<GossipOverlay>> {
        self.gossip.get().cloned()
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Subscribes to every inbound `(source, envelope)` delivered over any
    /// connected transport, including gossip deliveries routed back in by
    /// the overlay via [`P2pManager::deliver_gossip_envelope`].
    pub fn subscribe(&self) -> broadcast::Receiver<(NodeId, Envelope)> {
        self.inbound_tx.subscribe()
    }

    pub async fn connected_peers(&self) -> Vec<NodeId> {
        self.peer_table.connected_peers().await
    }

    pub async fn is_connected(&self, node_id: &NodeId) -> bool {
        self.peer_table.is_connected(node_id).await
    }

    /// Dial strategy (spec §4.5): direct TLS if a `dpc://` URI is given and
    /// reachable, else UDP hole-punch + DTLS, else WebRTC via the Hub, else
    /// fall back to the gossip mailbox (no table entry is installed for
    /// the gossip path — it's addressed purely by NodeId on every send).
    pub async fn connect(&self, target: &NodeId, uri: Option<&str>) -> Result<(), P2pError> {
        if self.peer_table.is_connected(target).await {
            return Ok(());
        }

        if let Some(uri) = uri {
            if let Ok(dial_uri) = DialUri::parse(uri) {
                if &dial_uri.node_id == target {
                    if let Ok(addr) = dial_uri.to_socket_addr() {
                        if let Ok(conn) = TlsTransport::connect(addr, &self.identity, target).await {
                            return self.handshake_and_install(Box::new(conn)).await;
                        }
                    }
                }
            }
        }

        if let Some(dialer) = &self.hole_punch_dialer {
            if let Some((socket, remote_addr)) = dialer.punch(target).await {
                if let Ok(conn) = DtlsTransport::connect(socket, remote_addr, &self.identity, target).await {
                    return self.handshake_and_install(Box::new(conn)).await;
                }
            }
        }

        if let Some(dialer) = &self.webrtc_dialer {
            if let Some(conn) = dialer.dial(target).await {
                return self.handshake_and_install(conn).await;
            }
        }

        if self.gossip.get().is_some() {
            // Gossip is mailbox-style: there's no connection to install,
            // `send`/`broadcast` will route to it automatically because no
            // peer-table entry exists.
            return Ok(());
        }

        Err(P2pError::Unreachable(target.as_str().to_string()))
    }

    /// Accepts an already-open transport (e.g. from a TLS/DTLS listener
    /// loop) and runs it through the same HELLO handshake as an outbound
    /// dial.
    pub async fn accept(&self, conn: Box<dyn PeerConnection>) -> Result<(), P2pError> {
        self.handshake_and_install(conn).await
    }

    async fn handshake_and_install(&self, mut conn: Box<dyn PeerConnection>) -> Result<(), P2pError> {
        let expected = conn.peer_node_id().clone();
        let kind = conn.kind();

        let hello = Hello { node_id: self.identity.node_id.as_str().to_string(), name: None };
        let hello_value = serde_json::to_value(&hello).map_err(|e| P2pError::Wire(lib_wire::WireError::InvalidJson(e)))?;
        conn.send(&Envelope::new(COMMAND_HELLO, hello_value)).await?;

        let first = conn
            .read()
            .await?
            .ok_or_else(|| P2pError::Unreachable(expected.as_str().to_string()))?;
        if first.command != COMMAND_HELLO {
            return Err(P2pError::HelloMismatch { claimed: first.command, verified: expected.as_str().to_string() });
        }
        let peer_hello: Hello = serde_json::from_value(first.payload)
            .map_err(|e| P2pError::Wire(lib_wire::WireError::InvalidJson(e)))?;
        if peer_hello.node_id != expected.as_str() {
            return Err(P2pError::HelloMismatch { claimed: peer_hello.node_id, verified: expected.as_str().to_string() });
        }

        let (tx, rx) = mpsc::channel(OUTGOING_CHANNEL_CAPACITY);
        let dispatch = self.inbound_tx.clone();
        let peer_id = expected.clone();
        let task = tokio::spawn(async move {
            Self::peer_loop(conn, rx, dispatch, peer_id).await;
        });

        self.peer_table.install(expected, PeerHandle { kind, outgoing: tx, task }).await;
        Ok(())
    }

    async fn peer_loop(
        mut conn: Box<dyn PeerConnection>,
        mut outgoing: mpsc::Receiver<Envelope>,
        dispatch: broadcast::Sender<(NodeId, Envelope)>,
        peer_id: NodeId,
    ) {
        loop {
            tokio::select! {
                incoming = conn.read() => {
                    match incoming {
                        Ok(Some(envelope)) => {
                            let _ = dispatch.send((peer_id.clone(), envelope));
                        }
                        Ok(None) => break,
                        Err(e) => {
                            tracing::warn!(peer = %peer_id, error = %e, "peer connection closed on read error");
                            break;
                        }
                    }
                }
                outbound = outgoing.recv() => {
                    match outbound {
                        Some(envelope) => {
                            if let Err(e) = conn.send(&envelope).await {
                                tracing::warn!(peer = %peer_id, error = %e, "peer connection closed on send error");
                                break;
                            }
                        }
                        None => break,
                    }
                }
            }
        }
        let _ = conn.close().await;
    }

    /// Sends `envelope` to `node_id` over its live connection if one exists,
    /// else via the gossip overlay as a mailbox message (spec §4.5 step 4).
    pub async fn send(&self, node_id: &NodeId, envelope: Envelope) -> Result<(), P2pError> {
        if let Some(tx) = self.peer_table.outgoing_sender(node_id).await {
            return tx.send(envelope).await.map_err(|_| P2pError::NotConnected(node_id.as_str().to_string()));
        }
        if let Some(gossip) = self.gossip.get() {
            gossip.emit(node_id, &envelope).await?;
            return Ok(());
        }
        Err(P2pError::NotConnected(node_id.as_str().to_string()))
    }

    pub async fn broadcast(&self, envelope: Envelope) {
        for peer in self.connected_peers().await {
            let _ = self.send(&peer, envelope.clone()).await;
        }
    }

    pub async fn disconnect(&self, node_id: &NodeId) {
        // Dropping the handle's `outgoing` sender closes the peer loop's
        // channel; the loop observes the close, calls `conn.close()`, and
        // exits on its own.
        let _ = self.peer_table.remove(node_id).await;
    }

    /// Delivers a gossip-decrypted envelope into the same inbound fan-out
    /// used by direct connections, so subscribers don't need to know
    /// whether a message arrived directly or via a mailbox hop.
    pub fn deliver_gossip_envelope(&self, source: NodeId, envelope: Envelope) {
        let _ = self.inbound_tx.send((source, envelope));
    }
}

#[async_trait]
impl GossipPeerSender for P2pManager {
    async fn connected_peer_ids(&self) -> Vec<NodeId> {
        self.peer_table.connected_peers().await
    }

    async fn send_gossip(&self, peer: &NodeId, message: &GossipMessage) {
        if let Some(tx) = self.peer_table.outgoing_sender(peer).await {
            let payload = match serde_json::to_value(message) {
                Ok(v) => v,
                Err(_) => return,
            };
            let _ = tx.send(Envelope::new("GOSSIP_FORWARD", payload)).await;
        }
    }
}

#[async_trait]
impl CertResolver for P2pManager {
    /// Resolves a destination's public key: local certificate cache first,
    /// then `"cert:" + destination` on the DHT, pinning whatever it finds
    /// for next time (spec §4.4).
    async fn resolve(&self, node_id: &NodeId) -> Option<rsa::RsaPublicKey> {
        let certificate = match self.identity_store.load_peer_certificate(node_id).ok()? {
            Some(cert) => cert,
            None => {
                let dht = self.dht.as_ref()?;
                let pem = dht.find_value(node_id, &format!("cert:{node_id}")).await?;
                let cert = IdentityCertificate::from_pem(&pem).ok()?;
                let _ = self.identity_store.save_peer_certificate(node_id, &cert);
                cert
            }
        };
        use rsa::pkcs8::DecodePublicKey;
        let (_, parsed) = x509_parser::parse_x509_certificate(&certificate.certificate_der).ok()?;
        rsa::RsaPublicKey::from_public_key_der(parsed.tbs_certificate.subject_pki.raw).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lib_wire::Envelope;
    use tokio::net::TcpListener;

    fn store_in_tempdir() -> Arc<IdentityStore> {
        let dir = tempfile::tempdir().unwrap();
        Arc::new(IdentityStore::new(dir.into_path()))
    }

    #[tokio::test]
    async fn direct_tls_dial_completes_hello_and_exchanges_a_message() {
        let server_identity = Arc::new(Identity::generate().unwrap());
        let client_identity = Arc::new(Identity::generate().unwrap());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server_manager =
            Arc::new(P2pManager::new(server_identity.clone(), store_in_tempdir(), None, None, None));
        let mut server_inbound = server_manager.subscribe();

        let accept_identity = server_identity.clone();
        let accept_manager = server_manager.clone();
        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let conn = TlsTransport::accept(tcp, &accept_identity).await.unwrap();
            accept_manager.accept(Box::new(conn)).await.unwrap();
        });

        let client_manager = P2pManager::new(client_identity.clone(), store_in_tempdir(), None, None, None);
        let uri = format!("dpc://127.0.0.1:{}?node_id={}", addr.port(), server_identity.node_id.as_str());
        client_manager.connect(&server_identity.node_id, Some(&uri)).await.unwrap();

        assert!(client_manager.is_connected(&server_identity.node_id).await);

        client_manager
            .send(&server_identity.node_id, Envelope::new("SEND_TEXT", serde_json::json!({"text": "hi"})))
            .await
            .unwrap();

        let (from, envelope) =
            tokio::time::timeout(std::time::Duration::from_secs(2), server_inbound.recv()).await.unwrap().unwrap();
        assert_eq!(from, client_identity.node_id);
        assert_eq!(envelope.command, "SEND_TEXT");
    }

    #[tokio::test]
    async fn connecting_to_an_unreachable_peer_with_no_fallback_fails() {
        let identity = Arc::new(Identity::generate().unwrap());
        let target = Identity::generate().unwrap().node_id;
        let manager = P2pManager::new(identity, store_in_tempdir(), None, None, None);

        let result = manager.connect(&target, None).await;
        assert!(matches!(result, Err(P2pError::Unreachable(_))));
    }
}
