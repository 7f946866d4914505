//! The four DPC peer transports (spec §4.4): direct TLS, DTLS-over-UDP with
//! hole-punching, WebRTC via the Hub, and the store-and-forward gossip
//! overlay — all adapted to a single [`PeerConnection`] contract so the P2P
//! manager (`lib-p2p`) never needs to know which one is underneath.

pub mod dtls;
pub mod gossip;
pub mod stun;
pub mod tls;
pub mod webrtc_transport;

use async_trait::async_trait;
use thiserror::Error;

use lib_identity::NodeId;
use lib_wire::Envelope;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("peer certificate Common Name {found} does not match expected NodeId {expected}")]
    CertificateMismatch { expected: String, found: String },

    #[error("handshake timed out after {0:?}")]
    HandshakeTimeout(std::time::Duration),

    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("connection closed")]
    Closed,

    #[error("wire error: {0}")]
    Wire(#[from] lib_wire::WireError),

    #[error("tls error: {0}")]
    Tls(String),

    #[error("stun error: {0}")]
    Stun(String),

    #[error(transparent)]
    Identity(#[from] lib_identity::IdentityError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Which of the four transport kinds backs a [`PeerConnection`] (spec §3.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Tls,
    Dtls,
    WebRtc,
    Gossip,
}

/// The uniform contract every transport adapts to (spec §4.4): send an
/// envelope, read the next one (or `None` on clean close), and close.
#[async_trait]
pub trait PeerConnection: Send + Sync {
    fn kind(&self) -> TransportKind;
    fn peer_node_id(&self) -> &NodeId;

    async fn send(&mut self, message: &Envelope) -> Result<(), TransportError>;
    async fn read(&mut self) -> Result<Option<Envelope>, TransportError>;
    async fn close(&mut self) -> Result<(), TransportError>;
}
