//! The P2P connection manager (spec §4.5, C5): a [`PeerTable`] of live
//! [`lib_transport::PeerConnection`]s, a four-step dial strategy that falls
//! back from direct TLS down to the gossip overlay, the `HELLO` handshake
//! that installs a connection once its NodeId is verified, and a broadcast
//! dispatch fan-out so higher layers (commit engine, consensus, inference
//! orchestrator) can each subscribe to inbound envelopes independently.

pub mod manager;
pub mod peer_table;
pub mod uri;

pub use manager::{HolePunchDialer, P2pManager, WebRtcDialer};
pub use peer_table::PeerTable;
pub use uri::DialUri;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum P2pError {
    #[error("invalid dial URI: {0}")]
    InvalidUri(String),

    #[error("no reachable path to peer {0}: every dial strategy failed")]
    Unreachable(String),

    #[error("peer {0} is not connected")]
    NotConnected(String),

    #[error("HELLO from {claimed} did not match transport-verified identity {verified}")]
    HelloMismatch { claimed: String, verified: String },

    #[error("transport error: {0}")]
    Transport(#[from] lib_transport::TransportError),

    #[error("wire error: {0}")]
    Wire(#[from] lib_wire::WireError),

    #[error("identity error: {0}")]
    Identity(#[from] lib_identity::IdentityError),
}

/// The first message exchanged on every new connection (spec §4.5, §6).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Hello {
    pub node_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

pub const COMMAND_HELLO: &str = "HELLO";
