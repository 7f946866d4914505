use std::net::SocketAddr;
use std::time::{SystemTime, UNIX_EPOCH};

use lib_identity::NodeId;
use serde::{Deserialize, Serialize};

/// A known peer's routing-relevant information: who they are, where to
/// reach them, and when we last heard from them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub node_id: NodeId,
    pub addr: SocketAddr,
    /// Unix timestamp, seconds, of the last message received from this peer.
    pub last_seen_unix: u64,
}

impl Contact {
    pub fn new(node_id: NodeId, addr: SocketAddr) -> Self {
        Self { node_id, addr, last_seen_unix: now_unix() }
    }

    pub fn touch(&mut self) {
        self.last_seen_unix = now_unix();
    }

    /// The /24 (IPv4) or /48 (IPv6) prefix used for subnet-diversity checks.
    pub fn subnet_key(&self) -> String {
        match self.addr.ip() {
            std::net::IpAddr::V4(v4) => {
                let octets = v4.octets();
                format!("{}.{}.{}", octets[0], octets[1], octets[2])
            }
            std::net::IpAddr::V6(v6) => {
                let segments = v6.segments();
                format!("{:x}:{:x}:{:x}", segments[0], segments[1], segments[2])
            }
        }
    }
}

fn now_unix() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}
