//! DHT wire messages (spec §4.3, §6): PING/FIND_NODE/STORE/FIND_VALUE
//! requests and their PONG/NODES/STORED/VALUE responses, carried as UDP JSON
//! datagrams.

use serde::{Deserialize, Serialize};

use lib_identity::NodeId;

/// A contact as it appears on the wire in a NODES response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireNode {
    pub node_id: String,
    pub ip: String,
    pub port: u16,
}

impl WireNode {
    pub fn from_contact(c: &crate::contact::Contact) -> Self {
        Self {
            node_id: c.node_id.as_str().to_string(),
            ip: c.addr.ip().to_string(),
            port: c.addr.port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DhtRequest {
    #[serde(rename = "PING")]
    Ping { rpc_id: String, node_id: String, timestamp: i64 },
    #[serde(rename = "FIND_NODE")]
    FindNode { rpc_id: String, node_id: String, timestamp: i64, target_id: String },
    #[serde(rename = "STORE")]
    Store { rpc_id: String, node_id: String, timestamp: i64, key: String, value: String },
    #[serde(rename = "FIND_VALUE")]
    FindValue { rpc_id: String, node_id: String, timestamp: i64, key: String },
}

impl DhtRequest {
    pub fn rpc_id(&self) -> &str {
        match self {
            DhtRequest::Ping { rpc_id, .. }
            | DhtRequest::FindNode { rpc_id, .. }
            | DhtRequest::Store { rpc_id, .. }
            | DhtRequest::FindValue { rpc_id, .. } => rpc_id,
        }
    }

    pub fn sender_node_id(&self) -> &str {
        match self {
            DhtRequest::Ping { node_id, .. }
            | DhtRequest::FindNode { node_id, .. }
            | DhtRequest::Store { node_id, .. }
            | DhtRequest::FindValue { node_id, .. } => node_id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DhtResponse {
    #[serde(rename = "PONG")]
    Pong { rpc_id: String, node_id: String },
    #[serde(rename = "NODES")]
    Nodes { rpc_id: String, node_id: String, nodes: Vec<WireNode> },
    #[serde(rename = "STORED")]
    Stored { rpc_id: String, node_id: String, ok: bool },
    #[serde(rename = "VALUE")]
    Value {
        rpc_id: String,
        node_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        value: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        nodes: Option<Vec<WireNode>>,
    },
}

impl DhtResponse {
    pub fn rpc_id(&self) -> &str {
        match self {
            DhtResponse::Pong { rpc_id, .. }
            | DhtResponse::Nodes { rpc_id, .. }
            | DhtResponse::Stored { rpc_id, .. }
            | DhtResponse::Value { rpc_id, .. } => rpc_id,
        }
    }
}

/// Generates a fresh random RPC correlation id.
pub fn new_rpc_id() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

pub fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as i64).unwrap_or(0)
}

pub fn parse_wire_node(node: &WireNode) -> Option<crate::contact::Contact> {
    let node_id = NodeId::parse(&node.node_id).ok()?;
    let ip: std::net::IpAddr = node.ip.parse().ok()?;
    Some(crate::contact::Contact::new(node_id, std::net::SocketAddr::new(ip, node.port)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_round_trips_through_json() {
        let req = DhtRequest::FindNode {
            rpc_id: "abc123".into(),
            node_id: "dpc-node-aaaa".into(),
            timestamp: now_millis(),
            target_id: "ffffffffffffffffffffffffffffffff".into(),
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"type\":\"FIND_NODE\""));
        let parsed: DhtRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.rpc_id(), "abc123");
    }

    #[test]
    fn value_response_omits_absent_fields() {
        let resp = DhtResponse::Value { rpc_id: "x".into(), node_id: "dpc-node-aaaa".into(), value: Some("v".into()), nodes: None };
        let json = serde_json::to_string(&resp).unwrap();
        assert!(!json.contains("nodes"));
    }
}
