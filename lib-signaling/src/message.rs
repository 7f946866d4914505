//! The wire shape of messages relayed through `/ws/signal` (spec §4.6,
//! §6): the client always sends `{"type":"signal","target_node_id":…}`,
//! the Hub always delivers `{"type":"signal","sender_node_id":…}` —
//! tagging the relay with who it came from rather than trusting the
//! original sender's claim.

use serde::{Deserialize, Serialize};

use lib_identity::NodeId;

/// The SDP/ICE content being relayed. WebRTC negotiation needs exactly
/// these three shapes; anything else is out of scope for the signaling
/// channel (spec §1: only the relay contract matters here).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SignalPayload {
    Offer { sdp: String },
    Answer { sdp: String },
    IceCandidate { candidate: String, sdp_mid: Option<String>, sdp_mline_index: Option<u16> },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_node_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_node_id: Option<String>,
    pub payload: SignalPayload,
}

impl SignalEnvelope {
    /// Constructs an outbound relay request addressed to `target`.
    pub fn outbound(target: NodeId, payload: SignalPayload) -> Self {
        Self { kind: "signal".to_string(), target_node_id: Some(target.as_str().to_string()), sender_node_id: None, payload }
    }

    /// The peer this (inbound) envelope was relayed from, if the Hub
    /// tagged one and it parses as a valid NodeId.
    pub fn sender(&self) -> Option<NodeId> {
        self.sender_node_id.as_deref().and_then(|s| NodeId::parse(s).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outbound_envelope_serializes_with_target_not_sender() {
        let target = NodeId::parse(&format!("dpc-node-{}", "a".repeat(32))).unwrap();
        let envelope = SignalEnvelope::outbound(target, SignalPayload::Offer { sdp: "v=0".into() });
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["type"], "signal");
        assert!(json.get("target_node_id").is_some());
        assert!(json.get("sender_node_id").is_none());
    }

    #[test]
    fn inbound_envelope_exposes_parsed_sender() {
        let sender = NodeId::parse(&format!("dpc-node-{}", "b".repeat(32))).unwrap();
        let json = serde_json::json!({
            "type": "signal",
            "sender_node_id": sender.as_str(),
            "payload": {"kind": "answer", "sdp": "v=0"},
        });
        let envelope: SignalEnvelope = serde_json::from_value(json).unwrap();
        assert_eq!(envelope.sender().unwrap(), sender);
    }
}
