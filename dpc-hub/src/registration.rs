//! `POST /register` (spec §4.13, §6): validates a node's cryptographic
//! challenge — the cert must parse, its CN must be `"dpc-node-"`-prefixed
//! and match the claimed NodeId, the NodeId re-derived from the cert's
//! public key must match too, and the caller's claimed public key must be
//! the cert's own key.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use lib_identity::{IdentityCertificate, NodeId, NODE_ID_PREFIX};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::HubError;

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub node_id: String,
    pub public_key: String,
    pub certificate: String,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub node_id: String,
}

/// A node that has passed registration validation; its certificate is
/// kept so the Hub can answer discovery/profile lookups without a DHT
/// round-trip of its own.
#[derive(Debug, Clone)]
pub struct RegisteredNode {
    pub node_id: NodeId,
    pub certificate_pem: String,
}

#[derive(Default)]
pub struct RegistrationStore {
    nodes: RwLock<HashMap<NodeId, RegisteredNode>>,
}

impl RegistrationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, node: RegisteredNode) {
        self.nodes.write().await.insert(node.node_id.clone(), node);
    }

    pub async fn get(&self, node_id: &NodeId) -> Option<RegisteredNode> {
        self.nodes.read().await.get(node_id).cloned()
    }
}

/// Pure validation, independent of axum, so it's directly testable (spec
/// §4.13's four checks, in order — the first failure wins).
pub fn validate_registration(request: &RegisterRequest) -> Result<RegisteredNode, HubError> {
    let claimed_node_id = NodeId::parse(&request.node_id)
        .map_err(|e| HubError::RegistrationRejected(format!("malformed node_id: {e}")))?;

    let certificate = IdentityCertificate::from_pem(&request.certificate)
        .map_err(|e| HubError::RegistrationRejected(format!("certificate does not parse: {e}")))?;

    let cn = certificate.common_name().map_err(|e| HubError::RegistrationRejected(e.to_string()))?;
    if !cn.starts_with(NODE_ID_PREFIX) || cn != request.node_id {
        return Err(HubError::RegistrationRejected(format!(
            "certificate CN {cn} does not match claimed node_id {}",
            request.node_id
        )));
    }

    let cert_public_key = certificate.public_key().map_err(|e| HubError::RegistrationRejected(e.to_string()))?;
    let cert_public_key_pem =
        rsa_public_key_to_pem(&cert_public_key).map_err(|e| HubError::RegistrationRejected(e.to_string()))?;

    let derived_node_id = NodeId::from_public_key_pem(&cert_public_key_pem)
        .map_err(|e| HubError::RegistrationRejected(e.to_string()))?;
    if derived_node_id != claimed_node_id {
        return Err(HubError::RegistrationRejected(
            "node_id derived from the certificate's public key does not match the claimed node_id".to_string(),
        ));
    }

    let claimed_public_key = lib_crypto::keypair::public_key_from_pem(&request.public_key)
        .map_err(|e| HubError::RegistrationRejected(format!("public_key does not parse: {e}")))?;
    if claimed_public_key != cert_public_key {
        return Err(HubError::RegistrationRejected(
            "provided public_key does not match the certificate's public key".to_string(),
        ));
    }

    Ok(RegisteredNode { node_id: claimed_node_id, certificate_pem: request.certificate.clone() })
}

fn rsa_public_key_to_pem(key: &rsa::RsaPublicKey) -> Result<String, rsa::pkcs8::spki::Error> {
    use rsa::pkcs8::EncodePublicKey;
    key.to_public_key_pem(rsa::pkcs8::LineEnding::LF)
}

pub async fn register_handler(
    State(store): State<Arc<RegistrationStore>>,
    Json(request): Json<RegisterRequest>,
) -> Result<Json<RegisterResponse>, HubError> {
    let node = validate_registration(&request)?;
    let node_id = node.node_id.clone();
    store.insert(node).await;
    Ok(Json(RegisterResponse { node_id: node_id.as_str().to_string() }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issue_identity() -> (NodeId, String, String) {
        let keypair = lib_crypto::RsaKeyPair::generate().unwrap();
        let public_key_pem = keypair.public_key_pem().unwrap();
        let node_id = NodeId::from_public_key_pem(&public_key_pem).unwrap();
        let cert = IdentityCertificate::issue_self_signed(&node_id, &keypair).unwrap();
        (node_id, public_key_pem, cert.certificate_pem)
    }

    #[test]
    fn accepts_a_consistent_registration() {
        let (node_id, public_key, certificate) = issue_identity();
        let request = RegisterRequest { node_id: node_id.as_str().to_string(), public_key, certificate };
        assert!(validate_registration(&request).is_ok());
    }

    #[test]
    fn rejects_a_node_id_that_does_not_match_the_certificate_cn() {
        let (_, public_key, certificate) = issue_identity();
        let (other_node_id, _, _) = issue_identity();
        let request = RegisterRequest { node_id: other_node_id.as_str().to_string(), public_key, certificate };
        assert!(validate_registration(&request).is_err());
    }

    #[test]
    fn rejects_a_public_key_that_does_not_match_the_certificate() {
        let (node_id, _, certificate) = issue_identity();
        let (_, other_public_key, _) = issue_identity();
        let request = RegisterRequest { node_id: node_id.as_str().to_string(), public_key: other_public_key, certificate };
        assert!(validate_registration(&request).is_err());
    }

    #[test]
    fn rejects_an_unparseable_certificate() {
        let (node_id, public_key, _) = issue_identity();
        let request = RegisterRequest { node_id: node_id.as_str().to_string(), public_key, certificate: "not a cert".to_string() };
        assert!(validate_registration(&request).is_err());
    }
}
