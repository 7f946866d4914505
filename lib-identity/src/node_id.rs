//! NodeId derivation (spec §4.1): `"dpc-node-" + sha256_hex(public_key_pem)[0:32]`.
//!
//! The NodeId is the first 32 *hex characters* (128 bits) of the SHA-256
//! digest of the node's SPKI public-key PEM document, not 32 raw bytes.
//! Two nodes that generate different keypairs collide in their NodeId only
//! with negligible (2^-128) probability, so the DHT can treat the 128-bit
//! suffix as the node's routing identity.

use std::fmt;

use lib_crypto::sha256_hex;

use crate::IdentityError;

pub const NODE_ID_PREFIX: &str = "dpc-node-";
const HASH_PREFIX_LEN: usize = 32;

/// A node's stable, content-derived identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(String);

impl NodeId {
    /// Derives the NodeId from a node's SPKI public-key PEM document.
    pub fn from_public_key_pem(public_key_pem: &str) -> Result<Self, IdentityError> {
        let digest_hex = sha256_hex(public_key_pem.as_bytes());
        let suffix = &digest_hex[..HASH_PREFIX_LEN];
        Ok(Self(format!("{NODE_ID_PREFIX}{suffix}")))
    }

    /// Parses an already-formatted NodeId string, validating its shape.
    pub fn parse(value: &str) -> Result<Self, IdentityError> {
        let suffix = value
            .strip_prefix(NODE_ID_PREFIX)
            .ok_or_else(|| IdentityError::InvalidKey(format!("NodeId missing '{NODE_ID_PREFIX}' prefix: {value}")))?;
        if suffix.len() != HASH_PREFIX_LEN || !suffix.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(IdentityError::InvalidKey(format!(
                "NodeId suffix must be {HASH_PREFIX_LEN} hex chars: {value}"
            )));
        }
        Ok(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The 128-bit hex suffix used as the node's position in DHT ID space.
    pub fn hash_suffix(&self) -> &str {
        &self.0[NODE_ID_PREFIX.len()..]
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_expected_shape() {
        let pem = "-----BEGIN PUBLIC KEY-----\nexample\n-----END PUBLIC KEY-----\n";
        let node_id = NodeId::from_public_key_pem(pem).unwrap();
        assert!(node_id.as_str().starts_with(NODE_ID_PREFIX));
        assert_eq!(node_id.hash_suffix().len(), HASH_PREFIX_LEN);
        assert!(node_id.hash_suffix().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn is_deterministic_for_same_key() {
        let pem = "same-key-bytes";
        assert_eq!(
            NodeId::from_public_key_pem(pem).unwrap(),
            NodeId::from_public_key_pem(pem).unwrap()
        );
    }

    #[test]
    fn round_trips_through_parse() {
        let node_id = NodeId::from_public_key_pem("some-key-material").unwrap();
        let parsed = NodeId::parse(node_id.as_str()).unwrap();
        assert_eq!(node_id, parsed);
    }

    #[test]
    fn rejects_malformed_input() {
        assert!(NodeId::parse("not-a-node-id").is_err());
        assert!(NodeId::parse("dpc-node-tooshort").is_err());
    }
}
