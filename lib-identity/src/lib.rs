//! Node identity: deterministic NodeId derivation, self-signed X.509
//! certificates, and the on-disk key/certificate layout every node and the
//! Hub use to persist them.

pub mod certificate;
pub mod node_id;
pub mod store;

pub use certificate::IdentityCertificate;
pub use node_id::{NodeId, NODE_ID_PREFIX};
pub use store::IdentityStore;

use lib_crypto::CryptoError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("identity has not been initialized at {0}")]
    NotInitialized(String),

    #[error("invalid key material: {0}")]
    InvalidKey(String),

    #[error("identity files have been tampered with: {0}")]
    Tampered(String),

    #[error("certificate error: {0}")]
    Certificate(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// A node's full identity: its keypair, derived [`NodeId`], and the
/// self-signed certificate it presents to peers.
pub struct Identity {
    pub node_id: NodeId,
    pub keypair: lib_crypto::RsaKeyPair,
    pub certificate: IdentityCertificate,
}

impl Identity {
    /// Generates a fresh keypair, derives its NodeId, and issues a
    /// self-signed certificate over it.
    pub fn generate() -> Result<Self, IdentityError> {
        let keypair = lib_crypto::RsaKeyPair::generate()?;
        let node_id = NodeId::from_public_key_pem(&keypair.public_key_pem()?)?;
        let certificate = IdentityCertificate::issue_self_signed(&node_id, &keypair)?;
        Ok(Self { node_id, keypair, certificate })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_identity_certificate_cn_matches_node_id() {
        let identity = Identity::generate().unwrap();
        assert_eq!(identity.certificate.common_name().unwrap(), identity.node_id.as_str());
    }
}
