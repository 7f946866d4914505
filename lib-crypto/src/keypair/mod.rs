//! RSA-2048 key generation and PEM (de)serialization.

use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::{RsaPrivateKey, RsaPublicKey};

use crate::CryptoError;

/// Bit size used for every node identity key (spec §4.1).
pub const RSA_KEY_BITS: usize = 2048;

/// An RSA keypair, PEM-encodable in the PKCS#8 (private) / SPKI (public)
/// forms the rest of the system expects on disk and on the wire.
#[derive(Clone)]
pub struct RsaKeyPair {
    pub private: RsaPrivateKey,
    pub public: RsaPublicKey,
}

impl RsaKeyPair {
    /// Generates a fresh 2048-bit RSA keypair.
    pub fn generate() -> Result<Self, CryptoError> {
        let mut rng = rand::thread_rng();
        let private = RsaPrivateKey::new(&mut rng, RSA_KEY_BITS)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        let public = RsaPublicKey::from(&private);
        Ok(Self { private, public })
    }

    /// Encodes the private key as an unencrypted PKCS#8 PEM document.
    pub fn private_key_pem(&self) -> Result<String, CryptoError> {
        self.private
            .to_pkcs8_pem(LineEnding::LF)
            .map(|z| z.to_string())
            .map_err(|e| CryptoError::Pkcs8(e.to_string()))
    }

    /// Encodes the public key as a SubjectPublicKeyInfo PEM document. This is
    /// the byte string NodeId derivation hashes (spec §4.1).
    pub fn public_key_pem(&self) -> Result<String, CryptoError> {
        self.public
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| CryptoError::Pkcs8(e.to_string()))
    }

    /// Reconstructs a keypair from a PKCS#8 private key PEM document.
    pub fn from_private_key_pem(pem: &str) -> Result<Self, CryptoError> {
        let private = RsaPrivateKey::from_pkcs8_pem(pem)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        let public = RsaPublicKey::from(&private);
        Ok(Self { private, public })
    }
}

/// Parses a standalone SPKI public-key PEM (used when we only hold a peer's
/// certificate/public key, not a private key).
pub fn public_key_from_pem(pem: &str) -> Result<RsaPublicKey, CryptoError> {
    RsaPublicKey::from_public_key_pem(pem).map_err(|e| CryptoError::InvalidKey(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_and_round_trips_pem() {
        let pair = RsaKeyPair::generate().unwrap();
        let priv_pem = pair.private_key_pem().unwrap();
        let pub_pem = pair.public_key_pem().unwrap();

        let restored = RsaKeyPair::from_private_key_pem(&priv_pem).unwrap();
        assert_eq!(restored.public_key_pem().unwrap(), pub_pem);

        let parsed_pub = public_key_from_pem(&pub_pem).unwrap();
        assert_eq!(parsed_pub, pair.public);
    }
}
