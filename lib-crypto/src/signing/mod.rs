//! RSA-PSS-SHA256 signing and verification.
//!
//! Callers sign the UTF-8 bytes of a hex-string digest (e.g. a commit hash),
//! not the raw digest bytes — this matches how commit signatures are
//! produced and checked elsewhere in the protocol, and lets a signature be
//! reproduced independently from the hex string alone.

use rsa::pss::{Signature, SigningKey, VerifyingKey};
use rsa::signature::{RandomizedSigner, SignatureEncoding, Verifier};
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;

use crate::CryptoError;

/// Signs `message` (typically the UTF-8 bytes of a hex digest) with
/// RSA-PSS-SHA256, MGF1(SHA-256), and the maximum permissible salt length.
pub fn pss_sign(private_key: &RsaPrivateKey, message: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let signing_key = SigningKey::<Sha256>::new(private_key.clone());
    let mut rng = rand::thread_rng();
    let signature = signing_key.sign_with_rng(&mut rng, message);
    Ok(signature.to_bytes().to_vec())
}

/// Verifies a signature produced by [`pss_sign`]. Returns `Ok(())` on a
/// valid signature, `Err(CryptoError::Tampered)` otherwise.
pub fn pss_verify(public_key: &RsaPublicKey, message: &[u8], signature: &[u8]) -> Result<(), CryptoError> {
    let verifying_key = VerifyingKey::<Sha256>::new(public_key.clone());
    let signature = Signature::try_from(signature).map_err(|_| CryptoError::Tampered)?;
    verifying_key
        .verify(message, &signature)
        .map_err(|_| CryptoError::Tampered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keypair::RsaKeyPair;

    #[test]
    fn signs_and_verifies_hex_digest_bytes() {
        let pair = RsaKeyPair::generate().unwrap();
        let hash_hex = "a3f8c1".repeat(10);

        let signature = pss_sign(&pair.private, hash_hex.as_bytes()).unwrap();
        pss_verify(&pair.public, hash_hex.as_bytes(), &signature).unwrap();
    }

    #[test]
    fn rejects_signature_under_wrong_message() {
        let pair = RsaKeyPair::generate().unwrap();
        let signature = pss_sign(&pair.private, b"commit-hash-one").unwrap();
        assert!(pss_verify(&pair.public, b"commit-hash-two", &signature).is_err());
    }

    #[test]
    fn rejects_signature_under_wrong_key() {
        let signer = RsaKeyPair::generate().unwrap();
        let other = RsaKeyPair::generate().unwrap();
        let signature = pss_sign(&signer.private, b"some-hash").unwrap();
        assert!(pss_verify(&other.public, b"some-hash", &signature).is_err());
    }
}
