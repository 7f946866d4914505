//! RSA-OAEP + AES-256-GCM hybrid encryption (spec §4.1).
//!
//! Blob layout: `enc_key_len (4B big-endian) || enc_key || nonce (12B) ||
//! ciphertext||tag`. Each call generates a fresh AES key and nonce, so two
//! encryptions of the same plaintext never produce the same ciphertext.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng as AesOsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;

use crate::CryptoError;

const NONCE_LEN: usize = 12;

/// Hybrid-encrypts `plaintext` for `peer_public_key`.
pub fn hybrid_encrypt(plaintext: &[u8], peer_public_key: &RsaPublicKey) -> Result<Vec<u8>, CryptoError> {
    let mut rng = rand::thread_rng();

    let aes_key = Aes256Gcm::generate_key(&mut AesOsRng);
    let cipher = Aes256Gcm::new(&aes_key);
    let nonce = Aes256Gcm::generate_nonce(&mut AesOsRng);

    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|_| CryptoError::Tampered)?;

    let enc_key = peer_public_key
        .encrypt(&mut rng, Oaep::new::<Sha256>(), aes_key.as_slice())
        .map_err(CryptoError::Rsa)?;

    let mut blob = Vec::with_capacity(4 + enc_key.len() + NONCE_LEN + ciphertext.len());
    blob.extend_from_slice(&(enc_key.len() as u32).to_be_bytes());
    blob.extend_from_slice(&enc_key);
    blob.extend_from_slice(nonce.as_slice());
    blob.extend_from_slice(&ciphertext);
    Ok(blob)
}

/// Reverses [`hybrid_encrypt`]. Any authentication failure — truncated blob,
/// RSA-OAEP failure, or AES-GCM tag mismatch — is fatal for this blob.
pub fn hybrid_decrypt(blob: &[u8], private_key: &RsaPrivateKey) -> Result<Vec<u8>, CryptoError> {
    if blob.len() < 4 {
        return Err(CryptoError::MalformedBlob("blob shorter than length header".into()));
    }
    let enc_key_len = u32::from_be_bytes(blob[0..4].try_into().unwrap()) as usize;
    let enc_key_start = 4;
    let enc_key_end = enc_key_start
        .checked_add(enc_key_len)
        .ok_or_else(|| CryptoError::MalformedBlob("enc_key_len overflow".into()))?;
    let nonce_end = enc_key_end + NONCE_LEN;
    if blob.len() < nonce_end {
        return Err(CryptoError::MalformedBlob("blob shorter than declared key+nonce".into()));
    }

    let enc_key = &blob[enc_key_start..enc_key_end];
    let nonce_bytes = &blob[enc_key_end..nonce_end];
    let ciphertext = &blob[nonce_end..];

    let aes_key_bytes = private_key
        .decrypt(Oaep::new::<Sha256>(), enc_key)
        .map_err(|_| CryptoError::Tampered)?;
    let aes_key = Key::<Aes256Gcm>::from_slice(&aes_key_bytes);
    let cipher = Aes256Gcm::new(aes_key);
    let nonce = Nonce::from_slice(nonce_bytes);

    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| CryptoError::Tampered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keypair::RsaKeyPair;

    #[test]
    fn round_trips_and_detects_tampering() {
        let pair = RsaKeyPair::generate().unwrap();
        let plaintext = b"five required dissenters disagree";

        let blob = hybrid_encrypt(plaintext, &pair.public).unwrap();
        let recovered = hybrid_decrypt(&blob, &pair.private).unwrap();
        assert_eq!(recovered, plaintext);

        let mut tampered = blob.clone();
        let last = tampered.len() - 1;
        tampered[last] ^= 0xFF;
        assert!(hybrid_decrypt(&tampered, &pair.private).is_err());
    }

    #[test]
    fn two_encryptions_of_same_plaintext_differ() {
        let pair = RsaKeyPair::generate().unwrap();
        let plaintext = b"same content, every time";

        let a = hybrid_encrypt(plaintext, &pair.public).unwrap();
        let b = hybrid_encrypt(plaintext, &pair.public).unwrap();
        assert_ne!(a, b);
    }
}
