//! DPC cryptography foundation.
//!
//! RSA-2048 key generation and PEM I/O, RSA-OAEP + AES-256-GCM hybrid
//! encryption, RSA-PSS signing/verification, and PBKDF2-HMAC-SHA256 key
//! derivation for passphrase-based backups.

pub mod hashing;
pub mod hybrid;
pub mod kdf;
pub mod keypair;
pub mod signing;

pub use hashing::sha256_hex;
pub use hybrid::{hybrid_decrypt, hybrid_encrypt};
pub use kdf::pbkdf2_derive_key;
pub use keypair::RsaKeyPair;
pub use signing::{pss_sign, pss_verify};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid key material: {0}")]
    InvalidKey(String),

    #[error("RSA operation failed: {0}")]
    Rsa(#[from] rsa::Error),

    #[error("PKCS#8 encoding error: {0}")]
    Pkcs8(String),

    #[error("authentication failed: ciphertext or signature has been tampered with")]
    Tampered,

    #[error("malformed hybrid-encryption blob: {0}")]
    MalformedBlob(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
