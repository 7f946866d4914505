//! On-disk identity layout: `node.key` (PKCS#8 private key PEM), `node.crt`
//! (self-signed certificate PEM), `node.id` (NodeId string), and
//! `peers/<node_id>.crt` for certificates pinned from peers met over the
//! DHT or Hub discovery.

use std::fs;
use std::path::{Path, PathBuf};

use crate::{Identity, IdentityCertificate, IdentityError, NodeId};

const KEY_FILE: &str = "node.key";
const CERT_FILE: &str = "node.crt";
const ID_FILE: &str = "node.id";
const PEERS_DIR: &str = "peers";

/// Owns a node's identity directory and mediates all reads/writes to it.
pub struct IdentityStore {
    root: PathBuf,
}

impl IdentityStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn is_initialized(&self) -> bool {
        self.root.join(KEY_FILE).is_file() && self.root.join(CERT_FILE).is_file() && self.root.join(ID_FILE).is_file()
    }

    /// Generates a fresh identity and persists it. Fails if one already
    /// exists, to avoid silently overwriting a node's key material.
    pub fn initialize(&self) -> Result<Identity, IdentityError> {
        if self.is_initialized() {
            return Err(IdentityError::Certificate(format!(
                "identity already initialized at {}",
                self.root.display()
            )));
        }
        let identity = Identity::generate()?;
        self.persist(&identity)?;
        Ok(identity)
    }

    fn persist(&self, identity: &Identity) -> Result<(), IdentityError> {
        fs::create_dir_all(&self.root)?;
        fs::create_dir_all(self.root.join(PEERS_DIR))?;

        atomic_write(&self.root.join(KEY_FILE), identity.keypair.private_key_pem()?.as_bytes())?;
        set_private_permissions(&self.root.join(KEY_FILE))?;
        atomic_write(&self.root.join(CERT_FILE), identity.certificate.certificate_pem.as_bytes())?;
        atomic_write(&self.root.join(ID_FILE), identity.node_id.as_str().as_bytes())?;
        Ok(())
    }

    /// Loads a previously initialized identity, verifying that the stored
    /// NodeId matches the one derivable from the stored key, and that the
    /// stored certificate's Common Name matches the NodeId.
    pub fn load(&self) -> Result<Identity, IdentityError> {
        if !self.is_initialized() {
            return Err(IdentityError::NotInitialized(self.root.display().to_string()));
        }

        let key_pem = fs::read_to_string(self.root.join(KEY_FILE))?;
        let keypair = lib_crypto::RsaKeyPair::from_private_key_pem(&key_pem)?;

        let stored_id = fs::read_to_string(self.root.join(ID_FILE))?;
        let stored_id = stored_id.trim();
        let derived_id = NodeId::from_public_key_pem(&keypair.public_key_pem()?)?;
        if derived_id.as_str() != stored_id {
            return Err(IdentityError::Tampered(format!(
                "node.id ({stored_id}) does not match key-derived NodeId ({derived_id})"
            )));
        }

        let cert_pem = fs::read_to_string(self.root.join(CERT_FILE))?;
        let certificate = IdentityCertificate::from_pem(&cert_pem)?;
        if certificate.common_name()? != derived_id.as_str() {
            return Err(IdentityError::Tampered(
                "node.crt Common Name does not match NodeId".into(),
            ));
        }

        Ok(Identity { node_id: derived_id, keypair, certificate })
    }

    /// Loads an existing identity, or initializes a fresh one if none
    /// exists yet. This is the entry point most callers want.
    pub fn load_or_initialize(&self) -> Result<Identity, IdentityError> {
        if self.is_initialized() {
            self.load()
        } else {
            self.initialize()
        }
    }

    fn peer_cert_path(&self, peer_id: &NodeId) -> PathBuf {
        self.root.join(PEERS_DIR).join(format!("{}.crt", peer_id.as_str()))
    }

    /// Pins a peer's certificate to disk under its NodeId.
    pub fn save_peer_certificate(&self, peer_id: &NodeId, certificate: &IdentityCertificate) -> Result<(), IdentityError> {
        fs::create_dir_all(self.root.join(PEERS_DIR))?;
        atomic_write(&self.peer_cert_path(peer_id), certificate.certificate_pem.as_bytes())
    }

    /// Loads a previously pinned peer certificate, if any.
    pub fn load_peer_certificate(&self, peer_id: &NodeId) -> Result<Option<IdentityCertificate>, IdentityError> {
        let path = self.peer_cert_path(peer_id);
        if !path.is_file() {
            return Ok(None);
        }
        let pem = fs::read_to_string(path)?;
        Ok(Some(IdentityCertificate::from_pem(&pem)?))
    }
}

fn atomic_write(path: &Path, contents: &[u8]) -> Result<(), IdentityError> {
    let tmp_path = path.with_extension("tmp");
    fs::write(&tmp_path, contents)?;
    fs::rename(&tmp_path, path)?;
    Ok(())
}

#[cfg(unix)]
fn set_private_permissions(path: &Path) -> Result<(), IdentityError> {
    use std::os::unix::fs::PermissionsExt;
    let mut permissions = fs::metadata(path)?.permissions();
    permissions.set_mode(0o600);
    fs::set_permissions(path, permissions)?;
    Ok(())
}

#[cfg(not(unix))]
fn set_private_permissions(_path: &Path) -> Result<(), IdentityError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn initializes_and_reloads_consistently() {
        let dir = tempdir().unwrap();
        let store = IdentityStore::new(dir.path());

        assert!(!store.is_initialized());
        let identity = store.initialize().unwrap();
        assert!(store.is_initialized());

        let reloaded = store.load().unwrap();
        assert_eq!(reloaded.node_id, identity.node_id);
    }

    #[test]
    fn rejects_double_initialization() {
        let dir = tempdir().unwrap();
        let store = IdentityStore::new(dir.path());
        store.initialize().unwrap();
        assert!(store.initialize().is_err());
    }

    #[test]
    fn detects_tampered_node_id_file() {
        let dir = tempdir().unwrap();
        let store = IdentityStore::new(dir.path());
        store.initialize().unwrap();

        std::fs::write(dir.path().join(ID_FILE), "dpc-node-0000000000000000000000000000000000").unwrap();
        assert!(matches!(store.load(), Err(IdentityError::Tampered(_))));
    }

    #[test]
    fn pins_and_loads_peer_certificates() {
        let dir = tempdir().unwrap();
        let store = IdentityStore::new(dir.path());

        let peer_identity = Identity::generate().unwrap();
        store
            .save_peer_certificate(&peer_identity.node_id, &peer_identity.certificate)
            .unwrap();

        let loaded = store.load_peer_certificate(&peer_identity.node_id).unwrap().unwrap();
        assert_eq!(loaded.common_name().unwrap(), peer_identity.node_id.as_str());

        let unknown_id = NodeId::parse(&format!("dpc-node-{}", "f".repeat(32))).unwrap();
        assert!(store.load_peer_certificate(&unknown_id).unwrap().is_none());
    }
}
