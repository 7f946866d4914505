//! RSA-PSS signing and verification of commits (spec §4.7).

use lib_crypto::{pss_sign, pss_verify};
use lib_identity::IdentityCertificate;
use rsa::RsaPrivateKey;

use crate::commit::KnowledgeCommit;
use crate::CommitError;

/// Looks up a signer's pinned certificate by NodeId, so a signature can be
/// checked without the commit carrying the signer's public key itself
/// (spec §4.7: "loads the signer's cert from the per-peer cert directory,
/// or own cert if self"). `lib-identity::IdentityStore` is the usual
/// implementer, via a small adapter the caller provides.
pub trait SignerCertLookup {
    fn cert_for(&self, node_id: &str) -> Option<IdentityCertificate>;
}

/// Signs `commit.commit_hash` with `node_id`'s private key and records the
/// signature in `commit.signatures`. `commit_hash` must already be set
/// (call [`crate::canonical::finalize`] first).
pub fn sign_commit(commit: &mut KnowledgeCommit, node_id: &str, private_key: &RsaPrivateKey) -> Result<(), CommitError> {
    if commit.commit_hash.is_empty() {
        return Err(CommitError::NotFinalized);
    }
    let signature = pss_sign(private_key, commit.commit_hash.as_bytes())?;
    use base64::Engine;
    let encoded = base64::engine::general_purpose::STANDARD.encode(signature);
    commit.signatures.insert(node_id.to_string(), encoded);
    Ok(())
}

/// Verifies every signature in `commit.signatures` against the signer's
/// cert, resolved via `certs`. Returns the NodeIds whose signature failed
/// to verify (empty means every present signature checks out); a signer
/// whose cert cannot be resolved also counts as a failure.
pub fn verify_signatures(commit: &KnowledgeCommit, certs: &dyn SignerCertLookup) -> Vec<String> {
    let mut failures = Vec::new();
    for (node_id, signature_b64) in &commit.signatures {
        let verified = (|| -> Result<(), ()> {
            use base64::Engine;
            let cert = certs.cert_for(node_id).ok_or(())?;
            let public_key = cert.public_key().map_err(|_| ())?;
            let signature = base64::engine::general_purpose::STANDARD.decode(signature_b64).map_err(|_| ())?;
            pss_verify(&public_key, commit.commit_hash.as_bytes(), &signature).map_err(|_| ())
        })();
        if verified.is_err() {
            failures.push(node_id.clone());
        }
    }
    failures
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonical::finalize;
    use crate::commit::ConsensusType;
    use lib_identity::NodeId;
    use std::collections::HashMap;

    struct MapLookup(HashMap<String, IdentityCertificate>);
    impl SignerCertLookup for MapLookup {
        fn cert_for(&self, node_id: &str) -> Option<IdentityCertificate> {
            self.0.get(node_id).map(|c| IdentityCertificate::from_pem(&c.certificate_pem).unwrap())
        }
    }

    fn identity() -> lib_identity::Identity {
        lib_identity::Identity::generate().unwrap()
    }

    fn sample_commit() -> KnowledgeCommit {
        let mut commit = KnowledgeCommit {
            commit_id: String::new(),
            commit_hash: String::new(),
            parent_commit_id: String::new(),
            topic: "rust".into(),
            summary: "s".into(),
            description: "d".into(),
            entries: vec![],
            participants: vec!["alice".into()],
            approved_by: vec!["alice".into()],
            rejected_by: vec![],
            consensus_type: ConsensusType::Unanimous,
            confidence: 1.0,
            cultural_perspectives: vec![],
            signatures: Default::default(),
            timestamp: "2025-01-01T00:00:00.000000".into(),
        };
        finalize(&mut commit);
        commit
    }

    #[test]
    fn signs_and_verifies_round_trip() {
        let alice = identity();
        let node_id: NodeId = alice.node_id.clone();
        let mut commit = sample_commit();
        commit.approved_by = vec![node_id.as_str().to_string()];

        sign_commit(&mut commit, node_id.as_str(), &alice.keypair.private).unwrap();

        let mut certs = HashMap::new();
        certs.insert(node_id.as_str().to_string(), alice.certificate);
        let lookup = MapLookup(certs);

        assert!(verify_signatures(&commit, &lookup).is_empty());
    }

    #[test]
    fn flags_signature_from_wrong_key() {
        let alice = identity();
        let mallory = identity();
        let mut commit = sample_commit();
        commit.approved_by = vec![alice.node_id.as_str().to_string()];
        sign_commit(&mut commit, alice.node_id.as_str(), &mallory.keypair.private).unwrap();

        let mut certs = HashMap::new();
        certs.insert(alice.node_id.as_str().to_string(), alice.certificate);
        let lookup = MapLookup(certs);

        assert_eq!(verify_signatures(&commit, &lookup), vec![alice.node_id.as_str().to_string()]);
    }

    #[test]
    fn flags_signer_with_no_resolvable_cert() {
        let alice = identity();
        let mut commit = sample_commit();
        commit.approved_by = vec![alice.node_id.as_str().to_string()];
        sign_commit(&mut commit, alice.node_id.as_str(), &alice.keypair.private).unwrap();

        let lookup = MapLookup(HashMap::new());
        assert_eq!(verify_signatures(&commit, &lookup), vec![alice.node_id.as_str().to_string()]);
    }
}
