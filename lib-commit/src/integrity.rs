//! Structured integrity verification over a Markdown commit file (spec
//! §4.7).

use serde::{Deserialize, Serialize};

use crate::canonical::commit_hash;
use crate::markdown::{content_hash, parse, rehydrate};
use crate::sign::{verify_signatures, SignerCertLookup};
use crate::CommitError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityReport {
    pub valid: bool,
    pub filename_matches_commit_id: bool,
    pub content_tampered: bool,
    pub commit_hash_mismatch: bool,
    pub missing_parent: bool,
    pub failed_signers: Vec<String>,
}

/// Checks one Markdown commit file's integrity (spec §4.7):
///
/// - the filename must contain the frontmatter's `commit_id`;
/// - the body's recomputed `content_hash` must match the frontmatter's;
/// - recomputing `commit_hash` from the rehydrated commit must match;
/// - every signature must verify against its signer's cert;
/// - the parent commit's file must exist in `topic_dir`, unless this is
///   the genesis commit (`parent_commit == ""`).
///
/// `report.valid` is true only when every one of the above holds.
pub fn verify_file(
    document: &str,
    filename: &str,
    certs: &dyn SignerCertLookup,
    parent_file_exists: impl FnOnce(&str) -> bool,
) -> Result<IntegrityReport, CommitError> {
    let (frontmatter, body) = parse(document)?;

    let filename_matches_commit_id = filename.contains(&frontmatter.commit_id);
    let content_tampered = content_hash(&body) != frontmatter.content_hash;

    let rehydrated = rehydrate(&frontmatter);
    let commit_hash_mismatch = commit_hash(&rehydrated) != frontmatter.commit_hash;

    let missing_parent = !frontmatter.parent_commit.is_empty() && !parent_file_exists(&frontmatter.parent_commit);

    let failed_signers = verify_signatures(&rehydrated, certs);

    let valid = filename_matches_commit_id
        && !content_tampered
        && !commit_hash_mismatch
        && !missing_parent
        && failed_signers.is_empty();

    Ok(IntegrityReport {
        valid,
        filename_matches_commit_id,
        content_tampered,
        commit_hash_mismatch,
        missing_parent,
        failed_signers,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonical::finalize;
    use crate::commit::{ConsensusType, KnowledgeCommit};
    use crate::markdown::render;
    use crate::sign::sign_commit;
    use lib_identity::{Identity, IdentityCertificate};
    use std::collections::HashMap;

    struct MapLookup(HashMap<String, IdentityCertificate>);
    impl SignerCertLookup for MapLookup {
        fn cert_for(&self, node_id: &str) -> Option<IdentityCertificate> {
            self.0.get(node_id).map(|c| IdentityCertificate::from_pem(&c.certificate_pem).unwrap())
        }
    }

    fn signed_commit(author: &Identity) -> (KnowledgeCommit, String) {
        let mut commit = KnowledgeCommit {
            commit_id: String::new(),
            commit_hash: String::new(),
            parent_commit_id: String::new(),
            topic: "rust".into(),
            summary: "s".into(),
            description: "d".into(),
            entries: vec![],
            participants: vec![author.node_id.as_str().to_string()],
            approved_by: vec![author.node_id.as_str().to_string()],
            rejected_by: vec![],
            consensus_type: ConsensusType::Unanimous,
            confidence: 1.0,
            cultural_perspectives: vec![],
            signatures: Default::default(),
            timestamp: "2025-01-01T00:00:00.000000".into(),
        };
        finalize(&mut commit);
        sign_commit(&mut commit, author.node_id.as_str(), &author.keypair.private).unwrap();
        let document = render(&commit, author.node_id.as_str(), 1);
        (commit, document)
    }

    #[test]
    fn a_freshly_written_genesis_commit_verifies_clean() {
        let author = Identity::generate().unwrap();
        let (commit, document) = signed_commit(&author);
        let filename = format!("rust_{}.md", commit.commit_id);

        let mut certs = HashMap::new();
        certs.insert(author.node_id.as_str().to_string(), author.certificate);
        let lookup = MapLookup(certs);

        let report = verify_file(&document, &filename, &lookup, |_| true).unwrap();
        assert!(report.valid, "{report:?}");
        assert!(!report.missing_parent);
    }

    #[test]
    fn tampered_body_is_flagged_but_hash_and_signatures_stay_structurally_valid() {
        let author = Identity::generate().unwrap();
        let (commit, mut document) = signed_commit(&author);
        document.push_str("an extra tampered line\n");
        let filename = format!("rust_{}.md", commit.commit_id);

        let mut certs = HashMap::new();
        certs.insert(author.node_id.as_str().to_string(), author.certificate);
        let lookup = MapLookup(certs);

        let report = verify_file(&document, &filename, &lookup, |_| true).unwrap();
        assert!(!report.valid);
        assert!(report.content_tampered);
        assert!(!report.commit_hash_mismatch);
        assert!(report.failed_signers.is_empty());
    }

    #[test]
    fn missing_parent_file_is_flagged() {
        let author = Identity::generate().unwrap();
        let (mut commit, _) = signed_commit(&author);
        commit.parent_commit_id = "commit-aaaaaaaaaaaaaaaa".into();
        finalize(&mut commit);
        sign_commit(&mut commit, author.node_id.as_str(), &author.keypair.private).unwrap();
        let document = render(&commit, author.node_id.as_str(), 2);
        let filename = format!("rust_{}.md", commit.commit_id);

        let mut certs = HashMap::new();
        certs.insert(author.node_id.as_str().to_string(), author.certificate);
        let lookup = MapLookup(certs);

        let report = verify_file(&document, &filename, &lookup, |_| false).unwrap();
        assert!(report.missing_parent);
        assert!(!report.valid);
    }
}
