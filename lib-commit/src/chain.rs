//! Commit chain verification (spec §3.4, §4.7): parent linkage and cycle
//! rejection across a topic's ordered sequence of commits.

use std::collections::HashSet;

use crate::commit::KnowledgeCommit;
use crate::CommitError;

/// Verifies that `commits`, given in chain order (genesis first), form a
/// valid parent-linked, acyclic chain: each commit after the first must
/// name the previous commit's id as its parent, and the parent's
/// `commit_hash[:16]` must equal the hash suffix embedded in that
/// reference.
pub fn verify_chain(commits: &[KnowledgeCommit]) -> Result<(), CommitError> {
    let mut seen = HashSet::new();

    for (i, commit) in commits.iter().enumerate() {
        if !seen.insert(commit.commit_id.clone()) {
            return Err(CommitError::CyclicChain(commit.commit_id.clone()));
        }

        if i == 0 {
            if !commit.parent_commit_id.is_empty() {
                return Err(CommitError::BrokenChain(format!(
                    "genesis commit {} has non-empty parent_commit_id",
                    commit.commit_id
                )));
            }
            continue;
        }

        let parent = &commits[i - 1];
        if commit.parent_commit_id != parent.commit_id {
            return Err(CommitError::BrokenChain(format!(
                "commit {} names parent {}, expected {}",
                commit.commit_id, commit.parent_commit_id, parent.commit_id
            )));
        }

        let expected_suffix = &parent.commit_hash[..16.min(parent.commit_hash.len())];
        let referenced_suffix = commit.parent_commit_id.strip_prefix("commit-").unwrap_or("");
        if expected_suffix != referenced_suffix {
            return Err(CommitError::BrokenChain(format!(
                "commit {} parent reference hash suffix does not match parent's commit_hash",
                commit.commit_id
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonical::finalize;
    use crate::commit::ConsensusType;

    fn commit(parent: &str, topic: &str) -> KnowledgeCommit {
        let mut c = KnowledgeCommit {
            commit_id: String::new(),
            commit_hash: String::new(),
            parent_commit_id: parent.to_string(),
            topic: topic.to_string(),
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
        finalize(&mut c);
        c
    }

    #[test]
    fn accepts_a_valid_linear_chain() {
        let genesis = commit("", "rust");
        let mut second = commit(&genesis.commit_id, "rust");
        second.description = "different, so the hash differs".into();
        finalize(&mut second);
        second.parent_commit_id = genesis.commit_id.clone();

        assert!(verify_chain(&[genesis, second]).is_ok());
    }

    #[test]
    fn rejects_a_broken_parent_reference() {
        let genesis = commit("", "rust");
        let mut second = commit("commit-0000000000000000", "rust");
        finalize(&mut second);

        assert!(verify_chain(&[genesis, second]).is_err());
    }

    #[test]
    fn rejects_a_repeated_commit_id() {
        let genesis = commit("", "rust");
        assert!(verify_chain(&[genesis.clone(), genesis]).is_err());
    }
}
