//! Deterministic commit hashing (spec §4.7).
//!
//! `serde_json::Map` is a `BTreeMap` by default (the `preserve_order`
//! feature is off in this workspace), so building the canonical object as a
//! `serde_json::Value` and calling `to_string` already yields sorted keys
//! and no incidental whitespace — the two properties the spec requires.

use serde_json::{json, Value};

use crate::commit::KnowledgeCommit;

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

fn sorted(mut v: Vec<String>) -> Vec<String> {
    v.sort();
    v
}

/// Builds the canonical JSON object hashed into `commit_hash`, containing
/// exactly the fields spec §4.7 names — excluding `conversation_id`,
/// per-entry timestamps, `commit_id`, and `signatures`.
pub fn canonical_value(commit: &KnowledgeCommit) -> Value {
    let mut entries: Vec<Value> = commit
        .entries
        .iter()
        .map(|e| {
            json!({
                "content": e.content,
                "tags": sorted(e.tags.clone()),
                "confidence": round2(e.confidence),
                "cultural_specific": e.cultural_specific,
                "alternative_viewpoints": sorted(e.alternative_viewpoints.clone()),
            })
        })
        .collect();
    entries.sort_by(|a, b| a["content"].as_str().cmp(&b["content"].as_str()));

    json!({
        "parent": commit.parent_commit_id,
        "timestamp": commit.timestamp,
        "topic": commit.topic,
        "summary": commit.summary,
        "description": commit.description,
        "entries": entries,
        "participants": sorted(commit.participants.clone()),
        "approved_by": sorted(commit.approved_by.clone()),
        "rejected_by": sorted(commit.rejected_by.clone()),
        "cultural_perspectives": sorted(commit.cultural_perspectives.clone()),
        "confidence": round2(commit.confidence),
    })
}

/// Serializes [`canonical_value`] to its canonical UTF-8 JSON bytes.
pub fn canonical_json(commit: &KnowledgeCommit) -> String {
    canonical_value(commit).to_string()
}

/// Computes `commit_hash = hex(sha256(canonical_json))`.
pub fn commit_hash(commit: &KnowledgeCommit) -> String {
    lib_crypto::sha256_hex(canonical_json(commit).as_bytes())
}

/// Computes `commit_id = "commit-" + commit_hash[:16]`.
pub fn commit_id_from_hash(commit_hash: &str) -> String {
    format!("commit-{}", &commit_hash[..16.min(commit_hash.len())])
}

/// Fills in `commit.commit_hash` and `commit.commit_id` from the commit's
/// current content. Call this once the commit's semantic fields are final,
/// before signing — signatures are produced over the resulting hash.
pub fn finalize(commit: &mut KnowledgeCommit) {
    let hash = commit_hash(commit);
    commit.commit_id = commit_id_from_hash(&hash);
    commit.commit_hash = hash;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commit::ConsensusType;
    use lib_knowledge::KnowledgeEntry;

    fn entry(content: &str) -> KnowledgeEntry {
        KnowledgeEntry {
            content: content.to_string(),
            tags: vec!["b".into(), "a".into()],
            confidence: 0.876,
            source: None,
            alternative_viewpoints: vec!["z".into(), "a".into()],
            cultural_specific: false,
        }
    }

    fn base_commit(participants: Vec<&str>) -> KnowledgeCommit {
        KnowledgeCommit {
            commit_id: String::new(),
            commit_hash: String::new(),
            parent_commit_id: String::new(),
            topic: "rust".into(),
            summary: "summary".into(),
            description: "description".into(),
            entries: vec![entry("second"), entry("first")],
            participants: participants.into_iter().map(String::from).collect(),
            approved_by: vec!["alice".into(), "bob".into()],
            rejected_by: vec![],
            consensus_type: ConsensusType::Unanimous,
            confidence: 0.9,
            cultural_perspectives: vec![],
            signatures: Default::default(),
            timestamp: "2025-01-01T00:00:00.000000".into(),
        }
    }

    #[test]
    fn hash_is_insensitive_to_participant_and_entry_order() {
        let a = base_commit(vec!["alice", "bob"]);
        let b = base_commit(vec!["bob", "alice"]);
        assert_eq!(commit_hash(&a), commit_hash(&b));
    }

    #[test]
    fn hash_changes_when_content_changes() {
        let a = base_commit(vec!["alice", "bob"]);
        let mut b = base_commit(vec!["alice", "bob"]);
        b.summary = "different summary".into();
        assert_ne!(commit_hash(&a), commit_hash(&b));
    }

    #[test]
    fn commit_id_is_hash_prefixed() {
        let mut commit = base_commit(vec!["alice"]);
        finalize(&mut commit);
        assert_eq!(commit.commit_id, format!("commit-{}", &commit.commit_hash[..16]));
    }

    #[test]
    fn canonical_json_has_no_whitespace() {
        let commit = base_commit(vec!["alice"]);
        let json = canonical_json(&commit);
        assert!(!json.contains(' ') && !json.contains('\n'));
    }
}
