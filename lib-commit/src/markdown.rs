//! Markdown+YAML-frontmatter persistence (spec §4.7, §6).
//!
//! The frontmatter carries more than the spec's "minimum required keys" —
//! it also inlines `entries`, `summary`, and `description`, since without
//! them a commit can't be rehydrated for `commit_hash` re-verification
//! purely from the file on disk (the body is prose, not a parseable data
//! structure). This is additive: every required key is still present and
//! unchanged in meaning.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use lib_knowledge::KnowledgeEntry;

use crate::commit::{ConsensusType, KnowledgeCommit};
use crate::CommitError;

const FENCE: &str = "---";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrontMatter {
    pub topic: String,
    pub commit_id: String,
    pub commit_hash: String,
    pub parent_commit: String,
    pub content_hash: String,
    pub timestamp: String,
    pub version: u64,
    pub author: String,
    pub participants: Vec<String>,
    pub approved_by: Vec<String>,
    pub rejected_by: Vec<String>,
    pub consensus: ConsensusType,
    pub confidence_score: f64,
    pub signatures: BTreeMap<String, String>,
    pub cultural_perspectives: Vec<String>,
    // Supplemental, beyond the spec's minimum key set.
    pub summary: String,
    pub description: String,
    pub entries: Vec<KnowledgeEntry>,
}

/// Renders the commit body: plain Markdown sections, LF-only line endings
/// so `content_hash` is platform-independent.
fn render_body(commit: &KnowledgeCommit) -> String {
    let mut body = String::new();
    body.push_str(&format!("# {}\n\n", commit.topic));
    body.push_str("## Summary\n\n");
    body.push_str(&commit.summary);
    body.push_str("\n\n## Description\n\n");
    body.push_str(&commit.description);
    body.push_str("\n\n## Entries\n\n");
    for entry in &commit.entries {
        body.push_str(&format!("- {}\n", entry.content));
    }
    body
}

/// `content_hash = hex(sha256(content))[:16]` (spec §4.7).
pub fn content_hash(body: &str) -> String {
    let full = lib_crypto::sha256_hex(body.as_bytes());
    full[..16.min(full.len())].to_string()
}

/// Renders a commit, an `author` NodeId, and the `Topic.version` it landed
/// at into the complete Markdown-with-frontmatter document.
pub fn render(commit: &KnowledgeCommit, author: &str, topic_version: u64) -> String {
    let body = render_body(commit);
    let frontmatter = FrontMatter {
        topic: commit.topic.clone(),
        commit_id: commit.commit_id.clone(),
        commit_hash: commit.commit_hash.clone(),
        parent_commit: commit.parent_commit_id.clone(),
        content_hash: content_hash(&body),
        timestamp: commit.timestamp.clone(),
        version: topic_version,
        author: author.to_string(),
        participants: commit.participants.clone(),
        approved_by: commit.approved_by.clone(),
        rejected_by: commit.rejected_by.clone(),
        consensus: commit.consensus_type,
        confidence_score: commit.confidence,
        signatures: commit.signatures.clone(),
        cultural_perspectives: commit.cultural_perspectives.clone(),
        summary: commit.summary.clone(),
        description: commit.description.clone(),
        entries: commit.entries.clone(),
    };
    let yaml = serde_yaml::to_string(&frontmatter).expect("FrontMatter always serializes");
    format!("{FENCE}\n{yaml}{FENCE}\n{body}")
}

/// Splits a document into its frontmatter and body.
pub fn parse(document: &str) -> Result<(FrontMatter, String), CommitError> {
    let document = document.replace("\r\n", "\n");
    let rest = document.strip_prefix(FENCE).and_then(|r| r.strip_prefix('\n')).ok_or(CommitError::MalformedDocument)?;
    let end = rest.find(&format!("\n{FENCE}\n")).ok_or(CommitError::MalformedDocument)?;
    let yaml = &rest[..end];
    let body = &rest[end + 1 + FENCE.len() + 1..];
    let frontmatter: FrontMatter = serde_yaml::from_str(yaml)?;
    Ok((frontmatter, body.to_string()))
}

/// Reconstructs a [`KnowledgeCommit`] from a parsed frontmatter, so the
/// integrity checker can recompute `commit_hash` and compare.
pub fn rehydrate(frontmatter: &FrontMatter) -> KnowledgeCommit {
    KnowledgeCommit {
        commit_id: frontmatter.commit_id.clone(),
        commit_hash: frontmatter.commit_hash.clone(),
        parent_commit_id: frontmatter.parent_commit.clone(),
        topic: frontmatter.topic.clone(),
        summary: frontmatter.summary.clone(),
        description: frontmatter.description.clone(),
        entries: frontmatter.entries.clone(),
        participants: frontmatter.participants.clone(),
        approved_by: frontmatter.approved_by.clone(),
        rejected_by: frontmatter.rejected_by.clone(),
        consensus_type: frontmatter.consensus,
        confidence: frontmatter.confidence_score,
        cultural_perspectives: frontmatter.cultural_perspectives.clone(),
        signatures: frontmatter.signatures.clone(),
        timestamp: frontmatter.timestamp.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonical::finalize;

    fn sample() -> KnowledgeCommit {
        let mut commit = KnowledgeCommit {
            commit_id: String::new(),
            commit_hash: String::new(),
            parent_commit_id: String::new(),
            topic: "rust async".into(),
            summary: "Async runtimes".into(),
            description: "Covers tokio and async-std.".into(),
            entries: vec![KnowledgeEntry {
                content: "tokio is the dominant runtime".into(),
                tags: vec!["rust".into()],
                confidence: 0.9,
                source: None,
                alternative_viewpoints: vec![],
                cultural_specific: false,
            }],
            participants: vec!["alice".into(), "bob".into()],
            approved_by: vec!["alice".into(), "bob".into()],
            rejected_by: vec![],
            consensus_type: ConsensusType::Unanimous,
            confidence: 0.9,
            cultural_perspectives: vec![],
            signatures: Default::default(),
            timestamp: "2025-01-01T00:00:00.000000".into(),
        };
        finalize(&mut commit);
        commit
    }

    #[test]
    fn renders_and_parses_round_trip() {
        let commit = sample();
        let document = render(&commit, "alice", 1);
        let (frontmatter, body) = parse(&document).unwrap();
        assert_eq!(frontmatter.commit_id, commit.commit_id);
        assert_eq!(frontmatter.content_hash, content_hash(&body));

        let rehydrated = rehydrate(&frontmatter);
        assert_eq!(crate::canonical::commit_hash(&rehydrated), commit.commit_hash);
    }

    #[test]
    fn tampering_with_the_body_changes_content_hash() {
        let commit = sample();
        let mut document = render(&commit, "alice", 1);
        document.push_str("tampered\n");
        let (frontmatter, body) = parse(&document).unwrap();
        assert_ne!(frontmatter.content_hash, content_hash(&body));
    }
}
