//! The `KnowledgeCommit` record (spec §3.4, §4.7).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use lib_knowledge::KnowledgeEntry;

/// Whether every voter approved, or a strict/relaxed majority did (spec
/// §4.8): drives how the Markdown frontmatter's `consensus` key reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsensusType {
    Unanimous,
    Majority,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeCommit {
    /// Empty until [`crate::canonical::finalize`] computes it.
    #[serde(default)]
    pub commit_id: String,
    #[serde(default)]
    pub commit_hash: String,
    pub parent_commit_id: String,
    pub topic: String,
    pub summary: String,
    pub description: String,
    pub entries: Vec<KnowledgeEntry>,
    pub participants: Vec<String>,
    pub approved_by: Vec<String>,
    pub rejected_by: Vec<String>,
    pub consensus_type: ConsensusType,
    pub confidence: f64,
    #[serde(default)]
    pub cultural_perspectives: Vec<String>,
    /// `NodeId -> base64(RSA-PSS-sign(commit_hash_bytes))`. A `BTreeMap`
    /// keeps iteration order stable for display and for the frontmatter
    /// writer, though it is never itself part of the canonical hash input.
    #[serde(default)]
    pub signatures: BTreeMap<String, String>,
    /// ISO-8601, microsecond precision, e.g. `2025-01-01T00:00:00.000000`.
    pub timestamp: String,
}

impl KnowledgeCommit {
    /// Every NodeId that signed must also appear in `approved_by` (spec
    /// §3.4 invariant).
    pub fn signatures_match_approvals(&self) -> bool {
        self.signatures.keys().all(|signer| self.approved_by.iter().any(|a| a == signer))
    }
}
