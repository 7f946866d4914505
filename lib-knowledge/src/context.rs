//! `PersonalContext` (spec §3.4): the authoritative per-device document of a
//! node's contributed knowledge, plus the companion `DeviceContext`
//! structured snapshot (spec §6) that the firewall (`lib-firewall`) filters
//! before disclosure to peers.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::topic::Topic;

/// A compact entry in `commit_history` (spec §4.8 step 4): enough to audit
/// what changed without re-reading every Markdown file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitHistoryRecord {
    pub commit_id: String,
    pub topic: String,
    pub timestamp: String,
    pub participants: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PersonalContext {
    #[serde(default)]
    pub profile: serde_json::Value,
    #[serde(default)]
    pub knowledge: HashMap<String, Topic>,
    #[serde(default)]
    pub instruction_blocks: Vec<InstructionBlock>,
    #[serde(default)]
    pub cognitive_profile: Option<serde_json::Value>,
    #[serde(default)]
    pub version: u64,
    #[serde(default)]
    pub last_commit_id: String,
    #[serde(default)]
    pub commit_history: Vec<CommitHistoryRecord>,
}

/// A named system-prompt fragment selectable by the inference orchestrator
/// (spec §4.11: "the instruction set to apply").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstructionBlock {
    pub name: String,
    pub text: String,
}

impl PersonalContext {
    /// Records a just-applied commit: bumps this context's version, updates
    /// the pointer to the latest commit, and appends a history record
    /// (spec §4.8 steps 3–4).
    pub fn record_commit(&mut self, record: CommitHistoryRecord) {
        self.version += 1;
        self.last_commit_id = record.commit_id.clone();
        self.commit_history.push(record);
    }
}

/// A structured device/system snapshot (spec §6's `device_context.json`).
/// Device probing itself is out of scope (spec §1); this crate only
/// defines the document shape the firewall filters and the inference
/// orchestrator embeds.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceContext(pub serde_json::Value);

impl DeviceContext {
    pub fn empty() -> Self {
        Self(serde_json::Value::Object(serde_json::Map::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_a_commit_bumps_version_and_pointer() {
        let mut ctx = PersonalContext::default();
        ctx.record_commit(CommitHistoryRecord {
            commit_id: "commit-aaaa".into(),
            topic: "rust".into(),
            timestamp: "2026-01-01T00:00:00.000000".into(),
            participants: vec!["alice".into()],
        });
        assert_eq!(ctx.version, 1);
        assert_eq!(ctx.last_commit_id, "commit-aaaa");
        assert_eq!(ctx.commit_history.len(), 1);
    }
}
