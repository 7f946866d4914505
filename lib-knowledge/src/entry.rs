//! A single piece of contributed knowledge (spec §3.4).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeEntry {
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Confidence in `[0, 1]`.
    pub confidence: f64,
    #[serde(default)]
    pub source: Option<serde_json::Value>,
    #[serde(default)]
    pub alternative_viewpoints: Vec<String>,
    #[serde(default)]
    pub cultural_specific: bool,
}

impl KnowledgeEntry {
    /// Clamps confidence into `[0, 1]` — callers that parse untrusted
    /// frontmatter or remote proposals should call this before trusting
    /// the value downstream.
    pub fn clamp_confidence(&mut self) {
        self.confidence = self.confidence.clamp(0.0, 1.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamps_out_of_range_confidence() {
        let mut entry = KnowledgeEntry {
            content: "x".into(),
            tags: vec![],
            confidence: 1.5,
            source: None,
            alternative_viewpoints: vec![],
            cultural_specific: false,
        };
        entry.clamp_confidence();
        assert_eq!(entry.confidence, 1.0);
    }
}
