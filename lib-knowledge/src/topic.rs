//! A topic: the accumulated knowledge entries a node holds under one
//! heading, plus the pointer to its most recent commit (spec §3.4).

use serde::{Deserialize, Serialize};

use crate::entry::KnowledgeEntry;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Topic {
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub entries: Vec<KnowledgeEntry>,
    /// Self-assessed mastery, `[0, 1]`; absent until a commit sets it.
    #[serde(default)]
    pub mastery_level: Option<f64>,
    #[serde(default)]
    pub version: u64,
    #[serde(default)]
    pub markdown_file: Option<String>,
    #[serde(default)]
    pub commit_id: Option<String>,
}

impl Topic {
    /// Derives the filesystem-safe slug used in `<slug>_<commit_id>.md`
    /// (spec §4.7): lowercase, non-alphanumeric runs collapsed to `_`.
    pub fn slug(topic_name: &str) -> String {
        let mut slug = String::with_capacity(topic_name.len());
        let mut last_was_sep = false;
        for ch in topic_name.chars() {
            if ch.is_ascii_alphanumeric() {
                slug.push(ch.to_ascii_lowercase());
                last_was_sep = false;
            } else if !last_was_sep && !slug.is_empty() {
                slug.push('_');
                last_was_sep = true;
            }
        }
        while slug.ends_with('_') {
            slug.pop();
        }
        slug
    }

    /// Merges newly-approved entries into this topic and bumps its
    /// version (spec §4.8 step 3: "merge entries into the Topic, bump
    /// Topic.version").
    pub fn merge_entries(&mut self, entries: impl IntoIterator<Item = KnowledgeEntry>) {
        self.entries.extend(entries);
        self.version += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugifies_mixed_case_and_punctuation() {
        assert_eq!(Topic::slug("Rust Async/Await!"), "rust_async_await");
    }

    #[test]
    fn merging_entries_bumps_version() {
        let mut topic = Topic::default();
        topic.merge_entries(vec![KnowledgeEntry {
            content: "a".into(),
            tags: vec![],
            confidence: 0.9,
            source: None,
            alternative_viewpoints: vec![],
            cultural_specific: false,
        }]);
        assert_eq!(topic.version, 1);
        assert_eq!(topic.entries.len(), 1);
    }
}
