//! On-disk persistence for a node's `PersonalContext` and its companion
//! `knowledge/index.json` topic-slug → commit_id index (spec §4.7's
//! filesystem layout, supplemented per SPEC_FULL §7 so lookups don't
//! require scanning every Markdown file in the knowledge directory).
//!
//! Writes go through a temp-file-then-rename so a crash mid-write never
//! leaves `personal.json` truncated or half-written.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::context::{DeviceContext, PersonalContext};

#[derive(Debug, thiserror::Error)]
pub enum KnowledgeError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed json at {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

fn atomic_write_sync(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let dir = path.parent().ok_or_else(|| std::io::Error::other("missing parent dir"))?;
    std::fs::create_dir_all(dir)?;

    let tmp = path.with_extension("tmp");
    {
        let mut f = std::fs::File::create(&tmp)?;
        f.write_all(bytes)?;
        f.sync_all()?;
    }
    std::fs::rename(&tmp, path)?;
    if let Ok(d) = std::fs::File::open(dir) {
        let _ = d.sync_all();
    }
    Ok(())
}

async fn atomic_write_async(path: PathBuf, bytes: Vec<u8>) -> Result<(), KnowledgeError> {
    let for_err = path.clone();
    tokio::task::spawn_blocking(move || atomic_write_sync(&path, &bytes))
        .await
        .map_err(|e| KnowledgeError::Io { path: for_err.clone(), source: std::io::Error::other(e) })?
        .map_err(|source| KnowledgeError::Io { path: for_err, source })
}

/// Topic slug → latest commit_id, so a node can resolve "what commit backs
/// this topic" without opening every Markdown file under `knowledge/`.
pub type CommitIndex = HashMap<String, String>;

/// Owns the on-disk layout for one node's knowledge directory:
///
/// ```text
/// <root>/personal.json
/// <root>/device_context.json
/// <root>/knowledge/index.json
/// <root>/knowledge/<topic_slug>_<commit_id>.md   (written by the commit engine)
/// ```
#[derive(Debug, Clone)]
pub struct PersonalContextStore {
    root: PathBuf,
}

impl PersonalContextStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn personal_context_path(&self) -> PathBuf {
        self.root.join("personal.json")
    }

    pub fn device_context_path(&self) -> PathBuf {
        self.root.join("device_context.json")
    }

    pub fn index_path(&self) -> PathBuf {
        self.root.join("knowledge").join("index.json")
    }

    /// Returns the path a commit's Markdown file should live at, matching
    /// the `<topic_slug>_<commit_id>.md` convention (spec §4.7).
    pub fn markdown_path(&self, topic_slug: &str, commit_id: &str) -> PathBuf {
        self.root.join("knowledge").join(format!("{topic_slug}_{commit_id}.md"))
    }

    pub async fn load_personal_context(&self) -> Result<PersonalContext, KnowledgeError> {
        let path = self.personal_context_path();
        match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|source| KnowledgeError::Json { path, source }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(PersonalContext::default()),
            Err(source) => Err(KnowledgeError::Io { path, source }),
        }
    }

    pub async fn save_personal_context(&self, ctx: &PersonalContext) -> Result<(), KnowledgeError> {
        let path = self.personal_context_path();
        let bytes = serde_json::to_vec_pretty(ctx).map_err(|source| KnowledgeError::Json { path: path.clone(), source })?;
        atomic_write_async(path, bytes).await
    }

    pub async fn load_device_context(&self) -> Result<DeviceContext, KnowledgeError> {
        let path = self.device_context_path();
        match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|source| KnowledgeError::Json { path, source }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(DeviceContext::empty()),
            Err(source) => Err(KnowledgeError::Io { path, source }),
        }
    }

    pub async fn save_device_context(&self, ctx: &DeviceContext) -> Result<(), KnowledgeError> {
        let path = self.device_context_path();
        let bytes = serde_json::to_vec_pretty(ctx).map_err(|source| KnowledgeError::Json { path: path.clone(), source })?;
        atomic_write_async(path, bytes).await
    }

    pub async fn load_index(&self) -> Result<CommitIndex, KnowledgeError> {
        let path = self.index_path();
        match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|source| KnowledgeError::Json { path, source }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(CommitIndex::new()),
            Err(source) => Err(KnowledgeError::Io { path, source }),
        }
    }

    pub async fn save_index(&self, index: &CommitIndex) -> Result<(), KnowledgeError> {
        let path = self.index_path();
        let bytes = serde_json::to_vec_pretty(index).map_err(|source| KnowledgeError::Json { path: path.clone(), source })?;
        atomic_write_async(path, bytes).await
    }

    /// Records a topic's new latest commit in the index, creating the
    /// index file on first use.
    pub async fn set_index_entry(&self, topic_slug: &str, commit_id: &str) -> Result<(), KnowledgeError> {
        let mut index = self.load_index().await?;
        index.insert(topic_slug.to_string(), commit_id.to_string());
        self.save_index(&index).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_personal_context() {
        let dir = tempfile::tempdir().unwrap();
        let store = PersonalContextStore::new(dir.path());

        let mut ctx = PersonalContext::default();
        ctx.version = 3;
        ctx.last_commit_id = "commit-deadbeef".into();
        store.save_personal_context(&ctx).await.unwrap();

        let loaded = store.load_personal_context().await.unwrap();
        assert_eq!(loaded.version, 3);
        assert_eq!(loaded.last_commit_id, "commit-deadbeef");
    }

    #[tokio::test]
    async fn missing_personal_context_loads_as_default() {
        let dir = tempfile::tempdir().unwrap();
        let store = PersonalContextStore::new(dir.path());
        let loaded = store.load_personal_context().await.unwrap();
        assert_eq!(loaded.version, 0);
    }

    #[tokio::test]
    async fn index_entries_persist_across_loads() {
        let dir = tempfile::tempdir().unwrap();
        let store = PersonalContextStore::new(dir.path());

        store.set_index_entry("rust_async", "commit-1111").await.unwrap();
        store.set_index_entry("rust_macros", "commit-2222").await.unwrap();

        let index = store.load_index().await.unwrap();
        assert_eq!(index.get("rust_async").map(String::as_str), Some("commit-1111"));
        assert_eq!(index.get("rust_macros").map(String::as_str), Some("commit-2222"));
    }

    #[test]
    fn markdown_path_matches_slug_commit_convention() {
        let store = PersonalContextStore::new("/tmp/dpc");
        let path = store.markdown_path("rust_async", "commit-aaaa");
        assert_eq!(path.file_name().unwrap(), "rust_async_commit-aaaa.md");
    }
}
