//! Writes a finalized, signed commit to its versioned Markdown file (spec
//! §4.7's `<topic_slug>_<commit_id>.md`), atomically.

use std::path::Path;

use lib_knowledge::{PersonalContextStore, Topic};

use crate::commit::KnowledgeCommit;
use crate::markdown::render;
use crate::CommitError;

fn atomic_write_sync(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let dir = path.parent().ok_or_else(|| std::io::Error::other("missing parent dir"))?;
    std::fs::create_dir_all(dir)?;
    let tmp = path.with_extension("tmp");
    {
        use std::io::Write;
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

/// Writes `commit`'s Markdown+frontmatter document at
/// `<store>/knowledge/<topic_slug>_<commit_id>.md` and records the new
/// commit_id in `knowledge/index.json` (spec §4.8 step 5, supplemented per
/// SPEC_FULL §7). Returns the path written.
pub async fn write_commit_file(
    store: &PersonalContextStore,
    commit: &KnowledgeCommit,
    author: &str,
    topic_version: u64,
) -> Result<std::path::PathBuf, CommitError> {
    let slug = Topic::slug(&commit.topic);
    let path = store.markdown_path(&slug, &commit.commit_id);
    let document = render(commit, author, topic_version);

    let write_path = path.clone();
    let bytes = document.into_bytes();
    tokio::task::spawn_blocking(move || atomic_write_sync(&write_path, &bytes))
        .await
        .map_err(|e| CommitError::Io(std::io::Error::other(e)))?
        .map_err(CommitError::Io)?;

    store.set_index_entry(&slug, &commit.commit_id).await.map_err(|e| CommitError::Io(std::io::Error::other(e.to_string())))?;

    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonical::finalize;
    use crate::commit::ConsensusType;

    #[tokio::test]
    async fn writes_file_and_updates_index() {
        let dir = tempfile::tempdir().unwrap();
        let store = PersonalContextStore::new(dir.path());

        let mut commit = KnowledgeCommit {
            commit_id: String::new(),
            commit_hash: String::new(),
            parent_commit_id: String::new(),
            topic: "Rust Async".into(),
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

        let path = write_commit_file(&store, &commit, "alice", 1).await.unwrap();
        assert!(path.exists());

        let index = store.load_index().await.unwrap();
        assert_eq!(index.get("rust_async"), Some(&commit.commit_id));
    }
}
