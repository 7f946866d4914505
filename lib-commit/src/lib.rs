//! Commit Engine (spec §4.7, C7): deterministic commit hashing, RSA-PSS
//! signing, Markdown+YAML-frontmatter persistence, and chain/integrity
//! verification. Consumes the data shapes in `lib-knowledge`; the
//! Consensus Manager (`lib-consensus-dpc`) drives this crate through a
//! proposal's approval.

pub mod canonical;
pub mod chain;
pub mod commit;
pub mod integrity;
pub mod markdown;
pub mod persist;
pub mod sign;

pub use canonical::{canonical_json, commit_hash, commit_id_from_hash, finalize};
pub use chain::verify_chain;
pub use commit::{ConsensusType, KnowledgeCommit};
pub use integrity::{verify_file, IntegrityReport};
pub use markdown::{content_hash, parse as parse_markdown, render as render_markdown, rehydrate, FrontMatter};
pub use persist::write_commit_file;
pub use sign::{sign_commit, verify_signatures, SignerCertLookup};

#[derive(Debug, thiserror::Error)]
pub enum CommitError {
    #[error("commit has not been finalized: call canonical::finalize before signing")]
    NotFinalized,

    #[error("malformed commit document: missing or unparseable frontmatter")]
    MalformedDocument,

    #[error("commit chain is cyclic at {0}")]
    CyclicChain(String),

    #[error("commit chain is broken: {0}")]
    BrokenChain(String),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("crypto error: {0}")]
    Crypto(#[from] lib_crypto::CryptoError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
