//! Knowledge data model for the Commit Engine (spec §3.4, §4.7–§4.8):
//! `KnowledgeEntry`, `Topic`, `PersonalContext`, `DeviceContext`, and their
//! on-disk persistence. Commit construction, signing, and chain
//! verification live in `lib-commit`, which depends on this crate for the
//! shapes it hashes and signs.

pub mod context;
pub mod entry;
pub mod store;
pub mod topic;

pub use context::{CommitHistoryRecord, DeviceContext, InstructionBlock, PersonalContext};
pub use entry::KnowledgeEntry;
pub use store::{CommitIndex, KnowledgeError, PersonalContextStore};
pub use topic::Topic;
