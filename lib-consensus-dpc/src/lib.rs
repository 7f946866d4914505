//! Consensus Manager (spec §4.8, C8) and Session Manager (spec §4.9, C9):
//! proposal voting with mandatory dissent, and conversation-scoped session
//! approval. Drives `lib-commit` through the approved-commit pipeline.

pub mod envelope;
pub mod manager;
pub mod proposal;
pub mod session;

pub use envelope::{
    ApplyKnowledgeCommitWire, ContextUpdatedWire, NewSessionResultWire, ProposeKnowledgeCommitWire, ProposeNewSessionWire, RequestCommitRevisionWire,
    VoteKnowledgeCommitWire, VoteNewSessionWire, COMMAND_APPLY_KNOWLEDGE_COMMIT, COMMAND_CONTEXT_UPDATED, COMMAND_NEW_SESSION_RESULT,
    COMMAND_PROPOSE_KNOWLEDGE_COMMIT, COMMAND_PROPOSE_NEW_SESSION, COMMAND_REQUEST_COMMIT_REVISION, COMMAND_VOTE_KNOWLEDGE_COMMIT, COMMAND_VOTE_NEW_SESSION,
};
pub use manager::ConsensusManager;
pub use proposal::{CastVote, Decision, Proposal, Vote, DEFAULT_CONSENSUS_THRESHOLD, DEFAULT_VOTE_DEADLINE, DISSENT_MIN_PARTICIPANTS};
pub use session::{SessionDecision, SessionManager, SessionTally, SESSION_VOTE_DEADLINE};

#[derive(Debug, thiserror::Error)]
pub enum ConsensusDpcError {
    #[error("unknown proposal: {0}")]
    UnknownProposal(String),

    #[error("unknown session: {0}")]
    UnknownSession(String),

    #[error("duplicate pending session proposal for conversation {0}")]
    DuplicateSessionProposal(String),

    #[error("{0} is not a participant in this proposal")]
    VoterNotParticipant(String),

    #[error("commit engine error: {0}")]
    Commit(#[from] lib_commit::CommitError),

    #[error("knowledge store error: {0}")]
    Knowledge(#[from] lib_knowledge::KnowledgeError),
}
