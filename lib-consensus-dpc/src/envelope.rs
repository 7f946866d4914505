//! Wire shapes for the consensus/session commands (spec §4.8, §4.9, §6):
//! `PROPOSE_KNOWLEDGE_COMMIT`, `VOTE_KNOWLEDGE_COMMIT`,
//! `APPLY_KNOWLEDGE_COMMIT`, `REQUEST_COMMIT_REVISION`,
//! `PROPOSE_NEW_SESSION`, `VOTE_NEW_SESSION`, `NEW_SESSION_RESULT`,
//! `CONTEXT_UPDATED`.

use serde::{Deserialize, Serialize};

use lib_commit::KnowledgeCommit;
use lib_knowledge::KnowledgeEntry;

use crate::proposal::Vote;
use crate::session::SessionDecision;

pub const COMMAND_PROPOSE_KNOWLEDGE_COMMIT: &str = "PROPOSE_KNOWLEDGE_COMMIT";
pub const COMMAND_VOTE_KNOWLEDGE_COMMIT: &str = "VOTE_KNOWLEDGE_COMMIT";
pub const COMMAND_APPLY_KNOWLEDGE_COMMIT: &str = "APPLY_KNOWLEDGE_COMMIT";
pub const COMMAND_REQUEST_COMMIT_REVISION: &str = "REQUEST_COMMIT_REVISION";
pub const COMMAND_PROPOSE_NEW_SESSION: &str = "PROPOSE_NEW_SESSION";
pub const COMMAND_VOTE_NEW_SESSION: &str = "VOTE_NEW_SESSION";
pub const COMMAND_NEW_SESSION_RESULT: &str = "NEW_SESSION_RESULT";
pub const COMMAND_CONTEXT_UPDATED: &str = "CONTEXT_UPDATED";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposeKnowledgeCommitWire {
    pub proposal_id: String,
    pub topic: String,
    pub summary: String,
    pub description: String,
    pub entries: Vec<KnowledgeEntry>,
    pub participants: Vec<String>,
    pub required_dissenter: Option<String>,
    pub deadline_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteKnowledgeCommitWire {
    pub proposal_id: String,
    pub voter: String,
    pub vote: Vote,
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplyKnowledgeCommitWire {
    pub proposal_id: String,
    pub commit: KnowledgeCommit,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestCommitRevisionWire {
    pub proposal_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextUpdatedWire {
    pub node_id: String,
    pub topic: String,
    pub commit_id: String,
    pub version: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposeNewSessionWire {
    pub conversation_id: String,
    pub initiator: String,
    pub participants: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteNewSessionWire {
    pub conversation_id: String,
    pub voter: String,
    pub approve: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSessionResultWire {
    pub conversation_id: String,
    pub decision: SessionDecision,
}
