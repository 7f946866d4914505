//! Context Firewall (spec §4.10, C10): a per-node rules file governing
//! which parts of `personal.json`/`device_context.json` may be disclosed
//! to which peer, group, or the Hub, plus compute-sharing gates for the
//! Inference Orchestrator (C11).
//!
//! Denial is never surfaced to a peer as an error (spec §7: "Firewall
//! denials: surfaced as empty/filtered documents, never as exceptions to
//! peers — denial is indistinguishable from absence"); the only fallible
//! operation in this crate is parsing the rules file itself.

pub mod compute;
pub mod decision;
pub mod filter;
pub mod matcher;
pub mod rules;
pub mod service;
pub mod wire;

pub use compute::ComputeConfig;
pub use decision::{can_access, Requester, Verdict};
pub use filter::filter_document;
pub use rules::{AccessRules, FileKind, RuleAtom};
pub use service::ContextService;
pub use wire::{
    new_request_id, ContextRequestWire, ContextResponseWire, COMMAND_CONTEXT_RESPONSE, COMMAND_DEVICE_CONTEXT_RESPONSE, COMMAND_GET_CONTEXT,
    COMMAND_REQUEST_CONTEXT, COMMAND_REQUEST_DEVICE_CONTEXT,
};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FirewallError {
    #[error("malformed rules file at line {line}: {reason}")]
    Malformed { line: usize, reason: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("peer {0} is not connected")]
    PeerNotConnected(String),

    #[error("context request {0} timed out")]
    Timeout(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}
