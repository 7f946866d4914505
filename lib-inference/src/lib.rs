//! Inference Orchestrator (spec §4.11, C11): local/remote dispatch over a
//! `REMOTE_INFERENCE_REQUEST`/`REMOTE_INFERENCE_RESPONSE` round-trip,
//! prompt assembly from filtered contexts, and centralized token
//! accounting. LLM provider integration itself is out of scope (spec §1)
//! — only the request/response envelope and accounting contract live
//! here, behind the [`LocalInference`] capability trait.

pub mod envelope;
pub mod orchestrator;
pub mod prompt;
pub mod tokens;

pub use envelope::{RemoteInferenceRequest, RemoteInferenceResponse, COMMAND_REMOTE_INFERENCE_REQUEST, COMMAND_REMOTE_INFERENCE_RESPONSE};
pub use orchestrator::{ExecuteRequest, InferenceOrchestrator, InferenceResult, LocalInference, LocalInferenceOutcome};
pub use prompt::{assemble_prompt, ChatMessage, PromptRequest};
pub use tokens::{conversation_usage, ConversationUsage, TokenizerRegistry};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("peer {0} is not connected")]
    PeerNotConnected(String),

    #[error("remote inference request {0} timed out")]
    Timeout(String),

    #[error("remote peer returned an error: {0}")]
    Remote(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("local inference failed: {0}")]
    Local(String),

    #[error("prompt of {prompt_tokens} tokens exceeds the {limit}-token budget for a {context_window}-token context window")]
    PromptTooLarge { prompt_tokens: usize, limit: usize, context_window: usize },

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl InferenceError {
    /// Timeouts are the only error kind spec §4.11 calls retryable; a
    /// disconnected peer or remote-side failure is not (spec §7).
    pub fn is_retryable(&self) -> bool {
        matches!(self, InferenceError::Timeout(_))
    }
}
