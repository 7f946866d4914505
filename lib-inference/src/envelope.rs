//! The `REMOTE_INFERENCE_REQUEST`/`REMOTE_INFERENCE_RESPONSE` wire shapes
//! (spec §4.11, §6).

use serde::{Deserialize, Serialize};

pub const COMMAND_REMOTE_INFERENCE_REQUEST: &str = "REMOTE_INFERENCE_REQUEST";
pub const COMMAND_REMOTE_INFERENCE_RESPONSE: &str = "REMOTE_INFERENCE_RESPONSE";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteInferenceRequest {
    pub request_id: String,
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<String>>,
}

/// `status` is `"ok"` or `"error"`; the fields actually present follow
/// from which one it is, but the wire shape itself is flat (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteInferenceResponse {
    pub request_id: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens_used: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
}

impl RemoteInferenceResponse {
    pub fn ok(request_id: String, outcome: &crate::orchestrator::LocalInferenceOutcome) -> Self {
        Self {
            request_id,
            status: "ok".to_string(),
            response: Some(outcome.response.clone()),
            error: None,
            tokens_used: Some(outcome.tokens_used),
            prompt_tokens: Some(outcome.prompt_tokens),
            response_tokens: Some(outcome.response_tokens),
            model_max_tokens: Some(outcome.model_max_tokens),
            model: Some(outcome.model.clone()),
            provider: Some(outcome.provider.clone()),
        }
    }

    pub fn error(request_id: String, message: String) -> Self {
        Self {
            request_id,
            status: "error".to_string(),
            response: None,
            error: Some(message),
            tokens_used: None,
            prompt_tokens: None,
            response_tokens: None,
            model_max_tokens: None,
            model: None,
            provider: None,
        }
    }
}

/// A fresh random correlation id for a remote inference round-trip.
pub fn new_request_id() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_response_omits_success_fields() {
        let resp = RemoteInferenceResponse::error("req-1".into(), "peer overloaded".into());
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["status"], "error");
        assert!(json.get("response").is_none());
        assert_eq!(json["error"], "peer overloaded");
    }
}
