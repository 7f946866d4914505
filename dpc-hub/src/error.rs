//! Hub error type and its HTTP mapping (spec §4.13, §6).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HubError {
    #[error("registration rejected: {0}")]
    RegistrationRejected(String),

    #[error("missing or malformed bearer token")]
    Unauthenticated,

    #[error("token has been revoked")]
    TokenRevoked,

    #[error("token is invalid or expired: {0}")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),

    #[error("profile not found")]
    ProfileNotFound,

    #[error("node {0} is not currently connected to the signaling relay")]
    PeerNotSignaling(String),

    #[error("malformed request body: {0}")]
    Malformed(#[from] serde_json::Error),
}

impl IntoResponse for HubError {
    fn into_response(self) -> Response {
        let status = match &self {
            HubError::RegistrationRejected(_) => StatusCode::BAD_REQUEST,
            HubError::Unauthenticated | HubError::TokenRevoked | HubError::InvalidToken(_) => StatusCode::UNAUTHORIZED,
            HubError::ProfileNotFound => StatusCode::NOT_FOUND,
            HubError::PeerNotSignaling(_) => StatusCode::BAD_GATEWAY,
            HubError::Malformed(_) => StatusCode::BAD_REQUEST,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
