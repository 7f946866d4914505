//! JWT issuance/validation and the revocation blacklist (spec §4.13, §6):
//! `sub = email`, short expiry, logout adds the token to an in-memory
//! blacklist swept in the background so it doesn't grow unbounded.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::error::HubError;

const BLACKLIST_SWEEP_INTERVAL: Duration = Duration::from_secs(300);

/// Claims embedded in every Hub-issued JWT (spec §6: `sub=email`). Nodes
/// are linked to a user session once registration and OAuth login have
/// both completed for the same client, at which point `node_id` is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubClaims {
    pub sub: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    pub exp: i64,
    pub iat: i64,
}

pub struct AuthManager {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    token_ttl: chrono::Duration,
    blacklist: Arc<RwLock<HashMap<String, i64>>>,
    shutdown: CancellationToken,
}

impl AuthManager {
    pub fn new(jwt_secret: &str, token_ttl: chrono::Duration) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(jwt_secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(jwt_secret.as_bytes()),
            validation: Validation::default(),
            token_ttl,
            blacklist: Arc::new(RwLock::new(HashMap::new())),
            shutdown: CancellationToken::new(),
        }
    }

    /// Issues a short-lived JWT for `email`, optionally already linked to
    /// `node_id` (spec §4.13: "issue a JWT (`sub=email`, short expiry)").
    pub fn issue_token(&self, email: &str, node_id: Option<String>) -> Result<String, HubError> {
        let now = Utc::now();
        let claims = HubClaims {
            sub: email.to_string(),
            node_id,
            iat: now.timestamp(),
            exp: (now + self.token_ttl).timestamp(),
        };
        encode(&Header::default(), &claims, &self.encoding_key).map_err(HubError::InvalidToken)
    }

    /// Validates signature, expiry, and blacklist membership.
    pub async fn authenticate(&self, token: &str) -> Result<HubClaims, HubError> {
        if self.blacklist.read().await.contains_key(token) {
            return Err(HubError::TokenRevoked);
        }
        let data = decode::<HubClaims>(token, &self.decoding_key, &self.validation)?;
        Ok(data.claims)
    }

    /// `/logout` adds the token to the blacklist (spec §4.13, §6).
    pub async fn revoke(&self, token: &str) {
        let exp = decode::<HubClaims>(token, &self.decoding_key, &Validation { validate_exp: false, ..self.validation.clone() })
            .map(|d| d.claims.exp)
            .unwrap_or_else(|_| Utc::now().timestamp());
        self.blacklist.write().await.insert(token.to_string(), exp);
    }

    pub fn spawn_blacklist_sweep(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(BLACKLIST_SWEEP_INTERVAL);
            loop {
                tokio::select! {
                    _ = this.shutdown.cancelled() => return,
                    _ = interval.tick() => {
                        let now = Utc::now().timestamp();
                        let mut blacklist = this.blacklist.write().await;
                        let before = blacklist.len();
                        blacklist.retain(|_, exp| *exp > now);
                        let evicted = before - blacklist.len();
                        if evicted > 0 {
                            tracing::debug!(evicted, remaining = blacklist.len(), "swept expired blacklist entries");
                        }
                    }
                }
            }
        })
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

/// Extracts a `Bearer <token>` header value, validates it, and returns the
/// embedded claims.
pub async fn authenticate_bearer(auth: &AuthManager, authorization: Option<&str>) -> Result<HubClaims, HubError> {
    let token = authorization.and_then(|h| h.strip_prefix("Bearer ")).ok_or(HubError::Unauthenticated)?;
    auth.authenticate(token).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn issues_and_validates_a_token() {
        let auth = AuthManager::new("test-secret", chrono::Duration::minutes(15));
        let token = auth.issue_token("alice@example.com", Some("dpc-node-abc".to_string())).unwrap();
        let claims = auth.authenticate(&token).await.unwrap();
        assert_eq!(claims.sub, "alice@example.com");
        assert_eq!(claims.node_id.as_deref(), Some("dpc-node-abc"));
    }

    #[tokio::test]
    async fn revoked_token_is_rejected() {
        let auth = AuthManager::new("test-secret", chrono::Duration::minutes(15));
        let token = auth.issue_token("alice@example.com", None).unwrap();
        auth.revoke(&token).await;
        let result = auth.authenticate(&token).await;
        assert!(matches!(result, Err(HubError::TokenRevoked)));
    }

    #[tokio::test]
    async fn bearer_prefix_is_required() {
        let auth = AuthManager::new("test-secret", chrono::Duration::minutes(15));
        let result = authenticate_bearer(&auth, Some("not-bearer token")).await;
        assert!(matches!(result, Err(HubError::Unauthenticated)));
    }
}
