//! `GET /login/<provider>` and `GET /auth/<provider>` (spec §4.13, §6).
//!
//! The OAuth provider integration itself is out of scope (spec §1): only
//! the contract matters — on success, look up or create the user by
//! email, update its `provider`, issue a JWT, and redirect to a
//! client-local callback. The actual authorization-code exchange with a
//! real provider is represented here by [`OAuthProvider`], a capability
//! trait the binary wires to whatever provider client it chooses; no
//! concrete provider is implemented in this crate.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::{Path, Query, State};
use axum::response::Redirect;
use tokio::sync::RwLock;

use crate::auth::AuthManager;
use crate::error::HubError;

#[derive(Debug, Clone)]
pub struct OAuthIdentity {
    pub email: String,
    pub provider: String,
}

/// Resolves an authorization code (or equivalent) from a provider into a
/// verified email address. Concrete providers (Google, GitHub, …) are
/// out of scope; the binary supplies whatever implementation it needs.
#[async_trait]
pub trait OAuthProvider: Send + Sync {
    fn login_url(&self, local_redirect_port: u16) -> String;
    async fn exchange(&self, code: &str) -> Result<OAuthIdentity, HubError>;
}

#[derive(Debug, Clone, Default)]
pub struct UserRecord {
    pub email: String,
    pub provider: String,
    pub node_id: Option<String>,
}

#[derive(Default)]
pub struct UserStore {
    by_email: RwLock<HashMap<String, UserRecord>>,
}

impl UserStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn upsert(&self, identity: &OAuthIdentity) -> UserRecord {
        let mut users = self.by_email.write().await;
        let record = users.entry(identity.email.clone()).or_insert_with(|| UserRecord {
            email: identity.email.clone(),
            provider: identity.provider.clone(),
            node_id: None,
        });
        record.provider = identity.provider.clone();
        record.clone()
    }

    pub async fn get(&self, email: &str) -> Option<UserRecord> {
        self.by_email.read().await.get(email).cloned()
    }

    /// Links a registered NodeId to a user's session, so subsequent JWTs
    /// carry it and `/profile` requests know whose profile to touch.
    pub async fn link_node(&self, email: &str, node_id: String) {
        if let Some(record) = self.by_email.write().await.get_mut(email) {
            record.node_id = Some(node_id);
        }
    }
}

pub async fn login_handler(Path(provider): Path<String>, State(oauth): State<Arc<dyn OAuthProvider>>) -> Redirect {
    tracing::debug!(provider, "redirecting to provider login");
    Redirect::temporary(&oauth.login_url(0))
}

#[derive(Debug, serde::Deserialize)]
pub struct CallbackQuery {
    pub code: String,
    #[serde(default = "default_local_port")]
    pub local_port: u16,
}

fn default_local_port() -> u16 {
    53682
}

pub struct OAuthState {
    pub provider: Arc<dyn OAuthProvider>,
    pub users: Arc<UserStore>,
    pub auth: Arc<AuthManager>,
}

pub async fn callback_handler(
    Path(_provider): Path<String>,
    Query(query): Query<CallbackQuery>,
    State(state): State<Arc<OAuthState>>,
) -> Result<Redirect, HubError> {
    let identity = state.provider.exchange(&query.code).await?;
    let user = state.users.upsert(&identity).await;
    let token = state.auth.issue_token(&user.email, user.node_id.clone())?;
    Ok(Redirect::temporary(&format!("http://127.0.0.1:{}/callback?access_token={token}", query.local_port)))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StaticProvider;

    #[async_trait]
    impl OAuthProvider for StaticProvider {
        fn login_url(&self, _local_redirect_port: u16) -> String {
            "https://provider.example.com/authorize".to_string()
        }
        async fn exchange(&self, code: &str) -> Result<OAuthIdentity, HubError> {
            Ok(OAuthIdentity { email: format!("{code}@example.com"), provider: "static".to_string() })
        }
    }

    #[tokio::test]
    async fn upsert_creates_then_reuses_the_same_user() {
        let users = UserStore::new();
        let identity = OAuthIdentity { email: "alice@example.com".to_string(), provider: "google".to_string() };
        let first = users.upsert(&identity).await;
        users.link_node("alice@example.com", "dpc-node-abc".to_string()).await;
        let second = users.upsert(&identity).await;
        assert_eq!(first.email, second.email);
        assert_eq!(second.node_id.as_deref(), Some("dpc-node-abc"));
    }

    #[tokio::test]
    async fn exchange_resolves_an_identity() {
        let provider = StaticProvider;
        let identity = provider.exchange("authcode").await.unwrap();
        assert_eq!(identity.email, "authcode@example.com");
    }
}
