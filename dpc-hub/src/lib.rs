//! Federation Hub (spec §4.13, C13): OAuth identity bootstrapping,
//! cryptographic node registration, public-profile discovery, and
//! WebSocket signaling relay for NAT traversal. The Hub is never trusted
//! with content (spec §1) — it stores profiles and certificates, not
//! knowledge, and every content-bearing round trip happens node-to-node.

pub mod auth;
pub mod error;
pub mod geo;
pub mod oauth;
pub mod profile;
pub mod registration;
pub mod signaling;

use std::sync::Arc;

use axum::routing::{get, post, put};
use axum::Router;
use serde_json::json;

pub use error::HubError;

/// Everything the router's handlers close over, grouped the way the
/// teacher's orchestrator groups its service container (spec §4.13).
pub struct HubServices {
    pub auth: Arc<auth::AuthManager>,
    pub users: Arc<oauth::UserStore>,
    pub profiles: Arc<profile::ProfileStore>,
    pub registrations: Arc<registration::RegistrationStore>,
    pub oauth_provider: Arc<dyn oauth::OAuthProvider>,
    pub signaling_relay: Arc<signaling::SignalingRelay>,
}

impl HubServices {
    pub fn new(jwt_secret: &str, oauth_provider: Arc<dyn oauth::OAuthProvider>) -> Self {
        Self {
            auth: Arc::new(auth::AuthManager::new(jwt_secret, chrono::Duration::hours(12))),
            users: Arc::new(oauth::UserStore::new()),
            profiles: Arc::new(profile::ProfileStore::new()),
            registrations: Arc::new(registration::RegistrationStore::new()),
            oauth_provider,
            signaling_relay: Arc::new(signaling::SignalingRelay::new()),
        }
    }
}

/// Builds the full Hub HTTP/WebSocket router (spec §6). A `GeoGate` layer
/// (spec §6 "Geographic gating") is the caller's responsibility to add via
/// `.route_layer` around this router — it's opt-in, not part of the core
/// contract, so it isn't baked in here.
pub fn build_router(services: Arc<HubServices>) -> Router {
    let hub_state = Arc::new(profile::HubState {
        auth: services.auth.clone(),
        users: services.users.clone(),
        profiles: services.profiles.clone(),
    });
    let oauth_state = Arc::new(oauth::OAuthState {
        provider: services.oauth_provider.clone(),
        users: services.users.clone(),
        auth: services.auth.clone(),
    });
    let signaling_state = Arc::new(signaling::SignalingState {
        auth: services.auth.clone(),
        relay: services.signaling_relay.clone(),
    });

    let root = Router::new().route("/", get(root_handler));

    let registration = Router::new()
        .route("/register", post(registration::register_handler))
        .with_state(services.registrations.clone());

    let oauth_routes = Router::new()
        .route("/login/:provider", get(oauth::login_handler))
        .with_state(services.oauth_provider.clone())
        .merge(Router::new().route("/auth/:provider", get(oauth::callback_handler)).with_state(oauth_state));

    let profile_routes = Router::new()
        .route("/users/me/", get(profile::me_handler))
        .route("/profile", put(profile::put_profile_handler))
        .route("/profile/:node_id", get(profile::get_profile_handler))
        .route("/discovery/search", get(profile::discovery_search_handler))
        .with_state(hub_state.clone());

    let auth_routes = Router::new().route("/logout", post(logout_handler)).with_state(services.auth.clone());

    let signaling_routes =
        Router::new().route("/ws/signal", get(signaling::ws_signal_handler)).with_state(signaling_state);

    root.merge(registration)
        .merge(oauth_routes)
        .merge(profile_routes)
        .merge(auth_routes)
        .merge(signaling_routes)
}

async fn root_handler() -> axum::Json<serde_json::Value> {
    axum::Json(json!({ "status": "ok", "service": "dpc-hub", "version": env!("CARGO_PKG_VERSION") }))
}

async fn logout_handler(
    axum::extract::State(auth): axum::extract::State<Arc<auth::AuthManager>>,
    headers: axum::http::HeaderMap,
) -> Result<axum::Json<serde_json::Value>, HubError> {
    let token = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .ok_or(HubError::Unauthenticated)?;
    auth.revoke(token).await;
    Ok(axum::Json(json!({ "status": "ok" })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    struct StaticProvider;
    #[async_trait::async_trait]
    impl oauth::OAuthProvider for StaticProvider {
        fn login_url(&self, _local_redirect_port: u16) -> String {
            "https://provider.example.com/authorize".to_string()
        }
        async fn exchange(&self, code: &str) -> Result<oauth::OAuthIdentity, HubError> {
            Ok(oauth::OAuthIdentity { email: format!("{code}@example.com"), provider: "static".to_string() })
        }
    }

    #[tokio::test]
    async fn root_reports_ok() {
        let services = Arc::new(HubServices::new("test-secret", Arc::new(StaticProvider)));
        let router = build_router(services);
        let response = router.oneshot(Request::builder().uri("/").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn register_then_fetch_profile_requires_auth() {
        let services = Arc::new(HubServices::new("test-secret", Arc::new(StaticProvider)));
        let router = build_router(services);
        let response = router
            .oneshot(Request::builder().uri("/profile/dpc-node-abc").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
