//! `/profile`, `/profile/{node_id}`, and `/discovery/search` (spec §4.13,
//! §6). Profile storage is an in-process `RwLock<HashMap>` — a stand-in
//! for "not our ORM" per spec.md's explicit non-goal on the Hub's
//! persistence layer.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::auth::{authenticate_bearer, AuthManager};
use crate::error::HubError;
use crate::oauth::UserStore;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub name: String,
    pub description: String,
    /// topic → expertise level, searched by `/discovery/search?min_level=`.
    pub expertise: HashMap<String, u32>,
    #[serde(default)]
    pub compute: serde_json::Value,
    pub p2p_uri_hint: String,
}

#[derive(Default)]
pub struct ProfileStore {
    profiles: RwLock<HashMap<String, Profile>>,
}

impl ProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put(&self, node_id: &str, profile: Profile) {
        self.profiles.write().await.insert(node_id.to_string(), profile);
    }

    pub async fn get(&self, node_id: &str) -> Option<Profile> {
        self.profiles.read().await.get(node_id).cloned()
    }

    pub async fn search(&self, query: &str, min_level: u32) -> Vec<(String, Profile)> {
        let query = query.to_ascii_lowercase();
        self.profiles
            .read()
            .await
            .iter()
            .filter(|(_, profile)| profile_matches(profile, &query, min_level))
            .map(|(node_id, profile)| (node_id.clone(), profile.clone()))
            .collect()
    }
}

fn profile_matches(profile: &Profile, query: &str, min_level: u32) -> bool {
    let text_matches = query.is_empty()
        || profile.name.to_ascii_lowercase().contains(query)
        || profile.description.to_ascii_lowercase().contains(query)
        || profile.expertise.keys().any(|topic| topic.to_ascii_lowercase().contains(query));
    let level_matches = min_level == 0 || profile.expertise.values().any(|level| *level >= min_level);
    text_matches && level_matches
}

pub struct HubState {
    pub auth: Arc<AuthManager>,
    pub users: Arc<UserStore>,
    pub profiles: Arc<ProfileStore>,
}

fn bearer_header(headers: &HeaderMap) -> Option<&str> {
    headers.get(axum::http::header::AUTHORIZATION).and_then(|v| v.to_str().ok())
}

#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub email: String,
    pub node_id: Option<String>,
    pub profile: Option<Profile>,
}

pub async fn me_handler(State(state): State<Arc<HubState>>, headers: HeaderMap) -> Result<Json<MeResponse>, HubError> {
    let claims = authenticate_bearer(&state.auth, bearer_header(&headers)).await?;
    let profile = match &claims.node_id {
        Some(node_id) => state.profiles.get(node_id).await,
        None => None,
    };
    Ok(Json(MeResponse { email: claims.sub, node_id: claims.node_id, profile }))
}

pub async fn put_profile_handler(
    State(state): State<Arc<HubState>>,
    headers: HeaderMap,
    Json(profile): Json<Profile>,
) -> Result<Json<Profile>, HubError> {
    let claims = authenticate_bearer(&state.auth, bearer_header(&headers)).await?;
    let node_id = claims.node_id.ok_or(HubError::Unauthenticated)?;
    state.profiles.put(&node_id, profile.clone()).await;
    Ok(Json(profile))
}

pub async fn get_profile_handler(
    State(state): State<Arc<HubState>>,
    headers: HeaderMap,
    Path(node_id): Path<String>,
) -> Result<Json<Profile>, HubError> {
    authenticate_bearer(&state.auth, bearer_header(&headers)).await?;
    state.profiles.get(&node_id).await.map(Json).ok_or(HubError::ProfileNotFound)
}

#[derive(Debug, Deserialize)]
pub struct DiscoveryQuery {
    #[serde(default)]
    pub q: String,
    #[serde(default)]
    pub min_level: u32,
}

#[derive(Debug, Serialize)]
pub struct DiscoveryResult {
    pub node_id: String,
    pub name: String,
    pub description: String,
}

#[derive(Debug, Serialize)]
pub struct DiscoveryResponse {
    pub results: Vec<DiscoveryResult>,
}

pub async fn discovery_search_handler(
    State(state): State<Arc<HubState>>,
    headers: HeaderMap,
    Query(query): Query<DiscoveryQuery>,
) -> Result<Json<DiscoveryResponse>, HubError> {
    authenticate_bearer(&state.auth, bearer_header(&headers)).await?;
    let results = state
        .profiles
        .search(&query.q, query.min_level)
        .await
        .into_iter()
        .map(|(node_id, profile)| DiscoveryResult { node_id, name: profile.name, description: profile.description })
        .collect();
    Ok(Json(DiscoveryResponse { results }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_profile(level: u32) -> Profile {
        let mut expertise = HashMap::new();
        expertise.insert("rust".to_string(), level);
        Profile {
            name: "Ada".to_string(),
            description: "Systems programmer".to_string(),
            expertise,
            compute: serde_json::Value::Null,
            p2p_uri_hint: "dpc://dpc-node-abc".to_string(),
        }
    }

    #[tokio::test]
    async fn search_filters_by_min_level() {
        let store = ProfileStore::new();
        store.put("dpc-node-abc", sample_profile(3)).await;
        store.put("dpc-node-def", sample_profile(7)).await;

        let results = store.search("", 5).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, "dpc-node-def");
    }

    #[tokio::test]
    async fn search_matches_topic_substring() {
        let store = ProfileStore::new();
        store.put("dpc-node-abc", sample_profile(3)).await;

        assert_eq!(store.search("rust", 0).await.len(), 1);
        assert_eq!(store.search("cobol", 0).await.len(), 0);
    }
}
