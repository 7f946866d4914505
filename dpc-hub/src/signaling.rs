//! `/ws/signal` (spec §4.13, §6): authenticates via Bearer token, tracks
//! `node_id → websocket`, and relays `{"type":"signal", ...}` envelopes to
//! their addressed node, tagging the relay with `sender_node_id` rather
//! than trusting whatever the sender claims.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use lib_signaling::SignalEnvelope;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::{mpsc, RwLock};

use crate::auth::AuthManager;

const OUTBOUND_CHANNEL_CAPACITY: usize = 64;

#[derive(Default)]
pub struct SignalingRelay {
    connections: RwLock<HashMap<String, mpsc::Sender<Message>>>,
}

impl SignalingRelay {
    pub fn new() -> Self {
        Self::default()
    }

    async fn register(&self, node_id: String, sender: mpsc::Sender<Message>) {
        self.connections.write().await.insert(node_id, sender);
    }

    async fn unregister(&self, node_id: &str) {
        self.connections.write().await.remove(node_id);
    }

    /// Relays `envelope` to its `target_node_id`, tagging `sender_node_id`
    /// with the authenticated identity of the connection it arrived on
    /// (spec §4.13: "tags the relay with `sender_node_id`").
    async fn relay(&self, sender_node_id: &str, mut envelope: SignalEnvelope) -> bool {
        let Some(target) = envelope.target_node_id.clone() else { return false };
        envelope.sender_node_id = Some(sender_node_id.to_string());
        envelope.target_node_id = None;

        let Ok(text) = serde_json::to_string(&envelope) else { return false };
        let connections = self.connections.read().await;
        match connections.get(&target) {
            Some(outbound) => outbound.send(Message::Text(text)).await.is_ok(),
            None => false,
        }
    }
}

pub struct SignalingState {
    pub auth: Arc<AuthManager>,
    pub relay: Arc<SignalingRelay>,
}

#[derive(Debug, Deserialize)]
pub struct SignalQuery {
    pub token: String,
}

pub async fn ws_signal_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<SignalQuery>,
    State(state): State<Arc<SignalingState>>,
) -> Response {
    ws.on_upgrade(move |socket| async move {
        let claims = match state.auth.authenticate(&query.token).await {
            Ok(claims) => claims,
            Err(_) => return,
        };
        let Some(node_id) = claims.node_id else { return };
        run_session(socket, node_id, state.relay.clone()).await;
    })
}

async fn run_session(socket: WebSocket, node_id: String, relay: Arc<SignalingRelay>) {
    let (mut sink, mut stream) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::channel(OUTBOUND_CHANNEL_CAPACITY);
    relay.register(node_id.clone(), outbound_tx).await;

    let auth_ok = json!({ "type": "auth_ok", "node_id": node_id });
    if sink.send(Message::Text(auth_ok.to_string())).await.is_err() {
        relay.unregister(&node_id).await;
        return;
    }

    let writer = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            if sink.send(message).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(message)) = stream.next().await {
        let Message::Text(text) = message else { continue };
        let Ok(envelope) = serde_json::from_str::<SignalEnvelope>(&text) else {
            tracing::warn!(%node_id, "malformed signal envelope");
            continue;
        };
        relay.relay(&node_id, envelope).await;
    }

    writer.abort();
    relay.unregister(&node_id).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use lib_signaling::SignalPayload;

    #[tokio::test]
    async fn relay_tags_sender_and_clears_target() {
        let relay = SignalingRelay::new();
        let (tx, mut rx) = mpsc::channel(8);
        relay.register("dpc-node-bob".to_string(), tx).await;

        let envelope = SignalEnvelope {
            kind: "signal".to_string(),
            target_node_id: Some("dpc-node-bob".to_string()),
            sender_node_id: None,
            payload: SignalPayload::Offer { sdp: "v=0".to_string() },
        };
        assert!(relay.relay("dpc-node-alice", envelope).await);

        let Message::Text(text) = rx.recv().await.unwrap() else { panic!("expected text message") };
        let delivered: SignalEnvelope = serde_json::from_str(&text).unwrap();
        assert_eq!(delivered.sender_node_id.as_deref(), Some("dpc-node-alice"));
        assert!(delivered.target_node_id.is_none());
    }

    #[tokio::test]
    async fn relay_to_an_unconnected_node_fails_quietly() {
        let relay = SignalingRelay::new();
        let envelope = SignalEnvelope {
            kind: "signal".to_string(),
            target_node_id: Some("dpc-node-ghost".to_string()),
            sender_node_id: None,
            payload: SignalPayload::Offer { sdp: "v=0".to_string() },
        };
        assert!(!relay.relay("dpc-node-alice", envelope).await);
    }
}
