//! JWT-authenticated WebSocket signaling client (spec §4.6, C6): relays
//! SDP/ICE payloads for WebRTC dial attempts and peer-discovery queries
//! against the Federation Hub's `/ws/signal` endpoint, with exponential
//! backoff reconnection.

pub mod message;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc, watch};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;

use lib_identity::NodeId;

pub use message::{SignalEnvelope, SignalPayload};

const SIGNAL_PATH: &str = "/ws/signal";
const INBOUND_CAPACITY: usize = 128;
const OUTBOUND_CAPACITY: usize = 64;
const INITIAL_BACKOFF: Duration = Duration::from_millis(500);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum SignalingError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("the Hub did not send auth_ok before the first message")]
    NotAuthenticated,

    #[error("signaling client is not connected")]
    NotConnected,

    #[error("malformed signal payload: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Config for dialing the Hub's signaling endpoint.
#[derive(Debug, Clone)]
pub struct SignalingConfig {
    /// Base WebSocket URL, e.g. `wss://hub.example.com`.
    pub hub_ws_base: String,
    pub jwt: String,
}

impl SignalingConfig {
    fn url(&self) -> String {
        format!("{}{}?token={}", self.hub_ws_base, SIGNAL_PATH, self.jwt)
    }
}

/// A long-lived client task that keeps the signaling WebSocket open,
/// reconnecting with exponential backoff on failure (spec §4.6), and
/// exposes inbound relayed signals plus live connection status for C12.
pub struct SignalingClient {
    outbound_tx: mpsc::Sender<SignalEnvelope>,
    inbound_tx: broadcast::Sender<SignalEnvelope>,
    connected: Arc<AtomicBool>,
    status_tx: watch::Sender<bool>,
    shutdown: CancellationToken,
}

impl SignalingClient {
    /// Spawns the connection-maintaining task and returns a handle to it.
    pub fn spawn(config: SignalingConfig) -> Arc<Self> {
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let (inbound_tx, _) = broadcast::channel(INBOUND_CAPACITY);
        let (status_tx, _) = watch::channel(false);
        let connected = Arc::new(AtomicBool::new(false));

        let client = Arc::new(Self {
            outbound_tx,
            inbound_tx: inbound_tx.clone(),
            connected: connected.clone(),
            status_tx: status_tx.clone(),
            shutdown: CancellationToken::new(),
        });

        let shutdown = client.shutdown.clone();
        tokio::spawn(run_reconnect_loop(config, outbound_rx, inbound_tx, connected, status_tx, shutdown));

        client
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn subscribe_status(&self) -> watch::Receiver<bool> {
        self.status_tx.subscribe()
    }

    pub fn subscribe_signals(&self) -> broadcast::Receiver<SignalEnvelope> {
        self.inbound_tx.subscribe()
    }

    /// Queues an SDP/ICE relay to `target_node_id` (spec §4.6).
    pub async fn send_signal(&self, target_node_id: &NodeId, payload: SignalPayload) -> Result<(), SignalingError> {
        let envelope = SignalEnvelope::outbound(target_node_id.clone(), payload);
        self.outbound_tx.send(envelope).await.map_err(|_| SignalingError::NotConnected)
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

async fn run_reconnect_loop(
    config: SignalingConfig,
    mut outbound_rx: mpsc::Receiver<SignalEnvelope>,
    inbound_tx: broadcast::Sender<SignalEnvelope>,
    connected: Arc<AtomicBool>,
    status_tx: watch::Sender<bool>,
    shutdown: CancellationToken,
) {
    let mut backoff = INITIAL_BACKOFF;

    loop {
        if shutdown.is_cancelled() {
            return;
        }

        match connect_once(&config).await {
            Ok(stream) => {
                backoff = INITIAL_BACKOFF;
                connected.store(true, Ordering::SeqCst);
                let _ = status_tx.send(true);

                run_session(stream, &mut outbound_rx, &inbound_tx, &shutdown).await;

                connected.store(false, Ordering::SeqCst);
                let _ = status_tx.send(false);
            }
            Err(e) => {
                tracing::warn!(error = %e, "signaling connect failed, backing off");
            }
        }

        if shutdown.is_cancelled() {
            return;
        }

        tokio::select! {
            _ = tokio::time::sleep(backoff) => {}
            _ = shutdown.cancelled() => return,
        }
        backoff = (backoff * 2).min(MAX_BACKOFF);
    }
}

type WsStream = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

async fn connect_once(config: &SignalingConfig) -> Result<WsStream, SignalingError> {
    let (mut stream, _response) = tokio_tungstenite::connect_async(config.url()).await?;

    let first = stream.next().await.ok_or(SignalingError::NotAuthenticated)??;
    let text = match first {
        WsMessage::Text(t) => t,
        _ => return Err(SignalingError::NotAuthenticated),
    };
    let value: serde_json::Value = serde_json::from_str(&text)?;
    if value.get("type").and_then(|v| v.as_str()) != Some("auth_ok") {
        return Err(SignalingError::NotAuthenticated);
    }

    Ok(stream)
}

/// Pumps one connected session until it closes or a fatal error occurs.
async fn run_session(
    mut stream: WsStream,
    outbound_rx: &mut mpsc::Receiver<SignalEnvelope>,
    inbound_tx: &broadcast::Sender<SignalEnvelope>,
    shutdown: &CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                let _ = stream.close(None).await;
                return;
            }
            outbound = outbound_rx.recv() => {
                match outbound {
                    Some(envelope) => {
                        let Ok(text) = serde_json::to_string(&envelope) else { continue };
                        if stream.send(WsMessage::Text(text)).await.is_err() {
                            return;
                        }
                    }
                    None => return,
                }
            }
            incoming = stream.next() => {
                match incoming {
                    Some(Ok(WsMessage::Text(text))) => {
                        match serde_json::from_str::<SignalEnvelope>(&text) {
                            Ok(envelope) => { let _ = inbound_tx.send(envelope); }
                            Err(e) => tracing::debug!(error = %e, "ignoring malformed signaling message"),
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) | None => return,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "signaling websocket error");
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    /// A bare-bones stand-in for the Hub's `/ws/signal` endpoint: sends
    /// `auth_ok`, then echoes one relayed signal back tagged with a
    /// `sender_node_id` (spec §4.6) instead of the original `target_node_id`.
    async fn spawn_fake_hub(tagged_sender: String) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            ws.send(WsMessage::Text(r#"{"type":"auth_ok"}"#.to_string())).await.unwrap();
            if let Some(Ok(WsMessage::Text(_relayed))) = ws.next().await {
                let reply = serde_json::json!({
                    "type": "signal",
                    "sender_node_id": tagged_sender,
                    "payload": {"kind": "answer", "sdp": "v=0"},
                });
                ws.send(WsMessage::Text(reply.to_string())).await.unwrap();
            }
        });
        port
    }

    #[tokio::test]
    async fn relays_a_signal_and_receives_the_tagged_reply() {
        let sender = format!("dpc-node-{}", "c".repeat(32));
        let port = spawn_fake_hub(sender.clone()).await;

        let client = SignalingClient::spawn(SignalingConfig {
            hub_ws_base: format!("ws://127.0.0.1:{port}"),
            jwt: "test-token".to_string(),
        });

        let mut status = client.subscribe_status();
        tokio::time::timeout(std::time::Duration::from_secs(2), async {
            while !*status.borrow() {
                status.changed().await.unwrap();
            }
        })
        .await
        .unwrap();

        let mut signals = client.subscribe_signals();
        let target = NodeId::parse(&format!("dpc-node-{}", "d".repeat(32))).unwrap();
        client.send_signal(&target, SignalPayload::Offer { sdp: "v=0".into() }).await.unwrap();

        let reply = tokio::time::timeout(std::time::Duration::from_secs(2), signals.recv()).await.unwrap().unwrap();
        assert_eq!(reply.sender().unwrap().as_str(), sender);
        client.shutdown();
    }
}
