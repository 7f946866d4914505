//! Serves peer context requests through the firewall (spec §4.10, §6):
//! a `REQUEST_CONTEXT`/`REQUEST_DEVICE_CONTEXT` listener that loads the
//! local document, runs it through [`crate::filter_document`] keyed off
//! the requester's `NodeId`, and replies with
//! `CONTEXT_RESPONSE`/`DEVICE_CONTEXT_RESPONSE`; and the matching
//! outbound `request_context`/`request_device_context` round-trip other
//! components use to pull a peer's filtered context (mirrors
//! `lib-inference`'s orchestrator request/response pattern).

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::{oneshot, Mutex};
use tokio_util::sync::CancellationToken;

use lib_identity::NodeId;
use lib_knowledge::PersonalContextStore;
use lib_p2p::P2pManager;
use lib_wire::Envelope;

use crate::decision::Requester;
use crate::filter::filter_document;
use crate::rules::{AccessRules, FileKind};
use crate::wire::{
    new_request_id, ContextRequestWire, ContextResponseWire, COMMAND_CONTEXT_RESPONSE, COMMAND_DEVICE_CONTEXT_RESPONSE, COMMAND_GET_CONTEXT,
    COMMAND_REQUEST_CONTEXT, COMMAND_REQUEST_DEVICE_CONTEXT,
};
use crate::FirewallError;

const DEFAULT_CONTEXT_TIMEOUT: Duration = Duration::from_secs(30);

/// Owns the rules file, the local context store, and the P2P fabric a
/// node serves and requests context documents over.
pub struct ContextService {
    p2p: Arc<P2pManager>,
    rules: Arc<RwLock<AccessRules>>,
    context_store: Arc<PersonalContextStore>,
    pending_context: Mutex<HashMap<String, oneshot::Sender<ContextResponseWire>>>,
    pending_device: Mutex<HashMap<String, oneshot::Sender<ContextResponseWire>>>,
    timeout: Duration,
    shutdown: CancellationToken,
}

impl ContextService {
    pub fn new(p2p: Arc<P2pManager>, rules: Arc<RwLock<AccessRules>>, context_store: Arc<PersonalContextStore>) -> Arc<Self> {
        Self::with_timeout(p2p, rules, context_store, DEFAULT_CONTEXT_TIMEOUT)
    }

    pub fn with_timeout(p2p: Arc<P2pManager>, rules: Arc<RwLock<AccessRules>>, context_store: Arc<PersonalContextStore>, timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            p2p,
            rules,
            context_store,
            pending_context: Mutex::new(HashMap::new()),
            pending_device: Mutex::new(HashMap::new()),
            timeout,
            shutdown: CancellationToken::new(),
        })
    }

    /// Requests `peer`'s personal context, filtered to whatever its
    /// `.dpc_access` rules allow us to see.
    pub async fn request_context(&self, peer: &NodeId) -> Result<serde_json::Value, FirewallError> {
        self.round_trip(peer, COMMAND_REQUEST_CONTEXT, &self.pending_context).await
    }

    /// Requests `peer`'s device context, filtered the same way.
    pub async fn request_device_context(&self, peer: &NodeId) -> Result<serde_json::Value, FirewallError> {
        self.round_trip(peer, COMMAND_REQUEST_DEVICE_CONTEXT, &self.pending_device).await
    }

    async fn round_trip(
        &self,
        peer: &NodeId,
        command: &'static str,
        pending: &Mutex<HashMap<String, oneshot::Sender<ContextResponseWire>>>,
    ) -> Result<serde_json::Value, FirewallError> {
        if !self.p2p.is_connected(peer).await {
            return Err(FirewallError::PeerNotConnected(peer.as_str().to_string()));
        }

        let request_id = new_request_id();
        let request = ContextRequestWire { request_id: request_id.clone() };

        let (tx, rx) = oneshot::channel();
        pending.lock().await.insert(request_id.clone(), tx);

        let envelope = Envelope::new(command, serde_json::to_value(&request)?);
        if let Err(e) = self.p2p.send(peer, envelope).await {
            pending.lock().await.remove(&request_id);
            return Err(FirewallError::Transport(e.to_string()));
        }

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(response)) => Ok(response.document),
            Ok(Err(_)) | Err(_) => {
                pending.lock().await.remove(&request_id);
                Err(FirewallError::Timeout(request_id))
            }
        }
    }

    /// Spawns the task that serves inbound context requests from peers
    /// and resolves pending outbound requests when their response
    /// arrives, mirroring `lib-inference`'s orchestrator listener.
    pub fn spawn_listener(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move { this.listen_loop().await })
    }

    async fn listen_loop(self: Arc<Self>) {
        let mut inbound = self.p2p.subscribe();
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => return,
                received = inbound.recv() => {
                    match received {
                        Ok((source, envelope)) => self.handle_inbound(source, envelope).await,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
                    }
                }
            }
        }
    }

    async fn handle_inbound(&self, source: NodeId, envelope: Envelope) {
        match envelope.command.as_str() {
            COMMAND_REQUEST_CONTEXT | COMMAND_GET_CONTEXT => self.serve_request(source, envelope, FileKind::Personal, COMMAND_CONTEXT_RESPONSE).await,
            COMMAND_REQUEST_DEVICE_CONTEXT => self.serve_request(source, envelope, FileKind::Device, COMMAND_DEVICE_CONTEXT_RESPONSE).await,
            COMMAND_CONTEXT_RESPONSE => self.resolve_pending(envelope, &self.pending_context).await,
            COMMAND_DEVICE_CONTEXT_RESPONSE => self.resolve_pending(envelope, &self.pending_device).await,
            _ => {}
        }
    }

    /// Loads the requested document, filters it for `source` through the
    /// current rules, and replies — denial never surfaces as an error,
    /// it is just an emptier document (spec §7).
    async fn serve_request(&self, source: NodeId, envelope: Envelope, kind: FileKind, reply_command: &'static str) {
        let Ok(request) = serde_json::from_value::<ContextRequestWire>(envelope.payload) else {
            tracing::warn!(peer = %source, "malformed context request");
            return;
        };

        let document = match kind {
            FileKind::Personal => match self.context_store.load_personal_context().await {
                Ok(ctx) => serde_json::to_value(&ctx).unwrap_or(serde_json::Value::Null),
                Err(e) => {
                    tracing::warn!(peer = %source, error = %e, "failed to load personal context for a peer request");
                    return;
                }
            },
            FileKind::Device => match self.context_store.load_device_context().await {
                Ok(ctx) => ctx.0,
                Err(e) => {
                    tracing::warn!(peer = %source, error = %e, "failed to load device context for a peer request");
                    return;
                }
            },
        };

        let filtered = {
            let rules = self.rules.read().unwrap();
            filter_document(&rules, &Requester::Node(source.as_str()), kind, &document)
        };

        let response = ContextResponseWire { request_id: request.request_id, document: filtered };
        let Ok(payload) = serde_json::to_value(&response) else { return };
        let _ = self.p2p.send(&source, Envelope::new(reply_command, payload)).await;
    }

    async fn resolve_pending(&self, envelope: Envelope, pending: &Mutex<HashMap<String, oneshot::Sender<ContextResponseWire>>>) {
        let Ok(response) = serde_json::from_value::<ContextResponseWire>(envelope.payload) else { return };
        if let Some(tx) = pending.lock().await.remove(&response.request_id) {
            let _ = tx.send(response);
        }
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lib_identity::{Identity, IdentityStore};

    fn store_in_tempdir() -> Arc<IdentityStore> {
        let dir = tempfile::tempdir().unwrap();
        Arc::new(IdentityStore::new(dir.into_path()))
    }

    fn service_in_tempdir() -> Arc<ContextService> {
        let identity = Arc::new(Identity::generate().unwrap());
        let p2p = Arc::new(P2pManager::new(identity, store_in_tempdir(), None, None, None));
        let rules = Arc::new(RwLock::new(AccessRules::default()));
        let context_store = Arc::new(PersonalContextStore::new(tempfile::tempdir().unwrap().into_path()));
        ContextService::new(p2p, rules, context_store)
    }

    #[tokio::test]
    async fn request_against_a_disconnected_peer_fails_fast() {
        let service = service_in_tempdir();
        let target = Identity::generate().unwrap().node_id;
        let result = service.request_context(&target).await;
        assert!(matches!(result, Err(FirewallError::PeerNotConnected(_))));
    }
}
