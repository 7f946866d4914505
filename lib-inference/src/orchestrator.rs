//! Local/remote inference dispatch (spec §4.11).

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::{oneshot, Mutex};
use tokio_util::sync::CancellationToken;

use lib_firewall::ContextService;
use lib_identity::{Identity, NodeId};
use lib_knowledge::{DeviceContext, InstructionBlock, PersonalContext, PersonalContextStore};
use lib_p2p::P2pManager;
use lib_wire::Envelope;

use crate::envelope::{new_request_id, RemoteInferenceRequest, RemoteInferenceResponse, COMMAND_REMOTE_INFERENCE_REQUEST, COMMAND_REMOTE_INFERENCE_RESPONSE};
use crate::prompt::{assemble_prompt, ChatMessage, PromptRequest};
use crate::tokens::TokenizerRegistry;
use crate::InferenceError;

const DEFAULT_REMOTE_TIMEOUT: Duration = Duration::from_secs(60);

/// The fraction of the context window `validate_prompt` keeps free for
/// the response (spec §4.11's default buffer).
const DEFAULT_TOKEN_BUFFER: f64 = 0.2;

/// The local LLM abstraction (spec §1: "only request/response envelopes
/// and token-accounting contracts matter" — the provider integration
/// itself is out of scope).
#[async_trait]
pub trait LocalInference: Send + Sync {
    async fn infer(
        &self,
        prompt: &str,
        model: Option<&str>,
        provider: Option<&str>,
        images: Option<&[String]>,
    ) -> Result<LocalInferenceOutcome, InferenceError>;
}

#[derive(Debug, Clone)]
pub struct LocalInferenceOutcome {
    pub response: String,
    pub model: String,
    pub provider: String,
    pub tokens_used: u32,
    pub model_max_tokens: u32,
    pub prompt_tokens: u32,
    pub response_tokens: u32,
}

/// Everything `execute` needs to assemble a prompt and dispatch it (spec
/// §4.11): the query plus dispatch options, the peers whose filtered
/// context/device context should be pulled in, and the context window
/// `validate_prompt` budgets against.
pub struct ExecuteRequest {
    pub query: String,
    pub compute_host: Option<NodeId>,
    pub model: Option<String>,
    pub provider: Option<String>,
    pub images: Option<Vec<String>>,
    pub context_peers: Vec<NodeId>,
    pub include_full_context: bool,
    pub instruction: Option<InstructionBlock>,
    pub conversation_history: Vec<ChatMessage>,
    pub context_window: usize,
}

/// The result shape `execute` returns regardless of whether dispatch was
/// local or remote (spec §4.11).
#[derive(Debug, Clone, Serialize)]
pub struct InferenceResult {
    pub response: String,
    pub model: String,
    pub provider: String,
    pub compute_host: String,
    pub tokens_used: u32,
    pub model_max_tokens: u32,
    pub prompt_tokens: u32,
    pub response_tokens: u32,
}

/// Dispatches inference requests either to the local LLM abstraction or,
/// when a `compute_host` peer is given, across the P2P fabric, and serves
/// inbound `REMOTE_INFERENCE_REQUEST`s from peers out of the same local
/// abstraction. Assembles the prompt from filtered contexts pulled
/// through the Context Firewall's request machinery, and counts every
/// token itself rather than trusting what the local backend reports.
pub struct InferenceOrchestrator {
    local: Arc<dyn LocalInference>,
    p2p: Arc<P2pManager>,
    identity: Arc<Identity>,
    context_store: Arc<PersonalContextStore>,
    context_service: Option<Arc<ContextService>>,
    tokenizers: TokenizerRegistry,
    pending: Mutex<HashMap<String, oneshot::Sender<RemoteInferenceResponse>>>,
    remote_timeout: Duration,
    shutdown: CancellationToken,
}

impl InferenceOrchestrator {
    pub fn new(
        local: Arc<dyn LocalInference>,
        p2p: Arc<P2pManager>,
        identity: Arc<Identity>,
        context_store: Arc<PersonalContextStore>,
        context_service: Option<Arc<ContextService>>,
    ) -> Arc<Self> {
        Self::with_timeout(local, p2p, identity, context_store, context_service, DEFAULT_REMOTE_TIMEOUT)
    }

    pub fn with_timeout(
        local: Arc<dyn LocalInference>,
        p2p: Arc<P2pManager>,
        identity: Arc<Identity>,
        context_store: Arc<PersonalContextStore>,
        context_service: Option<Arc<ContextService>>,
        remote_timeout: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            local,
            p2p,
            identity,
            context_store,
            context_service,
            tokenizers: TokenizerRegistry::new(),
            pending: Mutex::new(HashMap::new()),
            remote_timeout,
            shutdown: CancellationToken::new(),
        })
    }

    /// Gathers the local context plus, for each of `request.context_peers`,
    /// its context and device context as the Context Firewall discloses
    /// them to us (spec §4.10/§4.11). A peer we can't reach or that
    /// returns something we can't parse simply contributes nothing —
    /// assembly never fails because a peer is unreachable.
    async fn gather_contexts(&self, request: &ExecuteRequest) -> (BTreeMap<String, PersonalContext>, Option<DeviceContext>, BTreeMap<String, DeviceContext>) {
        let mut contexts = BTreeMap::new();
        if let Ok(own) = self.context_store.load_personal_context().await {
            contexts.insert(self.identity.node_id.as_str().to_string(), own);
        }
        let local_device = self.context_store.load_device_context().await.ok();

        let mut peer_devices = BTreeMap::new();
        if let Some(service) = &self.context_service {
            for peer in &request.context_peers {
                match service.request_context(peer).await {
                    Ok(document) => match serde_json::from_value::<PersonalContext>(document) {
                        Ok(ctx) => {
                            contexts.insert(peer.as_str().to_string(), ctx);
                        }
                        Err(e) => tracing::warn!(%peer, error = %e, "peer returned an unparseable context"),
                    },
                    Err(e) => tracing::warn!(%peer, error = %e, "failed to fetch peer context"),
                }
                match service.request_device_context(peer).await {
                    Ok(document) => {
                        peer_devices.insert(peer.as_str().to_string(), DeviceContext(document));
                    }
                    Err(e) => tracing::warn!(%peer, error = %e, "failed to fetch peer device context"),
                }
            }
        }
        (contexts, local_device, peer_devices)
    }

    async fn build_prompt(&self, request: &ExecuteRequest) -> String {
        let (contexts, local_device, peer_devices) = self.gather_contexts(request).await;
        let prompt_request = PromptRequest {
            instruction: request.instruction.as_ref(),
            contexts: &contexts,
            local_device_context: local_device.as_ref(),
            peer_device_contexts: &peer_devices,
            conversation_history: &request.conversation_history,
            include_full_context: request.include_full_context,
            query: &request.query,
        };
        assemble_prompt(&prompt_request)
    }

    /// Assembles the prompt from filtered contexts (spec §4.11), validates
    /// it against `request.context_window` before dispatch, and counts
    /// every token itself — never trusting `LocalInference::infer`'s or a
    /// remote peer's self-reported counts.
    pub async fn execute(&self, request: ExecuteRequest) -> Result<InferenceResult, InferenceError> {
        let prompt = self.build_prompt(&request).await;
        let model = request.model.clone().unwrap_or_else(|| "default".to_string());
        let prompt_tokens = self.tokenizers.validate_prompt(&prompt, &model, request.context_window, DEFAULT_TOKEN_BUFFER)? as u32;

        match request.compute_host.clone() {
            None => {
                let outcome = self.local.infer(&prompt, request.model.as_deref(), request.provider.as_deref(), request.images.as_deref()).await?;
                let response_tokens = self.tokenizers.count_tokens(&model, &outcome.response) as u32;
                Ok(InferenceResult {
                    response: outcome.response,
                    model: outcome.model,
                    provider: outcome.provider,
                    compute_host: "local".to_string(),
                    tokens_used: prompt_tokens + response_tokens,
                    model_max_tokens: outcome.model_max_tokens,
                    prompt_tokens,
                    response_tokens,
                })
            }
            Some(peer) => self.execute_remote(peer, prompt, request.model, request.provider, request.images, &model, prompt_tokens).await,
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn execute_remote(
        &self,
        peer: NodeId,
        prompt: String,
        model: Option<String>,
        provider: Option<String>,
        images: Option<Vec<String>>,
        model_for_tokens: &str,
        prompt_tokens: u32,
    ) -> Result<InferenceResult, InferenceError> {
        if !self.p2p.is_connected(&peer).await {
            return Err(InferenceError::PeerNotConnected(peer.as_str().to_string()));
        }

        let request_id = new_request_id();
        let request = RemoteInferenceRequest { request_id: request_id.clone(), prompt, model, provider, images };

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(request_id.clone(), tx);

        let envelope = Envelope::new(COMMAND_REMOTE_INFERENCE_REQUEST, serde_json::to_value(&request)?);
        if let Err(e) = self.p2p.send(&peer, envelope).await {
            self.pending.lock().await.remove(&request_id);
            return Err(InferenceError::Transport(e.to_string()));
        }

        let response = match tokio::time::timeout(self.remote_timeout, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) | Err(_) => {
                self.pending.lock().await.remove(&request_id);
                return Err(InferenceError::Timeout(request_id));
            }
        };

        match response.status.as_str() {
            "ok" => {
                let response_text = response.response.unwrap_or_default();
                let response_tokens = self.tokenizers.count_tokens(model_for_tokens, &response_text) as u32;
                Ok(InferenceResult {
                    response: response_text,
                    model: response.model.unwrap_or_default(),
                    provider: response.provider.unwrap_or_default(),
                    compute_host: peer.as_str().to_string(),
                    tokens_used: prompt_tokens + response_tokens,
                    model_max_tokens: response.model_max_tokens.unwrap_or(0),
                    prompt_tokens,
                    response_tokens,
                })
            }
            _ => Err(InferenceError::Remote(response.error.unwrap_or_else(|| "unknown remote error".to_string()))),
        }
    }

    /// Spawns the task that serves inbound `REMOTE_INFERENCE_REQUEST`s
    /// from peers against the local LLM abstraction, and resolves
    /// pending outbound requests when their `REMOTE_INFERENCE_RESPONSE`
    /// arrives.
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
            COMMAND_REMOTE_INFERENCE_REQUEST => self.serve_remote_request(source, envelope).await,
            COMMAND_REMOTE_INFERENCE_RESPONSE => self.resolve_pending(envelope).await,
            _ => {}
        }
    }

    async fn serve_remote_request(&self, source: NodeId, envelope: Envelope) {
        let Ok(request) = serde_json::from_value::<RemoteInferenceRequest>(envelope.payload) else {
            tracing::warn!(peer = %source, "malformed REMOTE_INFERENCE_REQUEST");
            return;
        };

        let response = match self
            .local
            .infer(&request.prompt, request.model.as_deref(), request.provider.as_deref(), request.images.as_deref())
            .await
        {
            Ok(outcome) => RemoteInferenceResponse::ok(request.request_id.clone(), &outcome),
            Err(e) => RemoteInferenceResponse::error(request.request_id.clone(), e.to_string()),
        };

        let Ok(payload) = serde_json::to_value(&response) else { return };
        let _ = self.p2p.send(&source, Envelope::new(COMMAND_REMOTE_INFERENCE_RESPONSE, payload)).await;
    }

    async fn resolve_pending(&self, envelope: Envelope) {
        let Ok(response) = serde_json::from_value::<RemoteInferenceResponse>(envelope.payload) else { return };
        if let Some(tx) = self.pending.lock().await.remove(&response.request_id) {
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
    use lib_identity::IdentityStore;

    struct EchoLocal;

    #[async_trait]
    impl LocalInference for EchoLocal {
        async fn infer(&self, prompt: &str, model: Option<&str>, provider: Option<&str>, _images: Option<&[String]>) -> Result<LocalInferenceOutcome, InferenceError> {
            Ok(LocalInferenceOutcome {
                response: format!("echo: {prompt}"),
                model: model.unwrap_or("default-model").to_string(),
                provider: provider.unwrap_or("default-provider").to_string(),
                tokens_used: 10,
                model_max_tokens: 4096,
                prompt_tokens: 5,
                response_tokens: 5,
            })
        }
    }

    fn store_in_tempdir() -> Arc<IdentityStore> {
        let dir = tempfile::tempdir().unwrap();
        Arc::new(IdentityStore::new(dir.into_path()))
    }

    fn orchestrator_in_tempdir() -> Arc<InferenceOrchestrator> {
        let identity = Arc::new(Identity::generate().unwrap());
        let p2p = Arc::new(P2pManager::new(identity.clone(), store_in_tempdir(), None, None, None));
        let context_store = Arc::new(PersonalContextStore::new(tempfile::tempdir().unwrap().into_path()));
        InferenceOrchestrator::new(Arc::new(EchoLocal), p2p, identity, context_store, None)
    }

    fn basic_request(query: &str) -> ExecuteRequest {
        ExecuteRequest {
            query: query.to_string(),
            compute_host: None,
            model: None,
            provider: None,
            images: None,
            context_peers: Vec::new(),
            include_full_context: false,
            instruction: None,
            conversation_history: Vec::new(),
            context_window: 4096,
        }
    }

    #[tokio::test]
    async fn local_execute_returns_the_local_outcome() {
        let orchestrator = orchestrator_in_tempdir();
        let result = orchestrator.execute(basic_request("hello")).await.unwrap();
        assert_eq!(result.compute_host, "local");
        assert!(result.response.contains("hello"));
    }

    #[tokio::test]
    async fn local_execute_counts_tokens_itself_rather_than_trusting_the_backend() {
        let orchestrator = orchestrator_in_tempdir();
        let result = orchestrator.execute(basic_request("hello")).await.unwrap();
        // EchoLocal self-reports tokens_used: 10, prompt_tokens: 5, response_tokens: 5;
        // the orchestrator's own counts must win instead.
        assert_ne!(result.prompt_tokens, 5);
        assert_eq!(result.tokens_used, result.prompt_tokens + result.response_tokens);
    }

    #[tokio::test]
    async fn remote_execute_against_a_disconnected_peer_fails_fast() {
        let orchestrator = orchestrator_in_tempdir();
        let target = Identity::generate().unwrap().node_id;
        let mut request = basic_request("hello");
        request.compute_host = Some(target);
        let result = orchestrator.execute(request).await;
        assert!(matches!(result, Err(InferenceError::PeerNotConnected(_))));
    }

    #[tokio::test]
    async fn oversized_prompt_is_rejected_before_dispatch() {
        let orchestrator = orchestrator_in_tempdir();
        let mut request = basic_request(&"word ".repeat(5000));
        request.context_window = 100;
        let result = orchestrator.execute(request).await;
        assert!(matches!(result, Err(InferenceError::PromptTooLarge { .. })));
    }
}
