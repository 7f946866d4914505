//! Wires every component into one long-running process (spec §5): starts
//! the DHT, the P2P fabric, the (optional) Hub signaling client, and the
//! consensus/session/inference background loops.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lib_consensus_dpc::{ConsensusManager, SessionManager};
use lib_dht::{DhtConfig, DhtServer};
use lib_firewall::{AccessRules, ContextService};
use lib_identity::{Identity, IdentityStore};
use lib_inference::{InferenceError, InferenceOrchestrator, LocalInference, LocalInferenceOutcome};
use lib_knowledge::PersonalContextStore;
use lib_p2p::P2pManager;
use lib_signaling::{SignalingClient, SignalingConfig};
use lib_status::{ConnectionStatus, TransportState};
use lib_transport::gossip::GossipOverlay;
use lib_transport::tls::TlsTransport;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::config::NodeConfig;
use crate::dialers::{NoOpHolePunchDialer, SignalingWebRtcDialer};

const CONSENSUS_SWEEP_INTERVAL: Duration = Duration::from_secs(5);
const SESSION_SWEEP_INTERVAL: Duration = Duration::from_secs(30);
const GOSSIP_SWEEP_INTERVAL: Duration = Duration::from_secs(60);
const SESSION_MAX_AGE: Duration = Duration::from_secs(3600);

/// Placeholder local backend (spec §1 scopes LLM provider integration
/// out): echoes the prompt back so the orchestrator's request/response
/// plumbing, remote dispatch, and token accounting have something real
/// to exercise end to end. A production deployment swaps this for a
/// client of whatever model runtime it embeds.
struct EchoInference;

#[async_trait]
impl LocalInference for EchoInference {
    async fn infer(
        &self,
        prompt: &str,
        model: Option<&str>,
        provider: Option<&str>,
        _images: Option<&[String]>,
    ) -> Result<LocalInferenceOutcome, InferenceError> {
        let prompt_tokens = prompt.split_whitespace().count() as u32;
        Ok(LocalInferenceOutcome {
            response: prompt.to_string(),
            model: model.unwrap_or("local-echo").to_string(),
            provider: provider.unwrap_or("local").to_string(),
            tokens_used: prompt_tokens,
            model_max_tokens: 8192,
            prompt_tokens,
            response_tokens: prompt_tokens,
        })
    }
}

fn load_access_rules(path: &std::path::Path) -> anyhow::Result<AccessRules> {
    match std::fs::read_to_string(path) {
        Ok(text) => Ok(AccessRules::parse(&text)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(AccessRules::default()),
        Err(e) => Err(e.into()),
    }
}

/// Everything a running node holds, grouped the way `HubServices` groups
/// the Hub's state (spec §4.13's sibling on the node side).
pub struct DpcNode {
    pub config: NodeConfig,
    pub identity: Arc<Identity>,
    pub identity_store: Arc<IdentityStore>,
    pub dht: Arc<DhtServer>,
    pub p2p: Arc<P2pManager>,
    pub signaling: Option<Arc<SignalingClient>>,
    pub context_store: Arc<PersonalContextStore>,
    pub consensus: Arc<ConsensusManager>,
    pub sessions: Arc<SessionManager>,
    pub rules: Arc<std::sync::RwLock<AccessRules>>,
    pub context_service: Arc<ContextService>,
    pub inference: Arc<InferenceOrchestrator>,
    pub status: Arc<ConnectionStatus>,
    shutdown: CancellationToken,
}

impl DpcNode {
    /// Loads or generates this node's identity, binds the DHT and direct-TLS
    /// listeners, and wires the P2P fabric, consensus/session managers,
    /// firewall rules, and inference orchestrator together. Does not yet
    /// spawn any background task — call [`DpcNode::start`] for that.
    pub async fn bootstrap(config: NodeConfig) -> anyhow::Result<Arc<Self>> {
        std::fs::create_dir_all(&config.home)?;

        let identity_store = Arc::new(IdentityStore::new(&config.home));
        let identity = Arc::new(identity_store.load_or_initialize()?);
        tracing::info!(node_id = %identity.node_id, "identity ready");

        let dht = Arc::new(DhtServer::bind(identity.node_id.clone(), config.dht_bind, DhtConfig::default()).await?);
        dht.spawn_receive_loop();
        dht.spawn_maintenance_loop();
        if !config.bootstrap_seeds.is_empty() {
            if let Err(e) = dht.bootstrap(&config.bootstrap_seeds).await {
                tracing::warn!(error = %e, "dht bootstrap failed, continuing unbootstrapped");
            } else {
                dht.publish_certificate(&identity.certificate.certificate_pem).await;
                dht.announce(config.tls_bind).await;
            }
        }

        let signaling = match (&config.hub_ws_base, &config.hub_jwt) {
            (Some(base), Some(jwt)) => {
                Some(SignalingClient::spawn(SignalingConfig { hub_ws_base: base.clone(), jwt: jwt.clone() }))
            }
            _ => None,
        };

        let webrtc_dialer = signaling
            .clone()
            .map(|s| Arc::new(SignalingWebRtcDialer::new(s, config.ice_servers())) as Arc<dyn lib_p2p::WebRtcDialer>);

        let p2p = Arc::new(P2pManager::new(
            identity.clone(),
            identity_store.clone(),
            Some(dht.clone()),
            Some(Arc::new(NoOpHolePunchDialer) as Arc<dyn lib_p2p::HolePunchDialer>),
            webrtc_dialer,
        ));

        let gossip = Arc::new(GossipOverlay::new(
            identity.node_id.clone(),
            identity.keypair.private.clone(),
            p2p.clone() as Arc<dyn lib_transport::gossip::GossipPeerSender>,
            p2p.clone() as Arc<dyn lib_transport::gossip::CertResolver>,
        ));
        p2p.attach_gossip(gossip).await;

        let context_store = Arc::new(PersonalContextStore::new(config.knowledge_root()));
        let consensus = ConsensusManager::with_threshold(
            p2p.clone(),
            identity.clone(),
            identity_store.clone(),
            context_store.clone(),
            config.consensus_threshold,
        );
        let sessions = SessionManager::new(p2p.clone(), identity.clone());

        let rules = Arc::new(std::sync::RwLock::new(load_access_rules(&config.firewall_rules_path())?));
        let context_service = ContextService::new(p2p.clone(), rules.clone(), context_store.clone());

        let inference = InferenceOrchestrator::new(Arc::new(EchoInference), p2p.clone(), identity.clone(), context_store.clone(), Some(context_service.clone()));

        let status = Arc::new(ConnectionStatus::new(TransportState {
            hub_connected: signaling.as_ref().map(|s| s.is_connected()).unwrap_or(false),
            webrtc_available: signaling.is_some(),
            direct_tls_available: true,
        }));

        Ok(Arc::new(Self {
            config,
            identity,
            identity_store,
            dht,
            p2p,
            signaling,
            context_store,
            consensus,
            sessions,
            rules,
            context_service,
            inference,
            status,
            shutdown: CancellationToken::new(),
        }))
    }

    /// Spawns every background loop this process keeps alive for as long
    /// as it runs (spec §5): the direct-TLS accept loop, the inference
    /// listener, the consensus/session deadline sweepers, the gossip
    /// seen-set sweeper, and the connection-status updater.
    pub fn start(self: &Arc<Self>) -> anyhow::Result<()> {
        self.spawn_tls_listener()?;
        self.inference.clone().spawn_listener();
        self.context_service.clone().spawn_listener();
        self.consensus.clone().spawn_listener();
        self.sessions.clone().spawn_listener();
        self.spawn_consensus_sweep();
        self.spawn_session_sweep();
        self.spawn_gossip_sweep();
        self.spawn_status_updater();
        Ok(())
    }

    fn spawn_tls_listener(self: &Arc<Self>) -> anyhow::Result<()> {
        let listener = std::net::TcpListener::bind(self.config.tls_bind)?;
        listener.set_nonblocking(true)?;
        let listener = TcpListener::from_std(listener)?;
        let this = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = this.shutdown.cancelled() => return,
                    accepted = listener.accept() => {
                        let (tcp, peer_addr) = match accepted {
                            Ok(pair) => pair,
                            Err(e) => {
                                tracing::warn!(error = %e, "tls accept failed");
                                continue;
                            }
                        };
                        let identity = this.identity.clone();
                        let p2p = this.p2p.clone();
                        tokio::spawn(async move {
                            match TlsTransport::accept(tcp, &identity).await {
                                Ok(conn) => {
                                    if let Err(e) = p2p.accept(Box::new(conn)).await {
                                        tracing::warn!(%peer_addr, error = %e, "peer handshake failed");
                                    }
                                }
                                Err(e) => tracing::warn!(%peer_addr, error = %e, "tls accept handshake failed"),
                            }
                        });
                    }
                }
            }
        });
        Ok(())
    }

    fn spawn_consensus_sweep(self: &Arc<Self>) {
        let this = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(CONSENSUS_SWEEP_INTERVAL);
            loop {
                tokio::select! {
                    _ = this.shutdown.cancelled() => return,
                    _ = ticker.tick() => {
                        for proposal_id in this.consensus.overdue_proposal_ids().await {
                            match this.consensus.finalize_on_deadline(&proposal_id).await {
                                Ok(Some((decision, _proposal))) => {
                                    tracing::info!(%proposal_id, ?decision, "proposal finalized on deadline");
                                }
                                Ok(None) => {}
                                Err(e) => tracing::warn!(%proposal_id, error = %e, "failed to finalize overdue proposal"),
                            }
                        }
                    }
                }
            }
        });
    }

    fn spawn_session_sweep(self: &Arc<Self>) {
        let this = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SESSION_SWEEP_INTERVAL);
            loop {
                tokio::select! {
                    _ = this.shutdown.cancelled() => return,
                    _ = ticker.tick() => {
                        for conversation_id in this.sessions.conversation_ids().await {
                            let _ = this.sessions.finalize_on_deadline(&conversation_id).await;
                        }
                        this.sessions.clear_old_sessions(SESSION_MAX_AGE).await;
                    }
                }
            }
        });
    }

    fn spawn_gossip_sweep(self: &Arc<Self>) {
        let gossip = match self.p2p.gossip_overlay() {
            Some(g) => g,
            None => return,
        };
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(GOSSIP_SWEEP_INTERVAL);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => return,
                    _ = ticker.tick() => gossip.sweep_seen().await,
                }
            }
        });
    }

    fn spawn_status_updater(self: &Arc<Self>) {
        let Some(signaling) = self.signaling.clone() else { return };
        let this = self.clone();
        tokio::spawn(async move {
            let mut hub_status = signaling.subscribe_status();
            loop {
                tokio::select! {
                    _ = this.shutdown.cancelled() => return,
                    changed = hub_status.changed() => {
                        if changed.is_err() {
                            return;
                        }
                        let hub_connected = *hub_status.borrow();
                        this.status.update(TransportState {
                            hub_connected,
                            webrtc_available: true,
                            direct_tls_available: true,
                        });
                    }
                }
            }
        });
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
        self.dht.shutdown();
        if let Some(signaling) = &self.signaling {
            signaling.shutdown();
        }
        self.inference.shutdown();
        self.context_service.shutdown();
        self.consensus.shutdown();
        self.sessions.shutdown();
    }
}
