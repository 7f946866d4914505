//! The live DHT node: owns the UDP socket, the [`RoutingTable`], the
//! [`DataStore`], and the long-lived receive and maintenance tasks of
//! spec §5. Implements [`NodeQuerier`] over real UDP so
//! [`crate::lookup::iterative_find_node`] / `iterative_find_value` can run
//! against the live network unchanged from their tested form.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio::sync::{oneshot, Mutex};
use tokio_util::sync::CancellationToken;

use lib_identity::NodeId;

use crate::contact::Contact;
use crate::datastore::DataStore;
use crate::error::DhtError;
use crate::lookup::{self, NodeQuerier, QueryOutcome};
use crate::routing_table::{AddResult, RoutingTable};
use crate::rpc::{new_rpc_id, now_millis, parse_wire_node, DhtRequest, DhtResponse, WireNode};
use crate::K;

#[derive(Debug, Clone)]
pub struct DhtConfig {
    pub max_packet_size: usize,
    pub rpc_timeout: Duration,
    pub max_retries: u32,
    pub rate_limit_window: Duration,
    pub rate_limit_max_requests: u32,
    pub bucket_refresh_interval: Duration,
    pub stale_threshold: Duration,
}

impl Default for DhtConfig {
    fn default() -> Self {
        Self {
            max_packet_size: 8 * 1024,
            rpc_timeout: Duration::from_secs(5),
            max_retries: 2,
            rate_limit_window: Duration::from_secs(1),
            rate_limit_max_requests: 50,
            bucket_refresh_interval: Duration::from_secs(3600),
            stale_threshold: Duration::from_secs(900),
        }
    }
}

struct RateLimiter {
    window: Duration,
    max_requests: u32,
    counters: HashMap<IpAddr, (Instant, u32)>,
}

impl RateLimiter {
    fn new(window: Duration, max_requests: u32) -> Self {
        Self { window, max_requests, counters: HashMap::new() }
    }

    /// Returns `true` if the request from `ip` is within budget, bumping its
    /// counter; over-budget requests are dropped silently (spec §4.3).
    fn allow(&mut self, ip: IpAddr) -> bool {
        let now = Instant::now();
        let entry = self.counters.entry(ip).or_insert((now, 0));
        if now.duration_since(entry.0) > self.window {
            *entry = (now, 0);
        }
        entry.1 += 1;
        entry.1 <= self.max_requests
    }
}

pub struct DhtServer {
    self_id: NodeId,
    socket: Arc<UdpSocket>,
    config: DhtConfig,
    routing_table: Arc<Mutex<RoutingTable>>,
    store: Arc<Mutex<DataStore>>,
    pending: Arc<Mutex<HashMap<String, oneshot::Sender<DhtResponse>>>>,
    rate_limiter: Arc<Mutex<RateLimiter>>,
    shutdown: CancellationToken,
}

impl DhtServer {
    pub async fn bind(self_id: NodeId, bind_addr: SocketAddr, config: DhtConfig) -> Result<Self, DhtError> {
        let socket = UdpSocket::bind(bind_addr).await?;
        Ok(Self {
            routing_table: Arc::new(Mutex::new(RoutingTable::new(self_id.clone()))),
            self_id,
            socket: Arc::new(socket),
            config,
            store: Arc::new(Mutex::new(DataStore::new())),
            pending: Arc::new(Mutex::new(HashMap::new())),
            rate_limiter: Arc::new(Mutex::new(RateLimiter::new(Duration::from_secs(1), 50))),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub async fn routing_table_snapshot(&self) -> RoutingTableSnapshot {
        let table = self.routing_table.lock().await;
        RoutingTableSnapshot {
            total_contacts: table.total_contacts(),
            non_empty_buckets: table.non_empty_bucket_indices(),
        }
    }

    /// Spawns the receive loop (spec §5: "DHT UDP receive loop, one per
    /// node"). Runs until [`DhtServer::shutdown`] is called.
    pub fn spawn_receive_loop(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move { this.receive_loop().await })
    }

    /// Spawns the periodic bucket-refresh maintenance loop (spec §4.3, §5).
    pub fn spawn_maintenance_loop(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move { this.maintenance_loop().await })
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    async fn receive_loop(self: Arc<Self>) {
        let mut buf = vec![0u8; self.config.max_packet_size];
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    tracing::info!("dht receive loop shutting down");
                    return;
                }
                recv = self.socket.recv_from(&mut buf) => {
                    let (len, src) = match recv {
                        Ok(v) => v,
                        Err(e) => {
                            tracing::warn!(error = %e, "dht udp recv failed");
                            continue;
                        }
                    };
                    if len > self.config.max_packet_size {
                        continue;
                    }
                    self.clone().handle_datagram(buf[..len].to_vec(), src).await;
                }
            }
        }
    }

    async fn handle_datagram(self: Arc<Self>, data: Vec<u8>, src: SocketAddr) {
        {
            let mut limiter = self.rate_limiter.lock().await;
            if !limiter.allow(src.ip()) {
                return;
            }
        }

        if let Ok(response) = serde_json::from_slice::<DhtResponse>(&data) {
            let mut pending = self.pending.lock().await;
            if let Some(tx) = pending.remove(response.rpc_id()) {
                let _ = tx.send(response);
            }
            return;
        }

        let Ok(request) = serde_json::from_slice::<DhtRequest>(&data) else {
            tracing::warn!(%src, "malformed dht datagram, dropping");
            return;
        };

        if let Ok(sender_id) = NodeId::parse(request.sender_node_id()) {
            self.observe_sender(sender_id, src).await;
        }

        let response = self.dispatch(&request).await;
        if let Ok(bytes) = serde_json::to_vec(&response) {
            let _ = self.socket.send_to(&bytes, src).await;
        }
    }

    /// On receipt of any valid RPC, add the sender to the routing table
    /// (spec §4.3).
    async fn observe_sender(&self, sender_id: NodeId, src: SocketAddr) {
        if sender_id == self.self_id {
            return;
        }
        let mut table = self.routing_table.lock().await;
        if let Ok(AddResult::NeedsLivenessCheck { bucket_index, stale_candidate }) = table.add_node(sender_id, src) {
            drop(table);
            self.recheck_stale(bucket_index, stale_candidate).await;
        }
    }

    async fn recheck_stale(&self, bucket_index: usize, stale: Contact) {
        let alive = self.ping(&stale).await.is_ok();
        let mut table = self.routing_table.lock().await;
        if alive {
            table.confirm_alive(bucket_index, &stale.node_id);
        } else {
            table.evict_stale(bucket_index, &stale.node_id);
        }
    }

    async fn dispatch(&self, request: &DhtRequest) -> DhtResponse {
        match request {
            DhtRequest::Ping { rpc_id, .. } => {
                DhtResponse::Pong { rpc_id: rpc_id.clone(), node_id: self.self_id.as_str().to_string() }
            }
            DhtRequest::FindNode { rpc_id, target_id, .. } => {
                let nodes = self.closest_for_wire(target_id).await;
                DhtResponse::Nodes { rpc_id: rpc_id.clone(), node_id: self.self_id.as_str().to_string(), nodes }
            }
            DhtRequest::Store { rpc_id, key, value, .. } => {
                self.store.lock().await.put(key.clone(), value.clone());
                DhtResponse::Stored { rpc_id: rpc_id.clone(), node_id: self.self_id.as_str().to_string(), ok: true }
            }
            DhtRequest::FindValue { rpc_id, key, .. } => {
                let found = self.store.lock().await.get(key).map(|v| v.to_string());
                match found {
                    Some(value) => DhtResponse::Value {
                        rpc_id: rpc_id.clone(),
                        node_id: self.self_id.as_str().to_string(),
                        value: Some(value),
                        nodes: None,
                    },
                    None => {
                        let nodes = self.closest_for_wire(key).await;
                        DhtResponse::Value {
                            rpc_id: rpc_id.clone(),
                            node_id: self.self_id.as_str().to_string(),
                            value: None,
                            nodes: Some(nodes),
                        }
                    }
                }
            }
        }
    }

    async fn closest_for_wire(&self, target_hint: &str) -> Vec<WireNode> {
        // target_id for FIND_NODE is a NodeId's hex suffix; for FIND_VALUE's
        // fallback, the key may not parse as a NodeId (e.g. "cert:..."), in
        // which case we fall back to our closest contacts to our own id.
        let target = NodeId::parse(target_hint)
            .or_else(|_| NodeId::parse(&format!("dpc-node-{}", target_hint)))
            .unwrap_or_else(|_| self.self_id.clone());
        let table = self.routing_table.lock().await;
        table.closest(&target, K).iter().map(WireNode::from_contact).collect()
    }

    /// Sends `request` to `addr`, retrying up to `max_retries` times on
    /// timeout, and returns the matched response (spec §4.3, §5).
    async fn send_rpc(&self, addr: SocketAddr, build: impl Fn(String) -> DhtRequest) -> Result<DhtResponse, DhtError> {
        let mut attempt = 0;
        loop {
            let rpc_id = new_rpc_id();
            let request = build(rpc_id.clone());
            let (tx, rx) = oneshot::channel();
            self.pending.lock().await.insert(rpc_id.clone(), tx);

            let bytes = serde_json::to_vec(&request)?;
            if let Err(e) = self.socket.send_to(&bytes, addr).await {
                self.pending.lock().await.remove(&rpc_id);
                return Err(DhtError::Io(e));
            }

            match tokio::time::timeout(self.config.rpc_timeout, rx).await {
                Ok(Ok(response)) => return Ok(response),
                _ => {
                    self.pending.lock().await.remove(&rpc_id);
                    if attempt >= self.config.max_retries {
                        return Err(DhtError::Timeout(addr));
                    }
                    attempt += 1;
                }
            }
        }
    }

    pub async fn ping(&self, contact: &Contact) -> Result<(), DhtError> {
        let self_id = self.self_id.as_str().to_string();
        let response = self
            .send_rpc(contact.addr, move |rpc_id| DhtRequest::Ping {
                rpc_id,
                node_id: self_id.clone(),
                timestamp: now_millis(),
            })
            .await?;
        match response {
            DhtResponse::Pong { .. } => Ok(()),
            _ => Err(DhtError::Malformed("expected PONG".into())),
        }
    }

    async fn find_node_rpc(&self, contact: &Contact, target: &NodeId) -> Result<Vec<Contact>, DhtError> {
        let self_id = self.self_id.as_str().to_string();
        let target_id = target.hash_suffix().to_string();
        let response = self
            .send_rpc(contact.addr, move |rpc_id| DhtRequest::FindNode {
                rpc_id,
                node_id: self_id.clone(),
                timestamp: now_millis(),
                target_id: target_id.clone(),
            })
            .await?;
        match response {
            DhtResponse::Nodes { nodes, .. } => Ok(nodes.iter().filter_map(parse_wire_node).collect()),
            _ => Err(DhtError::Malformed("expected NODES".into())),
        }
    }

    pub async fn store_rpc(&self, contact: &Contact, key: &str, value: &str) -> Result<bool, DhtError> {
        let self_id = self.self_id.as_str().to_string();
        let key = key.to_string();
        let value = value.to_string();
        let response = self
            .send_rpc(contact.addr, move |rpc_id| DhtRequest::Store {
                rpc_id,
                node_id: self_id.clone(),
                timestamp: now_millis(),
                key: key.clone(),
                value: value.clone(),
            })
            .await?;
        match response {
            DhtResponse::Stored { ok, .. } => Ok(ok),
            _ => Err(DhtError::Malformed("expected STORED".into())),
        }
    }

    async fn find_value_rpc(&self, contact: &Contact, key: &str) -> Result<(Option<String>, Vec<Contact>), DhtError> {
        let self_id = self.self_id.as_str().to_string();
        let key = key.to_string();
        let response = self
            .send_rpc(contact.addr, move |rpc_id| DhtRequest::FindValue {
                rpc_id,
                node_id: self_id.clone(),
                timestamp: now_millis(),
                key: key.clone(),
            })
            .await?;
        match response {
            DhtResponse::Value { value, nodes, .. } => {
                Ok((value, nodes.unwrap_or_default().iter().filter_map(parse_wire_node).collect()))
            }
            _ => Err(DhtError::Malformed("expected VALUE".into())),
        }
    }

    /// Iterative FIND_NODE lookup seeded from the local routing table (spec
    /// §4.3).
    pub async fn find_node(&self, target: &NodeId) -> Vec<Contact> {
        let seed = self.routing_table.lock().await.closest(target, K);
        lookup::iterative_find_node(self, target, seed).await
    }

    /// Iterative FIND_VALUE; returns `Some(ip:port)` if a node held the
    /// value (spec §4.3 `find_peer`).
    pub async fn find_peer(&self, target: &NodeId) -> Option<String> {
        let seed = self.routing_table.lock().await.closest(target, K);
        lookup::iterative_find_value(self, target, target.hash_suffix(), seed).await
    }

    /// Generic iterative FIND_VALUE for any storage key (spec §3.2: the
    /// canonical key formats include `"cert:" + NodeId`, not just a bare
    /// NodeId). Routes the lookup toward `routing_target` — the NodeId the
    /// key is namespaced under — since that's the closest point in ID
    /// space any node publishing the key would have stored it near.
    pub async fn find_value(&self, routing_target: &NodeId, key: &str) -> Option<String> {
        let seed = self.routing_table.lock().await.closest(routing_target, K);
        lookup::iterative_find_value(self, routing_target, key, seed).await
    }

    /// Bootstraps the routing table from known `seeds` (spec §4.3): PING
    /// each, then run a self-lookup plus a per-bucket broadening lookup.
    pub async fn bootstrap(&self, seeds: &[SocketAddr]) -> Result<(), DhtError> {
        let mut any_responded = false;
        for &addr in seeds {
            let probe = Contact::new(self.self_id.clone(), addr);
            if let Ok(()) = self.ping(&probe).await {
                any_responded = true;
            }
        }
        if !any_responded {
            return Err(DhtError::NoContacts);
        }

        let self_id = self.self_id.clone();
        self.find_node(&self_id).await;

        let bucket_indices = self.routing_table.lock().await.non_empty_bucket_indices();
        for index in bucket_indices {
            let random_target = self.routing_table.lock().await.random_id_in_bucket(index);
            self.find_node(&random_target).await;
        }
        Ok(())
    }

    /// Publishes a PEM certificate under `"cert:" + self_id` to the `k`
    /// closest peers to this node (spec §3.2, §4.3). Returns the number of
    /// successful STOREs.
    pub async fn publish_certificate(&self, certificate_pem: &str) -> usize {
        let self_id = self.self_id.clone();
        let closest = self.find_node(&self_id).await;
        let key = format!("cert:{self_id}");
        let mut successes = 0;
        for contact in &closest {
            if self.store_rpc(contact, &key, certificate_pem).await.unwrap_or(false) {
                successes += 1;
            }
        }
        successes
    }

    /// Announces this node's own reachability to the `k` closest peers to
    /// itself (spec §4.3). Returns the number of successful STOREs.
    pub async fn announce(&self, own_addr: SocketAddr) -> usize {
        let self_id = self.self_id.clone();
        let closest = self.find_node(&self_id).await;
        let value = own_addr.to_string();
        let mut successes = 0;
        for contact in &closest {
            if self.store_rpc(contact, self_id.as_str(), &value).await.unwrap_or(false) {
                successes += 1;
            }
        }
        successes
    }

    async fn maintenance_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.bucket_refresh_interval);
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    tracing::info!("dht maintenance loop shutting down");
                    return;
                }
                _ = ticker.tick() => {
                    let threshold_unix = now_unix().saturating_sub(self.config.bucket_refresh_interval.as_secs());
                    let stale = self.routing_table.lock().await.stale_buckets(threshold_unix);
                    for bucket in stale {
                        let target = self.routing_table.lock().await.random_id_in_bucket(bucket.index);
                        self.find_node(&target).await;
                    }
                }
            }
        }
    }
}

#[async_trait]
impl NodeQuerier for DhtServer {
    async fn find_node(&self, peer: &Contact, target: &NodeId) -> QueryOutcome {
        match self.find_node_rpc(peer, target).await {
            Ok(nodes) => QueryOutcome::Nodes(nodes),
            Err(_) => QueryOutcome::Unreachable,
        }
    }

    async fn find_value(&self, peer: &Contact, key: &str) -> QueryOutcome {
        match self.find_value_rpc(peer, key).await {
            Ok((Some(value), _)) => QueryOutcome::Value(value),
            Ok((None, nodes)) => QueryOutcome::Nodes(nodes),
            Err(_) => QueryOutcome::Unreachable,
        }
    }
}

fn now_unix() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// A lock-free read of routing-table shape for callers outside the DHT task
/// (spec §5's "query via message-passing / atomic snapshot calls").
#[derive(Debug, Clone)]
pub struct RoutingTableSnapshot {
    pub total_contacts: usize,
    pub non_empty_buckets: Vec<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn node_id(v: u128) -> NodeId {
        NodeId::parse(&format!("dpc-node-{:032x}", v)).unwrap()
    }

    async fn spawn_server(v: u128) -> (Arc<DhtServer>, SocketAddr) {
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0);
        let server = Arc::new(DhtServer::bind(node_id(v), addr, DhtConfig::default()).await.unwrap());
        let local = server.local_addr().unwrap();
        server.spawn_receive_loop();
        (server, local)
    }

    #[tokio::test]
    async fn ping_pong_between_two_nodes() {
        let (_a, a_addr) = spawn_server(1).await;
        let (b, _b_addr) = spawn_server(2).await;

        let contact = Contact::new(node_id(1), a_addr);
        b.ping(&contact).await.unwrap();
    }

    #[tokio::test]
    async fn store_then_find_value_round_trips() {
        let (a, a_addr) = spawn_server(10).await;
        let (b, _) = spawn_server(11).await;

        let a_contact = Contact::new(node_id(10), a_addr);
        b.store_rpc(&a_contact, "cert:dpc-node-xyz", "PEM-BYTES").await.unwrap();
        assert_eq!(a.store.lock().await.get("cert:dpc-node-xyz"), Some("PEM-BYTES"));
    }

    #[tokio::test]
    async fn bootstrap_fails_with_unresponsive_seeds() {
        let (node, _) = spawn_server(20).await;
        let dead_seed = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 1);
        let result = node.bootstrap(&[dead_seed]).await;
        assert!(result.is_err());
    }
}
