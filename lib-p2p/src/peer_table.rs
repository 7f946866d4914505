//! The live peer table (spec §3.3): at most one connection per NodeId,
//! mutated only through [`PeerTable`]'s own methods so the P2P manager's
//! control task is the sole writer (spec §5).

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use lib_identity::NodeId;
use lib_transport::TransportKind;
use lib_wire::Envelope;

/// A live connection's outward-facing handle: a channel the manager's
/// reader/writer task drains to serialize sends, plus enough metadata for
/// `connected_peers()` without re-entering the task.
pub struct PeerHandle {
    pub kind: TransportKind,
    pub outgoing: mpsc::Sender<Envelope>,
    pub task: JoinHandle<()>,
}

#[derive(Clone)]
pub struct PeerTable {
    inner: Arc<Mutex<HashMap<NodeId, PeerHandle>>>,
}

impl Default for PeerTable {
    fn default() -> Self {
        Self::new()
    }
}

impl PeerTable {
    pub fn new() -> Self {
        Self { inner: Arc::new(Mutex::new(HashMap::new())) }
    }

    /// Installs `handle` for `node_id`, replacing any existing connection
    /// for the same NodeId first (spec §4.5: "existing entries for the
    /// same NodeId are first shut down"). Dropping the old handle's
    /// `outgoing` sender closes its peer loop's channel, which makes that
    /// loop observe a clean shutdown and call `close()` on its transport
    /// rather than aborting it mid-flight.
    pub async fn install(&self, node_id: NodeId, handle: PeerHandle) {
        self.inner.lock().await.insert(node_id, handle);
    }

    pub async fn remove(&self, node_id: &NodeId) -> Option<PeerHandle> {
        let mut table = self.inner.lock().await;
        table.remove(node_id)
    }

    pub async fn is_connected(&self, node_id: &NodeId) -> bool {
        self.inner.lock().await.contains_key(node_id)
    }

    pub async fn connected_peers(&self) -> Vec<NodeId> {
        self.inner.lock().await.keys().cloned().collect()
    }

    pub async fn outgoing_sender(&self, node_id: &NodeId) -> Option<mpsc::Sender<Envelope>> {
        self.inner.lock().await.get(node_id).map(|h| h.outgoing.clone())
    }

    pub async fn kind_of(&self, node_id: &NodeId) -> Option<TransportKind> {
        self.inner.lock().await.get(node_id).map(|h| h.kind)
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
