//! The 128-K-bucket routing table keyed by XOR-distance bucket index to the
//! local NodeId (spec §3.2, §4.3). Owned exclusively by the DHT's receive and
//! maintenance tasks (spec §5); other tasks read it through a snapshot.

use std::net::SocketAddr;
use std::time::{SystemTime, UNIX_EPOCH};

use lib_identity::NodeId;

use crate::contact::Contact;
use crate::distance::{bucket_index, xor_distance};
use crate::error::DhtError;
use crate::kbucket::{AddOutcome, KBucket};
use crate::{ID_BITS, K};

/// Bucket-wise last-touched timestamps, used by the maintenance loop to pick
/// which buckets need a refresh lookup (spec §4.3 "periodic refresh").
#[derive(Debug, Clone, Copy)]
pub struct BucketFreshness {
    pub index: usize,
    pub last_updated_unix: u64,
}

pub struct RoutingTable {
    self_id: NodeId,
    buckets: Vec<KBucket>,
    last_updated_unix: Vec<u64>,
}

/// Outcome surfaced to the caller after [`RoutingTable::add_node`]. When a
/// bucket is full, the caller (the DHT server) is responsible for PINGing
/// `stale_candidate` and calling [`RoutingTable::evict_stale`] or
/// [`RoutingTable::confirm_alive`] depending on the result.
#[derive(Debug, PartialEq, Eq)]
pub enum AddResult {
    Added,
    Refreshed,
    NeedsLivenessCheck { bucket_index: usize, stale_candidate: Contact },
    Rejected,
}

impl RoutingTable {
    pub fn new(self_id: NodeId) -> Self {
        Self {
            self_id,
            buckets: (0..ID_BITS).map(|_| KBucket::new(K)).collect(),
            last_updated_unix: vec![0; ID_BITS],
        }
    }

    pub fn self_id(&self) -> &NodeId {
        &self.self_id
    }

    fn bucket_index_for(&self, id: &NodeId) -> Result<usize, DhtError> {
        if *id == self.self_id {
            return Err(DhtError::IsLocalNode);
        }
        Ok(bucket_index(xor_distance(&self.self_id, id)))
    }

    /// Adds or refreshes a node (spec §4.3 `add_node`). Rejects the local
    /// node outright; otherwise mirrors the bucket's [`AddOutcome`].
    pub fn add_node(&mut self, node_id: NodeId, addr: SocketAddr) -> Result<AddResult, DhtError> {
        let index = self.bucket_index_for(&node_id)?;
        let contact = Contact::new(node_id, addr);
        let outcome = self.buckets[index].add_or_refresh(contact);
        self.last_updated_unix[index] = now_unix();
        Ok(match outcome {
            AddOutcome::Added => AddResult::Added,
            AddOutcome::Refreshed => AddResult::Refreshed,
            AddOutcome::BucketFull { least_recently_seen } => {
                AddResult::NeedsLivenessCheck { bucket_index: index, stale_candidate: least_recently_seen }
            }
            AddOutcome::Rejected => AddResult::Rejected,
        })
    }

    pub fn evict_stale(&mut self, bucket_index: usize, stale_node_id: &NodeId) {
        if let Some(bucket) = self.buckets.get_mut(bucket_index) {
            bucket.evict_stale(stale_node_id);
        }
    }

    pub fn confirm_alive(&mut self, bucket_index: usize, node_id: &NodeId) {
        if let Some(bucket) = self.buckets.get_mut(bucket_index) {
            bucket.confirm_alive(node_id);
        }
    }

    pub fn remove(&mut self, node_id: &NodeId) {
        if let Ok(index) = self.bucket_index_for(node_id) {
            self.buckets[index].remove(node_id);
        }
    }

    /// The `k` contacts closest to `target` across the whole table, sorted
    /// nearest-first; ties broken by NodeId lexicographic order (spec §4.3).
    pub fn closest(&self, target: &NodeId, k: usize) -> Vec<Contact> {
        let mut all: Vec<Contact> = self.buckets.iter().flat_map(|b| b.iter().cloned()).collect();
        all.sort_by(|a, b| {
            let da = xor_distance(target, &a.node_id);
            let db = xor_distance(target, &b.node_id);
            da.cmp(&db).then_with(|| a.node_id.cmp(&b.node_id))
        });
        all.truncate(k);
        all
    }

    pub fn total_contacts(&self) -> usize {
        self.buckets.iter().map(|b| b.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total_contacts() == 0
    }

    pub fn non_empty_bucket_indices(&self) -> Vec<usize> {
        self.buckets
            .iter()
            .enumerate()
            .filter(|(_, b)| !b.is_empty())
            .map(|(i, _)| i)
            .collect()
    }

    /// Buckets whose `last_updated` predates `threshold_unix`, for the
    /// maintenance loop's refresh selection (spec §4.3).
    pub fn stale_buckets(&self, threshold_unix: u64) -> Vec<BucketFreshness> {
        self.non_empty_bucket_indices()
            .into_iter()
            .filter(|&i| self.last_updated_unix[i] < threshold_unix)
            .map(|i| BucketFreshness { index: i, last_updated_unix: self.last_updated_unix[i] })
            .collect()
    }

    /// A random 128-bit id guaranteed to fall into bucket `index`'s distance
    /// range `[2^index, 2^(index+1))` from self, used to seed a refresh
    /// lookup for that bucket (spec §4.3).
    pub fn random_id_in_bucket(&self, index: usize) -> NodeId {
        use rand::RngCore;
        let mut rng = rand::thread_rng();
        let low = 1u128 << index;
        let span = if index + 1 >= ID_BITS { u128::MAX - low } else { (1u128 << (index + 1)) - low };
        let offset = if span == 0 { 0 } else { (rng.next_u64() as u128) % span };
        let distance = low + offset;
        let self_val = crate::distance::node_id_to_u128(&self.self_id);
        let target_val = self_val ^ distance;
        NodeId::parse(&format!("dpc-node-{:032x}", target_val)).expect("128-bit value formats to 32 hex chars")
    }

    /// A fully random id, for the bootstrap self-lookup complement of
    /// broadening coverage via per-bucket lookups is handled by the caller;
    /// this is used when a caller wants an arbitrary target (e.g. tests).
    pub fn random_id() -> NodeId {
        use rand::RngCore;
        let mut rng = rand::thread_rng();
        let mut buf = [0u8; 16];
        rng.fill_bytes(&mut buf);
        NodeId::parse(&format!("dpc-node-{}", hex::encode(buf))).expect("16 bytes format to 32 hex chars")
    }
}

fn now_unix() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn id(byte: u8) -> NodeId {
        NodeId::parse(&format!("dpc-node-{:032x}", byte)).unwrap()
    }

    fn addr(octet: u8) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, octet, 1)), 9000)
    }

    #[test]
    fn rejects_self_insertion() {
        let self_id = id(0);
        let mut table = RoutingTable::new(self_id.clone());
        assert!(matches!(table.add_node(self_id, addr(1)), Err(DhtError::IsLocalNode)));
    }

    #[test]
    fn closest_returns_nearest_first() {
        let mut table = RoutingTable::new(id(0));
        table.add_node(id(1), addr(1)).unwrap();
        table.add_node(id(2), addr(2)).unwrap();
        table.add_node(id(200), addr(3)).unwrap();

        let closest = table.closest(&id(0), 2);
        assert_eq!(closest.len(), 2);
        assert_eq!(closest[0].node_id, id(1));
        assert_eq!(closest[1].node_id, id(2));
    }

    #[test]
    fn total_contacts_tracks_additions() {
        let mut table = RoutingTable::new(id(0));
        assert!(table.is_empty());
        table.add_node(id(1), addr(1)).unwrap();
        assert_eq!(table.total_contacts(), 1);
    }

    #[test]
    fn random_id_in_bucket_lands_in_expected_distance_range() {
        let self_id = id(0);
        let table = RoutingTable::new(self_id.clone());
        for index in [0usize, 5, 64, 127] {
            let random = table.random_id_in_bucket(index);
            let distance = xor_distance(&self_id, &random);
            assert_eq!(bucket_index(distance), index);
        }
    }
}
