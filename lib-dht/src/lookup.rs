//! Iterative Kademlia lookup (spec §4.3): converges on the `k` nodes closest
//! to a target id by repeatedly querying the `alpha` closest unqueried
//! candidates and merging their answers.
//!
//! The network call itself is abstracted behind [`NodeQuerier`] so the
//! convergence logic can be unit-tested against an in-memory network and
//! reused unchanged by [`crate::server::DhtServer`] over real UDP.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use lib_identity::NodeId;

use crate::contact::Contact;
use crate::distance::xor_distance;
use crate::{ALPHA, K};

/// The result of asking a single contact a FIND_NODE/FIND_VALUE question.
pub enum QueryOutcome {
    /// The contact returned its closest-known nodes to the target.
    Nodes(Vec<Contact>),
    /// The contact had the value itself (FIND_VALUE only).
    Value(String),
    /// The contact did not respond in time or the send failed.
    Unreachable,
}

#[async_trait]
pub trait NodeQuerier: Send + Sync {
    async fn find_node(&self, peer: &Contact, target: &NodeId) -> QueryOutcome;
    async fn find_value(&self, peer: &Contact, key: &str) -> QueryOutcome;
}

/// Runs the iterative FIND_NODE convergence procedure and returns the `k`
/// closest contacts that responded, nearest-first (spec §4.3 step 4-5).
pub async fn iterative_find_node(
    querier: &dyn NodeQuerier,
    target: &NodeId,
    seed: Vec<Contact>,
) -> Vec<Contact> {
    if seed.is_empty() {
        return Vec::new();
    }

    let mut known: HashMap<NodeId, Contact> = seed.into_iter().map(|c| (c.node_id.clone(), c)).collect();
    let mut queried: HashSet<NodeId> = HashSet::new();
    let mut responded: HashSet<NodeId> = HashSet::new();

    loop {
        let mut candidates: Vec<&Contact> = known.values().collect();
        candidates.sort_by_key(|c| xor_distance(target, &c.node_id));

        let round: Vec<Contact> = candidates
            .into_iter()
            .filter(|c| !queried.contains(&c.node_id))
            .take(ALPHA)
            .cloned()
            .collect();

        if round.is_empty() {
            break;
        }

        let best_before = closest_known_distance(&known, &responded, target);

        for contact in &round {
            queried.insert(contact.node_id.clone());
        }

        let mut handles = Vec::new();
        for contact in round {
            handles.push(async move {
                let outcome = querier.find_node(&contact, target).await;
                (contact, outcome)
            });
        }
        let results = futures::future::join_all(handles).await;

        let mut improved = false;
        for (contact, outcome) in results {
            if let QueryOutcome::Nodes(nodes) = outcome {
                responded.insert(contact.node_id.clone());
                for node in nodes {
                    if node.node_id == *target || known.contains_key(&node.node_id) {
                        continue;
                    }
                    known.insert(node.node_id.clone(), node);
                }
            }
        }

        let best_after = closest_known_distance(&known, &responded, target);
        if let (Some(before), Some(after)) = (best_before, best_after) {
            improved = after < before;
        } else if best_after.is_some() {
            improved = true;
        }

        if !improved {
            // One final round against every remaining unqueried candidate
            // among the k closest, then stop (spec §4.3 step 4).
            let mut remaining: Vec<Contact> = known.values().cloned().collect();
            remaining.sort_by_key(|c| xor_distance(target, &c.node_id));
            remaining.truncate(K);
            let remaining: Vec<Contact> =
                remaining.into_iter().filter(|c| !queried.contains(&c.node_id)).collect();

            let mut handles = Vec::new();
            for contact in remaining {
                queried.insert(contact.node_id.clone());
                handles.push(async move {
                    let outcome = querier.find_node(&contact, target).await;
                    (contact, outcome)
                });
            }
            let results = futures::future::join_all(handles).await;
            for (contact, outcome) in results {
                if let QueryOutcome::Nodes(_) = outcome {
                    responded.insert(contact.node_id.clone());
                }
            }
            break;
        }
    }

    let mut final_contacts: Vec<Contact> =
        known.into_iter().filter(|(id, _)| responded.contains(id)).map(|(_, c)| c).collect();
    final_contacts.sort_by_key(|c| xor_distance(target, &c.node_id));
    final_contacts.truncate(K);
    final_contacts
}

fn closest_known_distance(known: &HashMap<NodeId, Contact>, responded: &HashSet<NodeId>, target: &NodeId) -> Option<u128> {
    known
        .keys()
        .filter(|id| responded.contains(*id))
        .map(|id| xor_distance(target, id))
        .min()
}

/// Iterative FIND_VALUE: like [`iterative_find_node`] but stops the moment
/// any queried contact returns the value directly (spec §4.3 `find_peer`).
pub async fn iterative_find_value(
    querier: &dyn NodeQuerier,
    key_id: &NodeId,
    key: &str,
    seed: Vec<Contact>,
) -> Option<String> {
    if seed.is_empty() {
        return None;
    }

    let mut known: HashMap<NodeId, Contact> = seed.into_iter().map(|c| (c.node_id.clone(), c)).collect();
    let mut queried: HashSet<NodeId> = HashSet::new();

    loop {
        let mut candidates: Vec<&Contact> = known.values().collect();
        candidates.sort_by_key(|c| xor_distance(key_id, &c.node_id));
        let round: Vec<Contact> = candidates
            .into_iter()
            .filter(|c| !queried.contains(&c.node_id))
            .take(ALPHA)
            .cloned()
            .collect();
        if round.is_empty() {
            return None;
        }
        for contact in &round {
            queried.insert(contact.node_id.clone());
        }

        let mut handles = Vec::new();
        for contact in round {
            handles.push(async move {
                let outcome = querier.find_value(&contact, key).await;
                (contact, outcome)
            });
        }
        let results = futures::future::join_all(handles).await;

        let mut any_new = false;
        for (_, outcome) in results {
            match outcome {
                QueryOutcome::Value(v) => return Some(v),
                QueryOutcome::Nodes(nodes) => {
                    for node in nodes {
                        if !known.contains_key(&node.node_id) {
                            known.insert(node.node_id.clone(), node);
                            any_new = true;
                        }
                    }
                }
                QueryOutcome::Unreachable => {}
            }
        }
        if !any_new && known.values().all(|c| queried.contains(&c.node_id)) {
            return None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as Map;
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};
    use std::sync::Mutex;

    fn id(v: u128) -> NodeId {
        NodeId::parse(&format!("dpc-node-{:032x}", v)).unwrap()
    }

    fn contact(v: u128) -> Contact {
        Contact::new(id(v), SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 9000 + v as u16))
    }

    /// An in-memory network: each node knows a fixed list of peers, used to
    /// deterministically test convergence toward the closest known node.
    struct FakeNetwork {
        adjacency: Map<NodeId, Vec<Contact>>,
        queries: Mutex<Vec<NodeId>>,
    }

    #[async_trait]
    impl NodeQuerier for FakeNetwork {
        async fn find_node(&self, peer: &Contact, target: &NodeId) -> QueryOutcome {
            self.queries.lock().unwrap().push(peer.node_id.clone());
            match self.adjacency.get(&peer.node_id) {
                Some(known) => {
                    let mut known = known.clone();
                    known.sort_by_key(|c| xor_distance(target, &c.node_id));
                    known.truncate(K);
                    QueryOutcome::Nodes(known)
                }
                None => QueryOutcome::Unreachable,
            }
        }

        async fn find_value(&self, _peer: &Contact, _key: &str) -> QueryOutcome {
            QueryOutcome::Unreachable
        }
    }

    #[tokio::test]
    async fn converges_toward_closest_node_to_target() {
        // A chain: 0 -> knows 1,2; 1 -> knows 2,3; 2 -> knows 3,4; target is 4.
        let mut adjacency = Map::new();
        adjacency.insert(id(0), vec![contact(1), contact(2)]);
        adjacency.insert(id(1), vec![contact(2), contact(3)]);
        adjacency.insert(id(2), vec![contact(3), contact(4)]);
        adjacency.insert(id(3), vec![contact(4)]);
        let net = FakeNetwork { adjacency, queries: Mutex::new(Vec::new()) };

        let target = id(4);
        let seed = vec![contact(0)];
        let result = iterative_find_node(&net, &target, seed).await;

        assert!(!result.is_empty());
        assert_eq!(result[0].node_id, id(4));
    }

    #[tokio::test]
    async fn empty_routing_table_yields_empty_result() {
        let net = FakeNetwork { adjacency: Map::new(), queries: Mutex::new(Vec::new()) };
        let result = iterative_find_node(&net, &id(99), Vec::new()).await;
        assert!(result.is_empty());
    }
}
