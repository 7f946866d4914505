//! Kademlia-style distributed hash table used for peer discovery.
//!
//! NodeIds are treated as points in a 128-bit XOR metric space (the hex
//! suffix of a [`lib_identity::NodeId`]). Contacts are organized into 128
//! k-buckets, each with an LRU-ordered contact list and a bounded
//! replacement cache, and nodes are found via the standard iterative
//! `FIND_NODE` / `FIND_VALUE` lookup.

pub mod contact;
pub mod datastore;
pub mod distance;
pub mod error;
pub mod kbucket;
pub mod lookup;
pub mod rpc;
pub mod routing_table;
pub mod server;

pub use contact::Contact;
pub use distance::{bucket_index, xor_distance, ID_BITS};
pub use error::DhtError;
pub use routing_table::RoutingTable;
pub use server::{DhtConfig, DhtServer, RoutingTableSnapshot};

/// Replication/parallelism factor k: bucket size and lookup fan-out.
pub const K: usize = 20;
/// Lookup parallelism alpha: number of concurrent in-flight RPCs per round.
pub const ALPHA: usize = 3;
/// Maximum contacts held in a bucket's replacement cache.
pub const REPLACEMENT_CACHE_SIZE: usize = 10;
/// Maximum contacts from the same /24 subnet kept in a single bucket.
pub const MAX_PER_SUBNET: usize = 2;
