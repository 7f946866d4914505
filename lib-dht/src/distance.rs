//! XOR-metric distance over the 128-bit NodeId space.

use lib_identity::NodeId;

/// Width of the ID space: a NodeId's hex suffix is 32 hex chars = 128 bits.
pub const ID_BITS: usize = 128;

/// Interprets a NodeId's hash suffix as a 128-bit integer.
pub fn node_id_to_u128(id: &NodeId) -> u128 {
    u128::from_str_radix(id.hash_suffix(), 16).expect("NodeId suffix is validated hex at construction")
}

/// XOR distance between two NodeIds, per the Kademlia metric.
pub fn xor_distance(a: &NodeId, b: &NodeId) -> u128 {
    node_id_to_u128(a) ^ node_id_to_u128(b)
}

/// Maps a distance to its k-bucket index in `0..ID_BITS`. Bucket `i` holds
/// contacts at distance in `[2^i, 2^(i+1))`. Only called with `distance > 0`
/// (the local node never computes its distance to itself).
pub fn bucket_index(distance: u128) -> usize {
    debug_assert!(distance != 0, "distance to self is undefined for bucket placement");
    (ID_BITS - 1) - distance.leading_zeros() as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node_id_from_u128(value: u128) -> NodeId {
        NodeId::parse(&format!("dpc-node-{:032x}", value)).unwrap()
    }

    #[test]
    fn distance_to_self_is_zero() {
        let id = node_id_from_u128(42);
        assert_eq!(xor_distance(&id, &id), 0);
    }

    #[test]
    fn distance_is_symmetric() {
        let a = node_id_from_u128(7);
        let b = node_id_from_u128(99);
        assert_eq!(xor_distance(&a, &b), xor_distance(&b, &a));
    }

    #[test]
    fn bucket_index_boundaries() {
        assert_eq!(bucket_index(1), 0);
        assert_eq!(bucket_index(2), 1);
        assert_eq!(bucket_index(3), 1);
        assert_eq!(bucket_index(1u128 << 127), 127);
    }
}
