//! Local key/value storage backing STORE/FIND_VALUE (spec §3.2, §4.3).
//!
//! Keys are opaque strings in one of two canonical forms: a NodeId (value is
//! `"ip:port"`) or `"cert:" + NodeId` (value is a PEM certificate). The store
//! itself treats both the same way — it records the insertion timestamp
//! alongside the value but never expires entries on its own; that is left to
//! callers/maintenance loops, per spec.md (which specifies no TTL for STORE).

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone)]
pub struct StoredValue {
    pub value: String,
    pub inserted_unix: u64,
}

/// In-memory key/value store for the DHT's local contribution to the
/// network-wide distributed hash table.
#[derive(Debug, Default)]
pub struct DataStore {
    entries: HashMap<String, StoredValue>,
}

impl DataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: String, value: String) {
        self.entries.insert(key, StoredValue { value, inserted_unix: now_unix() });
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(|v| v.value.as_str())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn now_unix() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stores_and_retrieves_a_value() {
        let mut store = DataStore::new();
        store.put("cert:dpc-node-abc".into(), "PEM-DATA".into());
        assert_eq!(store.get("cert:dpc-node-abc"), Some("PEM-DATA"));
        assert_eq!(store.get("missing"), None);
    }

    #[test]
    fn overwrite_replaces_value_and_timestamp() {
        let mut store = DataStore::new();
        store.put("dpc-node-abc".into(), "10.0.0.1:9000".into());
        store.put("dpc-node-abc".into(), "10.0.0.2:9000".into());
        assert_eq!(store.get("dpc-node-abc"), Some("10.0.0.2:9000"));
        assert_eq!(store.len(), 1);
    }
}
