//! The partitioned hash engine.
//!
//! Each partition owns a private `HashMap` behind its own reader/writer
//! lock; there is no global lock. `Get` takes a shared lock on exactly one
//! partition, `Set`/`Del` an exclusive lock on exactly one partition.

use std::collections::HashMap;

use parking_lot::RwLock;

use super::hash::fnv1a_32;

struct Partition {
    map: RwLock<HashMap<String, String>>,
}

impl Partition {
    fn new() -> Self {
        Self {
            map: RwLock::new(HashMap::new()),
        }
    }
}

/// A key/value engine sharded into `N` independent partitions.
pub struct Engine {
    partitions: Vec<Partition>,
}

impl Engine {
    /// Construct an engine with a fixed partition count. `N = 1` is the
    /// degenerate single-lock case; this is the default.
    pub fn new(num_partitions: usize) -> Self {
        let num_partitions = num_partitions.max(1);
        let partitions = (0..num_partitions).map(|_| Partition::new()).collect();
        Self { partitions }
    }

    pub fn num_partitions(&self) -> usize {
        self.partitions.len()
    }

    fn partition_index(&self, key: &str) -> usize {
        (fnv1a_32(key.as_bytes()) as usize) % self.partitions.len()
    }

    /// Returns `(value, found)`.
    pub fn get(&self, key: &str) -> (Option<String>, bool) {
        let idx = self.partition_index(key);
        let guard = self.partitions[idx].map.read();
        match guard.get(key) {
            Some(v) => (Some(v.clone()), true),
            None => (None, false),
        }
    }

    /// Last-writer-wins.
    pub fn set(&self, key: &str, value: &str) {
        let idx = self.partition_index(key);
        let mut guard = self.partitions[idx].map.write();
        guard.insert(key.to_string(), value.to_string());
    }

    /// No-op if the key is absent.
    pub fn del(&self, key: &str) {
        let idx = self.partition_index(key);
        let mut guard = self.partitions[idx].map.write();
        guard.remove(key);
    }

    /// Total number of keys across all partitions (used by tests/metrics).
    pub fn len(&self) -> usize {
        self.partitions.iter().map(|p| p.map.read().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
