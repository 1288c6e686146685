//! Bounded cache of decoded nodes

use crate::model::Hash;
use crate::node::Node;
use lru::LruCache;

/// Decoded nodes keyed by hash, evicted least recently used first once `capacity` bytes
/// are exceeded
pub(super) struct NodeCache {
    capacity: u64,
    used: u64,
    entries: LruCache<Hash, Node>,
}

impl NodeCache {
    /// A zero capacity disables caching
    pub fn new(capacity: u64) -> Self {
        NodeCache {
            capacity,
            used: 0,
            entries: LruCache::unbounded(),
        }
    }

    /// Look up a node, marking it as most recently used
    pub fn get(&mut self, hash: &Hash) -> Option<Node> {
        self.entries.get(hash).cloned()
    }

    pub fn insert(&mut self, hash: Hash, node: Node) {
        let size = node.size();
        if size > self.capacity {
            return;
        }
        if let Some(previous) = self.entries.put(hash, node) {
            self.used -= previous.size();
        }
        self.used += size;

        while self.used > self.capacity {
            let Some((_, evicted)) = self.entries.pop_lru() else {
                break;
            };
            self.used -= evicted.size();
        }
    }

    pub fn remove(&mut self, hash: &Hash) {
        if let Some(node) = self.entries.pop(hash) {
            self.used -= node.size();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
