//! Reaction Cache
//!
//! Last committed value of every evaluated node, keyed by node id.
//!
//! # How It Works
//!
//! 1. Passes never write here directly. Their values collect in the pass
//!    record and land in the cache together when the pass commits.
//!
//! 2. A node whose staleness is clean reuses its entry instead of running
//!    its steps again.
//!
//! 3. `Reaction` entries double as the reaction's state: `.` reads them and
//!    their presence means the reaction has been initialized. They are never
//!    evicted.

use std::collections::HashMap;

use crate::ast::NodeId;
use crate::value::Value;

/// One committed value with the pass that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    /// The committed value.
    pub value: Value,
    /// Pass that committed the value.
    pub pass: u64,
    /// Newest stream version read while computing the value.
    pub stream_version: Option<u64>,
    /// False for volatile nodes, whose entry is informational only.
    pub reusable: bool,
    /// The entry belongs to a `Reaction` node.
    pub reaction: bool,
}

/// Committed values keyed by node.
#[derive(Debug, Default)]
pub struct ReactionCache {
    entries: HashMap<NodeId, CacheEntry>,
}

impl ReactionCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the entry for `id`, reusable or not.
    pub fn get(&self, id: NodeId) -> Option<&CacheEntry> {
        self.entries.get(&id)
    }

    /// Get the last committed value of `id`.
    pub fn value(&self, id: NodeId) -> Option<&Value> {
        self.get(id).map(|entry| &entry.value)
    }

    /// The cached value, if the node may reuse it.
    pub fn reusable(&self, id: NodeId) -> Option<&Value> {
        self.get(id)
            .filter(|entry| entry.reusable)
            .map(|entry| &entry.value)
    }

    /// Whether `id` has committed a value. For reactions, whether they are initialized.
    pub fn contains(&self, id: NodeId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Store `entry`, replacing any earlier one for `id`.
    pub fn insert(&mut self, id: NodeId, entry: CacheEntry) {
        self.entries.insert(id, entry);
    }

    /// Remove and return the entry for `id`.
    pub fn remove(&mut self, id: NodeId) -> Option<CacheEntry> {
        self.entries.remove(&id)
    }

    /// Number of cached nodes.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every entry, reaction state included.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Drop the least recently committed non-reaction entries until at most
    /// `capacity` of them remain. Returns the evicted nodes.
    pub fn evict(&mut self, capacity: usize) -> Vec<NodeId> {
        let mut candidates: Vec<(u64, NodeId)> = self
            .entries
            .iter()
            .filter(|(_, entry)| !entry.reaction)
            .map(|(&id, entry)| (entry.pass, id))
            .collect();
        if candidates.len() <= capacity {
            return Vec::new();
        }

        candidates.sort_unstable();
        let excess = candidates.len() - capacity;
        candidates
            .into_iter()
            .take(excess)
            .map(|(_, id)| {
                self.entries.remove(&id);
                id
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(value: f64, pass: u64, reaction: bool) -> CacheEntry {
        CacheEntry {
            value: Value::number(value),
            pass,
            stream_version: None,
            reusable: true,
            reaction,
        }
    }

    #[test]
    fn volatile_entries_are_not_reusable() {
        let mut cache = ReactionCache::new();
        cache.insert(
            NodeId::from(1),
            CacheEntry {
                reusable: false,
                ..entry(1.0, 1, false)
            },
        );
        assert_eq!(cache.value(NodeId::from(1)), Some(&Value::number(1.0)));
        assert!(cache.reusable(NodeId::from(1)).is_none());
    }

    #[test]
    fn eviction_drops_oldest_first() {
        let mut cache = ReactionCache::new();
        cache.insert(NodeId::from(1), entry(1.0, 1, false));
        cache.insert(NodeId::from(2), entry(2.0, 3, false));
        cache.insert(NodeId::from(3), entry(3.0, 2, false));

        let evicted = cache.evict(1);
        assert_eq!(evicted, vec![NodeId::from(1), NodeId::from(3)]);
        assert!(cache.contains(NodeId::from(2)));
    }

    #[test]
    fn reactions_survive_eviction() {
        let mut cache = ReactionCache::new();
        cache.insert(NodeId::from(1), entry(1.0, 1, true));
        cache.insert(NodeId::from(2), entry(2.0, 2, false));

        assert_eq!(cache.evict(0), vec![NodeId::from(2)]);
        assert!(cache.contains(NodeId::from(1)));
        assert_eq!(cache.len(), 1);
    }
}
