//! Hydration caches.
//!
//! Decrypting metadata costs an AES pass per row, so hydrated rows are kept
//! in bounded LRUs keyed `(id, last_updated)`. A mutation bumps
//! `last_updated`, which changes the key; the stale entry is never consulted
//! again and ages out through insertion-ordered eviction.

use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;

use mnema_core::{Edge, EdgeId, Fact, FactId, Timestamp};

pub struct HydrationCache {
    facts: Mutex<LruCache<(FactId, Timestamp), Fact>>,
    edges: Mutex<LruCache<(EdgeId, Timestamp), Edge>>,
}

impl HydrationCache {
    /// Bound both caches at `capacity` entries each.
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            facts: Mutex::new(LruCache::new(cap)),
            edges: Mutex::new(LruCache::new(cap)),
        }
    }

    pub fn get_fact(&self, key: &(FactId, Timestamp)) -> Option<Fact> {
        self.facts.lock().get(key).cloned()
    }

    pub fn put_fact(&self, key: (FactId, Timestamp), fact: Fact) {
        self.facts.lock().put(key, fact);
    }

    pub fn get_edge(&self, key: &(EdgeId, Timestamp)) -> Option<Edge> {
        self.edges.lock().get(key).cloned()
    }

    pub fn put_edge(&self, key: (EdgeId, Timestamp), edge: Edge) {
        self.edges.lock().put(key, edge);
    }

    /// Current entry counts (facts, edges).
    pub fn len(&self) -> (usize, usize) {
        (self.facts.lock().len(), self.edges.lock().len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == (0, 0)
    }
}
