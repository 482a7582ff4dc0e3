//! Request/response cache.
//!
//! # Responsibilities
//! - Map exact request bytes to the last response seen for them
//! - Bound the number of entries, evicting the least recently touched
//! - Count hits and misses for reporting
//!
//! # Design Decisions
//! - Keys are compared byte for byte; nothing is parsed
//! - Both a hit and an insert refresh an entry's recency
//! - Recency is a monotonically increasing stamp kept in a `BTreeMap`, so
//!   eviction and refresh stay logarithmic for any capacity
//! - Staleness is accepted: no TTL, no invalidation from backends
//! - A capacity of zero disables caching

use std::collections::{BTreeMap, HashMap};

use crate::observability::metrics;

/// Default number of cached request/response pairs.
pub const DEFAULT_CAPACITY: usize = 5;

#[derive(Debug)]
struct Entry {
    response: Vec<u8>,
    stamp: u64,
}

/// Hit/miss counters and occupancy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub len: usize,
    pub capacity: usize,
}

/// Bounded cache keyed by exact request bytes.
#[derive(Debug)]
pub struct ResponseCache {
    capacity: usize,
    entries: HashMap<Vec<u8>, Entry>,
    /// stamp -> key, oldest first.
    order: BTreeMap<u64, Vec<u8>>,
    next_stamp: u64,
    hits: u64,
    misses: u64,
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl ResponseCache {
    /// Create an empty cache holding at most `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: HashMap::with_capacity(capacity),
            order: BTreeMap::new(),
            next_stamp: 0,
            hits: 0,
            misses: 0,
        }
    }

    /// Look up the cached response for `request`.
    ///
    /// A hit moves the entry to the most recently used position.
    pub fn lookup(&mut self, request: &[u8]) -> Option<Vec<u8>> {
        let stamp = self.bump();
        match self.entries.get_mut(request) {
            Some(entry) => {
                let key = self.order.remove(&entry.stamp);
                debug_assert!(key.is_some(), "cache order out of sync");
                if let Some(key) = key {
                    self.order.insert(stamp, key);
                }
                entry.stamp = stamp;
                self.hits += 1;
                tracing::debug!(hits = self.hits, "Cache hit");
                metrics::record_cache_lookup(true);
                Some(entry.response.clone())
            }
            None => {
                self.misses += 1;
                tracing::debug!(misses = self.misses, "Cache miss");
                metrics::record_cache_lookup(false);
                None
            }
        }
    }

    /// Store `response` as the answer to `request`.
    pub fn insert(&mut self, request: Vec<u8>, response: Vec<u8>) {
        if self.capacity == 0 {
            return;
        }

        let stamp = self.bump();

        if let Some(entry) = self.entries.get_mut(&request) {
            self.order.remove(&entry.stamp);
            entry.stamp = stamp;
            entry.response = response;
            self.order.insert(stamp, request);
            return;
        }

        if self.entries.len() >= self.capacity {
            self.evict_oldest();
        }

        tracing::debug!(
            request = %String::from_utf8_lossy(&request[..request.len().min(50)]),
            "Added to cache"
        );
        self.order.insert(stamp, request.clone());
        self.entries.insert(request, Entry { response, stamp });
        metrics::record_cache_size(self.entries.len());
    }

    /// Whether `request` is cached. Does not touch recency or counters.
    pub fn contains(&self, request: &[u8]) -> bool {
        self.entries.contains_key(request)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits,
            misses: self.misses,
            len: self.entries.len(),
            capacity: self.capacity,
        }
    }

    fn bump(&mut self) -> u64 {
        let stamp = self.next_stamp;
        self.next_stamp += 1;
        stamp
    }

    fn evict_oldest(&mut self) {
        if let Some((_, key)) = self.order.pop_first() {
            self.entries.remove(&key);
            tracing::trace!(len = self.entries.len(), "Evicted oldest cache entry");
        }
    }
}
