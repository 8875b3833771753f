//! Cache Store Module
//!
//! Entry table combining HashMap storage with LRU tracking, TTL checks against
//! an injected time, and tag/prefix invalidation.

use std::collections::HashMap;

use crate::cache::{CacheEntry, CacheStats, LruTracker};

/// Pattern that clears the whole table.
pub const INVALIDATE_ALL: &str = "*";

// == Cache Store ==
/// Entry table with LRU eviction and TTL support.
///
/// The store never reads a clock: every freshness check takes `now_ms` from
/// the caller so tests can drive time explicitly.
#[derive(Debug)]
pub struct CacheStore {
    entries: HashMap<String, CacheEntry>,
    lru: LruTracker,
    stats: CacheStats,
    /// Maximum number of entries allowed
    max_entries: usize,
}

impl CacheStore {
    // == Constructor ==
    /// Creates an empty store.
    ///
    /// # Arguments
    /// * `max_entries` - Capacity before least recently used entries are evicted (at least 1)
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: HashMap::new(),
            lru: LruTracker::new(),
            stats: CacheStats::new(),
            max_entries: max_entries.max(1),
        }
    }

    // == Lookup ==
    /// Returns a clone of the entry if it is still fresh at `now_ms`.
    ///
    /// Counts a hit or a miss. A stale entry is dropped and counts as a miss.
    pub fn lookup(&mut self, key: &str, now_ms: u64) -> Option<CacheEntry> {
        match self.entries.get(key) {
            Some(entry) if !entry.is_expired_at(now_ms) => {
                let entry = entry.clone();
                self.stats.hits += 1;
                self.lru.touch(key);
                Some(entry)
            }
            Some(_) => {
                self.remove(key);
                self.stats.misses += 1;
                None
            }
            None => {
                self.stats.misses += 1;
                None
            }
        }
    }

    /// Fresh entry without touching stats or recency.
    pub fn peek_fresh(&self, key: &str, now_ms: u64) -> Option<&CacheEntry> {
        self.entries.get(key).filter(|entry| !entry.is_expired_at(now_ms))
    }

    /// Entry as stored, fresh or not.
    pub fn peek(&self, key: &str) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    // == Insert ==
    /// Stores `entry` under its key, replacing any previous value.
    ///
    /// If the store is at capacity and the key is new, the least recently
    /// used entry is evicted first. Returns the replaced entry.
    pub fn insert(&mut self, entry: CacheEntry) -> Option<CacheEntry> {
        let key = entry.key.clone();

        if !self.entries.contains_key(&key) {
            while self.entries.len() >= self.max_entries {
                let Some(evicted) = self.lru.evict_oldest() else {
                    break;
                };
                self.entries.remove(&evicted);
                self.stats.evictions += 1;
            }
        }

        self.lru.touch(&key);
        self.entries.insert(key, entry)
    }

    /// Stores `entry` without evicting anything, even past capacity.
    ///
    /// Used for optimistic patches and their rollbacks, which must not push
    /// out entries they cannot put back. The next regular insert trims the
    /// store to size.
    pub fn insert_without_eviction(&mut self, entry: CacheEntry) -> Option<CacheEntry> {
        let key = entry.key.clone();
        self.lru.touch(&key);
        self.entries.insert(key, entry)
    }

    // == Remove ==
    pub fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let removed = self.entries.remove(key);
        if removed.is_some() {
            self.lru.remove(key);
        }
        removed
    }

    /// Puts `key` back to a captured value: the entry itself, or absent.
    pub fn restore(&mut self, key: &str, previous: Option<CacheEntry>) {
        match previous {
            Some(entry) if entry.key == key => {
                self.insert_without_eviction(entry);
            }
            Some(entry) => {
                self.insert_without_eviction(CacheEntry {
                    key: key.to_string(),
                    ..entry
                });
            }
            None => {
                self.remove(key);
            }
        }
    }

    // == Invalidate ==
    /// Removes every entry matching `pattern` and returns how many went.
    ///
    /// A pattern matches an entry carrying it as a resource tag (`Product-123`
    /// or the type tag `Product`), or whose operation name starts with it.
    /// Keys are digests and never match. `*` clears the store. An empty
    /// pattern matches nothing.
    pub fn invalidate(&mut self, pattern: &str) -> usize {
        if pattern.is_empty() {
            return 0;
        }

        let doomed: Vec<String> = if pattern == INVALIDATE_ALL {
            self.entries.keys().cloned().collect()
        } else {
            self.entries
                .values()
                .filter(|entry| entry.matches(pattern))
                .map(|entry| entry.key.clone())
                .collect()
        };

        for key in &doomed {
            self.remove(key);
        }
        self.stats.invalidations += doomed.len() as u64;
        doomed.len()
    }

    // == Cleanup Expired ==
    /// Removes all entries stale at `now_ms`.
    ///
    /// Returns the number of entries removed.
    pub fn cleanup_expired(&mut self, now_ms: u64) -> usize {
        let expired_keys: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired_at(now_ms))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired_keys {
            self.remove(key);
        }
        expired_keys.len()
    }

    pub fn record_uncacheable(&mut self) {
        self.stats.uncacheable += 1;
    }

    pub fn record_coalesced(&mut self) {
        self.stats.coalesced += 1;
    }

    // == Stats ==
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            total_entries: self.entries.len(),
            ..self.stats.clone()
        }
    }

    pub fn entries(&self) -> impl Iterator<Item = &CacheEntry> {
        self.entries.values()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.lru.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
