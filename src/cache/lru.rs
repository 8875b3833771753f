//! LRU Tracker Module
//!
//! Access-order bookkeeping for capacity eviction.

use std::collections::{BTreeMap, HashMap};

// == LRU Tracker ==
/// Orders keys by a monotonically increasing access tick.
///
/// The smallest tick is the least recently used key. Touch, remove and evict
/// are all logarithmic.
#[derive(Debug, Default)]
pub struct LruTracker {
    next_tick: u64,
    by_tick: BTreeMap<u64, String>,
    ticks: HashMap<String, u64>,
}

impl LruTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `key` as the most recently used.
    pub fn touch(&mut self, key: &str) {
        if let Some(old) = self.ticks.get(key).copied() {
            self.by_tick.remove(&old);
        }
        let tick = self.next_tick;
        self.next_tick += 1;
        self.by_tick.insert(tick, key.to_string());
        self.ticks.insert(key.to_string(), tick);
    }

    pub fn remove(&mut self, key: &str) {
        if let Some(tick) = self.ticks.remove(key) {
            self.by_tick.remove(&tick);
        }
    }

    /// Removes and returns the least recently used key.
    pub fn evict_oldest(&mut self) -> Option<String> {
        let (_, key) = self.by_tick.pop_first()?;
        self.ticks.remove(&key);
        Some(key)
    }

    pub fn clear(&mut self) {
        self.by_tick.clear();
        self.ticks.clear();
    }

    pub fn len(&self) -> usize {
        self.ticks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ticks.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.ticks.contains_key(key)
    }
}
