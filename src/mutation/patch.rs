//! Optimistic Patch
//!
//! The cache writes an optimistic mutation made, each with the value it
//! replaced. Rolling back is a pure replay of the captured values.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cache::{CacheCategory, CacheEntry, CacheStore};

// == Cache Write ==
/// One value a mutation wants to place in the cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheWrite {
    pub key: String,
    pub data: Value,
    /// Defaults to the category of the entry being replaced, or `STANDARD`
    #[serde(default)]
    pub category: Option<CacheCategory>,
}

impl CacheWrite {
    pub fn new(key: impl Into<String>, data: Value) -> Self {
        Self {
            key: key.into(),
            data,
            category: None,
        }
    }

    pub fn category(mut self, category: CacheCategory) -> Self {
        self.category = Some(category);
        self
    }
}

// == Patch ==
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchOp {
    pub key: String,
    /// The entry before the mutation touched the key; `None` means absent
    pub previous: Option<CacheEntry>,
    pub next: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Patch {
    ops: Vec<PatchOp>,
}

impl Patch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `key` now holds `next`.
    ///
    /// Only the first capture of a key keeps its `previous` value, so a patch
    /// that writes one key twice still rolls back to the pre-mutation state.
    pub fn capture(&mut self, key: &str, previous: Option<CacheEntry>, next: Value) {
        match self.ops.iter_mut().find(|op| op.key == key) {
            Some(op) => op.next = next,
            None => self.ops.push(PatchOp {
                key: key.to_string(),
                previous,
                next,
            }),
        }
    }

    /// Restores every captured key, newest first.
    pub fn revert(&self, store: &mut CacheStore) {
        for op in self.ops.iter().rev() {
            store.restore(&op.key, op.previous.clone());
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.ops.iter().map(|op| op.key.as_str())
    }

    pub fn ops(&self) -> &[PatchOp] {
        &self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}
