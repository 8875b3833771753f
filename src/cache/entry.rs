//! Cache Entry Module
//!
//! A sanitized response payload with its freshness window and resource tags.

use std::collections::BTreeSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cache::CacheCategory;

// == Cache Entry ==
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub key: String,
    /// Payload with PII fields already stripped
    pub data: Value,
    pub category: CacheCategory,
    /// Unix milliseconds at which the payload was stored
    pub stored_at: u64,
    pub ttl_ms: u64,
    /// `Type` and `Type-id` tags used by pattern invalidation
    #[serde(default)]
    pub tags: BTreeSet<String>,
    /// Operation name of the document that produced the entry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
}

impl CacheEntry {
    // == Constructor ==
    pub fn new(
        key: impl Into<String>,
        data: Value,
        category: CacheCategory,
        ttl: Duration,
        stored_at: u64,
        tags: BTreeSet<String>,
    ) -> Self {
        Self {
            key: key.into(),
            data,
            category,
            stored_at,
            ttl_ms: ttl.as_millis() as u64,
            tags,
            operation: None,
        }
    }

    pub fn with_operation(mut self, operation: Option<&str>) -> Self {
        self.operation = operation.map(str::to_string);
        self
    }

    // == Matches ==
    /// True if `pattern` is one of the entry's tags or a prefix of its operation name.
    pub fn matches(&self, pattern: &str) -> bool {
        !pattern.is_empty()
            && (self.tags.contains(pattern)
                || self
                    .operation
                    .as_deref()
                    .is_some_and(|op| op.starts_with(pattern)))
    }

    pub fn expires_at(&self) -> u64 {
        self.stored_at.saturating_add(self.ttl_ms)
    }

    // == Is Expired ==
    /// Stale once `now >= stored_at + ttl`.
    pub fn is_expired_at(&self, now_ms: u64) -> bool {
        now_ms >= self.expires_at()
    }

    /// Milliseconds until the entry goes stale, 0 once it has.
    pub fn ttl_remaining_ms(&self, now_ms: u64) -> u64 {
        self.expires_at().saturating_sub(now_ms)
    }
}

// == Resource Tags ==
/// Tag for one resource instance, e.g. `Product-123`.
///
/// Global ids such as `gid://shopify/Product/123` are reduced to their last segment.
pub fn resource_tag(resource_type: &str, id: &str) -> String {
    let short_id = id.rsplit('/').next().unwrap_or(id);
    format!("{}-{}", resource_type, short_id)
}

/// Collects `Type` and `Type-id` tags from every object carrying `__typename` and `id`.
pub fn collect_resource_tags(value: &Value, tags: &mut BTreeSet<String>) {
    match value {
        Value::Object(map) => {
            if let Some(type_name) = map.get("__typename").and_then(Value::as_str) {
                tags.insert(type_name.to_string());
                let id = match map.get("id") {
                    Some(Value::String(s)) => Some(s.clone()),
                    Some(Value::Number(n)) => Some(n.to_string()),
                    _ => None,
                };
                if let Some(id) = id {
                    tags.insert(resource_tag(type_name, &id));
                }
            }
            for child in map.values() {
                collect_resource_tags(child, tags);
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_resource_tags(item, tags);
            }
        }
        _ => {}
    }
}
