//! Cache Module
//!
//! Content-addressed response cache with category TTLs, PII sanitization,
//! LRU eviction and resource-tag invalidation.

mod entry;
mod key;
mod lru;
mod policy;
mod response_cache;
mod sanitize;
mod stats;
mod store;


// Re-export public types
pub use entry::{collect_resource_tags, resource_tag, CacheEntry};
pub use key::cache_key;
pub use lru::LruTracker;
pub use policy::{CacheCategory, CachePolicies, CategoryPolicy};
pub use response_cache::{QueryOptions, QueryResult, ResponseCache};
pub use sanitize::{Sanitizer, MAX_SANITIZE_DEPTH, WILDCARD};
pub use stats::CacheStats;
pub use store::{CacheStore, INVALIDATE_ALL};
