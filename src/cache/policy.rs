//! Cache Policy Module
//!
//! Category -> freshness policy lookup table.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Freshness class of a cached response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CacheCategory {
    /// Shop settings, locales, taxonomies
    Static,
    #[default]
    Standard,
    /// Inventory levels, prices
    Volatile,
    /// Order status and anything polled
    Realtime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CategoryPolicy {
    pub ttl: Duration,
}

/// Lookup table from category to policy.
#[derive(Debug, Clone, PartialEq)]
pub struct CachePolicies {
    table: HashMap<CacheCategory, CategoryPolicy>,
}

/// Used for a category that was removed from the table.
const FALLBACK_TTL: Duration = Duration::from_secs(300);

impl Default for CachePolicies {
    fn default() -> Self {
        let table = [
            (CacheCategory::Static, Duration::from_secs(86_400)),
            (CacheCategory::Standard, Duration::from_secs(300)),
            (CacheCategory::Volatile, Duration::from_secs(30)),
            (CacheCategory::Realtime, Duration::from_secs(5)),
        ]
        .into_iter()
        .map(|(category, ttl)| (category, CategoryPolicy { ttl }))
        .collect();

        Self { table }
    }
}

impl CachePolicies {
    pub fn ttl_for(&self, category: CacheCategory) -> Duration {
        self.table
            .get(&category)
            .map(|p| p.ttl)
            .unwrap_or(FALLBACK_TTL)
    }

    pub fn set_ttl(&mut self, category: CacheCategory, ttl: Duration) {
        self.table.insert(category, CategoryPolicy { ttl });
    }

    /// An explicit override always wins over the category default.
    pub fn resolve_ttl(&self, category: CacheCategory, ttl_override: Option<Duration>) -> Duration {
        ttl_override.unwrap_or_else(|| self.ttl_for(category))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_table() {
        let policies = CachePolicies::default();
        assert_eq!(policies.ttl_for(CacheCategory::Static), Duration::from_secs(86_400));
        assert_eq!(policies.ttl_for(CacheCategory::Realtime), Duration::from_secs(5));
    }

    #[test]
    fn test_override_wins() {
        let policies = CachePolicies::default();
        assert_eq!(
            policies.resolve_ttl(CacheCategory::Static, Some(Duration::from_millis(10))),
            Duration::from_millis(10)
        );
        assert_eq!(
            policies.resolve_ttl(CacheCategory::Volatile, None),
            Duration::from_secs(30)
        );
    }

    #[test]
    fn test_category_serde_names() {
        let json = serde_json::to_string(&CacheCategory::Realtime).unwrap();
        assert_eq!(json, "\"REALTIME\"");
        let parsed: CacheCategory = serde_json::from_str("\"STATIC\"").unwrap();
        assert_eq!(parsed, CacheCategory::Static);
    }
}
