//! Response DTOs for the dashboard API
//!
//! Defines the structure of outgoing HTTP response bodies.

use chrono::{TimeZone, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::cache::{CacheStats, QueryResult};
use crate::throttle::QuotaState;
use crate::usage::UsageBucket;

/// Renders Unix milliseconds as RFC 3339, or an empty string if out of range.
fn rfc3339(ms: u64) -> String {
    Utc.timestamp_millis_opt(ms as i64)
        .single()
        .map(|t| t.to_rfc3339())
        .unwrap_or_default()
}

/// Response body for `POST /query`
#[derive(Debug, Clone, Serialize)]
pub struct QueryResponse {
    pub data: Value,
    pub from_cache: bool,
    pub last_fetched: u64,
    pub last_fetched_at: String,
}

impl From<QueryResult<Value>> for QueryResponse {
    fn from(result: QueryResult<Value>) -> Self {
        Self {
            last_fetched_at: rfc3339(result.last_fetched),
            data: result.data,
            from_cache: result.from_cache,
            last_fetched: result.last_fetched,
        }
    }
}

/// Response body for `DELETE /cache/:pattern`
#[derive(Debug, Clone, Serialize)]
pub struct InvalidateResponse {
    pub message: String,
    pub pattern: String,
    pub removed: usize,
}

impl InvalidateResponse {
    pub fn new(pattern: impl Into<String>, removed: usize) -> Self {
        let pattern = pattern.into();
        Self {
            message: format!("Invalidated {} entries matching '{}'", removed, pattern),
            pattern,
            removed,
        }
    }
}

/// Response body for `GET /quota`
#[derive(Debug, Clone, Serialize)]
pub struct QuotaResponse {
    pub maximum_available: f64,
    pub currently_available: f64,
    pub restore_rate: Option<f64>,
    /// Fraction of the bucket in use, 0.0 to 1.0
    pub used_fraction: f64,
    pub last_updated: String,
}

impl From<QuotaState> for QuotaResponse {
    fn from(state: QuotaState) -> Self {
        let used_fraction = if state.maximum_available > 0.0 {
            1.0 - state.currently_available / state.maximum_available
        } else {
            0.0
        };
        Self {
            maximum_available: state.maximum_available,
            currently_available: state.currently_available,
            restore_rate: state.restore_rate,
            used_fraction,
            last_updated: rfc3339(state.last_updated),
        }
    }
}

/// Response body for `GET /usage`
#[derive(Debug, Clone, Serialize)]
pub struct UsageResponse {
    pub window_ms: u64,
    pub buckets: Vec<UsageBucket>,
}

/// Response body for the stats endpoint (GET /stats)
#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    /// Number of cache hits
    pub hits: u64,
    /// Number of cache misses
    pub misses: u64,
    /// Number of evictions
    pub evictions: u64,
    pub invalidations: u64,
    pub uncacheable: u64,
    pub coalesced: u64,
    /// Current number of entries in cache
    pub total_entries: usize,
    /// Hit rate (hits / (hits + misses))
    pub hit_rate: f64,
    pub pending_mutations: usize,
}

impl StatsResponse {
    pub fn new(stats: CacheStats, pending_mutations: usize) -> Self {
        Self {
            hit_rate: stats.hit_rate(),
            hits: stats.hits,
            misses: stats.misses,
            evictions: stats.evictions,
            invalidations: stats.invalidations,
            uncacheable: stats.uncacheable,
            coalesced: stats.coalesced,
            total_entries: stats.total_entries,
            pending_mutations,
        }
    }
}

/// Response body for the health endpoint (GET /health)
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Health status (e.g., "healthy")
    pub status: String,
    /// Current timestamp in ISO 8601 format
    pub timestamp: String,
}

impl HealthResponse {
    /// Creates a new HealthResponse with current timestamp
    pub fn healthy() -> Self {
        Self {
            status: "healthy".to_string(),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

/// Error response body for request validation failures
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    /// Error message describing what went wrong
    pub error: String,
}

impl ErrorResponse {
    /// Creates a new ErrorResponse
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}
