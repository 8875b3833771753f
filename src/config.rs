//! Configuration Module
//!
//! Handles loading and managing client configuration from environment variables.
//! A single `Config` value is built once and handed to every component constructor.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::cache::{CacheCategory, CachePolicies};
use crate::executor::RetryConfig;
use crate::usage::DEFAULT_HISTORY_CAPACITY;

/// Client configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Upstream GraphQL endpoint URL
    pub endpoint: String,
    /// Access token sent with every upstream request
    pub access_token: Option<String>,
    /// Header carrying the access token
    pub access_token_header: String,
    /// HTTP port of the dashboard surface
    pub server_port: u16,
    /// Bucket size assumed before the API reports one
    pub default_maximum_available: f64,
    /// Fraction of the bucket consumed at which `RateLimitApproaching` fires
    pub threshold_pct: f64,
    /// Category -> TTL lookup table
    pub cache_policies: CachePolicies,
    /// Resource type -> fields stripped before caching (`*` applies to every type)
    pub pii_fields: HashMap<String, Vec<String>>,
    /// Capacity of the usage history ring buffer
    pub history_capacity: usize,
    /// Maximum number of cached responses
    pub max_entries: usize,
    /// Background cleanup task interval in seconds
    pub cleanup_interval: u64,
    /// Overall deadline for one executor call
    pub request_timeout: Duration,
    /// Backoff for transport failures
    pub retry: RetryConfig,
    /// How many throttle events a single call absorbs before surfacing `Throttled`
    pub max_throttle_retries: usize,
    /// Cost assumed for admission when the caller gives no estimate
    pub default_estimated_cost: f64,
    /// GraphQL error codes that mean "throttled"
    pub throttle_codes: Vec<String>,
    /// Pending mutations older than this are failed with a timeout
    pub mutation_timeout: Duration,
    /// Where cache and usage history are persisted, if anywhere
    pub snapshot_path: Option<PathBuf>,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `GRAPHQL_ENDPOINT` - Upstream endpoint (default: http://localhost:4000/graphql)
    /// - `GRAPHQL_ACCESS_TOKEN` - Access token (default: none)
    /// - `ACCESS_TOKEN_HEADER` - Header name for the token (default: X-Access-Token)
    /// - `SERVER_PORT` - Dashboard HTTP port (default: 3000)
    /// - `QUOTA_MAX_AVAILABLE` - Assumed bucket size (default: 1000)
    /// - `QUOTA_THRESHOLD_PCT` - Approaching-limit fraction (default: 0.8)
    /// - `CACHE_TTL_{STATIC,STANDARD,VOLATILE,REALTIME}_SECS` - Category TTLs
    /// - `PII_FIELDS` - `Type:field,field;*:field` (default: empty)
    /// - `USAGE_HISTORY_CAPACITY` - Usage ring buffer size (default: 1000)
    /// - `MAX_ENTRIES` - Maximum cache entries (default: 1000)
    /// - `CLEANUP_INTERVAL` - Cleanup frequency in seconds (default: 1)
    /// - `REQUEST_TIMEOUT_MS` - Overall call deadline (default: 30000)
    /// - `RETRY_MAX_ATTEMPTS`, `RETRY_BASE_DELAY_MS`, `RETRY_MAX_DELAY_MS` - Backoff
    /// - `MAX_THROTTLE_RETRIES` - Throttle retries per call (default: 5)
    /// - `DEFAULT_ESTIMATED_COST` - Admission estimate (default: 10)
    /// - `THROTTLE_CODES` - Comma separated codes (default: THROTTLED,MAX_COST_EXCEEDED)
    /// - `MUTATION_TIMEOUT_MS` - Pending mutation deadline (default: 60000)
    /// - `SNAPSHOT_PATH` - JSON persistence file (default: disabled)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let mut cache_policies = defaults.cache_policies.clone();
        for (category, var) in [
            (CacheCategory::Static, "CACHE_TTL_STATIC_SECS"),
            (CacheCategory::Standard, "CACHE_TTL_STANDARD_SECS"),
            (CacheCategory::Volatile, "CACHE_TTL_VOLATILE_SECS"),
            (CacheCategory::Realtime, "CACHE_TTL_REALTIME_SECS"),
        ] {
            if let Some(secs) = env_parse::<u64>(var) {
                cache_policies.set_ttl(category, Duration::from_secs(secs));
            }
        }

        let retry = RetryConfig::default()
            .max_attempts(env_parse("RETRY_MAX_ATTEMPTS").unwrap_or(defaults.retry.max_attempts))
            .base_delay(
                env_parse("RETRY_BASE_DELAY_MS")
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.retry.base_delay),
            )
            .max_delay(
                env_parse("RETRY_MAX_DELAY_MS")
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.retry.max_delay),
            );

        Self {
            endpoint: env::var("GRAPHQL_ENDPOINT").unwrap_or(defaults.endpoint),
            access_token: env::var("GRAPHQL_ACCESS_TOKEN").ok().filter(|t| !t.is_empty()),
            access_token_header: env::var("ACCESS_TOKEN_HEADER")
                .unwrap_or(defaults.access_token_header),
            server_port: env_parse("SERVER_PORT").unwrap_or(defaults.server_port),
            default_maximum_available: env_parse("QUOTA_MAX_AVAILABLE")
                .unwrap_or(defaults.default_maximum_available),
            threshold_pct: env_parse("QUOTA_THRESHOLD_PCT").unwrap_or(defaults.threshold_pct),
            cache_policies,
            pii_fields: env::var("PII_FIELDS")
                .map(|v| parse_pii_fields(&v))
                .unwrap_or_default(),
            history_capacity: env_parse("USAGE_HISTORY_CAPACITY")
                .unwrap_or(defaults.history_capacity),
            max_entries: env_parse("MAX_ENTRIES").unwrap_or(defaults.max_entries),
            cleanup_interval: env_parse("CLEANUP_INTERVAL").unwrap_or(defaults.cleanup_interval),
            request_timeout: env_parse("REQUEST_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.request_timeout),
            retry,
            max_throttle_retries: env_parse("MAX_THROTTLE_RETRIES")
                .unwrap_or(defaults.max_throttle_retries),
            default_estimated_cost: env_parse("DEFAULT_ESTIMATED_COST")
                .unwrap_or(defaults.default_estimated_cost),
            throttle_codes: env::var("THROTTLE_CODES")
                .map(|v| {
                    v.split(',')
                        .map(|c| c.trim().to_string())
                        .filter(|c| !c.is_empty())
                        .collect()
                })
                .unwrap_or(defaults.throttle_codes),
            mutation_timeout: env_parse("MUTATION_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.mutation_timeout),
            snapshot_path: env::var("SNAPSHOT_PATH").ok().map(PathBuf::from),
        }
    }

    /// Adds PII fields for a resource type. Builder style, mostly for tests and embedding.
    pub fn with_pii_fields(mut self, resource_type: &str, fields: &[&str]) -> Self {
        self.pii_fields
            .entry(resource_type.to_string())
            .or_default()
            .extend(fields.iter().map(|f| f.to_string()));
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:4000/graphql".to_string(),
            access_token: None,
            access_token_header: "X-Access-Token".to_string(),
            server_port: 3000,
            default_maximum_available: 1000.0,
            threshold_pct: 0.8,
            cache_policies: CachePolicies::default(),
            pii_fields: HashMap::new(),
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            max_entries: 1000,
            cleanup_interval: 1,
            request_timeout: Duration::from_secs(30),
            retry: RetryConfig::default(),
            max_throttle_retries: 5,
            default_estimated_cost: 10.0,
            throttle_codes: vec!["THROTTLED".to_string(), "MAX_COST_EXCEEDED".to_string()],
            mutation_timeout: Duration::from_secs(60),
            snapshot_path: None,
        }
    }
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

/// Parses `Customer:email,phone;*:password` into a per-type field table.
fn parse_pii_fields(raw: &str) -> HashMap<String, Vec<String>> {
    let mut table: HashMap<String, Vec<String>> = HashMap::new();
    for group in raw.split(';') {
        let Some((resource_type, fields)) = group.split_once(':') else {
            continue;
        };
        let resource_type = resource_type.trim();
        if resource_type.is_empty() {
            continue;
        }
        table.entry(resource_type.to_string()).or_default().extend(
            fields
                .split(',')
                .map(|f| f.trim().to_string())
                .filter(|f| !f.is_empty()),
        );
    }
    table
}
