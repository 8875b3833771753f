//! Request DTOs for the dashboard API
//!
//! Defines the structure of incoming HTTP request bodies and query strings.

use serde::Deserialize;
use serde_json::Value;

use crate::cache::QueryOptions;

/// Default bucket size for `GET /usage`: one hour.
pub const DEFAULT_USAGE_WINDOW_MS: u64 = 3_600_000;

/// Request body for `POST /query`
///
/// # Fields
/// - `query`: GraphQL document, forwarded as is
/// - `variables`: Operation variables (default: `{}`)
/// - `options`: Cache behaviour for this call
#[derive(Debug, Clone, Deserialize)]
pub struct QueryRequest {
    pub query: String,
    #[serde(default)]
    pub variables: Value,
    #[serde(default)]
    pub options: QueryOptions,
}

impl QueryRequest {
    /// Validates the request data
    ///
    /// Returns an error message if validation fails, None if valid.
    pub fn validate(&self) -> Option<String> {
        if self.query.trim().is_empty() {
            return Some("Query document cannot be empty".to_string());
        }
        if !(self.variables.is_null() || self.variables.is_object()) {
            return Some("Variables must be a JSON object".to_string());
        }
        None
    }
}

/// Query string for `GET /usage`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UsageParams {
    pub window_ms: Option<u64>,
}

impl UsageParams {
    pub fn window(&self) -> u64 {
        self.window_ms.unwrap_or(DEFAULT_USAGE_WINDOW_MS)
    }
}
