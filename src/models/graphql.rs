//! GraphQL wire types
//!
//! Request and response envelopes exchanged with the upstream API, plus the
//! cost extension the API attaches to every response.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outbound request body. The document is an opaque string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphqlRequest {
    pub query: String,
    #[serde(default)]
    pub variables: Value,
}

impl GraphqlRequest {
    pub fn new(query: impl Into<String>, variables: Value) -> Self {
        Self {
            query: query.into(),
            variables,
        }
    }

    /// Name from the operation header (`query GetProduct(...)`), or `anonymous`.
    ///
    /// Only the first two tokens are looked at; the document is never parsed.
    pub fn operation_name(&self) -> String {
        operation_name(&self.query).unwrap_or("anonymous").to_string()
    }
}

/// Name from a `query Name` / `mutation Name` header, `None` for shorthand documents.
pub fn operation_name(document: &str) -> Option<&str> {
    let mut tokens = document
        .split(|c: char| c.is_whitespace() || c == '(' || c == '{')
        .filter(|t| !t.is_empty());

    match (tokens.next(), tokens.next()) {
        (Some("query" | "mutation" | "subscription"), Some(name)) => Some(name),
        _ => None,
    }
}

/// Standard GraphQL response envelope.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphqlResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<GraphqlErrorBody>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Value>,
}

impl GraphqlResponse {
    pub fn has_errors(&self) -> bool {
        self.errors.as_ref().is_some_and(|e| !e.is_empty())
    }

    /// Parses `extensions.cost`, if present and well formed.
    pub fn cost(&self) -> Option<CostReport> {
        let cost = self.extensions.as_ref()?.get("cost")?;
        serde_json::from_value(cost.clone()).ok()
    }

    /// Error codes found under `errors[].extensions.code`.
    pub fn error_codes(&self) -> impl Iterator<Item = &str> {
        self.errors
            .iter()
            .flatten()
            .filter_map(GraphqlErrorBody::code)
    }
}

/// One entry of the `errors` array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphqlErrorBody {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Value>,
}

impl GraphqlErrorBody {
    pub fn code(&self) -> Option<&str> {
        self.extensions.as_ref()?.get("code")?.as_str()
    }
}

/// `extensions.cost` as reported by a cost-metered API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CostReport {
    #[serde(default)]
    pub requested_query_cost: Option<f64>,
    #[serde(default)]
    pub actual_query_cost: Option<f64>,
    #[serde(default)]
    pub throttle_status: Option<ThrottleStatus>,
}

/// Authoritative bucket state reported by the server.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThrottleStatus {
    pub maximum_available: f64,
    pub currently_available: f64,
    pub restore_rate: f64,
}
