//! Error types for the GraphQL client layer
//!
//! Provides unified error handling using thiserror.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;

use crate::models::GraphqlErrorBody;
use crate::throttle::QuotaState;

// == Api Error Enum ==
/// Errors surfaced to callers of the executor, the cache and the mutation coordinator.
///
/// Transport failures and throttle events are absorbed by the executor's retry
/// loop and only show up here once retries are exhausted.
#[derive(Error, Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ApiError {
    /// Transport kept failing after all backoff attempts
    #[error("Network error after {attempts} attempt(s): {message}")]
    Network { message: String, attempts: usize },

    /// Throttle retries exhausted, or the cost can never fit in the bucket
    #[error("Throttled: {message}")]
    Throttled {
        message: String,
        status: Option<QuotaState>,
    },

    /// The API rejected the document or its variables. Deterministic, never retried.
    #[error("GraphQL validation error: {}", first_message(.errors))]
    GraphqlValidation {
        errors: Vec<GraphqlErrorBody>,
        data: Option<Value>,
    },

    /// HTTP 430 or another security-layer refusal. Never retried.
    #[error("Request rejected by API security layer (HTTP {status})")]
    SecurityRejection { status: u16, body: Option<Value> },

    /// The call's overall deadline elapsed
    #[error("Request timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    /// Any other non-success HTTP status
    #[error("Unexpected HTTP status {status}")]
    HttpStatus { status: u16, body: Option<Value> },

    /// Response data did not match the type the caller asked for
    #[error("Failed to decode response data: {message}")]
    Decode { message: String },
}

impl ApiError {
    /// Short machine-readable name of the error class.
    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::Network { .. } => "network",
            ApiError::Throttled { .. } => "throttled",
            ApiError::GraphqlValidation { .. } => "graphql_validation",
            ApiError::SecurityRejection { .. } => "security_rejection",
            ApiError::Timeout { .. } => "timeout",
            ApiError::HttpStatus { .. } => "http_status",
            ApiError::Decode { .. } => "decode",
        }
    }
}

fn first_message(errors: &[GraphqlErrorBody]) -> String {
    match errors {
        [] => "no error details".to_string(),
        [only] => only.message.clone(),
        [first, rest @ ..] => format!("{} (+{} more)", first.message, rest.len()),
    }
}

// == IntoResponse Implementation ==
impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Network { .. } => StatusCode::BAD_GATEWAY,
            ApiError::Throttled { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::GraphqlValidation { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::SecurityRejection { .. } => StatusCode::FORBIDDEN,
            ApiError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            ApiError::HttpStatus { .. } => StatusCode::BAD_GATEWAY,
            ApiError::Decode { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({
            "error": self.to_string(),
            "kind": self.kind(),
            "details": serde_json::to_value(&self).unwrap_or(Value::Null),
        }));

        (status, body).into_response()
    }
}

// == Cache Sanitization Error ==
/// Raised when a payload cannot be proven free of PII fields.
///
/// Internal to the cache: the payload is served live and never stored.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheSanitizationError {
    #[error("Unrecognized payload shape: expected an object, found {0}")]
    UnrecognizedShape(&'static str),

    #[error("Payload nesting exceeds {0} levels")]
    TooDeep(usize),
}

// == Persist Error ==
/// Failure reading or writing the JSON snapshot.
#[derive(Error, Debug)]
pub enum PersistError {
    #[error("Snapshot I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Snapshot is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

// == Result Type Alias ==
/// Convenience Result type for client operations.
pub type Result<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn error_body(message: &str) -> GraphqlErrorBody {
        GraphqlErrorBody {
            message: message.to_string(),
            path: None,
            extensions: None,
        }
    }

    #[test]
    fn test_validation_display_lists_first_message() {
        let err = ApiError::GraphqlValidation {
            errors: vec![error_body("Field 'titel' doesn't exist"), error_body("x")],
            data: None,
        };
        assert_eq!(
            err.to_string(),
            "GraphQL validation error: Field 'titel' doesn't exist (+1 more)"
        );
    }

    #[test]
    fn test_serialized_error_carries_kind_and_payload() {
        let err = ApiError::GraphqlValidation {
            errors: vec![error_body("bad input")],
            data: None,
        };
        let value = serde_json::to_value(&err).unwrap();
        assert_eq!(value["kind"], "graphql_validation");
        assert_eq!(value["errors"][0]["message"], "bad input");
    }

    #[test]
    fn test_into_response_status() {
        let response = ApiError::Timeout { elapsed_ms: 10 }.into_response();
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);

        let response = ApiError::SecurityRejection {
            status: 430,
            body: None,
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }
}
