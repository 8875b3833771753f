//! Executor Module
//!
//! Rate-limit aware request execution against the upstream GraphQL API.
//!
//! # Outcome handling
//! - transport failure / HTTP 5xx: exponential backoff with jitter, then `Network`
//! - HTTP 200 with errors, not throttled: `GraphqlValidation`, never retried
//! - throttled (cost extension first, error code second, or HTTP 429): wait, retry
//! - HTTP 430: `SecurityRejection`, never retried
//! - success: quota updated from the cost extension, payload returned

mod classify;
mod request;
mod retry;
mod transport;

pub use classify::SECURITY_REJECTION_STATUS;
pub use request::{ExecutorSettings, RequestExecutor};
pub use retry::RetryConfig;
pub use transport::{HttpTransport, Transport, TransportError, TransportResponse};
