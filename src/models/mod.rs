//! Models
//!
//! GraphQL wire types exchanged with the upstream API, and the DTOs used by
//! the dashboard HTTP surface.

pub mod graphql;
pub mod requests;
pub mod responses;

// Re-export commonly used types
pub use graphql::{
    operation_name, CostReport, GraphqlErrorBody, GraphqlRequest, GraphqlResponse, ThrottleStatus,
};
pub use requests::{QueryRequest, UsageParams, DEFAULT_USAGE_WINDOW_MS};
pub use responses::{
    ErrorResponse, HealthResponse, InvalidateResponse, QueryResponse, QuotaResponse, StatsResponse,
    UsageResponse,
};
