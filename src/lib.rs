//! gqlgate - Rate-limit aware GraphQL client layer
//!
//! Mediates between application code and a cost-metered GraphQL API:
//! leaky-bucket admission and retries, a TTL and PII aware response cache,
//! and optimistic mutations with exact rollback.

pub mod api;
pub mod cache;
pub mod client;
pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod executor;
pub mod models;
pub mod mutation;
pub mod persist;
pub mod tasks;
pub mod throttle;
pub mod usage;

#[cfg(test)]
mod testing;

pub use api::AppState;
pub use cache::{CacheCategory, QueryOptions, QueryResult};
pub use client::ApiClient;
pub use config::Config;
pub use error::{ApiError, Result};
pub use events::ClientEvent;
pub use mutation::{CacheWrite, MutationKind, MutationOperation, MutationState, Resolution};
pub use tasks::spawn_cleanup_task;
