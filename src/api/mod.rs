//! API Module
//!
//! HTTP handlers and routing for the dashboard surface.
//!
//! # Endpoints
//! - `POST /query` - Run a document through the response cache
//! - `DELETE /cache/:pattern` - Invalidate cached responses
//! - `GET /quota` - Current quota state
//! - `GET /usage` - Bucketed usage history
//! - `GET /stats` - Cache statistics
//! - `GET /health` - Health check endpoint

pub mod handlers;
pub mod routes;

pub use handlers::*;
pub use routes::create_router;
