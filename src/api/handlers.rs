//! API Handlers
//!
//! HTTP request handlers for each dashboard endpoint.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use crate::client::ApiClient;
use crate::models::{
    ErrorResponse, HealthResponse, InvalidateResponse, QueryRequest, QueryResponse, QuotaResponse,
    StatsResponse, UsageParams, UsageResponse,
};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub client: ApiClient,
}

impl AppState {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }
}

/// Handler for POST /query
///
/// Runs the document through the response cache.
pub async fn query_handler(
    State(state): State<AppState>,
    Json(req): Json<QueryRequest>,
) -> Result<Json<QueryResponse>, Response> {
    if let Some(error_msg) = req.validate() {
        return Err((StatusCode::BAD_REQUEST, Json(ErrorResponse::new(error_msg))).into_response());
    }

    let result = state
        .client
        .query_value(&req.query, req.variables, req.options)
        .await
        .map_err(IntoResponse::into_response)?;

    Ok(Json(QueryResponse::from(result)))
}

/// Handler for DELETE /cache/:pattern
///
/// Accepts a resource tag (`Product-123`), a type (`Product`), an operation-name prefix, or `*`.
pub async fn invalidate_handler(
    State(state): State<AppState>,
    Path(pattern): Path<String>,
) -> Json<InvalidateResponse> {
    let removed = state.client.invalidate(&pattern).await;
    Json(InvalidateResponse::new(pattern, removed))
}

/// Handler for GET /quota
pub async fn quota_handler(State(state): State<AppState>) -> Json<QuotaResponse> {
    Json(QuotaResponse::from(state.client.quota_status().await))
}

/// Handler for GET /usage?window_ms=
///
/// Returns the usage history bucketed into `window_ms` windows, oldest first.
pub async fn usage_handler(
    State(state): State<AppState>,
    Query(params): Query<UsageParams>,
) -> Json<UsageResponse> {
    let window_ms = params.window();
    Json(UsageResponse {
        window_ms,
        buckets: state.client.usage_summary(window_ms).await,
    })
}

/// Handler for GET /stats
pub async fn stats_handler(State(state): State<AppState>) -> Json<StatsResponse> {
    let stats = state.client.cache_stats().await;
    let pending = state.client.mutations().pending_count().await;
    Json(StatsResponse::new(stats, pending))
}

/// Handler for GET /health
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse::healthy())
}
