//! API Routes
//!
//! Configures the Axum router with all dashboard endpoints.

use axum::{
    routing::{delete, get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::handlers::{
    health_handler, invalidate_handler, query_handler, quota_handler, stats_handler, usage_handler,
    AppState,
};

/// Creates the main router with all endpoints configured.
///
/// # Endpoints
/// - `POST /query` - Run a document through the cache
/// - `DELETE /cache/:pattern` - Invalidate by tag, type, operation name or `*`
/// - `GET /quota` - Current quota state
/// - `GET /usage?window_ms=` - Bucketed usage history
/// - `GET /stats` - Cache statistics
/// - `GET /health` - Health check endpoint
///
/// # Middleware
/// - CORS: Allows any origin (configurable for production)
/// - Tracing: Logs all requests for debugging
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/query", post(query_handler))
        .route("/cache/:pattern", delete(invalidate_handler))
        .route("/quota", get(quota_handler))
        .route("/usage", get(usage_handler))
        .route("/stats", get(stats_handler))
        .route("/health", get(health_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
    };
    use serde_json::{json, Value};
    use tower::util::ServiceExt;

    use crate::client::ApiClient;
    use crate::config::Config;
    use crate::testing::{self, ScriptedTransport};

    fn create_test_app(transport: &ScriptedTransport) -> Router {
        let client = ApiClient::new(Config::default(), Arc::new(transport.clone()));
        create_router(AppState::new(client))
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let app = create_test_app(&ScriptedTransport::new());

        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_query_endpoint() {
        let transport = ScriptedTransport::new().respond(testing::data(json!({"shop": {"name": "Demo"}})));
        let app = create_test_app(&transport);

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/query")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"query":"query GetShop { shop { name } }"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["data"]["shop"]["name"], "Demo");
        assert_eq!(json["from_cache"], false);
    }

    #[tokio::test]
    async fn test_query_endpoint_surfaces_security_rejection() {
        let transport = ScriptedTransport::new().respond(testing::status(430));
        let app = create_test_app(&transport);

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/query")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"query":"{ shop { name } }"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let json = body_json(response).await;
        assert_eq!(json["kind"], "security_rejection");
    }

    #[tokio::test]
    async fn test_invalidate_endpoint() {
        let app = create_test_app(&ScriptedTransport::new());

        let response = app
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/cache/Product-123")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["pattern"], "Product-123");
    }

    #[tokio::test]
    async fn test_usage_endpoint_with_window() {
        let app = create_test_app(&ScriptedTransport::new());

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/usage?window_ms=60000")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["window_ms"], 60000);
        assert_eq!(json["buckets"], json!([]));
    }

    #[tokio::test]
    async fn test_quota_and_stats_endpoints() {
        for uri in ["/quota", "/stats"] {
            let app = create_test_app(&ScriptedTransport::new());
            let response = app
                .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK, "{}", uri);
        }
    }
}
