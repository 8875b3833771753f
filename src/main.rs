//! gqlgate - Dashboard server for the GraphQL client layer
//!
//! Serves query, invalidation, quota and usage endpoints over one shared
//! client, persisting the cache and usage history across restarts.

use std::net::SocketAddr;

use anyhow::Context;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gqlgate::api::create_router;
use gqlgate::{spawn_cleanup_task, ApiClient, AppState, ClientEvent, Config};

/// Main entry point for the gqlgate server.
///
/// # Startup Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load configuration from environment variables
/// 3. Build the client over an HTTP transport
/// 4. Restore the snapshot, if one is configured
/// 5. Start background cleanup and event logging tasks
/// 6. Serve the router until SIGINT/SIGTERM
/// 7. Save the snapshot
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gqlgate=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting gqlgate");

    let config = Config::from_env();
    info!(
        "Configuration loaded: endpoint={}, max_entries={}, port={}, cleanup_interval={}s",
        config.endpoint, config.max_entries, config.server_port, config.cleanup_interval
    );

    let client = ApiClient::from_config(config.clone());

    if let Some(path) = &config.snapshot_path {
        match client.load_snapshot(path).await {
            Ok(true) => info!(path = %path.display(), "Snapshot loaded"),
            Ok(false) => info!(path = %path.display(), "No snapshot found, starting empty"),
            Err(err) => warn!(path = %path.display(), error = %err, "Ignoring unreadable snapshot"),
        }
    }

    let cleanup_handle = spawn_cleanup_task(client.clone(), config.cleanup_interval);
    let events_handle = spawn_event_logger(&client);
    info!("Background tasks started");

    let app = create_router(AppState::new(client.clone()));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    cleanup_handle.abort();
    events_handle.abort();

    if let Some(path) = &config.snapshot_path {
        client
            .save_snapshot(path)
            .await
            .with_context(|| format!("failed to save snapshot to {}", path.display()))?;
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Logs client events until the bus closes.
fn spawn_event_logger(client: &ApiClient) -> tokio::task::JoinHandle<()> {
    let mut events = client.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(ClientEvent::RateLimitApproaching { status, pct }) => warn!(
                    available = status.currently_available,
                    maximum = status.maximum_available,
                    pct,
                    "Rate limit approaching"
                ),
                Ok(ClientEvent::Throttled { status }) => warn!(?status, "Request throttled"),
                Ok(ClientEvent::ApiError { error }) => info!(kind = error.kind(), "API error: {}", error),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event logger lagged")
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!(error = %err, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }
}
