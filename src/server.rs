use axum::{routing::get, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use crate::metrics::{stream, LiveStats};

/// Router for the driver's live dashboard endpoints.
pub fn create_router(stats: Arc<LiveStats>) -> Router {
    Router::new()
        .route("/api/metrics", get(stream::get_metrics))
        .route("/api/metrics/stream", get(stream::metrics_stream))
        .with_state(stats)
        .layer(CorsLayer::permissive())
}

/// Serve the dashboard in the background for as long as the process runs.
pub async fn spawn(addr: SocketAddr, stats: Arc<LiveStats>) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "live metrics at /api/metrics and /api/metrics/stream");
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, create_router(stats)).await {
            warn!(error = %e, "metrics server exited");
        }
    });
    Ok(())
}
