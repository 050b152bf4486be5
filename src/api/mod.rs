//! HTTP surface of the segmentation service.

mod errors;
mod handlers;
mod response;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};

pub use errors::{ApiError, ErrorResponse};
pub use response::{SegmentResponse, StatusResponse};

use crate::image_processor::ImageProcessor;
use crate::traits::JobStore;

/// Shared, read-only request state. Built once at startup.
#[derive(Clone)]
pub struct AppState {
    pub processor: Arc<ImageProcessor>,
    /// `None` when no database is configured; jobs are then not recorded.
    pub jobs: Option<Arc<dyn JobStore>>,
}

pub fn create_app(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/", get(handlers::root))
        .route("/api", get(handlers::health))
        .route("/api/", get(handlers::health))
        .route("/api/segment", post(handlers::segment))
        .route("/api/mask/:image_id", get(handlers::get_mask))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Serves `app` on `addr` until Ctrl-C.
pub async fn serve(app: Router, addr: SocketAddr) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Segmentation API listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received, draining connections");
}
