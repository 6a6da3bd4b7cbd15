//! Router configuration for the web server.

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;

use super::handlers;
use super::AppState;

/// Create the main router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(handlers::health))
        // Scan control
        .route("/api/scan/status", get(handlers::scan_status))
        .route("/api/scan/trigger", post(handlers::trigger_scan))
        .route("/api/scan/cancel", post(handlers::cancel_scan))
        .route("/api/scan/clear-index", post(handlers::clear_index))
        .route("/api/scan/ws", get(handlers::scan_ws))
        // Pipeline telemetry and diagnostics
        .route("/api/pipeline/status", get(handlers::pipeline_status))
        .route("/api/pipeline/queues", get(handlers::pipeline_queues))
        .route("/api/pipeline/queues/:stage", get(handlers::queue_status))
        .route("/api/pipeline/flow", get(handlers::pipeline_flow))
        .route(
            "/api/pipeline/queue/:stage/clear-processed",
            post(handlers::clear_processed),
        )
        .route("/api/pipeline/reset", post(handlers::reset_pipeline))
        .route("/api/pipeline/ws", get(handlers::pipeline_ws))
        // Read API
        .route("/api/photos", get(handlers::list_photos))
        .route("/api/photos/:file_hash", get(handlers::photo_detail))
        .route(
            "/api/photos/:file_hash/thumbnail",
            get(handlers::photo_thumbnail),
        )
        .route("/api/events", get(handlers::list_events))
        .route("/api/persons", get(handlers::list_persons))
        .route("/api/duplicates", get(handlers::list_duplicates))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
