//! JSON/websocket API server.
//!
//! Exposes the scan control surface, live pipeline telemetry, and a small
//! read API over the enriched records.

mod handlers;
mod routes;

pub use routes::create_router;

use std::net::SocketAddr;
use std::sync::Arc;

use crate::config::Settings;
use crate::pipeline::{Ingest, Pipeline};
use crate::repository::{
    CaptionRepository, DuplicateRepository, EventRepository, FaceRepository, PhotoRepository,
    Store,
};

/// Shared state for the web server.
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub pipeline: Arc<Pipeline>,
    pub ingest: Arc<Ingest>,
    pub photos: PhotoRepository,
    pub faces: FaceRepository,
    pub events: EventRepository,
    pub captions: CaptionRepository,
    pub duplicates: DuplicateRepository,
}

impl AppState {
    pub fn new(
        settings: Arc<Settings>,
        pipeline: Arc<Pipeline>,
        ingest: Arc<Ingest>,
        store: &Store,
    ) -> Self {
        Self {
            settings,
            pipeline,
            ingest,
            photos: store.photos(),
            faces: store.faces(),
            events: store.events(),
            captions: store.captions(),
            duplicates: store.duplicates(),
        }
    }
}

/// Start the web server.
pub async fn serve(state: AppState) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", state.settings.host, state.settings.port).parse()?;
    let app = create_router(state);

    tracing::info!("starting server at http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tempfile::tempdir;
    use tower::ServiceExt;

    use crate::pipeline::ScanState;
    use crate::repository::migrations;

    async fn setup_test_app() -> (axum::Router, tempfile::TempDir, AppState) {
        let dir = tempdir().unwrap();
        let photos_dir = dir.path().join("photos");
        let data_dir = dir.path().join("data");
        std::fs::create_dir_all(&photos_dir).unwrap();
        std::fs::create_dir_all(data_dir.join("db")).unwrap();

        let settings = Arc::new(Settings {
            photos_dir,
            data_dir,
            ..Settings::default()
        });
        migrations::run_migrations(&settings.database_path().display().to_string())
            .await
            .unwrap();
        let store = Store::from_path(&settings.database_path());

        let pipeline = Arc::new(Pipeline::new());
        let ingest = Arc::new(Ingest::new(
            Arc::clone(&settings),
            Arc::clone(&pipeline),
            Arc::new(ScanState::new()),
            store.clone(),
        ));
        let state = AppState::new(settings, pipeline, ingest, &store);
        (create_router(state.clone()), dir, state)
    }

    async fn get_json(app: &axum::Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, value)
    }

    async fn post_json(app: &axum::Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let (app, _dir, _state) = setup_test_app().await;
        let (status, body) = get_json(&app, "/api/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["app"], "photarc");
    }

    #[tokio::test]
    async fn pipeline_status_exposes_queues_and_flow() {
        let (app, _dir, state) = setup_test_app().await;
        state.pipeline.add_file("abc", "/p/a.jpg").await;

        let (status, body) = get_json(&app, "/api/pipeline/status").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "processing");
        assert_eq!(body["total_files_discovered"], 1);
        assert_eq!(body["queues"]["discovery"]["pending"], 1);
        assert_eq!(body["flow"]["captioning"][0], "events");
        assert_eq!(body["flow"]["events"].as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn unknown_queue_is_a_404() {
        let (app, _dir, _state) = setup_test_app().await;
        let (status, _) = get_json(&app, "/api/pipeline/queues/unknown").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = get_json(&app, "/api/pipeline/queues/exif").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["stage"], "exif");
    }

    #[tokio::test]
    async fn scan_cancel_without_scan_reports_not_scanning() {
        let (app, _dir, _state) = setup_test_app().await;
        let (status, body) = post_json(&app, "/api/scan/cancel").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "not_scanning");
    }

    #[tokio::test]
    async fn trigger_scan_claims_the_slot() {
        let (app, _dir, state) = setup_test_app().await;
        let (_, body) = post_json(&app, "/api/scan/trigger").await;
        assert_eq!(body["status"], "scan_started");

        // The background scan of an empty tree finishes quickly; wait for
        // the slot to release, then a new trigger succeeds again.
        for _ in 0..50 {
            if !state.ingest.scan_state().is_scanning() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        }
        let (_, body) = post_json(&app, "/api/scan/trigger").await;
        assert_eq!(body["status"], "scan_started");
    }

    #[tokio::test]
    async fn clear_index_resets_pipeline_counters() {
        let (app, _dir, state) = setup_test_app().await;
        state.pipeline.add_file("abc", "/p/a.jpg").await;

        let (status, body) = post_json(&app, "/api/scan/clear-index").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "index_cleared");
        assert_eq!(state.pipeline.total_discovered(), 0);
    }

    #[tokio::test]
    async fn photo_listing_starts_empty_and_missing_photo_is_404() {
        let (app, _dir, _state) = setup_test_app().await;
        let (status, body) = get_json(&app, "/api/photos").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total"], 0);
        assert_eq!(body["photos"].as_array().unwrap().len(), 0);

        let (status, _) = get_json(&app, "/api/photos/deadbeef").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn clear_processed_reports_the_cleared_count() {
        let (app, _dir, state) = setup_test_app().await;
        let queue = state.pipeline.queue(crate::pipeline::Stage::Exif);
        queue.admit("k").await;
        let key = queue.take(std::time::Duration::from_millis(100)).await.unwrap();
        queue.finish(&key, crate::pipeline::StageOutcome::Completed);

        let (status, body) =
            post_json(&app, "/api/pipeline/queue/exif/clear-processed").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["message"]
            .as_str()
            .unwrap()
            .contains("Cleared 1 processed items"));
    }
}
