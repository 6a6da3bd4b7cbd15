//! HTTP handlers: scan control, pipeline telemetry, and the read API.

use std::collections::BTreeMap;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::AppState;
use crate::pipeline::Stage;
use crate::services::thumbnail::thumbnail_path;

const WS_HEARTBEAT: std::time::Duration = std::time::Duration::from_secs(30);
const PIPELINE_TICK: std::time::Duration = std::time::Duration::from_secs(1);

fn internal<E: std::fmt::Display>(e: E) -> StatusCode {
    tracing::error!("request failed: {}", e);
    StatusCode::INTERNAL_SERVER_ERROR
}

// ---------------------------------------------------------------------------
// Health

pub async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "app": "photarc",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

// ---------------------------------------------------------------------------
// Scan control

pub async fn scan_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.ingest.scan_state().snapshot())
}

pub async fn trigger_scan(State(state): State<AppState>) -> impl IntoResponse {
    if state.ingest.try_start_scan() {
        Json(json!({"status": "scan_started"}))
    } else {
        Json(json!({"status": "already_scanning"}))
    }
}

pub async fn cancel_scan(State(state): State<AppState>) -> impl IntoResponse {
    if state.ingest.cancel_scan() {
        Json(json!({"status": "cancel_requested"}))
    } else {
        Json(json!({"status": "not_scanning"}))
    }
}

pub async fn clear_index(State(state): State<AppState>) -> Result<Response, StatusCode> {
    let cleared = state.ingest.clear_index().await.map_err(internal)?;
    let status = if cleared {
        "index_cleared"
    } else {
        "cannot_clear_while_scanning"
    };
    Ok(Json(json!({"status": status})).into_response())
}

/// Scan progress stream: immediate snapshot, push on change, heartbeat
/// floor while idle.
pub async fn scan_ws(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_scan_socket(socket, state))
}

async fn handle_scan_socket(mut socket: WebSocket, state: AppState) {
    let scan_state = state.ingest.scan_state();
    let mut rx = scan_state.subscribe();

    let initial = serde_json::to_string(&scan_state.snapshot()).unwrap_or_default();
    if socket.send(Message::Text(initial)).await.is_err() {
        return;
    }

    loop {
        let payload = match tokio::time::timeout(WS_HEARTBEAT, rx.recv()).await {
            Ok(Ok(snapshot)) => serde_json::to_string(&snapshot).unwrap_or_default(),
            Ok(Err(tokio::sync::broadcast::error::RecvError::Lagged(_))) => {
                serde_json::to_string(&scan_state.snapshot()).unwrap_or_default()
            }
            Ok(Err(tokio::sync::broadcast::error::RecvError::Closed)) => break,
            Err(_) => json!({"heartbeat": true}).to_string(),
        };
        if socket.send(Message::Text(payload)).await.is_err() {
            break;
        }
    }
    debug!("scan websocket closed");
}

// ---------------------------------------------------------------------------
// Pipeline telemetry

pub async fn pipeline_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.pipeline.snapshot())
}

pub async fn pipeline_queues(State(state): State<AppState>) -> impl IntoResponse {
    let queues: BTreeMap<Stage, _> = Stage::ALL
        .iter()
        .map(|&stage| (stage, state.pipeline.queue(stage).snapshot()))
        .collect();
    Json(queues)
}

pub async fn queue_status(
    State(state): State<AppState>,
    Path(stage): Path<String>,
) -> Result<Response, StatusCode> {
    let stage = Stage::parse(&stage).ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(state.pipeline.queue(stage).snapshot()).into_response())
}

pub async fn pipeline_flow(State(state): State<AppState>) -> impl IntoResponse {
    let stages: Vec<_> = Stage::ALL
        .iter()
        .map(|&stage| {
            json!({
                "id": stage.as_str(),
                "name": stage.as_str(),
                "next": state
                    .pipeline
                    .successors(stage)
                    .iter()
                    .map(|s| s.as_str())
                    .collect::<Vec<_>>(),
            })
        })
        .collect();
    Json(json!({"stages": stages}))
}

pub async fn clear_processed(
    State(state): State<AppState>,
    Path(stage): Path<String>,
) -> Result<Response, StatusCode> {
    let stage = Stage::parse(&stage).ok_or(StatusCode::NOT_FOUND)?;
    let cleared = state.pipeline.queue(stage).clear_processed();
    Ok(Json(json!({
        "message": format!("Cleared {cleared} processed items from {stage}"),
    }))
    .into_response())
}

pub async fn reset_pipeline(State(state): State<AppState>) -> impl IntoResponse {
    let mut cleared = BTreeMap::new();
    for stage in Stage::ALL {
        cleared.insert(stage, state.pipeline.queue(stage).clear_processed());
    }
    Json(json!({"message": "Reset all queues", "cleared_counts": cleared}))
}

/// Pipeline statistics stream at 1 Hz.
pub async fn pipeline_ws(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_pipeline_socket(socket, state))
}

async fn handle_pipeline_socket(mut socket: WebSocket, state: AppState) {
    loop {
        let payload = serde_json::to_string(&state.pipeline.snapshot()).unwrap_or_default();
        if socket.send(Message::Text(payload)).await.is_err() {
            break;
        }
        tokio::time::sleep(PIPELINE_TICK).await;
    }
    debug!("pipeline websocket closed");
}

// ---------------------------------------------------------------------------
// Read API

#[derive(Debug, Deserialize)]
pub struct PageParams {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    100
}

pub async fn list_photos(
    State(state): State<AppState>,
    Query(params): Query<PageParams>,
) -> Result<Response, StatusCode> {
    let limit = params.limit.clamp(1, 500);
    let offset = params.offset.max(0);
    let photos = state
        .photos
        .list_page(limit, offset)
        .await
        .map_err(internal)?;
    let total = state.photos.count().await.map_err(internal)?;
    Ok(Json(json!({"photos": photos, "total": total})).into_response())
}

pub async fn photo_detail(
    State(state): State<AppState>,
    Path(file_hash): Path<String>,
) -> Result<Response, StatusCode> {
    let photo = state
        .photos
        .get(&file_hash)
        .await
        .map_err(internal)?
        .ok_or(StatusCode::NOT_FOUND)?;
    let caption = state
        .captions
        .caption_for(&file_hash)
        .await
        .map_err(internal)?;
    let tags = state.captions.tags_for(&file_hash).await.map_err(internal)?;
    Ok(Json(json!({"photo": photo, "caption": caption, "tags": tags})).into_response())
}

#[derive(Debug, Deserialize)]
pub struct ThumbnailParams {
    #[serde(default = "default_thumb_size")]
    pub size: u32,
}

fn default_thumb_size() -> u32 {
    600
}

pub async fn photo_thumbnail(
    State(state): State<AppState>,
    Path(file_hash): Path<String>,
    Query(params): Query<ThumbnailParams>,
) -> Result<Response, StatusCode> {
    // Closest available size at or above the request, else the largest.
    let mut sizes = state.settings.thumbnail_sizes.clone();
    sizes.sort_unstable();
    let best = sizes
        .iter()
        .copied()
        .find(|&s| s >= params.size)
        .or_else(|| sizes.last().copied())
        .ok_or(StatusCode::NOT_FOUND)?;

    let path = thumbnail_path(&state.settings.thumbnails_dir(), &file_hash, best);
    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|_| StatusCode::NOT_FOUND)?;
    Ok(([(header::CONTENT_TYPE, "image/webp")], bytes).into_response())
}

pub async fn list_events(State(state): State<AppState>) -> Result<Response, StatusCode> {
    let events = state.events.list().await.map_err(internal)?;
    Ok(Json(json!({"events": events})).into_response())
}

pub async fn list_persons(State(state): State<AppState>) -> Result<Response, StatusCode> {
    let persons = state.faces.list_persons().await.map_err(internal)?;
    Ok(Json(json!({"persons": persons})).into_response())
}

pub async fn list_duplicates(State(state): State<AppState>) -> Result<Response, StatusCode> {
    let groups = state.duplicates.list_groups().await.map_err(internal)?;
    Ok(Json(json!({"groups": groups})).into_response())
}
