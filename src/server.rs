//! HTTP surface of the camera node.
//!
//! Everything the desktop application and the browser see lives here:
//! telemetry readouts, capture triggers, the MJPEG preview stream, session
//! discovery and the gallery with its delete operations. Write-path
//! handlers all funnel into the storage task, so none of them can interleave
//! with a capture in flight.

use crate::capture::{CaptureError, CaptureOrchestrator, PhotoHandle};
use crate::storage::{safe_file_name, StorageHandle};
use crate::telemetry::{TelemetryLog, TelemetryRecord};
use axum::{
    body::Body,
    extract::{Query, State},
    http::{header, StatusCode, Uri},
    response::{Html, IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, sync::Arc, time::Duration};
use tokio::io::{AsyncWriteExt, DuplexStream};
use tokio_util::io::ReaderStream;
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer};
use tracing::{info, warn};

const STREAM_FRAME_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<CaptureOrchestrator>,
    pub storage: StorageHandle,
    pub telemetry: TelemetryLog,
}

#[derive(Serialize, Deserialize)]
struct ApiResponse<T> {
    success: bool,
    data: Option<T>,
    error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }

    fn err(e: impl ToString) -> Json<Self> {
        Json(Self {
            success: false,
            data: None,
            error: Some(e.to_string()),
        })
    }
}

fn error_status(e: &CaptureError) -> StatusCode {
    match e {
        CaptureError::InvalidFileName(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(dashboard))
        .route("/status", get(status_handler))
        .route("/history", get(history_handler))
        .route("/capture", get(capture_handler))
        .route("/capture_live", get(capture_live_handler))
        .route("/stream", get(stream_handler))
        .route("/session_list", get(session_list_handler))
        .route("/gallery_list", get(gallery_list_handler))
        .route("/delete", get(delete_handler))
        .route("/deleteall", get(delete_all_handler))
        .fallback(get(file_handler))
        .layer(
            tower::ServiceBuilder::new()
                .layer(RequestBodyLimitLayer::new(1024 * 1024))
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

/// Latest telemetry frame; `null` until the controller has spoken. Never
/// touches hardware.
async fn status_handler(State(state): State<AppState>) -> Json<Option<TelemetryRecord>> {
    Json(state.telemetry.latest())
}

/// Circular telemetry log, oldest first.
async fn history_handler(State(state): State<AppState>) -> Json<Vec<TelemetryRecord>> {
    Json(state.telemetry.history())
}

async fn capture_handler(State(state): State<AppState>) -> Response {
    match state.orchestrator.capture_adhoc().await {
        Ok(photo) => ApiResponse::ok(photo).into_response(),
        Err(e) => {
            warn!("capture via HTTP failed: {}", e);
            (error_status(&e), ApiResponse::<PhotoHandle>::err(e)).into_response()
        }
    }
}

/// One preview frame, straight from the camera, never persisted.
async fn capture_live_handler(State(state): State<AppState>) -> Response {
    match state.orchestrator.capture_live().await {
        Ok(frame) => ([(header::CONTENT_TYPE, "image/jpeg")], frame).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

/// MJPEG stream: pushes frames until the client hangs up or a grab fails.
/// The sole handler allowed to run indefinitely.
async fn stream_handler(State(state): State<AppState>) -> impl IntoResponse {
    let camera = state.orchestrator.camera().clone();
    let (writer, reader) = tokio::io::duplex(64 * 1024);
    tokio::spawn(stream_frames(camera, writer));

    (
        [(
            header::CONTENT_TYPE,
            "multipart/x-mixed-replace; boundary=frame",
        )],
        Body::from_stream(ReaderStream::new(reader)),
    )
}

async fn stream_frames(camera: crate::camera::Camera, mut writer: DuplexStream) {
    loop {
        let frame = match camera.grab_frame().await {
            Ok(frame) => frame,
            Err(e) => {
                warn!("stream ended: {}", e);
                break;
            }
        };

        let head = format!(
            "--frame\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
            frame.len()
        );
        if writer.write_all(head.as_bytes()).await.is_err()
            || writer.write_all(&frame).await.is_err()
            || writer.write_all(b"\r\n").await.is_err()
        {
            // Client went away.
            break;
        }
        tokio::time::sleep(STREAM_FRAME_INTERVAL).await;
    }
}

/// Reconciled ledger as a JSON object; `{}` when no session has ever
/// closed. Sourced from the full ledger, never from in-memory session
/// state, so every past session stays visible.
async fn session_list_handler(State(state): State<AppState>) -> Response {
    match state.storage.session_counts().await {
        Ok(counts) => Json(counts).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            ApiResponse::<BTreeMap<u64, u32>>::err(e),
        )
            .into_response(),
    }
}

#[derive(Deserialize)]
struct GalleryParams {
    format: Option<String>,
}

async fn gallery_list_handler(
    State(state): State<AppState>,
    Query(params): Query<GalleryParams>,
) -> Response {
    let photos = match state.storage.list_photos().await {
        Ok(photos) => photos,
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                ApiResponse::<Vec<String>>::err(e),
            )
                .into_response()
        }
    };

    if params.format.as_deref() == Some("json") {
        return Json(photos).into_response();
    }

    if photos.is_empty() {
        return Html(r#"<div class="gallery gallery-empty">No photos stored yet</div>"#.to_string())
            .into_response();
    }

    let items = photos
        .iter()
        .map(|name| {
            format!(
                r#"<div class="gallery-item"><a href="/{name}">{name}</a> <a class="delete" href="/delete?file={name}">✖</a></div>"#
            )
        })
        .collect::<Vec<_>>()
        .join("\n");
    Html(format!("<div class=\"gallery\">\n{}\n</div>", items)).into_response()
}

#[derive(Deserialize)]
struct DeleteParams {
    file: String,
}

async fn delete_handler(
    State(state): State<AppState>,
    Query(params): Query<DeleteParams>,
) -> Response {
    // The query extractor has already percent-decoded the name; what's left
    // must still be a plain filename inside the storage root.
    if safe_file_name(&params.file).is_none() {
        return (
            StatusCode::BAD_REQUEST,
            ApiResponse::<String>::err(format!("invalid file name: {:?}", params.file)),
        )
            .into_response();
    }

    match state.storage.delete_file(params.file.clone()).await {
        Ok(()) => ApiResponse::ok(params.file).into_response(),
        Err(e) => (error_status(&e), ApiResponse::<String>::err(e)).into_response(),
    }
}

/// Wipes every photo and restarts ad-hoc numbering. Ledger untouched:
/// past session counts stay meaningful even with their photos gone.
async fn delete_all_handler(State(state): State<AppState>) -> Response {
    match state.storage.delete_all().await {
        Ok(removed) => {
            state.orchestrator.reset_counter();
            info!("🧹 gallery cleared ({} photos)", removed);
            ApiResponse::ok(removed).into_response()
        }
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            ApiResponse::<usize>::err(e),
        )
            .into_response(),
    }
}

/// Catch-all: serves stored files by name for direct image retrieval.
async fn file_handler(State(state): State<AppState>, uri: Uri) -> Response {
    let name = uri.path().trim_start_matches('/');
    if safe_file_name(name).is_none() {
        return StatusCode::NOT_FOUND.into_response();
    }

    match state.storage.read_file(name.to_string()).await {
        Ok(data) => ([(header::CONTENT_TYPE, content_type(name))], data).into_response(),
        Err(CaptureError::NotFound(_)) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

fn content_type(name: &str) -> &'static str {
    if name.ends_with(".jpg") || name.ends_with(".jpeg") {
        "image/jpeg"
    } else if name.ends_with(".csv") {
        "text/csv"
    } else {
        "application/octet-stream"
    }
}

async fn dashboard(State(state): State<AppState>) -> Html<String> {
    let latest = state.telemetry.latest();
    let sessions = state.storage.session_counts().await.unwrap_or_default();
    let photos = state.storage.list_photos().await.map(|p| p.len()).unwrap_or(0);

    let telemetry_row = match &latest {
        Some(record) => format!(
            "🌡️ {} &nbsp; 💧 {} &nbsp; 🌱 {} &nbsp; mode: {}",
            record
                .frame
                .temperature
                .map(|t| format!("{:.1}°C", t))
                .unwrap_or_else(|| "—".into()),
            record
                .frame
                .humidity
                .map(|h| format!("{:.0}%", h))
                .unwrap_or_else(|| "—".into()),
            record.frame.soil,
            record.frame.mode,
        ),
        None => "no telemetry received yet".to_string(),
    };

    let html = format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <title>📷 Capsule Node</title>
    <meta charset="UTF-8">
    <style>
        body {{ font-family: -apple-system, 'Segoe UI', Roboto, sans-serif;
               margin: 0; padding: 20px; background: #1d2330; color: #e8e8e8; }}
        .card {{ background: #2a3142; padding: 20px; margin: 16px 0;
                border-radius: 12px; max-width: 720px; }}
        a {{ color: #7fb4ff; }}
        h1 {{ font-size: 1.6em; }}
        .stat {{ font-size: 1.2em; margin: 8px 0; }}
    </style>
</head>
<body>
    <h1>📷 Capsule Node</h1>
    <div class="card">
        <div class="stat">{telemetry}</div>
    </div>
    <div class="card">
        <div class="stat">🎬 {sessions} sessions recorded &nbsp; 🖼️ {photos} photos stored</div>
        <p>
            <a href="/status">status</a> ·
            <a href="/history">history</a> ·
            <a href="/session_list">sessions</a> ·
            <a href="/gallery_list">gallery</a> ·
            <a href="/stream">live stream</a> ·
            <a href="/capture">capture</a>
        </p>
    </div>
</body>
</html>"#,
        telemetry = telemetry_row,
        sessions = sessions.len(),
        photos = photos,
    );

    Html(html)
}
