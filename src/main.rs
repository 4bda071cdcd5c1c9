use antares_capsule::camera::{Camera, HttpCamera, PatternCamera};
use antares_capsule::capture::CaptureOrchestrator;
use antares_capsule::config::NodeConfig;
use antares_capsule::server::{self, AppState};
use antares_capsule::telemetry::TelemetryLog;
use antares_capsule::{serial, storage};
use anyhow::Result;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    info!("📷 Initializing capsule camera node...");
    let config = NodeConfig::from_env();

    let storage = storage::spawn(config.storage_root.clone(), &config.ledger_file)?;

    let camera = match &config.camera_url {
        Some(url) => {
            info!("📡 using camera at {}", url);
            Camera::Http(HttpCamera::new(url.clone()))
        }
        None => {
            warn!("no CAMERA_CAPTURE_URL set, using synthetic pattern camera");
            Camera::Pattern(PatternCamera::new())
        }
    };

    let telemetry = TelemetryLog::new();
    let orchestrator = Arc::new(CaptureOrchestrator::new(
        camera,
        storage.clone(),
        config.warmup_frames,
    ));

    let (line_tx, line_rx) = mpsc::unbounded_channel();
    match &config.serial_port {
        Some(port) => serial::spawn_reader(port, config.baud_rate, line_tx)?,
        None => {
            warn!("no SERIAL_PORT set, running HTTP-only");
            drop(line_tx);
        }
    }
    tokio::spawn(serial::dispatch_lines(
        line_rx,
        orchestrator.clone(),
        telemetry.clone(),
    ));

    let app = server::router(AppState {
        orchestrator,
        storage,
        telemetry,
    });

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!("📷 Capsule node serving on http://{}", config.bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}
