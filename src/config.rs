//! Environment-driven configuration for the camera node.
//!
//! Everything has a default that matches the deployed capsule, so the node
//! comes up with no `.env` at all; individual values are overridden per
//! bench or test rig.

use std::env;
use std::path::PathBuf;
use tracing::info;

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub bind_addr: String,
    pub storage_root: PathBuf,
    pub ledger_file: String,
    /// Serial device of the controller link; HTTP-only when unset.
    pub serial_port: Option<String>,
    pub baud_rate: u32,
    /// ESP32-CAM style capture URL; a synthetic pattern camera when unset.
    pub camera_url: Option<String>,
    /// Frames discarded per capture while auto-exposure settles.
    pub warmup_frames: u32,
}

impl NodeConfig {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let bind_addr = env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
        let storage_root = env::var("STORAGE_ROOT").unwrap_or_else(|_| "photos".to_string());
        let ledger_file = env::var("LEDGER_FILE").unwrap_or_else(|_| "sessions.csv".to_string());
        let serial_port = env::var("SERIAL_PORT").ok();
        let baud_rate = env::var("BAUD_RATE")
            .unwrap_or_else(|_| "115200".to_string())
            .parse::<u32>()
            .unwrap_or(115200);
        let camera_url = env::var("CAMERA_CAPTURE_URL").ok();
        let warmup_frames = env::var("WARMUP_FRAMES")
            .unwrap_or_else(|_| "2".to_string())
            .parse::<u32>()
            .unwrap_or(2);

        info!("⚙️ bind {}, storage {}", bind_addr, storage_root);

        Self {
            bind_addr,
            storage_root: PathBuf::from(storage_root),
            ledger_file,
            serial_port,
            baud_rate,
            camera_url,
            warmup_frames,
        }
    }
}
