//! Capture orchestration on the camera node.
//!
//! Owns the session state (current session id, in-session shot counter, the
//! free-running counter for ad-hoc photos) and turns capture triggers into
//! named files on storage plus ledger entries at session close.

use crate::camera::Camera;
use crate::ledger::{session_photo_name, PHOTO_EXT};
use crate::protocol::Command;
use crate::storage::StorageHandle;
use bytes::Bytes;
use chrono::Utc;
use serde::Serialize;
use std::sync::Mutex;
use thiserror::Error;
use tracing::{error, info, warn};

/// Failure taxonomy for the capture and storage paths.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// The camera subsystem produced no frame. Fatal for this capture,
    /// non-fatal for the node; never retried automatically.
    #[error("camera produced no frame: {0}")]
    SensorUnavailable(String),
    /// Bytes on the media differ from bytes captured; the partial file has
    /// been removed and the photo is treated as absent.
    #[error("short write: expected {expected} bytes, {written} landed")]
    WriteIncomplete { expected: u64, written: u64 },
    /// Media not mounted (or the storage task is gone). Write-path
    /// endpoints degrade to 500 until resolved.
    #[error("storage unavailable")]
    StorageUnavailable,
    #[error("invalid file name: {0:?}")]
    InvalidFileName(String),
    #[error("no such file: {0}")]
    NotFound(String),
    #[error("storage error: {0}")]
    Storage(#[from] std::io::Error),
}

/// A successfully stored photo.
#[derive(Debug, Clone, Serialize)]
pub struct PhotoHandle {
    pub file_name: String,
    pub bytes: u64,
    pub session_id: Option<u64>,
    pub shot_index: Option<u32>,
}

#[derive(Debug, Default)]
struct CaptureState {
    session: Option<OpenSession>,
    free_counter: u64,
    last_session_id: u64,
}

#[derive(Debug)]
struct OpenSession {
    id: u64,
    shots: u32,
}

pub struct CaptureOrchestrator {
    camera: Camera,
    storage: StorageHandle,
    warmup_frames: u32,
    state: Mutex<CaptureState>,
}

impl CaptureOrchestrator {
    pub fn new(camera: Camera, storage: StorageHandle, warmup_frames: u32) -> Self {
        Self {
            camera,
            storage,
            warmup_frames,
            state: Mutex::new(CaptureState::default()),
        }
    }

    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    /// Entry point for the serial dispatch loop.
    pub async fn handle_command(&self, command: Command) {
        match command {
            Command::Capture => match self.capture().await {
                Ok(photo) => info!("📸 stored {} ({} bytes)", photo.file_name, photo.bytes),
                Err(e) => error!("capture failed: {}", e),
            },
            Command::SessionStart => {
                self.session_start();
            }
            Command::SessionEnd => {
                self.session_end().await;
            }
        }
    }

    /// Takes one photo. If a session is open the shot joins it as
    /// `session_<id>_<index>.jpg`; otherwise the free-running counter names
    /// it.
    pub async fn capture(&self) -> Result<PhotoHandle, CaptureError> {
        let in_session = self.state.lock().unwrap().session.is_some();
        if in_session {
            self.capture_session_shot().await
        } else {
            self.capture_adhoc().await
        }
    }

    /// Non-session capture, used by `GET /capture` and by serial `CAPTURE`
    /// outside a session.
    pub async fn capture_adhoc(&self) -> Result<PhotoHandle, CaptureError> {
        let counter = {
            let mut state = self.state.lock().unwrap();
            let n = state.free_counter;
            state.free_counter += 1;
            n
        };
        let name = format!("photo_{}_{}{}", counter, Utc::now().timestamp(), PHOTO_EXT);
        let bytes = self.take_photo(&name).await?;
        Ok(PhotoHandle {
            file_name: name,
            bytes,
            session_id: None,
            shot_index: None,
        })
    }

    async fn capture_session_shot(&self) -> Result<PhotoHandle, CaptureError> {
        let slot = {
            let state = self.state.lock().unwrap();
            state.session.as_ref().map(|open| (open.id, open.shots))
        };
        let Some((id, index)) = slot else {
            // Session closed between the check in capture() and here; the
            // shot still happens, just outside the session.
            return self.capture_adhoc().await;
        };

        let name = session_photo_name(id, index);
        let bytes = self.take_photo(&name).await?;

        // The index advances only once the photo is durably on storage, so
        // indices stay contiguous and the close-time count matches the files.
        let mut state = self.state.lock().unwrap();
        if let Some(open) = state.session.as_mut() {
            if open.id == id {
                open.shots += 1;
            }
        }

        Ok(PhotoHandle {
            file_name: name,
            bytes,
            session_id: Some(id),
            shot_index: Some(index),
        })
    }

    /// Single best-effort frame grab for preview; nothing is persisted.
    pub async fn capture_live(&self) -> Result<Bytes, CaptureError> {
        self.camera.grab_frame().await
    }

    /// Discards the warm-up frames, then commits one frame to storage.
    async fn take_photo(&self, name: &str) -> Result<u64, CaptureError> {
        // Auto-exposure settles over the first few frames after wake-up;
        // throwing them away trades latency for a usable exposure.
        for _ in 0..self.warmup_frames {
            if let Err(e) = self.camera.grab_frame().await {
                return Err(e);
            }
        }
        let frame = self.camera.grab_frame().await?;
        self.storage.save_photo(name.to_string(), frame).await
    }

    /// Opens a session, minting a timestamp-derived id. An already-open
    /// session is implicitly abandoned: its photos stay on storage but it
    /// will never reach the ledger.
    pub fn session_start(&self) -> u64 {
        let mut state = self.state.lock().unwrap();
        // Two SESSION_STARTs inside one millisecond must not share an id:
        // the second session's shot 0 would overwrite the abandoned
        // session's photo on storage.
        let id = (Utc::now().timestamp_millis() as u64).max(state.last_session_id + 1);
        state.last_session_id = id;
        if let Some(old) = state.session.replace(OpenSession { id, shots: 0 }) {
            warn!(
                "session {} abandoned after {} shots (new SESSION_START)",
                old.id, old.shots
            );
        }
        info!("🎬 session {} started", id);
        id
    }

    /// Closes the session and appends its final shot count to the ledger.
    /// An append failure is logged but the captured photos are kept;
    /// partial success beats data loss.
    pub async fn session_end(&self) -> Option<(u64, u32)> {
        let closed = self.state.lock().unwrap().session.take();
        let Some(open) = closed else {
            warn!("SESSION_END with no open session, ignoring");
            return None;
        };

        info!("🏁 session {} closed with {} shots", open.id, open.shots);
        if let Err(e) = self.storage.ledger_append(open.id, open.shots).await {
            error!("ledger append for session {} failed: {}", open.id, e);
        }
        Some((open.id, open.shots))
    }

    /// `GET /deleteall` wipes the photos and restarts ad-hoc numbering.
    pub fn reset_counter(&self) {
        self.state.lock().unwrap().free_counter = 0;
    }

    pub fn current_session(&self) -> Option<u64> {
        self.state.lock().unwrap().session.as_ref().map(|s| s.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::PatternCamera;
    use crate::storage;
    use std::path::Path;
    use tempfile::tempdir;

    fn orchestrator(dir: &Path) -> CaptureOrchestrator {
        let storage = storage::spawn(dir.to_path_buf(), "sessions.csv").unwrap();
        CaptureOrchestrator::new(Camera::Pattern(PatternCamera::new()), storage, 2)
    }

    #[tokio::test]
    async fn session_flow_records_exact_shot_count() {
        let dir = tempdir().unwrap();
        let orch = orchestrator(dir.path());

        let id = orch.session_start();
        for i in 0..3 {
            let photo = orch.capture().await.unwrap();
            assert_eq!(photo.session_id, Some(id));
            assert_eq!(photo.shot_index, Some(i));
        }
        let (closed_id, shots) = orch.session_end().await.unwrap();
        assert_eq!(closed_id, id);
        assert_eq!(shots, 3);

        let counts = orch.storage.session_counts().await.unwrap();
        assert_eq!(counts[&id], 3);
    }

    #[tokio::test]
    async fn multiple_sessions_all_survive_reconciliation() {
        let dir = tempdir().unwrap();
        let orch = orchestrator(dir.path());

        let s1 = orch.session_start();
        for _ in 0..3 {
            orch.capture().await.unwrap();
        }
        orch.session_end().await.unwrap();

        // One ad-hoc photo between sessions.
        let adhoc = orch.capture().await.unwrap();
        assert!(adhoc.file_name.starts_with("photo_"));

        let s2 = orch.session_start();
        assert!(s2 > s1, "ids stay monotonic within a run");
        for _ in 0..5 {
            orch.capture().await.unwrap();
        }
        orch.session_end().await.unwrap();

        let counts = orch.storage.session_counts().await.unwrap();
        assert_eq!(counts.len(), 2, "both sessions must be listed, not just the latest");
        assert_eq!(counts[&s1], 3);
        assert_eq!(counts[&s2], 5);

        let gallery = orch.storage.list_photos().await.unwrap();
        assert_eq!(gallery.len(), 3 + 1 + 5);
        assert_eq!(
            gallery.iter().filter(|n| n.starts_with("photo_")).count(),
            1
        );
    }

    #[tokio::test]
    async fn restarting_a_session_abandons_the_previous_counter() {
        let dir = tempdir().unwrap();
        let orch = orchestrator(dir.path());

        let id1 = orch.session_start();
        orch.capture().await.unwrap();

        let id2 = orch.session_start();
        assert_ne!(id1, id2, "a restart in the same millisecond must mint a fresh id");
        orch.capture().await.unwrap();
        orch.session_end().await.unwrap();

        // Only the second session reached the ledger; the first one's photo
        // is still on storage, discoverable by scan alone.
        let counts = orch.storage.session_counts().await.unwrap();
        assert_eq!(counts.len(), 1);
        assert_eq!(counts[&id2], 1);
        assert_eq!(orch.storage.list_photos().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn session_end_without_a_session_is_ignored() {
        let dir = tempdir().unwrap();
        let orch = orchestrator(dir.path());
        assert_eq!(orch.session_end().await, None);
        assert!(orch.storage.session_counts().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn adhoc_counter_resets_after_delete_all() {
        let dir = tempdir().unwrap();
        let orch = orchestrator(dir.path());

        let a = orch.capture_adhoc().await.unwrap();
        let b = orch.capture_adhoc().await.unwrap();
        assert!(a.file_name.starts_with("photo_0_"));
        assert!(b.file_name.starts_with("photo_1_"));

        orch.storage.delete_all().await.unwrap();
        orch.reset_counter();

        let c = orch.capture_adhoc().await.unwrap();
        assert!(c.file_name.starts_with("photo_0_"));
    }
}
