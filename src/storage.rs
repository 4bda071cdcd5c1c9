//! Single-owner actor for the removable media.
//!
//! Every path that touches storage (capture writes, gallery listings,
//! deletes, ledger access) goes through one task over a command channel, so
//! the critical section is the channel itself: a listing can never observe a
//! half-written photo and a delete can never race a capture into the same
//! filename.

use crate::capture::CaptureError;
use crate::ledger::{self, PHOTO_EXT};
use bytes::Bytes;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info, warn};

const COMMAND_BUFFER: usize = 32;

/// Returns the name unchanged when it is a plain filename inside the
/// storage root; anything that could escape (separators, dot components,
/// hidden files) is rejected.
pub fn safe_file_name(name: &str) -> Option<&str> {
    if name.is_empty()
        || name.starts_with('.')
        || name.contains('/')
        || name.contains('\\')
        || name.contains('\0')
    {
        None
    } else {
        Some(name)
    }
}

fn is_photo(name: &str) -> bool {
    name.ends_with(PHOTO_EXT)
}

enum StorageCommand {
    SavePhoto {
        name: String,
        data: Bytes,
        reply: oneshot::Sender<Result<u64, CaptureError>>,
    },
    ReadFile {
        name: String,
        reply: oneshot::Sender<Result<Bytes, CaptureError>>,
    },
    ListPhotos {
        reply: oneshot::Sender<Result<Vec<String>, CaptureError>>,
    },
    DeleteFile {
        name: String,
        reply: oneshot::Sender<Result<(), CaptureError>>,
    },
    DeleteAll {
        reply: oneshot::Sender<Result<usize, CaptureError>>,
    },
    LedgerAppend {
        session_id: u64,
        count: u32,
        reply: oneshot::Sender<Result<(), CaptureError>>,
    },
    SessionCounts {
        reply: oneshot::Sender<Result<BTreeMap<u64, u32>, CaptureError>>,
    },
}

/// Cloneable handle to the storage task. A dead task surfaces as
/// [`CaptureError::StorageUnavailable`] on every operation.
#[derive(Debug, Clone)]
pub struct StorageHandle {
    tx: mpsc::Sender<StorageCommand>,
}

/// Creates the storage root if needed and spawns the owning task.
pub fn spawn(root: PathBuf, ledger_file: &str) -> anyhow::Result<StorageHandle> {
    spawn_worker(root, ledger_file, None)
}

/// Like [`spawn`], but caps every photo write at `limit` bytes, the way a
/// full or failing card truncates writes.
#[cfg(test)]
pub(crate) fn spawn_with_write_limit(
    root: PathBuf,
    ledger_file: &str,
    limit: usize,
) -> anyhow::Result<StorageHandle> {
    spawn_worker(root, ledger_file, Some(limit))
}

fn spawn_worker(
    root: PathBuf,
    ledger_file: &str,
    write_limit: Option<usize>,
) -> anyhow::Result<StorageHandle> {
    std::fs::create_dir_all(&root)?;
    info!("💾 storage root: {}", root.display());

    let worker = StorageWorker {
        ledger_path: root.join(ledger_file),
        root,
        write_limit,
    };
    let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
    tokio::spawn(worker.run(rx));
    Ok(StorageHandle { tx })
}

impl StorageHandle {
    async fn request<T>(
        &self,
        command: StorageCommand,
        rx: oneshot::Receiver<Result<T, CaptureError>>,
    ) -> Result<T, CaptureError> {
        self.tx
            .send(command)
            .await
            .map_err(|_| CaptureError::StorageUnavailable)?;
        rx.await.map_err(|_| CaptureError::StorageUnavailable)?
    }

    /// Writes one photo in a single operation and verifies the byte count
    /// that landed on the media.
    pub async fn save_photo(&self, name: String, data: Bytes) -> Result<u64, CaptureError> {
        let (reply, rx) = oneshot::channel();
        self.request(StorageCommand::SavePhoto { name, data, reply }, rx)
            .await
    }

    pub async fn read_file(&self, name: String) -> Result<Bytes, CaptureError> {
        let (reply, rx) = oneshot::channel();
        self.request(StorageCommand::ReadFile { name, reply }, rx).await
    }

    /// All stored photo filenames, sorted, session and non-session alike.
    pub async fn list_photos(&self) -> Result<Vec<String>, CaptureError> {
        let (reply, rx) = oneshot::channel();
        self.request(StorageCommand::ListPhotos { reply }, rx).await
    }

    pub async fn delete_file(&self, name: String) -> Result<(), CaptureError> {
        let (reply, rx) = oneshot::channel();
        self.request(StorageCommand::DeleteFile { name, reply }, rx)
            .await
    }

    /// Removes every photo. The ledger is left untouched: historical session
    /// counts stay meaningful even after their photos are gone.
    pub async fn delete_all(&self) -> Result<usize, CaptureError> {
        let (reply, rx) = oneshot::channel();
        self.request(StorageCommand::DeleteAll { reply }, rx).await
    }

    pub async fn ledger_append(&self, session_id: u64, count: u32) -> Result<(), CaptureError> {
        let (reply, rx) = oneshot::channel();
        self.request(
            StorageCommand::LedgerAppend {
                session_id,
                count,
                reply,
            },
            rx,
        )
        .await
    }

    /// Authoritative session -> count map from the reconciled ledger, with a
    /// storage-scan reconstruction as fallback when no ledger exists yet.
    pub async fn session_counts(&self) -> Result<BTreeMap<u64, u32>, CaptureError> {
        let (reply, rx) = oneshot::channel();
        self.request(StorageCommand::SessionCounts { reply }, rx).await
    }
}

struct StorageWorker {
    root: PathBuf,
    ledger_path: PathBuf,
    /// When set, photo writes land at most this many bytes on the media.
    write_limit: Option<usize>,
}

impl StorageWorker {
    async fn run(self, mut rx: mpsc::Receiver<StorageCommand>) {
        while let Some(command) = rx.recv().await {
            match command {
                StorageCommand::SavePhoto { name, data, reply } => {
                    let _ = reply.send(self.save_photo(&name, data).await);
                }
                StorageCommand::ReadFile { name, reply } => {
                    let _ = reply.send(self.read_file(&name).await);
                }
                StorageCommand::ListPhotos { reply } => {
                    let _ = reply.send(self.list_photos());
                }
                StorageCommand::DeleteFile { name, reply } => {
                    let _ = reply.send(self.delete_file(&name).await);
                }
                StorageCommand::DeleteAll { reply } => {
                    let _ = reply.send(self.delete_all());
                }
                StorageCommand::LedgerAppend {
                    session_id,
                    count,
                    reply,
                } => {
                    let _ = reply.send(self.ledger_append(session_id, count));
                }
                StorageCommand::SessionCounts { reply } => {
                    let _ = reply.send(self.session_counts());
                }
            }
        }
        warn!("storage task shutting down");
    }

    fn resolve(&self, name: &str) -> Result<PathBuf, CaptureError> {
        match safe_file_name(name) {
            Some(name) => Ok(self.root.join(name)),
            None => Err(CaptureError::InvalidFileName(name.to_string())),
        }
    }

    async fn save_photo(&self, name: &str, data: Bytes) -> Result<u64, CaptureError> {
        let path = self.resolve(name)?;
        let landed = match self.write_limit {
            Some(limit) if data.len() > limit => &data[..limit],
            _ => &data[..],
        };
        tokio::fs::write(&path, landed)
            .await
            .map_err(map_storage_err)?;

        // A truncated write must never surface in the gallery.
        let written = tokio::fs::metadata(&path).await.map_err(map_storage_err)?.len();
        if written != data.len() as u64 {
            let _ = tokio::fs::remove_file(&path).await;
            return Err(CaptureError::WriteIncomplete {
                expected: data.len() as u64,
                written,
            });
        }
        Ok(written)
    }

    async fn read_file(&self, name: &str) -> Result<Bytes, CaptureError> {
        let path = self.resolve(name)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(CaptureError::NotFound(name.to_string()))
            }
            Err(e) => Err(map_storage_err(e)),
        }
    }

    fn list_photos(&self) -> Result<Vec<String>, CaptureError> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.root).map_err(map_storage_err)? {
            let entry = entry.map_err(map_storage_err)?;
            if let Some(name) = entry.file_name().to_str() {
                if is_photo(name) {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    async fn delete_file(&self, name: &str) -> Result<(), CaptureError> {
        // Only photos are deletable; the ledger in the same directory must
        // survive every delete path.
        if !is_photo(name) {
            return Err(CaptureError::InvalidFileName(name.to_string()));
        }
        let path = self.resolve(name)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                info!("🗑️ deleted {}", name);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(CaptureError::NotFound(name.to_string()))
            }
            Err(e) => Err(map_storage_err(e)),
        }
    }

    fn delete_all(&self) -> Result<usize, CaptureError> {
        let mut removed = 0;
        for name in self.list_photos()? {
            match std::fs::remove_file(self.root.join(&name)) {
                Ok(()) => removed += 1,
                Err(e) => error!("failed to delete {}: {}", name, e),
            }
        }
        info!("🗑️ deleted {} photos", removed);
        Ok(removed)
    }

    fn ledger_append(&self, session_id: u64, count: u32) -> Result<(), CaptureError> {
        ledger::append(&self.ledger_path, session_id, count).map_err(map_storage_err)
    }

    fn session_counts(&self) -> Result<BTreeMap<u64, u32>, CaptureError> {
        let reconciled = ledger::reconcile(&self.ledger_path).map_err(map_storage_err)?;
        if !reconciled.is_empty() || self.ledger_path.exists() {
            return Ok(reconciled);
        }
        // No ledger at all: fall back to grouping filenames so sessions from
        // an interrupted run are at least discoverable.
        warn!("no ledger found, reconstructing sessions from storage scan");
        ledger::scan_reconstruct(&self.root).map_err(map_storage_err)
    }
}

fn map_storage_err(e: std::io::Error) -> CaptureError {
    if e.kind() == std::io::ErrorKind::NotFound {
        // The root itself vanished out from under us: media unmounted.
        CaptureError::StorageUnavailable
    } else {
        CaptureError::Storage(e)
    }
}
