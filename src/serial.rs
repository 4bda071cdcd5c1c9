//! Serial link plumbing on the camera node.
//!
//! A blocking reader thread owns the port and forwards whole lines into the
//! async side over an unbounded channel; the dispatch loop parses each line
//! and routes it. A line that fails to parse is protocol desync: dropped
//! silently apart from a log line, recovery is simply the next newline.

use crate::capture::CaptureOrchestrator;
use crate::protocol::SerialMessage;
use crate::telemetry::TelemetryLog;
use std::io::{self, BufRead, BufReader};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

const READ_TIMEOUT: Duration = Duration::from_millis(500);

/// Opens the port and spawns the reader thread. Lines arrive on `tx` with
/// the terminator trimmed.
pub fn spawn_reader(
    port_path: &str,
    baud_rate: u32,
    tx: mpsc::UnboundedSender<String>,
) -> anyhow::Result<()> {
    let port = serialport::new(port_path, baud_rate)
        .timeout(READ_TIMEOUT)
        .open()?;
    info!("📡 serial link open on {} @ {} baud", port_path, baud_rate);

    std::thread::Builder::new()
        .name("serial-reader".into())
        .spawn(move || read_loop(BufReader::new(port), tx))?;
    Ok(())
}

fn read_loop<R: BufRead>(mut reader: R, tx: mpsc::UnboundedSender<String>) {
    let mut line = String::new();
    loop {
        match reader.read_line(&mut line) {
            Ok(0) => {
                warn!("serial link closed");
                break;
            }
            Ok(_) => {
                let msg = line.trim_end().to_string();
                line.clear();
                if tx.send(msg).is_err() {
                    break;
                }
            }
            // Timeout mid-line: the partial stays buffered in `line` and the
            // next read appends to it.
            Err(e) if e.kind() == io::ErrorKind::TimedOut => continue,
            Err(e) => {
                error!("serial read failed: {}", e);
                break;
            }
        }
    }
}

/// Routes parsed lines: telemetry into the cache, commands into the
/// orchestrator. Runs until the reader side goes away.
pub async fn dispatch_lines(
    mut rx: mpsc::UnboundedReceiver<String>,
    orchestrator: Arc<CaptureOrchestrator>,
    telemetry: TelemetryLog,
) {
    while let Some(line) = rx.recv().await {
        if line.is_empty() {
            continue;
        }
        match line.parse::<SerialMessage>() {
            Ok(SerialMessage::Telemetry(frame)) => telemetry.record(frame),
            Ok(SerialMessage::Command(command)) => orchestrator.handle_command(command).await,
            Err(_) => debug!("dropping unparseable serial line: {:?}", line),
        }
    }
    warn!("serial dispatch loop finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{Camera, PatternCamera};
    use crate::storage;
    use tempfile::tempdir;

    #[tokio::test]
    async fn dispatch_drives_a_full_session_over_lines() {
        let dir = tempdir().unwrap();
        let storage = storage::spawn(dir.path().to_path_buf(), "sessions.csv").unwrap();
        let orchestrator = Arc::new(CaptureOrchestrator::new(
            Camera::Pattern(PatternCamera::new()),
            storage.clone(),
            0,
        ));
        let telemetry = TelemetryLog::new();

        let (tx, rx) = mpsc::unbounded_channel();
        for line in [
            "DATA,21.0,40.0,300,0,0,0,AUTO",
            "SESSION_START",
            "CAPTURE",
            "CAPTURE",
            "<<garbage that never parses>>",
            "CAPTURE",
            "SESSION_END",
        ] {
            tx.send(line.to_string()).unwrap();
        }
        drop(tx);

        dispatch_lines(rx, orchestrator.clone(), telemetry.clone()).await;

        assert_eq!(telemetry.latest().unwrap().frame.soil, 300);
        let counts = storage.session_counts().await.unwrap();
        assert_eq!(counts.len(), 1);
        assert_eq!(*counts.values().next().unwrap(), 3);
        assert!(orchestrator.current_session().is_none());
    }

    #[test]
    fn read_loop_splits_on_newlines_and_trims() {
        let input = b"CAPTURE\r\nDATA,nan,nan,0,0,0,0,AUTO\n" as &[u8];
        let (tx, mut rx) = mpsc::unbounded_channel();
        read_loop(BufReader::new(input), tx);

        assert_eq!(rx.try_recv().unwrap(), "CAPTURE");
        assert_eq!(rx.try_recv().unwrap(), "DATA,nan,nan,0,0,0,0,AUTO");
        assert!(rx.try_recv().is_err());
    }
}
