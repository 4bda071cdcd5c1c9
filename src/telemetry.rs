//! Thread-safe cache of controller telemetry on the camera node.
//!
//! Each incoming frame overwrites the latest view; a small circular history
//! is kept for the dashboard, nothing more. Telemetry is read-only fan-out
//! here: it never feeds back into capture or climate decisions.

use crate::protocol::TelemetryFrame;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
};

/// How many frames `/history` retains.
pub const HISTORY_CAPACITY: usize = 20;

#[derive(Debug, Clone, Serialize)]
pub struct TelemetryRecord {
    pub received_at: DateTime<Utc>,
    #[serde(flatten)]
    pub frame: TelemetryFrame,
}

#[derive(Debug, Default)]
struct Inner {
    latest: Option<TelemetryRecord>,
    history: VecDeque<TelemetryRecord>,
}

/// Shared telemetry buffer, cloned into the serial dispatch loop and the
/// HTTP handlers.
#[derive(Debug, Clone, Default)]
pub struct TelemetryLog {
    inner: Arc<Mutex<Inner>>,
}

impl TelemetryLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, frame: TelemetryFrame) {
        let record = TelemetryRecord {
            received_at: Utc::now(),
            frame,
        };

        let mut inner = self.inner.lock().unwrap();
        inner.latest = Some(record.clone());
        inner.history.push_back(record);
        while inner.history.len() > HISTORY_CAPACITY {
            inner.history.pop_front();
        }
    }

    pub fn latest(&self) -> Option<TelemetryRecord> {
        self.inner.lock().unwrap().latest.clone()
    }

    /// Snapshot of the circular log, oldest first.
    pub fn history(&self) -> Vec<TelemetryRecord> {
        self.inner.lock().unwrap().history.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::OperatingMode;

    fn frame(soil: u16) -> TelemetryFrame {
        TelemetryFrame {
            temperature: Some(22.0),
            humidity: Some(50.0),
            soil,
            heater_duty: 0,
            fan_a: false,
            fan_b: false,
            mode: OperatingMode::Auto,
        }
    }

    #[test]
    fn latest_frame_overwrites_the_cached_view() {
        let log = TelemetryLog::new();
        assert!(log.latest().is_none());

        log.record(frame(1));
        log.record(frame(2));

        assert_eq!(log.latest().unwrap().frame.soil, 2);
    }

    #[test]
    fn history_is_bounded_and_oldest_first() {
        let log = TelemetryLog::new();
        for i in 0..(HISTORY_CAPACITY as u16 + 5) {
            log.record(frame(i));
        }

        let history = log.history();
        assert_eq!(history.len(), HISTORY_CAPACITY);
        assert_eq!(history.first().unwrap().frame.soil, 5);
        assert_eq!(
            history.last().unwrap().frame.soil,
            HISTORY_CAPACITY as u16 + 4
        );
    }
}
