//! Events emitted to the presentation layer.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;

use super::error::{FailureKind, FailureReport};
use super::session::UploadState;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressEvent {
    pub session_id: String,
    pub percent: f64,
    pub bytes_transferred: u64,
    pub total_bytes: u64,
    pub throughput_bytes_per_sec: f64,
    pub eta_seconds: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalOutcome {
    Completed,
    CompletedWithWarnings,
    Failed,
}

/// A finalize step that still failed after its own retries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FinalizeWarning {
    pub step: String,
    pub kind: FailureKind,
    pub attempts: u32,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TerminalEvent {
    pub session_id: String,
    pub outcome: TerminalOutcome,
    pub resource_id: Option<String>,
    pub resource_url: Option<String>,
    pub error: Option<FailureReport>,
    pub warnings: Vec<FinalizeWarning>,
    pub elapsed_seconds: f64,
    /// Attempts made at each chunk offset, keyed by offset.
    pub attempts_per_chunk: BTreeMap<u64, u32>,
    pub timestamp: DateTime<Utc>,
}

impl TerminalEvent {
    pub fn is_success(&self) -> bool {
        self.outcome != TerminalOutcome::Failed
    }

    pub fn is_cancelled(&self) -> bool {
        self.error
            .as_ref()
            .is_some_and(|e| e.kind == FailureKind::Cancelled)
    }

    /// Retries across all offsets (attempts beyond the first at each one).
    pub fn total_retries(&self) -> u32 {
        self.attempts_per_chunk
            .values()
            .map(|a| a.saturating_sub(1))
            .sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum UploadEvent {
    Progress(ProgressEvent),
    Terminal(TerminalEvent),
}

/// Receives events for one or more uploads.
///
/// Implementations shared between concurrent uploads must tolerate
/// interleaved calls from different sessions; calls for a single session
/// arrive in order.
pub trait ProgressReporter: Send + Sync {
    fn on_progress(&self, event: &ProgressEvent);

    fn on_terminal(&self, event: &TerminalEvent);

    /// State machine transitions. Most reporters only care about events.
    fn on_state(&self, _session_id: &str, _state: UploadState) {}
}

/// Instantaneous throughput between consecutive progress events.
#[derive(Debug)]
pub(crate) struct ThroughputMeter {
    last_bytes: u64,
    last_at: Instant,
}

impl ThroughputMeter {
    pub(crate) fn new(bytes: u64) -> Self {
        Self {
            last_bytes: bytes,
            last_at: Instant::now(),
        }
    }

    /// Bytes/second since the previous sample. Zero elapsed time (paused
    /// clocks, coarse timers) yields 0 rather than infinity.
    pub(crate) fn sample(&mut self, bytes: u64) -> f64 {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_at).as_secs_f64();
        let delta = bytes.saturating_sub(self.last_bytes);
        self.last_bytes = bytes;
        self.last_at = now;
        if elapsed <= 0.0 {
            0.0
        } else {
            delta as f64 / elapsed
        }
    }
}

pub(crate) fn eta_seconds(remaining: u64, throughput: f64) -> Option<f64> {
    if remaining == 0 {
        Some(0.0)
    } else if throughput > 0.0 {
        Some(remaining as f64 / throughput)
    } else {
        None
    }
}

pub(crate) fn format_duration(d: Duration) -> String {
    let total_secs = d.as_secs();
    let hours = total_secs / 3600;
    let mins = (total_secs % 3600) / 60;
    let secs = total_secs % 60;

    if hours > 0 {
        format!("{}h {:02}m {:02}s", hours, mins, secs)
    } else if mins > 0 {
        format!("{}m {:02}s", mins, secs)
    } else {
        format!("{}s", secs)
    }
}

pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_throughput_meter() {
        let mut meter = ThroughputMeter::new(0);
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(meter.sample(10_000), 5_000.0);
        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(meter.sample(13_000), 3_000.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_throughput_zero_elapsed() {
        let mut meter = ThroughputMeter::new(0);
        assert_eq!(meter.sample(1_000), 0.0);
    }

    #[test]
    fn test_eta() {
        assert_eq!(eta_seconds(0, 0.0), Some(0.0));
        assert_eq!(eta_seconds(1000, 0.0), None);
        assert_eq!(eta_seconds(1000, 500.0), Some(2.0));
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(42)), "42s");
        assert_eq!(format_duration(Duration::from_secs(754)), "12m 34s");
        assert_eq!(format_duration(Duration::from_secs(5025)), "1h 23m 45s");
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MiB");
        assert_eq!(format_bytes(3 * 1024 * 1024 * 1024 / 2), "1.5 GiB");
    }

    #[test]
    fn test_total_retries() {
        let event = TerminalEvent {
            session_id: "s".into(),
            outcome: TerminalOutcome::Completed,
            resource_id: Some("v".into()),
            resource_url: None,
            error: None,
            warnings: Vec::new(),
            elapsed_seconds: 1.0,
            attempts_per_chunk: BTreeMap::from([(0, 1), (5, 3), (10, 1)]),
            timestamp: Utc::now(),
        };
        assert_eq!(event.total_retries(), 2);
        assert!(event.is_success());
        assert!(!event.is_cancelled());
    }
}
