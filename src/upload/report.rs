//! Progress reporters: log stream, terminal progress bar, and a channel for
//! callers that forward events elsewhere (web socket, UI).

use std::io::IsTerminal;

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use tokio::sync::mpsc;

use super::progress::{
    format_bytes, format_duration, ProgressEvent, ProgressReporter, TerminalEvent,
    TerminalOutcome, UploadEvent,
};

/// Logs every event through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl ProgressReporter for TracingReporter {
    fn on_progress(&self, event: &ProgressEvent) {
        tracing::info!(
            session = %event.session_id,
            eta_secs = event.eta_seconds.map(|s| s.round() as u64),
            "Upload progress: {:.0}% ({} of {}, {}/s)",
            event.percent,
            format_bytes(event.bytes_transferred),
            format_bytes(event.total_bytes),
            format_bytes(event.throughput_bytes_per_sec as u64),
        );
    }

    fn on_terminal(&self, event: &TerminalEvent) {
        log_terminal(event);
    }
}

fn log_terminal(event: &TerminalEvent) {
    let elapsed = format_duration(std::time::Duration::from_secs_f64(event.elapsed_seconds));
    match event.outcome {
        TerminalOutcome::Completed => {
            tracing::info!(
                resource = event.resource_id.as_deref().unwrap_or(""),
                retries = event.total_retries(),
                "Upload completed in {}: {}",
                elapsed,
                event.resource_url.as_deref().unwrap_or("(no url)")
            );
        }
        TerminalOutcome::CompletedWithWarnings => {
            tracing::warn!(
                resource = event.resource_id.as_deref().unwrap_or(""),
                warnings = event.warnings.len(),
                "Upload completed with warnings in {}: {}",
                elapsed,
                event.resource_url.as_deref().unwrap_or("(no url)")
            );
            for w in &event.warnings {
                tracing::warn!(
                    step = %w.step,
                    kind = %w.kind,
                    attempts = w.attempts,
                    "Finalize step failed: {}",
                    w.message
                );
            }
        }
        TerminalOutcome::Failed if event.is_cancelled() => {
            tracing::info!(session = %event.session_id, "Upload cancelled after {}", elapsed);
        }
        TerminalOutcome::Failed => {
            if let Some(err) = &event.error {
                tracing::error!(
                    session = %event.session_id,
                    kind = %err.kind,
                    attempts = err.attempts,
                    offset = err.offset,
                    "Upload failed after {}: {}",
                    elapsed,
                    err.message
                );
            }
        }
    }
}

/// Create a progress bar with a consistent template.
///
/// Returns `ProgressBar::hidden()` when the user passed `--no-progress-bar` or
/// stdout is not a TTY (e.g. piped output, cron jobs).
pub fn create_progress_bar(no_progress_bar: bool, total: u64) -> ProgressBar {
    if no_progress_bar || !std::io::stdout().is_terminal() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::with_template(
            "{prefix} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta}) {msg}",
        )
        .expect("valid template")
        .progress_chars("=> "),
    );
    pb
}

/// Drives an `indicatif` bar; falls back to log lines when the bar is hidden.
#[derive(Debug, Clone)]
pub struct BarReporter {
    pb: ProgressBar,
}

impl BarReporter {
    pub fn new(pb: ProgressBar) -> Self {
        Self { pb }
    }

    /// Attach a new bar for one upload of a batch.
    pub fn in_group(group: &MultiProgress, no_progress_bar: bool, total: u64, label: &str) -> Self {
        let pb = group.add(create_progress_bar(no_progress_bar, total));
        pb.set_prefix(label.to_string());
        Self { pb }
    }

    pub fn progress_bar(&self) -> &ProgressBar {
        &self.pb
    }
}

impl ProgressReporter for BarReporter {
    fn on_progress(&self, event: &ProgressEvent) {
        if self.pb.is_hidden() {
            TracingReporter.on_progress(event);
            return;
        }
        self.pb.set_length(event.total_bytes);
        self.pb.set_position(event.bytes_transferred);
        self.pb
            .set_message(format!("{}/s", format_bytes(event.throughput_bytes_per_sec as u64)));
    }

    fn on_terminal(&self, event: &TerminalEvent) {
        self.pb.finish_and_clear();
        // indicatif needs `suspend` to coordinate stderr/stdout writes
        // with the progress bar redraw, preventing garbled output.
        self.pb.suspend(|| log_terminal(event));
    }
}

/// Forwards events into an unbounded channel. A closed receiver is not an
/// error: the upload keeps going without an audience.
#[derive(Debug, Clone)]
pub struct ChannelReporter {
    tx: mpsc::UnboundedSender<UploadEvent>,
}

impl ChannelReporter {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<UploadEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ProgressReporter for ChannelReporter {
    fn on_progress(&self, event: &ProgressEvent) {
        let _ = self.tx.send(UploadEvent::Progress(event.clone()));
    }

    fn on_terminal(&self, event: &TerminalEvent) {
        let _ = self.tx.send(UploadEvent::Terminal(event.clone()));
    }
}
