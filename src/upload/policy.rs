//! Retry Policy: maps every transport failure into a closed set of
//! [`FailureKind`]s and decides whether and how long to wait before the next
//! attempt at the same offset.
//!
//! Structured information (HTTP status, typed network errors) is always
//! preferred. Free-text matching is only applied to
//! [`TransportError::Other`], the degraded path for platforms that give no
//! structured status, and can be switched off per transport.

use std::time::Duration;

use super::error::{FailureKind, TransportError};
use super::stall::Probe;
use super::transport::ChunkAck;
use crate::retry::RetryConfig;

/// Result of one chunk attempt after classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success(ChunkAck),
    RecoverableFailure {
        kind: FailureKind,
        error: TransportError,
    },
    FatalFailure {
        kind: FailureKind,
        cause: FatalCause,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FatalCause {
    Transport(TransportError),
    Stalled {
        idle: Duration,
        last_error: Option<TransportError>,
    },
}

pub trait RetryPolicy: Send + Sync {
    /// Deterministic, total classification of a transport failure.
    fn classify(&self, error: &TransportError) -> FailureKind;

    fn retry_config(&self) -> &RetryConfig;

    /// Delay before retrying after the `failures`-th consecutive recoverable
    /// failure at one offset, or `None` once the retry budget is spent.
    fn next_delay(&self, failures: u32) -> Option<Duration> {
        let config = self.retry_config();
        let retries_done = failures.saturating_sub(1);
        if config.has_retries_left(retries_done) {
            Some(config.delay_for_retry(retries_done))
        } else {
            None
        }
    }

    /// Turn a Stall Detector probe into an [`AttemptOutcome`].
    fn evaluate(&self, probe: Probe) -> AttemptOutcome {
        match probe {
            Probe::Finished(Ok(ack)) => AttemptOutcome::Success(ack),
            Probe::Finished(Err(error)) => {
                let kind = self.classify(&error);
                if kind.is_recoverable() {
                    AttemptOutcome::RecoverableFailure { kind, error }
                } else {
                    AttemptOutcome::FatalFailure {
                        kind,
                        cause: FatalCause::Transport(error),
                    }
                }
            }
            Probe::Stalled { idle, last_error } => AttemptOutcome::FatalFailure {
                kind: FailureKind::Stall,
                cause: FatalCause::Stalled { idle, last_error },
            },
        }
    }
}

/// Status-code driven policy with an optional text heuristic fallback.
#[derive(Debug, Clone)]
pub struct DefaultRetryPolicy {
    config: RetryConfig,
    heuristic_fallback: bool,
}

impl DefaultRetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            heuristic_fallback: true,
        }
    }

    /// Disable text matching: unstructured errors become
    /// [`FailureKind::Unclassified`] (fatal).
    pub fn without_heuristics(mut self) -> Self {
        self.heuristic_fallback = false;
        self
    }
}

impl RetryPolicy for DefaultRetryPolicy {
    fn classify(&self, error: &TransportError) -> FailureKind {
        match error {
            TransportError::Status { status, .. } => classify_status(*status),
            TransportError::Timeout(_)
            | TransportError::Connection(_)
            | TransportError::Dns(_) => FailureKind::TransientNetwork,
            // Truncated or garbled bodies come from the server side of a
            // healthy request; resending the same range is safe.
            TransportError::Malformed(_) => FailureKind::TransientServer,
            TransportError::Other(message) if self.heuristic_fallback => {
                classify_message(message)
            }
            TransportError::Other(_) => FailureKind::Unclassified,
        }
    }

    fn retry_config(&self) -> &RetryConfig {
        &self.config
    }
}

fn classify_status(status: u16) -> FailureKind {
    match status {
        400..=499 => FailureKind::Construction,
        500..=599 => FailureKind::TransientServer,
        _ => FailureKind::Unclassified,
    }
}

const NETWORK_MARKERS: &[&str] = &[
    "timed out",
    "timeout",
    "connection reset",
    "connection aborted",
    "connection refused",
    "connection closed",
    "broken pipe",
    "unexpected eof",
    "name resolution",
    "dns",
    "temporarily unavailable",
];

/// Degraded path: classify a bare error message.
///
/// An embedded 4xx/5xx status code wins over network phrases, so
/// "503 Service Unavailable (timeout)" is a server error, not a network one.
fn classify_message(message: &str) -> FailureKind {
    if let Some(status) = embedded_status(message) {
        return classify_status(status);
    }
    let lower = message.to_ascii_lowercase();
    if NETWORK_MARKERS.iter().any(|m| lower.contains(m)) {
        return FailureKind::TransientNetwork;
    }
    if lower.contains("invalid") || lower.contains("unexpected parameter") {
        return FailureKind::Construction;
    }
    FailureKind::Unclassified
}

/// First standalone three-digit number in the 400..=599 range.
fn embedded_status(message: &str) -> Option<u16> {
    message
        .split(|c: char| !c.is_ascii_digit())
        .filter(|token| token.len() == 3)
        .filter_map(|token| token.parse::<u16>().ok())
        .find(|code| (400..=599).contains(code))
}
