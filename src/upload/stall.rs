//! Stall Detector: bounds how long `bytes_transferred` may stay flat.
//!
//! The socket idle bound (no data moving on one request) belongs to the
//! transport, which reports it as [`TransportError::Timeout`]. The stall
//! timeout here spans any number of calls and catches a server that answers
//! quickly but never advances its offset. A call still running when the
//! stall window closes is abandoned, so a hung transport cannot outlive it.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use super::error::TransportError;
use super::transport::ChunkAck;

/// Most recent observation of progress. Only the latest one is kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressSample {
    pub bytes_transferred: u64,
    pub observed_at: Instant,
}

/// What the detector saw for one attempt.
#[derive(Debug)]
pub enum Probe {
    /// Passed through from the transport.
    Finished(Result<ChunkAck, TransportError>),
    /// No progress for the whole stall window, whatever the transport
    /// returned. `last_error` is the most recent failure seen while flat.
    Stalled {
        idle: Duration,
        last_error: Option<TransportError>,
    },
}

#[derive(Debug)]
pub struct StallDetector {
    stall_timeout: Duration,
    last: ProgressSample,
    last_error: Option<TransportError>,
}

impl StallDetector {
    pub fn new(stall_timeout: Duration, bytes_transferred: u64) -> Self {
        Self {
            stall_timeout,
            last: ProgressSample {
                bytes_transferred,
                observed_at: Instant::now(),
            },
            last_error: None,
        }
    }

    pub fn last_sample(&self) -> ProgressSample {
        self.last
    }

    /// Time since `bytes_transferred` last moved.
    pub fn idle(&self) -> Duration {
        self.last.observed_at.elapsed()
    }

    /// Run one transport call, cut off when the stall window closes, then
    /// check the result against the last recorded sample.
    pub async fn probe<Fut>(&mut self, call: Fut) -> Probe
    where
        Fut: Future<Output = Result<ChunkAck, TransportError>>,
    {
        let deadline = self.last.observed_at + self.stall_timeout;
        match tokio::time::timeout_at(deadline, call).await {
            Ok(result) => self.observe(result),
            Err(_) => {
                let idle = self.idle();
                tracing::debug!(
                    bytes = self.last.bytes_transferred,
                    idle_secs = idle.as_secs(),
                    "stall window closed during a chunk call"
                );
                Probe::Stalled {
                    idle,
                    last_error: self.last_error.take(),
                }
            }
        }
    }

    fn observe(&mut self, result: Result<ChunkAck, TransportError>) -> Probe {
        let now = Instant::now();
        if let Ok(ack) = &result {
            if ack.bytes_acked > self.last.bytes_transferred {
                self.last = ProgressSample {
                    bytes_transferred: ack.bytes_acked,
                    observed_at: now,
                };
                self.last_error = None;
                return Probe::Finished(result);
            }
        }

        let idle = now.duration_since(self.last.observed_at);
        if idle > self.stall_timeout {
            tracing::debug!(
                bytes = self.last.bytes_transferred,
                idle_secs = idle.as_secs(),
                "stall timeout exceeded"
            );
            return Probe::Stalled {
                idle,
                last_error: result.err().or_else(|| self.last_error.take()),
            };
        }
        if let Err(e) = &result {
            self.last_error = Some(e.clone());
        }
        Probe::Finished(result)
    }
}
