//! Upload Orchestrator: owns the session state machine and the chunk loop.
//!
//! One call to [`Uploader::upload`] drives one session from `Initiating` to a
//! terminal state and always ends with exactly one terminal event. The
//! orchestrator is the only place that decides whether to retry, give up or
//! move on; the transport performs single attempts and the policy classifies.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::error::{FailureKind, TransportError, UploadError};
use super::policy::{AttemptOutcome, DefaultRetryPolicy, FatalCause, RetryPolicy};
use super::progress::{
    eta_seconds, FinalizeWarning, ProgressEvent, ProgressReporter, TerminalEvent,
    TerminalOutcome, ThroughputMeter,
};
use super::session::{UploadSession, UploadState};
use super::source::ChunkSource;
use super::stall::StallDetector;
use super::transport::{ChunkTransport, FinalizeStep, ResourceMetadata, SessionHandle};
use crate::retry::{retry_with_backoff, sleep_or_cancel, RetryAction, RetryConfig, RetryError};

pub const DEFAULT_CHUNK_SIZE: u64 = 5 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct UploadConfig {
    pub chunk_size: u64,
    /// Bound on session-open and finalize calls. Chunk calls are bounded by
    /// the transport's own idle timeout and by the stall window.
    pub socket_timeout: Duration,
    /// Bound on how long `bytes_transferred` may stay flat.
    pub stall_timeout: Duration,
    pub retry: RetryConfig,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            socket_timeout: Duration::from_secs(60),
            stall_timeout: Duration::from_secs(120),
            retry: RetryConfig::default(),
        }
    }
}

/// What to create and what to do with it once the bytes are in.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub metadata: ResourceMetadata,
    /// Applied in order after the transfer; failures become warnings.
    pub finalize: Vec<FinalizeStep>,
}

/// Runs uploads against one transport. Cheap to share: every call to
/// [`upload`](Self::upload) owns its own session, so concurrent uploads on
/// one `Uploader` never see each other's state.
pub struct Uploader {
    transport: Arc<dyn ChunkTransport>,
    policy: Arc<dyn RetryPolicy>,
    config: UploadConfig,
}

impl std::fmt::Debug for Uploader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Uploader")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Uploader {
    pub fn new(transport: Arc<dyn ChunkTransport>, config: UploadConfig) -> Self {
        let policy = Arc::new(DefaultRetryPolicy::new(config.retry));
        Self {
            transport,
            policy,
            config,
        }
    }

    pub fn with_policy(mut self, policy: Arc<dyn RetryPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    /// Upload `source` and report through `reporter`.
    ///
    /// Never returns an error: every outcome, including cancellation, is
    /// delivered as the returned [`TerminalEvent`], which is also passed to
    /// `reporter.on_terminal` exactly once.
    pub async fn upload(
        &self,
        request: &UploadRequest,
        source: &mut dyn ChunkSource,
        reporter: &dyn ProgressReporter,
        cancel: &CancellationToken,
    ) -> TerminalEvent {
        let started = Instant::now();
        let mut session = UploadSession::new(source.total_bytes(), self.config.chunk_size);
        let mut attempts_per_chunk = BTreeMap::new();

        tracing::debug!(
            title = %request.metadata.title,
            total_bytes = session.total_bytes,
            chunk_size = session.chunk_size,
            "starting upload"
        );

        let result = self
            .drive(
                &mut session,
                request,
                source,
                reporter,
                cancel,
                &mut attempts_per_chunk,
            )
            .await;

        let (outcome, resource_id, resource_url, error, warnings) = match result {
            Ok((resource_id, warnings)) => {
                let outcome = if warnings.is_empty() {
                    TerminalOutcome::Completed
                } else {
                    TerminalOutcome::CompletedWithWarnings
                };
                let url = self.transport.resource_url(&resource_id);
                (outcome, Some(resource_id), url, None, warnings)
            }
            Err(e) => {
                tracing::debug!(session = %session.session_id, error = %e, "upload failed");
                (TerminalOutcome::Failed, None, None, Some(e.report()), Vec::new())
            }
        };

        let state = match outcome {
            TerminalOutcome::Completed => UploadState::Completed,
            TerminalOutcome::CompletedWithWarnings => UploadState::CompletedWithWarnings,
            TerminalOutcome::Failed => UploadState::Failed,
        };
        session.transition(state);
        reporter.on_state(&session.session_id, state);

        let event = TerminalEvent {
            session_id: session.session_id.clone(),
            outcome,
            resource_id,
            resource_url,
            error,
            warnings,
            elapsed_seconds: started.elapsed().as_secs_f64(),
            attempts_per_chunk,
            timestamp: Utc::now(),
        };
        reporter.on_terminal(&event);
        event
    }

    async fn drive(
        &self,
        session: &mut UploadSession,
        request: &UploadRequest,
        source: &mut dyn ChunkSource,
        reporter: &dyn ProgressReporter,
        cancel: &CancellationToken,
        attempts_per_chunk: &mut BTreeMap<u64, u32>,
    ) -> Result<(String, Vec<FinalizeWarning>), UploadError> {
        if cancel.is_cancelled() {
            return Err(UploadError::Cancelled {
                offset: 0,
                attempts: 0,
            });
        }

        // Opening is a single attempt: nothing has been sent yet, so the
        // caller can simply start over.
        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(UploadError::Cancelled { offset: 0, attempts: 0 });
            }
            r = tokio::time::timeout(
                self.config.socket_timeout,
                self.transport.open_session(&request.metadata, session.total_bytes),
            ) => r,
        };
        let handle = match opened {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(format!(
                "no response within {}s",
                self.config.socket_timeout.as_secs()
            ))),
        }
        .map_err(|source| UploadError::SessionOpen {
            kind: self.policy.classify(&source),
            source,
        })?;

        session.session_id = handle.id.clone();
        session.transition(UploadState::Transferring);
        reporter.on_state(&session.session_id, UploadState::Transferring);

        let resource_id = self
            .transfer(session, &handle, source, reporter, cancel, attempts_per_chunk)
            .await?;

        session.transition(UploadState::Finalizing);
        reporter.on_state(&session.session_id, UploadState::Finalizing);

        let warnings = self
            .run_finalize_steps(&resource_id, &request.finalize, cancel)
            .await;
        Ok((resource_id, warnings))
    }

    /// The chunk loop. Returns the created resource id once every byte is
    /// acknowledged.
    async fn transfer(
        &self,
        session: &mut UploadSession,
        handle: &SessionHandle,
        source: &mut dyn ChunkSource,
        reporter: &dyn ProgressReporter,
        cancel: &CancellationToken,
        attempts_per_chunk: &mut BTreeMap<u64, u32>,
    ) -> Result<String, UploadError> {
        let mut detector =
            StallDetector::new(self.config.stall_timeout, session.bytes_transferred());
        let mut meter = ThroughputMeter::new(session.bytes_transferred());
        let mut resource_id: Option<String> = None;
        // Both reset whenever the offset moves.
        let mut attempts: u32 = 0;
        let mut failures: u32 = 0;

        while !session.is_complete() {
            let (offset, len) = session.next_range();
            if cancel.is_cancelled() {
                return Err(UploadError::Cancelled { offset, attempts });
            }

            let payload = source
                .read_at(offset, len)
                .await
                .map_err(|source| UploadError::Source { offset, source })?;

            attempts += 1;
            *attempts_per_chunk.entry(offset).or_insert(0) += 1;
            tracing::debug!(session = %handle.id, offset, len, attempt = attempts, "sending chunk");

            let probe = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(UploadError::Cancelled { offset, attempts });
                }
                p = detector.probe(self.transport.send_chunk(handle, offset, payload)) => p,
            };

            match self.policy.evaluate(probe) {
                AttemptOutcome::Success(ack) => {
                    let delta = session.advance(ack.bytes_acked)?;
                    if ack.is_final {
                        if !session.is_complete() {
                            return Err(UploadError::Protocol {
                                acked: ack.bytes_acked,
                                total: session.total_bytes,
                            });
                        }
                        resource_id = ack.resource_id;
                    }
                    if delta == 0 {
                        // Same offset goes out again after a short pause; the
                        // stall detector bounds how long this can repeat.
                        tracing::debug!(offset, acked = ack.bytes_acked, "chunk acknowledged without progress");
                        if !sleep_or_cancel(self.resend_pause(), cancel).await {
                            return Err(UploadError::Cancelled { offset, attempts });
                        }
                        continue;
                    }
                    attempts = 0;
                    failures = 0;

                    let bytes = session.bytes_transferred();
                    let throughput = meter.sample(bytes);
                    reporter.on_progress(&ProgressEvent {
                        session_id: handle.id.clone(),
                        percent: session.percent(),
                        bytes_transferred: bytes,
                        total_bytes: session.total_bytes,
                        throughput_bytes_per_sec: throughput,
                        eta_seconds: eta_seconds(session.total_bytes - bytes, throughput),
                        timestamp: Utc::now(),
                    });
                }
                AttemptOutcome::RecoverableFailure { kind, error } => {
                    failures += 1;
                    let Some(delay) = self.policy.next_delay(failures) else {
                        return Err(UploadError::RetriesExhausted {
                            offset,
                            attempts,
                            retries: failures - 1,
                            kind,
                            source: error,
                        });
                    };
                    tracing::warn!(
                        session = %handle.id,
                        kind = %kind,
                        "Retryable error at offset {} (retry {}/{}), retrying in {}s: {}",
                        offset,
                        failures,
                        self.policy.retry_config().max_retries,
                        delay.as_secs(),
                        error
                    );
                    if !sleep_or_cancel(delay, cancel).await {
                        return Err(UploadError::Cancelled { offset, attempts });
                    }
                }
                AttemptOutcome::FatalFailure { kind, cause } => {
                    return Err(match cause {
                        FatalCause::Transport(source) => UploadError::Rejected {
                            offset,
                            attempts,
                            kind,
                            source,
                        },
                        FatalCause::Stalled { idle, last_error } => UploadError::Stalled {
                            offset,
                            attempts,
                            idle,
                            limit: self.config.stall_timeout,
                            last_error,
                        },
                    });
                }
            }
        }

        resource_id.ok_or(UploadError::MissingResource)
    }

    /// Apply finalize steps in order. The resource already exists, so a
    /// failing step is recorded as a warning and the next step still runs.
    async fn run_finalize_steps(
        &self,
        resource_id: &str,
        steps: &[FinalizeStep],
        cancel: &CancellationToken,
    ) -> Vec<FinalizeWarning> {
        let mut warnings = Vec::new();
        for step in steps {
            let name = step.name();
            let result = retry_with_backoff(
                self.policy.retry_config(),
                cancel,
                |e: &TransportError| {
                    if self.policy.classify(e).is_recoverable() {
                        RetryAction::Retry
                    } else {
                        RetryAction::Abort
                    }
                },
                || self.finalize_once(resource_id, step),
            )
            .await;

            let warning = match result {
                Ok(()) => {
                    tracing::debug!(resource = resource_id, step = %name, "finalize step applied");
                    continue;
                }
                Err(RetryError::Aborted { error, attempts })
                | Err(RetryError::Exhausted { error, attempts }) => FinalizeWarning {
                    step: name,
                    kind: self.policy.classify(&error),
                    attempts,
                    message: error.to_string(),
                },
                Err(RetryError::Cancelled { attempts }) => FinalizeWarning {
                    step: name,
                    kind: FailureKind::Cancelled,
                    attempts,
                    message: "cancelled before the step completed".to_string(),
                },
            };
            warnings.push(warning);
        }
        warnings
    }

    /// Pause before re-sending an offset the platform acknowledged without
    /// moving forward.
    fn resend_pause(&self) -> Duration {
        Duration::from_secs(self.policy.retry_config().base_delay_secs)
    }

    async fn finalize_once(&self, resource_id: &str, step: &FinalizeStep) -> Result<(), TransportError> {
        match tokio::time::timeout(
            self.config.socket_timeout,
            self.transport.finalize(resource_id, step),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(format!(
                "no response within {}s",
                self.config.socket_timeout.as_secs()
            ))),
        }
    }
}
