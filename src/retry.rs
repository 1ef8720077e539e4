use std::future::Future;
use std::time::Duration;

use rand::Rng as _;
use tokio_util::sync::CancellationToken;

/// Retry decision returned by the error classifier callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryAction {
    Retry,
    Abort,
}

/// Capped exponential backoff.
///
/// `max_retries` counts retries after the first attempt, so one unit of
/// work gets at most `max_retries + 1` attempts. Jitter is off by default so
/// the schedule is exact (2, 4, 8, 16, 32s); batch runs can turn it on so
/// concurrent uploads hitting the same 5xx don't retry in lockstep.
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_secs: u64,
    pub max_delay_secs: u64,
    pub jitter_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay_secs: 2,
            max_delay_secs: 32,
            jitter_secs: 0,
        }
    }
}

impl RetryConfig {
    /// Compute the delay before a given retry (0-indexed: retry 0 follows the
    /// first failed attempt).
    ///
    /// Formula: `min(base_delay * 2^retry, max_delay) + random_jitter(0..jitter)`
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let exp_delay = self
            .base_delay_secs
            .saturating_mul(1u64.checked_shl(retry).unwrap_or(u64::MAX));
        let capped = exp_delay.min(self.max_delay_secs);
        let jitter = if self.jitter_secs > 0 {
            rand::thread_rng().gen_range(0..self.jitter_secs)
        } else {
            0
        };
        Duration::from_secs(capped + jitter)
    }

    /// Whether another retry is allowed after `retries` have been made.
    pub fn has_retries_left(&self, retries: u32) -> bool {
        retries < self.max_retries
    }
}

/// Sleep for `delay` unless `cancel` fires first.
///
/// Returns `false` when the sleep was interrupted by cancellation.
pub async fn sleep_or_cancel(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

/// Why [`retry_with_backoff`] gave up.
#[derive(Debug)]
pub enum RetryError<E> {
    /// The classifier returned [`RetryAction::Abort`].
    Aborted { error: E, attempts: u32 },
    /// Every allowed attempt failed with a retryable error.
    Exhausted { error: E, attempts: u32 },
    /// Cancellation was observed before or during a backoff wait.
    Cancelled { attempts: u32 },
}

impl<E> RetryError<E> {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Aborted { attempts, .. }
            | RetryError::Exhausted { attempts, .. }
            | RetryError::Cancelled { attempts } => *attempts,
        }
    }
}

/// Retry an async operation with exponential backoff.
///
/// - `config`: retry configuration
/// - `cancel`: checked before every attempt and raced against each backoff
/// - `classifier`: inspects an error and returns `Retry` or `Abort`
/// - `operation`: the async closure to retry
///
/// Returns the first `Ok` result, or a [`RetryError`] carrying the last error
/// and the number of attempts made.
pub async fn retry_with_backoff<F, Fut, T, E, C>(
    config: &RetryConfig,
    cancel: &CancellationToken,
    classifier: C,
    operation: F,
) -> Result<T, RetryError<E>>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: Fn(&E) -> RetryAction,
    E: std::fmt::Display,
{
    let total_attempts = config.max_retries.saturating_add(1); // 1 initial + max_retries retries
    let mut attempts = 0u32;

    loop {
        if cancel.is_cancelled() {
            return Err(RetryError::Cancelled { attempts });
        }
        attempts += 1;
        let e = match operation().await {
            Ok(val) => return Ok(val),
            Err(e) => e,
        };
        if classifier(&e) == RetryAction::Abort {
            return Err(RetryError::Aborted { error: e, attempts });
        }
        if attempts >= total_attempts {
            return Err(RetryError::Exhausted { error: e, attempts });
        }
        let delay = config.delay_for_retry(attempts - 1);
        tracing::warn!(
            "Retryable error (attempt {}/{}), retrying in {}s: {}",
            attempts,
            total_attempts,
            delay.as_secs(),
            e
        );
        if !sleep_or_cancel(delay, cancel).await {
            return Err(RetryError::Cancelled { attempts });
        }
    }
}
