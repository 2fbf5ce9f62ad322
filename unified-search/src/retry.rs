//! Exponential-backoff retry executor used by every remote call.
//!
//! An operation is attempted up to `max_retries + 1` times. The delay before
//! retry `k` (k ≥ 1) is `base_delay * 2^(k-1)`. Intermediate failures are
//! logged and retried; the final failure is returned to the caller. Backoff
//! sleeps race a [`CancellationToken`] so a cancelled caller does not wait.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::SearchError;

/// Retry policy for backend calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    /// Retries after the first attempt (0 = a single attempt).
    pub max_retries: u32,
    /// Delay before the first retry; doubles on each subsequent retry.
    pub base_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `retry` (1-based). Zero for `retry == 0`.
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }
        let factor = 2u32.saturating_pow(retry - 1);
        self.base_delay.saturating_mul(factor)
    }

    /// Sum of every backoff delay when all attempts fail:
    /// `base_delay * (2^max_retries - 1)`.
    pub fn total_backoff(&self) -> Duration {
        (1..=self.max_retries)
            .map(|k| self.delay_for_retry(k))
            .fold(Duration::ZERO, Duration::saturating_add)
    }
}

/// Run `op` under `config`, retrying retryable [`SearchError`]s.
///
/// Non-retryable errors (validation, cancellation) are returned at once.
///
/// # Errors
///
/// Returns the error of the final attempt, or [`SearchError::Cancelled`] if
/// `cancel` fires before or during a backoff sleep.
pub async fn retry_with_backoff<T, F, Fut>(
    config: RetryConfig,
    cancel: &CancellationToken,
    label: &str,
    mut op: F,
) -> Result<T, SearchError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SearchError>>,
{
    let mut retry = 0u32;
    loop {
        if cancel.is_cancelled() {
            return Err(SearchError::Cancelled);
        }

        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(SearchError::Cancelled),
            outcome = op() => outcome,
        };

        let error = match outcome {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };

        if !error.is_retryable() || retry >= config.max_retries {
            if retry > 0 {
                tracing::warn!(%label, attempts = retry + 1, error = %error, "giving up after retries");
            }
            return Err(error);
        }

        retry += 1;
        let delay = config.delay_for_retry(retry);
        tracing::warn!(
            %label,
            attempt = retry,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "attempt failed, backing off"
        );

        tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(SearchError::Cancelled),
            () = tokio::time::sleep(delay) => {}
        }
    }
}
