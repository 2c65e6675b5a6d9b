//! Retry with exponential backoff and provider retry-after hints.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::{RetryReason, RociError};

/// Retry policy configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt. Zero disables retrying.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_backoff: Duration,
    /// Backoff multiplier applied after every retry.
    pub multiplier: f64,
    /// Provider hints shorter than this are always honored.
    pub max_retry_after: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_backoff: Duration::from_millis(2000),
            multiplier: 2.0,
            max_retry_after: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before the next attempt.
    ///
    /// A provider hint wins when it is non-negative and either below
    /// `max_retry_after` or shorter than the computed backoff.
    pub fn retry_delay(&self, error: &RociError, backoff: Duration) -> Duration {
        match error.retry_after_ms().map(Duration::from_millis) {
            Some(hint) if hint < self.max_retry_after || hint < backoff => hint,
            _ => backoff,
        }
    }

    /// Backoff after `current`, saturating instead of overflowing.
    ///
    /// Negative or NaN multipliers keep the current delay.
    pub fn next_backoff(&self, current: Duration) -> Duration {
        let scaled = current.as_secs_f64() * self.multiplier;
        if scaled.is_nan() || scaled < 0.0 {
            return current;
        }
        Duration::try_from_secs_f64(scaled).unwrap_or(Duration::MAX)
    }

    /// Execute an async operation with retry.
    pub async fn execute<F, Fut, T>(&self, operation: F) -> Result<T, RociError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RociError>>,
    {
        self.execute_with_cancel(&CancellationToken::new(), operation)
            .await
    }

    /// Execute with retry, giving up with [`RociError::Aborted`] once `cancel` fires.
    pub async fn execute_with_cancel<F, Fut, T>(
        &self,
        cancel: &CancellationToken,
        mut operation: F,
    ) -> Result<T, RociError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RociError>>,
    {
        let mut backoff = self.initial_backoff;
        let mut errors: Vec<RociError> = Vec::new();

        loop {
            if cancel.is_cancelled() {
                return Err(RociError::Aborted);
            }

            let outcome = tokio::select! {
                outcome = operation() => outcome,
                _ = cancel.cancelled() => return Err(RociError::Aborted),
            };
            let error = match outcome {
                Ok(value) => return Ok(value),
                Err(e) if e.is_abort() || self.max_retries == 0 => return Err(e),
                Err(e) => e,
            };

            let message = error.to_string();
            let retryable = error.is_retryable();
            let delay = self.retry_delay(&error, backoff);
            errors.push(error);
            let attempts = errors.len();

            if attempts > self.max_retries as usize {
                return Err(RociError::RetryExhausted {
                    message: format!("Failed after {attempts} attempts. Last error: {message}"),
                    reason: RetryReason::MaxRetriesExceeded,
                    errors,
                });
            }

            if !retryable {
                if attempts == 1 {
                    return Err(errors.remove(0));
                }
                return Err(RociError::RetryExhausted {
                    message: format!(
                        "Failed after {attempts} attempts with non-retryable error: '{message}'"
                    ),
                    reason: RetryReason::ErrorNotRetryable,
                    errors,
                });
            }

            tracing::warn!(
                attempt = attempts,
                max_retries = self.max_retries,
                delay_ms = delay.as_millis() as u64,
                error = %message,
                "Retrying after error"
            );

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => return Err(RociError::Aborted),
            }

            backoff = self.next_backoff(backoff);
        }
    }
}
