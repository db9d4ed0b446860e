//! Retry with exponential backoff
//!
//! Wraps one remote call. Transient failures (as reported by
//! [`Retryable::is_retryable`]) are retried up to `max_retries` extra times
//! with delay `min(max_delay, base_delay * 2^attempt)`; anything else is
//! returned immediately.

use std::time::Duration;

/// Classification of an error as worth retrying
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

/// Backoff parameters for one class of remote call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts after the first (total attempts = max_retries + 1)
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        use dirtax_common::config::defaults;
        Self {
            max_retries: defaults::MAX_RETRIES,
            base_delay: Duration::from_millis(defaults::BASE_DELAY_MS),
            max_delay: Duration::from_millis(defaults::MAX_DELAY_MS),
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay before retry number `attempt + 1` (attempt is zero-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Run `operation` until it succeeds, fails permanently, or retries run out.
    ///
    /// The closure receives the zero-based attempt number so callers can vary
    /// the request (for example a stricter prompt) on later attempts.
    pub async fn run<F, Fut, T, E>(&self, operation_name: &str, mut operation: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        E: Retryable + std::fmt::Display,
    {
        let mut attempt = 0u32;

        loop {
            if attempt > 0 {
                tracing::debug!(operation = operation_name, attempt, "Retrying remote call");
            }

            match operation(attempt).await {
                Ok(value) => {
                    if attempt > 0 {
                        tracing::debug!(
                            operation = operation_name,
                            attempt,
                            "Remote call succeeded after retry"
                        );
                    }
                    return Ok(value);
                }
                Err(err) => {
                    if !err.is_retryable() {
                        return Err(err);
                    }
                    if attempt >= self.max_retries {
                        tracing::error!(
                            operation = operation_name,
                            attempts = attempt + 1,
                            error = %err,
                            "Remote call failed: retries exhausted"
                        );
                        return Err(err);
                    }

                    let backoff = self.delay_for(attempt);
                    tracing::warn!(
                        operation = operation_name,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %err,
                        "Transient failure, will retry after backoff"
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
            }
        }
    }
}
