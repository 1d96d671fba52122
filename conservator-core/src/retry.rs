use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_MAX_RETRIES: u32 = 10;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum RetryError<E> {
    #[error("operation cancelled")]
    Cancelled,
    #[error(transparent)]
    Exhausted(E),
}

/// Fixed-delay retry for transport-level failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: u32,
    retry_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, retry_delay: Duration) -> Self {
        Self {
            max_retries: max_retries.max(1),
            retry_delay,
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn retry_delay(&self) -> Duration {
        self.retry_delay
    }

    /// Runs `attempt` until it succeeds or `max_retries` attempts have failed.
    ///
    /// Every error returned by `attempt` is treated as retryable; callers keep
    /// non-retryable outcomes inside `Ok`. The delay is slept between attempts
    /// only, never after the last one. Cancellation wins over both the attempt
    /// and the delay.
    pub async fn run<T, E, F, Fut>(
        &self,
        cancel: &CancellationToken,
        mut attempt: F,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut last_error = None;
        for number in 1..=self.max_retries {
            if cancel.is_cancelled() {
                return Err(RetryError::Cancelled);
            }
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(RetryError::Cancelled),
                outcome = attempt(number) => outcome,
            };
            match outcome {
                Ok(value) => return Ok(value),
                Err(err) => {
                    tracing::warn!(
                        attempt = number,
                        max_retries = self.max_retries,
                        "transport failure: {err}"
                    );
                    last_error = Some(err);
                }
            }
            if number < self.max_retries {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(RetryError::Cancelled),
                    _ = tokio::time::sleep(self.retry_delay) => {}
                }
            }
        }
        match last_error {
            Some(err) => Err(RetryError::Exhausted(err)),
            None => Err(RetryError::Cancelled),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY)
    }
}
