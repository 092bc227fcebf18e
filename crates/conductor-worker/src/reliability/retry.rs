//! Retry policy for reporting task results

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::client::ServerError;

/// Fixed-delay retry policy applied to the report step
///
/// A failed report is attempted again up to `update_retry_count` times,
/// sleeping `sleep_when_retry` between attempts. Polling is never retried.
///
/// # Example
///
/// ```
/// use conductor_worker::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::new(3, Duration::from_millis(500));
/// assert_eq!(policy.max_attempts(), 4);
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Additional attempts after the first failed one
    pub update_retry_count: u32,

    /// Delay between attempts
    #[serde(with = "crate::config::duration_millis")]
    pub sleep_when_retry: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            update_retry_count: 3,
            sleep_when_retry: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    pub fn new(update_retry_count: u32, sleep_when_retry: Duration) -> Self {
        Self {
            update_retry_count,
            sleep_when_retry,
        }
    }

    /// Create a policy that never retries
    pub fn no_retry() -> Self {
        Self::new(0, Duration::ZERO)
    }

    pub fn with_update_retry_count(mut self, count: u32) -> Self {
        self.update_retry_count = count;
        self
    }

    pub fn with_sleep_when_retry(mut self, sleep: Duration) -> Self {
        self.sleep_when_retry = sleep;
        self
    }

    /// Total attempts, including the first
    pub fn max_attempts(&self) -> u32 {
        self.update_retry_count.saturating_add(1)
    }

    /// Check if there are remaining attempts after `current_attempt` (1-based)
    pub fn has_attempts_remaining(&self, current_attempt: u32) -> bool {
        current_attempt < self.max_attempts()
    }

    /// Delay before `attempt` (1-based); the first attempt starts immediately
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            Duration::ZERO
        } else {
            self.sleep_when_retry
        }
    }

    /// Run `operation` until it succeeds, fails permanently or runs out of attempts
    ///
    /// The closure receives the 1-based attempt number. On success returns the
    /// value together with the number of attempts used.
    pub async fn retry<T, E, F, Fut>(
        &self,
        operation: &str,
        mut f: F,
    ) -> Result<(T, u32), RetryFailure<E>>
    where
        E: Retryable + Display,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 1;
        loop {
            match f(attempt).await {
                Ok(value) => return Ok((value, attempt)),
                Err(error) if !error.is_retryable() => {
                    return Err(RetryFailure {
                        error,
                        attempts: attempt,
                        exhausted: false,
                    });
                }
                Err(error) => {
                    if !self.has_attempts_remaining(attempt) {
                        return Err(RetryFailure {
                            error,
                            attempts: attempt,
                            exhausted: true,
                        });
                    }
                    warn!(
                        operation,
                        attempt,
                        max_attempts = self.max_attempts(),
                        error = %error,
                        "Attempt failed, retrying"
                    );
                    attempt += 1;
                    tokio::time::sleep(self.delay_for_attempt(attempt)).await;
                }
            }
        }
    }
}

/// Errors that tell whether the failed call may be attempted again
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

impl Retryable for ServerError {
    fn is_retryable(&self) -> bool {
        ServerError::is_retryable(self)
    }
}

/// Final error of a retried operation
#[derive(Debug)]
pub struct RetryFailure<E> {
    pub error: E,

    /// Attempts made, including the first
    pub attempts: u32,

    /// `true` when every attempt failed, `false` when a non-retryable error stopped early
    pub exhausted: bool,
}
