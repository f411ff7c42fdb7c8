//! Bounded retry loop shared by every request/response call.
//!
//! All failures are retried the same way: a 4xx response is retried exactly like a
//! refused connection. The loop waits a fixed delay between attempts and never after
//! the last one.

use crate::error::TransportError;
use std::future::Future;
use std::time::Duration;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one.
    pub max_attempts: u32,
    /// Fixed wait between two attempts.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            delay: DEFAULT_RETRY_DELAY,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Run `attempt_fn` until it succeeds or the attempts are exhausted.
    ///
    /// `attempt_fn` receives the 1-based attempt number. On exhaustion the error of
    /// the last attempt is returned.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut attempt_fn: F) -> Result<T, TransportError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, TransportError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match attempt_fn(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        log::info!("{} succeeded on attempt {}/{}", operation, attempt, max_attempts);
                    }
                    return Ok(value);
                }
                Err(err) if attempt >= max_attempts => {
                    log::error!(
                        "{} failed after {} attempt(s): {}",
                        operation,
                        max_attempts,
                        err
                    );
                    return Err(err);
                }
                Err(err) => {
                    log::warn!(
                        "{} failed (attempt {}/{}), retrying in {:?}: {}",
                        operation,
                        attempt,
                        max_attempts,
                        self.delay,
                        err
                    );
                    tokio::time::sleep(self.delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
