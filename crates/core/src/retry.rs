//! Bounded retry with a fixed delay.
//!
//! Every external call in the pipeline goes through [`RetryPolicy::run`]:
//! transient errors are retried up to `max_attempts` with `delay` between
//! attempts, anything else is returned immediately.

use std::future::Future;
use std::time::Duration;

use serde::Deserialize;

use crate::{Result, StudyDeckError};

/// Attempt budget and pause between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one (minimum 1).
    pub max_attempts: u32,
    /// Pause after a failed attempt.
    #[serde(with = "crate::config::duration_secs")]
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 3, delay: Duration::from_secs(5) }
    }
}

impl RetryPolicy {
    /// Creates a policy with the given attempt budget and delay.
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self { max_attempts, delay }
    }

    /// A policy that never waits, for tests and dry runs.
    pub fn immediate(max_attempts: u32) -> Self {
        Self { max_attempts, delay: Duration::ZERO }
    }

    /// Runs `operation` until it succeeds, fails with a non-transient error,
    /// or the attempt budget is spent.
    ///
    /// Exhaustion is reported as [`StudyDeckError::RetriesExhausted`] carrying
    /// the last error message.
    pub async fn run<T, F, Fut>(&self, operation_name: &str, mut operation: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;

            match operation(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::debug!(operation = operation_name, attempt, "Succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) if !err.is_transient() => {
                    tracing::warn!(operation = operation_name, attempt, error = %err, "Irrecoverable error");
                    return Err(err);
                }
                Err(err) if attempt >= max_attempts => {
                    tracing::warn!(operation = operation_name, attempt, error = %err, "Attempt budget exhausted");
                    return Err(StudyDeckError::RetriesExhausted {
                        operation: operation_name.to_string(),
                        attempts: attempt,
                        last_error: err.to_string(),
                    });
                }
                Err(err) => {
                    tracing::warn!(
                        operation = operation_name,
                        attempt,
                        max_attempts,
                        delay_ms = self.delay.as_millis() as u64,
                        error = %err,
                        "Attempt failed, retrying"
                    );
                    if !self.delay.is_zero() {
                        tokio::time::sleep(self.delay).await;
                    }
                }
            }
        }
    }
}
