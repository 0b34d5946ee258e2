//! # Retry Policy Module
//!
//! Bounded retry-on-timeout with a fixed delay between attempts.
//!
//! Only timeout-class failures ([`QueueError::is_timeout`]) are retried. Any
//! other failure is returned immediately without consuming further attempts.

use crate::error::{QueueError, ValidationError};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

#[cfg(test)]
#[path = "retry_tests.rs"]
mod tests;

/// Retry policy configuration: attempt count and fixed inter-attempt delay
///
/// # Examples
///
/// ```rust
/// use job_queue_runtime::retry::RetryPolicy;
/// use std::time::Duration;
///
/// // Default policy: 3 attempts, 1s apart
/// let policy = RetryPolicy::default();
///
/// // Custom policy
/// let policy = RetryPolicy::new(5, Duration::from_millis(250)).unwrap();
/// assert_eq!(policy.attempts(), 5);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    attempts: u32,
    delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Create a new retry policy
    ///
    /// # Arguments
    ///
    /// * `attempts` - Total number of attempts, at least 1
    /// * `delay` - Wait between a timed-out attempt and the next one
    ///
    /// # Errors
    ///
    /// Returns a validation error when `attempts` is zero.
    pub fn new(attempts: u32, delay: Duration) -> Result<Self, ValidationError> {
        if attempts == 0 {
            return Err(ValidationError::OutOfRange {
                field: "retry.attempts".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        Ok(Self { attempts, delay })
    }

    /// Total number of attempts
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Delay between attempts
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Check if another attempt may follow `attempt` (1-based)
    ///
    /// # Examples
    ///
    /// ```rust
    /// use job_queue_runtime::retry::RetryPolicy;
    ///
    /// let policy = RetryPolicy::default(); // attempts = 3
    ///
    /// assert!(policy.should_retry(1));
    /// assert!(policy.should_retry(2));
    /// assert!(!policy.should_retry(3));
    /// ```
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.attempts
    }

    /// Run `operation` until it succeeds, fails with a non-timeout error, or
    /// the attempts are exhausted.
    ///
    /// At most `attempts - 1` delays occur. The last timeout is returned
    /// unchanged.
    pub async fn execute<F, Fut, T>(&self, mut operation: F) -> Result<T, QueueError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, QueueError>>,
    {
        let mut attempt = 1;
        loop {
            match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(attempt = attempt, "Operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(error) if error.is_timeout() && self.should_retry(attempt) => {
                    warn!(
                        attempt = attempt,
                        max_attempts = self.attempts,
                        delay_ms = self.delay.as_millis() as u64,
                        error = %error,
                        "Operation timed out, retrying"
                    );
                    tokio::time::sleep(self.delay).await;
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }
}
