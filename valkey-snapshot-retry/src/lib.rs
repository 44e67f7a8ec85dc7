//! Retry and backoff policy for valkey-snapshot artifact uploads
//!
//! Uploads are retried only when the caller classifies the failure as
//! transient and only up to a bounded number of attempts. A policy with zero
//! retries runs the operation exactly once.

use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use futures::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Terminal outcome of a retried operation
#[derive(Error, Debug)]
pub enum RetryError<E: std::error::Error + 'static> {
    #[error("Operation '{operation}' failed after {attempts} attempt(s): {source}")]
    Exhausted {
        operation: &'static str,
        attempts: usize,
        #[source]
        source: E,
    },
    #[error("Permanent error in '{operation}' on attempt {attempts}: {source}")]
    Permanent {
        operation: &'static str,
        attempts: usize,
        #[source]
        source: E,
    },
}

impl<E: std::error::Error + 'static> RetryError<E> {
    /// Number of attempts made before giving up
    pub fn attempts(&self) -> usize {
        match self {
            RetryError::Exhausted { attempts, .. } | RetryError::Permanent { attempts, .. } => {
                *attempts
            }
        }
    }

    /// Unwrap the error returned by the last attempt
    pub fn into_inner(self) -> E {
        match self {
            RetryError::Exhausted { source, .. } | RetryError::Permanent { source, .. } => source,
        }
    }
}

/// Result type for retry operations
pub type RetryResult<T, E> = std::result::Result<T, RetryError<E>>;

/// Trait for categorizing errors as transient or permanent
pub trait RetryableError {
    /// Returns true if the error is transient and the operation should be retried
    fn is_transient(&self) -> bool;

    /// Returns true if the error is permanent and retries should stop
    fn is_permanent(&self) -> bool {
        !self.is_transient()
    }
}

/// Bounded exponential backoff policy
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt (0 = run once)
    pub max_retries: usize,
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub multiplier: f64,
}

impl RetryPolicy {
    /// Single attempt, no retry
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::cloud_storage()
        }
    }

    /// Policy tuned for object storage round trips
    pub fn cloud_storage() -> Self {
        Self {
            max_retries: 3,
            initial_interval: Duration::from_millis(500),
            max_interval: Duration::from_secs(10),
            multiplier: 1.5,
        }
    }

    /// Object storage policy with an explicit retry budget
    pub fn with_retries(max_retries: usize) -> Self {
        Self {
            max_retries,
            ..Self::cloud_storage()
        }
    }

    /// Total attempts permitted, including the first
    pub fn max_attempts(&self) -> usize {
        self.max_retries + 1
    }

    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.initial_interval)
            .with_max_interval(self.max_interval)
            .with_multiplier(self.multiplier)
            // attempts bound the loop, not wall-clock time
            .with_max_elapsed_time(None)
            .build()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

/// Execute an operation, retrying transient failures with exponential backoff
///
/// The closure receives the 1-based attempt number.
pub async fn with_backoff<F, Fut, T, E>(
    op_name: &'static str,
    policy: &RetryPolicy,
    mut f: F,
) -> RetryResult<T, E>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: std::error::Error + RetryableError + 'static,
{
    let mut backoff = policy.backoff();
    let max_attempts = policy.max_attempts();
    let mut attempt = 1;

    loop {
        debug!("Attempting operation '{}' (attempt {})", op_name, attempt);

        match f(attempt).await {
            Ok(result) => {
                if attempt > 1 {
                    debug!(
                        "Operation '{}' succeeded after {} attempts",
                        op_name, attempt
                    );
                }
                return Ok(result);
            }
            Err(err) if err.is_permanent() => {
                warn!(
                    "Operation '{}' failed permanently on attempt {}: {}",
                    op_name, attempt, err
                );
                return Err(RetryError::Permanent {
                    operation: op_name,
                    attempts: attempt,
                    source: err,
                });
            }
            Err(err) => {
                if attempt >= max_attempts {
                    return Err(RetryError::Exhausted {
                        operation: op_name,
                        attempts: attempt,
                        source: err,
                    });
                }

                let delay = backoff.next_backoff().unwrap_or(policy.max_interval);
                warn!(
                    "Operation '{}' failed on attempt {}: {} (retrying in {:?})",
                    op_name, attempt, err, delay
                );

                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Debug, Error)]
    enum TestError {
        #[error("connection refused")]
        Refused,
        #[error("access denied")]
        Denied,
    }

    impl RetryableError for TestError {
        fn is_transient(&self) -> bool {
            matches!(self, TestError::Refused)
        }
    }

    #[tokio::test]
    async fn test_successful_operation() {
        let result: RetryResult<&str, TestError> =
            with_backoff("test_op", &RetryPolicy::none(), |_attempt| async {
                Ok("success")
            })
            .await;

        assert_eq!(result.unwrap(), "success");
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_then_success() {
        let attempt_count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempt_count);

        let result = with_backoff("test_op", &RetryPolicy::with_retries(3), move |_attempt| {
            let count = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if count < 2 {
                    Err(TestError::Refused)
                } else {
                    Ok("success")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "success");
        assert_eq!(attempt_count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_are_bounded() {
        let attempt_count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempt_count);

        let result: RetryResult<(), TestError> =
            with_backoff("test_op", &RetryPolicy::with_retries(2), move |_attempt| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(TestError::Refused) }
            })
            .await;

        let err = result.unwrap_err();
        assert!(matches!(err, RetryError::Exhausted { attempts: 3, .. }));
        assert_eq!(attempt_count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_no_retry_policy_runs_once() {
        let attempt_count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempt_count);

        let result: RetryResult<(), TestError> =
            with_backoff("test_op", &RetryPolicy::none(), move |_attempt| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(TestError::Refused) }
            })
            .await;

        assert_eq!(result.unwrap_err().attempts(), 1);
        assert_eq!(attempt_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_permanent_failure() {
        let result: RetryResult<&str, TestError> =
            with_backoff("test_op", &RetryPolicy::with_retries(5), |_attempt| async {
                Err(TestError::Denied)
            })
            .await;

        let err = result.unwrap_err();
        assert!(matches!(err, RetryError::Permanent { attempts: 1, .. }));
        assert!(matches!(err.into_inner(), TestError::Denied));
    }
}
