//! Retry utilities with fixed or exponential backoff.
//!
//! Wraps provider calls that race eventual consistency on the cloud side:
//! accepting a freshly requested VPC peering, creating routes before the
//! peering is visible, deleting a security group that still has dependents,
//! or updating a node that someone else just modified.
//!
//! # Example
//!
//! ```ignore
//! use cloud_prepare_common::retry::{retry_with_backoff, RetryPolicy};
//!
//! let policy = RetryPolicy::fixed(3, Duration::from_secs(10));
//! retry_with_backoff(&policy, "accept_peering", || async {
//!     ec2.accept_vpc_peering(&id).await.map_err(|e| wrap(e))
//! })
//! .await?;
//! ```

use std::fmt;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{error, warn};

use crate::Error;

/// Predicate deciding whether a failed attempt should be retried
pub type RetryPredicate = fn(&Error) -> bool;

/// Retry policy value object.
///
/// Injected into provider adapters so retry behaviour can be tested without
/// any network calls.
#[derive(Clone, Copy)]
pub struct RetryPolicy {
    /// Maximum number of attempts (0 = infinite)
    pub max_attempts: u32,
    /// Initial delay between attempts
    pub initial_delay: Duration,
    /// Maximum delay between attempts
    pub max_delay: Duration,
    /// Multiplier applied to the delay after each attempt
    pub backoff_multiplier: f64,
    /// Randomize each delay between 0.5x and 1.5x
    pub jitter: bool,
    /// Which errors are worth another attempt
    pub retryable: RetryPredicate,
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("initial_delay", &self.initial_delay)
            .field("max_delay", &self.max_delay)
            .field("backoff_multiplier", &self.backoff_multiplier)
            .field("jitter", &self.jitter)
            .finish_non_exhaustive()
    }
}

fn always(_: &Error) -> bool {
    true
}

fn transient(err: &Error) -> bool {
    err.is_retryable()
}

fn conflict(err: &Error) -> bool {
    err.is_conflict()
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter: true,
            retryable: transient,
        }
    }
}

impl RetryPolicy {
    /// A fixed number of attempts with a constant sleep in between.
    ///
    /// Every error is retried; used around VPC peering accept and route
    /// creation, which fail until the peering propagates.
    pub fn fixed(attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: attempts,
            initial_delay: delay,
            max_delay: delay,
            backoff_multiplier: 1.0,
            jitter: false,
            retryable: always,
        }
    }

    /// Exponential backoff for `steps` attempts, capped at `cap`.
    ///
    /// Only transient provider errors are retried.
    pub fn exponential(steps: u32, initial: Duration, factor: f64, cap: Duration) -> Self {
        Self {
            max_attempts: steps,
            initial_delay: initial,
            max_delay: cap,
            backoff_multiplier: factor,
            jitter: false,
            retryable: transient,
        }
    }

    /// Short jittered retries on Kubernetes update conflicts
    pub fn on_conflict() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(10),
            backoff_multiplier: 1.0,
            jitter: true,
            retryable: conflict,
        }
    }

    /// Replace the retryable-error predicate
    pub fn retry_if(mut self, retryable: RetryPredicate) -> Self {
        self.retryable = retryable;
        self
    }

    /// Scale every delay down, keeping attempt counts (for tests)
    pub fn with_delays(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_delay = initial;
        self.max_delay = max;
        self
    }

    fn next_delay(&self, delay: Duration) -> Duration {
        Duration::from_secs_f64(
            (delay.as_secs_f64() * self.backoff_multiplier).min(self.max_delay.as_secs_f64()),
        )
    }
}

/// Execute an async operation under a retry policy.
///
/// Returns the first success. A non-retryable error is returned immediately.
/// When attempts run out the last error is returned unchanged, exactly as a
/// first-attempt failure would be.
pub async fn retry_with_backoff<F, Fut, T>(
    policy: &RetryPolicy,
    operation_name: &str,
    mut operation: F,
) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Error>>,
{
    let mut attempt = 0u32;
    let mut delay = policy.initial_delay;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) if !(policy.retryable)(&e) => return Err(e),
            Err(e) => {
                if policy.max_attempts > 0 && attempt >= policy.max_attempts {
                    error!(
                        operation = %operation_name,
                        attempt = attempt,
                        error = %e,
                        "Operation failed after max retries"
                    );
                    return Err(e);
                }

                let sleep_for = if policy.jitter {
                    let jitter = rand::thread_rng().gen_range(0.5..1.5);
                    Duration::from_secs_f64(delay.as_secs_f64() * jitter)
                } else {
                    delay
                };

                warn!(
                    operation = %operation_name,
                    attempt = attempt,
                    error = %e,
                    delay_ms = sleep_for.as_millis(),
                    "Operation failed, retrying"
                );

                tokio::time::sleep(sleep_for).await;
                delay = policy.next_delay(delay);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ApiError;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast(policy: RetryPolicy) -> RetryPolicy {
        policy.with_delays(Duration::from_millis(1), Duration::from_millis(5))
    }

    fn dependency_violation() -> Error {
        Error::provider(
            "aws",
            "delete security group",
            "sg-1",
            ApiError::new("DependencyViolation", "in use"),
        )
    }

    #[tokio::test]
    async fn test_succeeds_immediately() {
        let policy = fast(RetryPolicy::fixed(3, Duration::from_secs(10)));
        let result = retry_with_backoff(&policy, "op", || async { Ok(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_succeeds_after_failures() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();
        let policy = fast(RetryPolicy::fixed(5, Duration::from_secs(10)));

        let result = retry_with_backoff(&policy, "op", || {
            let c = c.clone();
            async move {
                if c.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(Error::validation("not yet"))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_returns_last_error_verbatim() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();
        let policy = fast(RetryPolicy::fixed(3, Duration::from_secs(10)));

        let result: Result<(), Error> = retry_with_backoff(&policy, "op", || {
            let c = c.clone();
            async move {
                let n = c.fetch_add(1, Ordering::SeqCst);
                Err(Error::validation(format!("attempt {n}")))
            }
        })
        .await;

        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert_eq!(
            result.unwrap_err().to_string(),
            "validation error: attempt 2"
        );
    }

    #[tokio::test]
    async fn test_non_retryable_error_returns_immediately() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();
        let policy = fast(RetryPolicy::exponential(
            30,
            Duration::from_millis(500),
            1.2,
            Duration::from_secs(600),
        ));

        let result: Result<(), Error> = retry_with_backoff(&policy, "op", || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(Error::permission_denied("delete security group"))
            }
        })
        .await;

        assert!(matches!(result, Err(Error::PermissionDenied { .. })));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried_until_success() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();
        let policy = fast(RetryPolicy::exponential(
            30,
            Duration::from_millis(500),
            1.2,
            Duration::from_secs(600),
        ));

        let result = retry_with_backoff(&policy, "op", || {
            let c = c.clone();
            async move {
                if c.fetch_add(1, Ordering::SeqCst) < 4 {
                    Err(dependency_violation())
                } else {
                    Ok("deleted")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "deleted");
        assert_eq!(count.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = RetryPolicy::exponential(
            30,
            Duration::from_millis(500),
            2.0,
            Duration::from_secs(1),
        );
        let d1 = policy.next_delay(policy.initial_delay);
        assert_eq!(d1, Duration::from_secs(1));
        assert_eq!(policy.next_delay(d1), Duration::from_secs(1));
    }

    #[test]
    fn test_presets() {
        let fixed = RetryPolicy::fixed(3, Duration::from_secs(10));
        assert_eq!(fixed.max_attempts, 3);
        assert_eq!(fixed.next_delay(fixed.initial_delay), Duration::from_secs(10));
        assert!((fixed.retryable)(&Error::validation("anything")));

        let conflict = RetryPolicy::on_conflict();
        assert!(!(conflict.retryable)(&dependency_violation()));

        let custom = RetryPolicy::fixed(2, Duration::ZERO).retry_if(|e| e.is_not_found());
        assert!((custom.retryable)(&Error::not_found("vpc", "x")));
        assert!(!(custom.retryable)(&Error::validation("x")));
    }
}
