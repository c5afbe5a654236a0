//! Retry with exponential backoff and jitter.
//!
//! Reusable retry wrapper for operations against flaky external services.
//! Cancellation is honored through the retryable predicate: callers mark
//! their cancellation error non-retryable and it is re-raised immediately.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

/// Retry behavior configuration.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Backoff multiplier per attempt
    pub multiplier: f64,
    /// Cap on any single delay
    pub max_delay: Duration,
    /// Jitter fraction applied to each delay (0.1 = +/-10%)
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_delay: Duration, multiplier: f64) -> Self {
        Self {
            max_attempts,
            initial_delay,
            multiplier,
            ..Default::default()
        }
    }

    /// Backoff delay before retry number `retry` (1-based), with jitter.
    fn delay_for(&self, retry: u32) -> Duration {
        let base = self.initial_delay.as_secs_f64() * self.multiplier.powi(retry as i32 - 1);
        let capped = base.min(self.max_delay.as_secs_f64());

        let jittered = if self.jitter > 0.0 {
            let spread = capped * self.jitter;
            let offset = rand::thread_rng().gen_range(-spread..=spread);
            (capped + offset).max(0.0)
        } else {
            capped
        };

        Duration::from_secs_f64(jittered)
    }
}

/// Execute `op` with retries per `policy`.
///
/// `is_retryable` decides whether an error is worth another attempt;
/// non-retryable errors (validation, cancellation) are returned immediately.
/// On exhaustion the last error is returned.
pub async fn retry_async<F, Fut, T, E>(
    policy: &RetryPolicy,
    operation_name: &str,
    is_retryable: impl Fn(&E) -> bool,
    op: F,
) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 1u32;

    loop {
        match op().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(
                        operation = operation_name,
                        attempt, "Operation recovered after retry"
                    );
                }
                return Ok(value);
            }
            Err(e) if attempt < policy.max_attempts && is_retryable(&e) => {
                let delay = policy.delay_for(attempt);
                warn!(
                    operation = operation_name,
                    attempt,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Attempt failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                if attempt >= policy.max_attempts {
                    warn!(
                        operation = operation_name,
                        attempts = attempt,
                        error = %e,
                        "Retries exhausted"
                    );
                }
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            multiplier: 2.0,
            max_delay: Duration::from_millis(10),
            jitter: 0.0,
        }
    }

    #[test]
    fn test_backoff_progression() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_delay: Duration::from_millis(500),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
            jitter: 0.0,
        };

        assert_eq!(policy.delay_for(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for(2), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(3), Duration::from_millis(2000));
    }

    #[test]
    fn test_backoff_caps_at_max_delay() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(5),
            jitter: 0.0,
        };
        assert_eq!(policy.delay_for(10), Duration::from_secs(5));
    }

    #[test]
    fn test_jitter_stays_within_spread() {
        let policy = RetryPolicy {
            jitter: 0.1,
            ..fast_policy()
        };
        for _ in 0..100 {
            let d = policy.delay_for(1).as_secs_f64();
            let base = 0.001;
            assert!(d >= base * 0.9 - 1e-6 && d <= base * 1.1 + 1e-6);
        }
    }

    #[tokio::test]
    async fn test_succeeds_first_try_without_retry() {
        let calls = AtomicU32::new(0);
        let result = retry_async(&fast_policy(), "test", |_: &String| true, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, String>(7) }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retries_then_succeeds() {
        let calls = AtomicU32::new(0);
        let result = retry_async(&fast_policy(), "test", |_: &String| true, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err("transient".to_string())
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_returns_last_error() {
        let calls = AtomicU32::new(0);
        let result: Result<(), String> =
            retry_async(&fast_policy(), "test", |_: &String| true, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("still broken".to_string()) }
            })
            .await;

        assert_eq!(result.unwrap_err(), "still broken");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_error_returns_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<(), String> =
            retry_async(&fast_policy(), "test", |e: &String| e != "cancelled", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("cancelled".to_string()) }
            })
            .await;

        assert_eq!(result.unwrap_err(), "cancelled");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
