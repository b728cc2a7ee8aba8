//! Reusable retry policy for authority operations.
//!
//! One wrapper applied uniformly to both grant and revoke, replacing
//! per-call-site retry loops. The classifier is [`AuthorityError`] itself:
//! transient errors are retried with exponential backoff and jitter,
//! permanent errors abort on the first attempt.
//!
//! Delay before attempt `n` (n ≥ 2):
//! `min(base_delay * 2^(n-2), max_delay) + uniform_random(0, jitter_max)`,
//! raised to the server's `Retry-After` hint when one was provided.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

use super::AuthorityError;

/// Retry policy for remote authority operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Backoff base; the delay before the second attempt.
    pub base_delay: Duration,
    /// Upper bound on the exponential term.
    pub max_delay: Duration,
    /// Upper bound on the uniform jitter added to every delay.
    pub jitter_max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            jitter_max: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// The deterministic backoff component of the delay before `attempt`
    /// (1-based). Attempt 1 has no delay.
    #[must_use]
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let exponent = attempt - 2;
        let factor = 2u32.checked_pow(exponent).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }

    fn jittered_delay(&self, attempt: u32) -> Duration {
        let jitter_ms = self.jitter_max.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
        };
        self.backoff_delay(attempt) + jitter
    }
}

/// Runs `operation` under `policy`, retrying transient failures.
///
/// The future-producing closure is re-invoked for each attempt. Permanent
/// errors are returned immediately; transient errors are retried until the
/// attempt budget is exhausted, honoring any server-provided `Retry-After`
/// hint when it exceeds the computed backoff.
///
/// # Errors
///
/// Returns the last [`AuthorityError`] once attempts are exhausted, or the
/// first permanent error encountered.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    op_name: &str,
    mut operation: F,
) -> Result<T, AuthorityError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AuthorityError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < max_attempts => {
                let mut delay = policy.jittered_delay(attempt + 1);
                if let Some(hint) = err.retry_after() {
                    delay = delay.max(hint);
                }
                tracing::warn!(
                    operation = op_name,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient authority failure, backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            },
            Err(err) => {
                if err.is_transient() {
                    tracing::warn!(
                        operation = op_name,
                        attempts = attempt,
                        error = %err,
                        "retries exhausted"
                    );
                }
                return Err(err);
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn immediate_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            jitter_max: Duration::ZERO,
        }
    }

    #[test]
    fn backoff_schedule_matches_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_delay(1), Duration::ZERO);
        assert_eq!(policy.backoff_delay(2), Duration::from_secs(1));
        assert_eq!(policy.backoff_delay(3), Duration::from_secs(2));
        assert_eq!(policy.backoff_delay(4), Duration::from_secs(4));
        assert_eq!(policy.backoff_delay(5), Duration::from_secs(8));
        // Capped at max_delay from here on.
        assert_eq!(policy.backoff_delay(6), Duration::from_secs(10));
        assert_eq!(policy.backoff_delay(12), Duration::from_secs(10));
    }

    #[test]
    fn total_minimum_delay_for_three_attempts() {
        // Floor for a transient-transient-success sequence:
        // base + min(2 * base, max).
        let policy = RetryPolicy::default();
        let total = policy.backoff_delay(2) + policy.backoff_delay(3);
        assert!(total >= Duration::from_secs(3));
    }

    #[tokio::test]
    async fn succeeds_on_third_attempt_after_transients() {
        let calls = AtomicU32::new(0);
        let result = with_retry(&immediate_policy(), "grant", || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n < 3 {
                    Err(AuthorityError::transient("socket closed"))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result, Ok(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_error_aborts_without_retry() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(&immediate_policy(), "grant", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(AuthorityError::permanent("unprocessable", Some(422))) }
        })
        .await;

        assert!(matches!(result, Err(AuthorityError::Permanent { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausted_retries_return_last_transient() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(&immediate_policy(), "revoke", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(AuthorityError::transient("gateway timeout")) }
        })
        .await;

        assert!(matches!(result, Err(AuthorityError::Transient { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_after_hint_raises_the_delay() {
        // A hint above the computed backoff must be honored; with a tiny
        // policy the elapsed time makes the difference observable.
        let policy = immediate_policy();
        let calls = AtomicU32::new(0);
        let started = std::time::Instant::now();

        let _ = with_retry(&policy, "grant", || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n == 1 {
                    Err(AuthorityError::Transient {
                        reason: "throttled".to_string(),
                        retry_after: Some(Duration::from_millis(50)),
                    })
                } else {
                    Ok(())
                }
            }
        })
        .await;

        assert!(started.elapsed() >= Duration::from_millis(50));
    }
}
