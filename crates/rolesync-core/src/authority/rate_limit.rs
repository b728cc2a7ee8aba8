//! Outbound quota limiter for authority calls.
//!
//! A sliding-window limiter over the client's own call timestamps. The
//! limiter is constructed explicitly and injected into the HTTP client at
//! startup; quota exhaustion is surfaced to callers as a transient error
//! carrying the wait until the window frees up, so it flows through the same
//! backoff path as any other transient failure.
//!
//! # Thread Safety
//!
//! The timestamp window lives behind a mutex; concurrent reconciliation
//! tasks share one limiter instance.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use thiserror::Error;

/// The outbound call quota is exhausted for the current window.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("authority call quota exhausted, retry after {retry_after:?}")]
pub struct QuotaExceeded {
    /// Time until the oldest in-window call expires.
    pub retry_after: Duration,
}

/// Configuration for the outbound rate limiter.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Maximum calls allowed within the window.
    pub max_calls: u32,

    /// Size of the sliding window.
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            // 40 calls/minute leaves headroom under typical partner API
            // quotas while still clearing a full chunk per window.
            max_calls: 40,
            window: Duration::from_secs(60),
        }
    }
}

/// Sliding-window limiter over outbound authority calls.
pub struct RateLimiter {
    config: RateLimitConfig,
    // Timestamps of in-window calls, oldest first. Bounded by max_calls:
    // expired entries are pruned on every acquire.
    window: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    /// Creates a limiter with the given configuration.
    #[must_use]
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            window: Mutex::new(VecDeque::new()),
        }
    }

    /// Tries to take one call slot.
    ///
    /// Records the call and returns `Ok(())` if the quota allows it.
    ///
    /// # Errors
    ///
    /// Returns [`QuotaExceeded`] with the wait until a slot frees up.
    pub fn try_acquire(&self) -> Result<(), QuotaExceeded> {
        let now = Instant::now();
        let cutoff = now.checked_sub(self.config.window).unwrap_or(now);

        let mut window = self
            .window
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        while window.front().is_some_and(|&t| t <= cutoff) {
            window.pop_front();
        }

        if window.len() >= self.config.max_calls as usize {
            let retry_after = window.front().map_or(self.config.window, |&oldest| {
                self.config
                    .window
                    .saturating_sub(now.saturating_duration_since(oldest))
            });
            tracing::warn!(
                in_window = window.len(),
                max_calls = self.config.max_calls,
                retry_after_ms = retry_after.as_millis() as u64,
                "authority call quota exhausted"
            );
            return Err(QuotaExceeded { retry_after });
        }

        window.push_back(now);
        Ok(())
    }

    /// Number of calls currently inside the window.
    #[must_use]
    pub fn in_window(&self) -> usize {
        let window = self
            .window
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        window.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_calls_within_quota() {
        let limiter = RateLimiter::new(RateLimitConfig {
            max_calls: 3,
            window: Duration::from_secs(60),
        });

        for _ in 0..3 {
            assert!(limiter.try_acquire().is_ok());
        }
        assert_eq!(limiter.in_window(), 3);
    }

    #[test]
    fn rejects_past_quota_with_retry_hint() {
        let limiter = RateLimiter::new(RateLimitConfig {
            max_calls: 2,
            window: Duration::from_secs(60),
        });

        limiter.try_acquire().unwrap();
        limiter.try_acquire().unwrap();

        let err = limiter.try_acquire().unwrap_err();
        assert!(err.retry_after <= Duration::from_secs(60));
        assert!(err.retry_after > Duration::ZERO);
    }

    #[test]
    fn window_expiry_frees_slots() {
        let limiter = RateLimiter::new(RateLimitConfig {
            max_calls: 1,
            window: Duration::from_millis(50),
        });

        limiter.try_acquire().unwrap();
        assert!(limiter.try_acquire().is_err());

        std::thread::sleep(Duration::from_millis(60));
        assert!(limiter.try_acquire().is_ok());
        assert_eq!(limiter.in_window(), 1);
    }

    #[test]
    fn shared_across_threads() {
        use std::sync::Arc;

        let limiter = Arc::new(RateLimiter::new(RateLimitConfig {
            max_calls: 100,
            window: Duration::from_secs(60),
        }));

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                std::thread::spawn(move || {
                    for _ in 0..10 {
                        let _ = limiter.try_acquire();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(limiter.in_window(), 100);
        assert!(limiter.try_acquire().is_err());
    }
}
