//! Exponential backoff for idempotent host calls.
//!
//! Only read-only calls go through [`retry_with_backoff`] with
//! [`RetryPolicy::RetryTransient`]. Mutating calls (merge, retarget, open PR)
//! use [`RetryPolicy::NoRetry`]: a request that timed out may still have taken
//! effect, and replaying it blindly is worse than surfacing the failure.

use std::future::Future;
use std::time::Duration;

use super::error::{HostError, HostErrorKind};

/// Configuration for exponential backoff retry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryConfig {
    /// Retries after the initial attempt.
    pub max_retries: u32,
    pub initial_delay: Duration,
    /// Cap for exponential growth.
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
}

impl RetryConfig {
    /// 3 retries with 2s, 4s, 8s delays.
    pub const DEFAULT: Self = Self {
        max_retries: 3,
        initial_delay: Duration::from_secs(2),
        max_delay: Duration::from_secs(16),
        backoff_multiplier: 2.0,
    };

    /// Used while reconstructing progress from remote state, where the host may
    /// still be propagating a merge that just happened.
    pub const RECONSTRUCT: Self = Self {
        max_retries: 6,
        initial_delay: Duration::from_secs(1),
        max_delay: Duration::from_secs(20),
        backoff_multiplier: 2.0,
    };

    pub fn new(
        max_retries: u32,
        initial_delay: Duration,
        max_delay: Duration,
        backoff_multiplier: f64,
    ) -> Self {
        Self {
            max_retries,
            initial_delay,
            max_delay,
            backoff_multiplier,
        }
    }

    /// Delay before retry `attempt` (0-indexed): `initial * multiplier^attempt`,
    /// capped at `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.backoff_multiplier.powi(attempt as i32);
        let secs = (self.initial_delay.as_secs_f64() * factor).min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(secs)
    }

    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        (0..self.max_retries).map(|attempt| self.delay_for_attempt(attempt))
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RetryPolicy {
    /// Retry transient errors with exponential backoff.
    #[default]
    RetryTransient,

    /// Return the first error.
    NoRetry,
}

/// Runs `operation` until it succeeds, fails non-transiently, or the retry
/// budget is spent. The last error is returned on exhaustion.
pub async fn retry_with_backoff<T, F, Fut>(
    config: RetryConfig,
    policy: RetryPolicy,
    mut operation: F,
) -> Result<T, HostError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, HostError>>,
{
    let max_attempts = match policy {
        RetryPolicy::NoRetry => 1,
        RetryPolicy::RetryTransient => config.max_retries + 1,
    };
    let mut attempt = 0;

    loop {
        let err = match operation().await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };
        attempt += 1;

        if err.kind != HostErrorKind::Transient || attempt >= max_attempts {
            return Err(err);
        }

        let delay = config.delay_for_attempt(attempt - 1);
        tracing::debug!(
            attempt,
            max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "transient host error, retrying"
        );
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn instant(max_retries: u32) -> RetryConfig {
        RetryConfig::new(max_retries, Duration::ZERO, Duration::ZERO, 2.0)
    }

    // ─── Delays ───────────────────────────────────────────────────────────────

    #[test]
    fn default_delays_are_2_4_8() {
        let delays: Vec<_> = RetryConfig::DEFAULT.delays().collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(8)
            ]
        );
    }

    #[test]
    fn reconstruct_delays_respect_cap() {
        let delays: Vec<_> = RetryConfig::RECONSTRUCT.delays().collect();
        assert_eq!(delays.len(), 6);
        assert_eq!(delays[0], Duration::from_secs(1));
        assert_eq!(delays[4], Duration::from_secs(16));
        assert_eq!(delays[5], Duration::from_secs(20));
    }

    proptest! {
        #[test]
        fn delays_never_exceed_cap(
            initial_ms in 1u64..5_000,
            cap_ms in 1u64..60_000,
            retries in 0u32..20,
        ) {
            let config = RetryConfig::new(
                retries,
                Duration::from_millis(initial_ms),
                Duration::from_millis(cap_ms),
                2.0,
            );
            for delay in config.delays() {
                prop_assert!(delay <= Duration::from_millis(cap_ms));
            }
        }

        #[test]
        fn delays_are_non_decreasing(initial_ms in 1u64..1_000, retries in 1u32..12) {
            let config = RetryConfig::new(
                retries,
                Duration::from_millis(initial_ms),
                Duration::from_secs(30),
                2.0,
            );
            let delays: Vec<_> = config.delays().collect();
            for pair in delays.windows(2) {
                prop_assert!(pair[0] <= pair[1]);
            }
        }
    }

    // ─── Behaviour ────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn transient_then_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = retry_with_backoff(instant(3), RetryPolicy::RetryTransient, || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(HostError::transient_without_source("502"))
                } else {
                    Ok(7)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_error_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<(), _> =
            retry_with_backoff(instant(3), RetryPolicy::RetryTransient, || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(HostError::permanent_without_source("forbidden"))
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausted_retries_return_last_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<(), _> =
            retry_with_backoff(instant(2), RetryPolicy::RetryTransient, || {
                let counter = counter.clone();
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst);
                    Err(HostError::transient_without_source(format!("attempt {}", n)))
                }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(result.unwrap_err().message, "attempt 2");
    }

    #[tokio::test]
    async fn no_retry_policy_makes_one_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<(), _> = retry_with_backoff(instant(5), RetryPolicy::NoRetry, || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(HostError::transient_without_source("timeout"))
            }
        })
        .await;

        assert!(result.unwrap_err().is_transient());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
