//! Bounded retry with exponential backoff.
//!
//! Used by the HTTP invocation transport for operations that are safe to
//! replay. The session itself never retries.

use std::future::Future;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::debug;

/// Retry attempts and backoff growth.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: usize,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Upper bound of the pseudo-random delay added to each backoff.
    pub jitter: Duration,
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn single_attempt() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            jitter: Duration::ZERO,
        }
    }

    /// Delay before the retry that follows `attempt` (1-based).
    pub fn delay_after(&self, attempt: usize) -> Duration {
        let doublings = attempt.saturating_sub(1).min(16) as u32;
        let backoff = self
            .initial_backoff
            .saturating_mul(1u32 << doublings)
            .min(self.max_backoff);
        backoff.saturating_add(jitter(self.jitter, attempt))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::single_attempt()
    }
}

/// Runs `op` until it succeeds, `should_retry` rejects the error, or the
/// policy runs out of attempts. `label` only feeds diagnostics.
pub async fn retry_async<T, E, Op, Fut, ShouldRetry>(
    policy: &RetryPolicy,
    label: &str,
    mut op: Op,
    mut should_retry: ShouldRetry,
) -> Result<T, E>
where
    Op: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    ShouldRetry: FnMut(&E) -> bool,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        let error = match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };
        if attempt >= max_attempts || !should_retry(&error) {
            return Err(error);
        }

        let delay = policy.delay_after(attempt);
        debug!(
            event = "retry_attempt_failed",
            label,
            attempt,
            max_attempts,
            delay_ms = delay.as_millis() as u64
        );
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        attempt += 1;
    }
}

fn jitter(max_jitter: Duration, attempt: usize) -> Duration {
    let limit = max_jitter.as_nanos().min(u64::MAX as u128) as u64;
    if limit == 0 {
        return Duration::ZERO;
    }

    let seed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos() as u64;
    let mixed = seed ^ (attempt as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15);
    match limit.checked_add(1) {
        Some(modulus) => Duration::from_nanos(mixed % modulus),
        None => Duration::from_nanos(mixed),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use super::{jitter, retry_async, RetryPolicy};

    fn fast_policy(max_attempts: usize) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
            jitter: Duration::ZERO,
        }
    }

    #[test]
    fn backoff_doubles_up_to_cap() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(35),
            jitter: Duration::ZERO,
        };
        assert_eq!(policy.delay_after(1), Duration::from_millis(10));
        assert_eq!(policy.delay_after(2), Duration::from_millis(20));
        assert_eq!(policy.delay_after(3), Duration::from_millis(35));
    }

    #[tokio::test]
    async fn retries_until_success() {
        let calls = Arc::new(AtomicUsize::new(0));
        let result = retry_async(
            &fast_policy(3),
            "test",
            |_| {
                let calls = Arc::clone(&calls);
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err("retry")
                    } else {
                        Ok("ok")
                    }
                }
            },
            |_| true,
        )
        .await;

        assert_eq!(result.expect("success"), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn single_attempt_policy_never_retries() {
        let calls = Arc::new(AtomicUsize::new(0));
        let result: Result<(), &str> = retry_async(
            &RetryPolicy::single_attempt(),
            "test",
            |_| {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err("down")
                }
            },
            |_| true,
        )
        .await;

        assert_eq!(result.expect_err("expected failure"), "down");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stops_when_retry_predicate_rejects() {
        let calls = Arc::new(AtomicUsize::new(0));
        let result: Result<(), &str> = retry_async(
            &fast_policy(5),
            "test",
            |_| {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err("fatal")
                }
            },
            |_| false,
        )
        .await;

        assert_eq!(result.expect_err("expected failure"), "fatal");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn jitter_stays_within_limit() {
        for attempt in 1..8 {
            assert!(jitter(Duration::from_millis(5), attempt) <= Duration::from_millis(5));
        }
        assert_eq!(jitter(Duration::ZERO, 1), Duration::ZERO);
    }

    #[test]
    fn unbounded_jitter_does_not_overflow() {
        let policy = RetryPolicy {
            jitter: Duration::MAX,
            ..fast_policy(3)
        };
        let _ = jitter(Duration::MAX, 2);
        let _ = policy.delay_after(2);
    }
}
