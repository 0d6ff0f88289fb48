//! Retry-with-backoff shared by chunk sends, status probes, initiation
//! and refresh-token grants.
//!
//! Exponential backoff with jitter, capped at a max delay, and interrupted
//! by cancellation.

use crate::config::UploadSettings;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Base delay between attempts. Actual delay = base * 2^attempt + jitter.
    pub base_delay: Duration,
    /// Hard cap on the computed delay.
    pub max_delay: Duration,
    /// Adds random jitter of [0, base_delay/2).
    pub jitter: bool,
}

impl RetryPolicy {
    pub fn from_settings(settings: &UploadSettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            base_delay: settings.base_delay,
            max_delay: settings.max_delay,
            jitter: true,
        }
    }

    /// Backoff for the token endpoint: a few quick attempts, since callers
    /// are waiting on the result.
    pub fn token_refresh() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
            jitter: true,
        }
    }

    /// Compute the delay after a failed attempt (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        // Checked shift so attempts >= 32 saturate instead of overflowing.
        let multiplier = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        let exp_delay = self
            .base_delay
            .checked_mul(multiplier)
            .unwrap_or(self.max_delay);
        let capped = exp_delay.min(self.max_delay);

        if !self.jitter {
            return capped;
        }

        let jitter_range_ms = u64::try_from(self.base_delay.as_millis()).unwrap_or(u64::MAX) / 2;
        let remaining_ms =
            u64::try_from(self.max_delay.saturating_sub(capped).as_millis()).unwrap_or(0);
        let jitter_limit_ms = jitter_range_ms.min(remaining_ms);
        if jitter_limit_ms == 0 {
            return capped;
        }

        let jitter_ms = rand::rng().random_range(0..jitter_limit_ms);
        (capped + Duration::from_millis(jitter_ms)).min(self.max_delay)
    }
}

/// Result of a single attempt, used by the caller to signal retryability.
pub enum RetryAction<T, E> {
    /// Operation succeeded.
    Success(T),
    /// Transient failure (timeout, reset, 5xx).
    Retry(E),
    /// Permanent failure; returned immediately.
    Fail(E),
}

/// Why `retry_with_backoff` gave up.
#[derive(Debug, PartialEq, Eq)]
pub enum RetryError<E> {
    Cancelled,
    /// The last error, after a `Fail` or once attempts ran out.
    Failed(E),
}

/// Execute an async operation with retry-and-backoff.
///
/// `operation` receives the attempt number (0-indexed). Cancellation is
/// checked before every attempt and interrupts backoff sleeps.
pub async fn retry_with_backoff<F, Fut, T, E>(
    policy: &RetryPolicy,
    token: &CancellationToken,
    mut operation: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = RetryAction<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0;
    loop {
        if token.is_cancelled() {
            return Err(RetryError::Cancelled);
        }

        match operation(attempt).await {
            RetryAction::Success(value) => return Ok(value),
            RetryAction::Fail(err) => return Err(RetryError::Failed(err)),
            RetryAction::Retry(err) => {
                if attempt + 1 >= policy.max_attempts {
                    return Err(RetryError::Failed(err));
                }
                let delay = policy.delay_for_attempt(attempt);
                warn!(
                    attempt = attempt + 1,
                    max = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Retrying after transient error"
                );
                tokio::select! {
                    _ = token.cancelled() => return Err(RetryError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(50),
            jitter: false,
        }
    }

    #[test]
    fn delay_respects_max_cap() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
            jitter: true,
        };
        for attempt in [0, 3, 10, 40] {
            assert!(policy.delay_for_attempt(attempt) <= Duration::from_secs(5));
        }
    }

    #[test]
    fn token_refresh_policy_stays_short() {
        let policy = RetryPolicy::token_refresh();
        let total: Duration = (0..policy.max_attempts - 1)
            .map(|a| policy.delay_for_attempt(a))
            .sum();
        assert!(policy.max_attempts > 1);
        assert!(total <= Duration::from_secs(4));
    }

    #[test]
    fn delay_without_jitter_doubles() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            jitter: false,
        };
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(400));
    }

    #[tokio::test]
    async fn retry_until_success() {
        let calls = AtomicU32::new(0);
        let token = CancellationToken::new();
        let result: Result<u32, RetryError<String>> =
            retry_with_backoff(&policy(5), &token, |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 2 {
                        RetryAction::Retry("reset".to_string())
                    } else {
                        RetryAction::Success(attempt)
                    }
                }
            })
            .await;
        assert_eq!(result, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_exhausts_attempts() {
        let calls = AtomicU32::new(0);
        let token = CancellationToken::new();
        let result: Result<(), RetryError<String>> =
            retry_with_backoff(&policy(3), &token, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { RetryAction::Retry("timeout".to_string()) }
            })
            .await;
        assert_eq!(result, Err(RetryError::Failed("timeout".to_string())));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_failure_is_not_retried() {
        let calls = AtomicU32::new(0);
        let token = CancellationToken::new();
        let result: Result<(), RetryError<String>> =
            retry_with_backoff(&policy(5), &token, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { RetryAction::Fail("bad request".to_string()) }
            })
            .await;
        assert_eq!(result, Err(RetryError::Failed("bad request".to_string())));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancelled_before_first_attempt() {
        let token = CancellationToken::new();
        token.cancel();
        let result: Result<(), RetryError<String>> =
            retry_with_backoff(&policy(5), &token, |_| async {
                RetryAction::Success(())
            })
            .await;
        assert_eq!(result, Err(RetryError::Cancelled));
    }
}
