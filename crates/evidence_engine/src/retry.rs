//! Bounded retry with capped exponential backoff.
//!
//! [`retry_with_backoff`] runs an async operation up to
//! `max_retries + 1` times, sleeping `min(initial * 2^(n-1), max)` before the
//! n-th retry. Errors that report themselves as non-retryable end the loop
//! immediately.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use export_logging::{export_info, export_warn};

use crate::source::SourceError;
use crate::TransferError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(8000),
        }
    }
}

impl RetryPolicy {
    pub fn with_max_retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay before retry number `retry` (one-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.initial_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Errors that can tell a transient failure from a permanent one.
pub trait IsRetryable {
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for TransferError {
    fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

/// Rate limiting, server errors and dropped connections are worth another try.
impl IsRetryable for SourceError {
    fn is_retryable(&self) -> bool {
        match self {
            SourceError::Http { status, .. } => *status == 429 || (500..600).contains(status),
            SourceError::Network(_) => true,
            SourceError::Auth(_) | SourceError::Decode(_) => false,
        }
    }
}

/// Run `operation` until it succeeds, fails permanently, or the policy's
/// attempts are used up. The operation receives the one-based attempt number.
/// Returns the last error on exhaustion.
pub async fn retry_with_backoff<F, Fut, T, E>(policy: &RetryPolicy, mut operation: F) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + Display,
{
    let mut attempt = 1;
    loop {
        match operation(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    export_info!("Operation succeeded on attempt {}", attempt);
                }
                return Ok(value);
            }
            Err(err) if err.is_retryable() && attempt <= policy.max_retries => {
                let delay = policy.delay_for(attempt);
                export_warn!(
                    "Attempt {}/{} failed: {}; retrying in {}ms",
                    attempt,
                    policy.max_attempts(),
                    err,
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    struct Flaky(bool);

    impl Display for Flaky {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "flaky(retryable={})", self.0)
        }
    }

    impl IsRetryable for Flaky {
        fn is_retryable(&self) -> bool {
            self.0
        }
    }

    #[test]
    fn default_backoff_doubles_and_caps_at_eight_seconds() {
        let policy = RetryPolicy::default();
        let delays: Vec<u128> = (1..=6).map(|n| policy.delay_for(n).as_millis()).collect();
        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 8000, 8000]);
        assert_eq!(policy.delay_for(40).as_millis(), 8000);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_exactly_max_retries_plus_one_attempts() {
        let policy = RetryPolicy::default();
        let calls = AtomicU32::new(0);
        let mut started = Vec::new();

        let result: Result<(), Flaky> = retry_with_backoff(&policy, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            started.push(tokio::time::Instant::now());
            async { Err(Flaky(true)) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        let gaps: Vec<u128> = started
            .windows(2)
            .map(|pair| (pair[1] - pair[0]).as_millis())
            .collect();
        assert_eq!(gaps, vec![1000, 2000, 4000]);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), Flaky> = retry_with_backoff(&RetryPolicy::default(), |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(Flaky(false)) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn returns_value_once_an_attempt_succeeds() {
        let result: Result<u32, Flaky> = retry_with_backoff(&RetryPolicy::default(), |attempt| async move {
            if attempt < 3 {
                Err(Flaky(true))
            } else {
                Ok(attempt)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
    }
}
