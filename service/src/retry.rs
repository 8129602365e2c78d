//! Bounded retry of transfers that lost a lock race.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use simplebank_common::{BankError, Result};

use crate::config::RetryConfig;

/// Re-invokes an operation while it fails with a retryable error.
///
/// Only `TransactionConflict` (directly or as the cause of a failed
/// rollback) is retried. Backoff doubles per attempt up to `max_backoff`,
/// and each sleep is jittered into `[backoff / 2, backoff]`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_backoff: Duration,
    max_backoff: Duration,
}

impl RetryPolicy {
    /// Create a policy. `max_attempts` counts the first attempt.
    pub fn new(max_attempts: u32, base_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_backoff,
            max_backoff,
        }
    }

    /// A policy that never retries.
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO, Duration::ZERO)
    }

    /// Total attempts allowed.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Run `op` until it succeeds, fails permanently or attempts run out.
    pub async fn run<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.run_observed(op, |_, _| {}).await
    }

    /// Like [`RetryPolicy::run`], calling `on_retry(attempt, error)` before
    /// each retry.
    pub async fn run_observed<T, F, Fut, O>(&self, mut op: F, mut on_retry: O) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
        O: FnMut(u32, &BankError),
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    let delay = self.backoff(attempt);
                    debug!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retrying after conflict"
                    );
                    on_retry(attempt, &e);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    if e.is_retryable() {
                        warn!(attempts = attempt, error = %e, "Retries exhausted");
                    }
                    return Err(e);
                }
            }
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let exp = self
            .base_backoff
            .saturating_mul(1u32 << (attempt - 1).min(16))
            .min(self.max_backoff);
        let ceiling = exp.as_millis() as u64;
        if ceiling == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(ceiling / 2..=ceiling))
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self::new(config.max_attempts, config.base_backoff, config.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::from_millis(1), Duration::from_millis(2))
    }

    #[tokio::test]
    async fn test_retries_conflicts_until_success() {
        let counter = AtomicU32::new(0);
        let calls = &counter;

        let result = fast(5)
            .run(move || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(BankError::conflict("deadlock detected"))
                } else {
                    Ok(42)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let mut observed = Vec::new();

        let result: Result<()> = fast(3)
            .run_observed(
                move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(BankError::conflict("lock timeout"))
                },
                |attempt, _| observed.push(attempt),
            )
            .await;

        assert!(result.unwrap_err().is_retryable());
        assert_eq!(counter.load(Ordering::SeqCst), 3);
        assert_eq!(observed, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_permanent_errors_are_not_retried() {
        let counter = AtomicU32::new(0);
        let calls = &counter;

        let result: Result<()> = fast(5)
            .run(move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(BankError::storage("inserting entry", "disk full"))
            })
            .await;

        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = RetryPolicy::new(10, Duration::from_millis(10), Duration::from_millis(50));
        for attempt in 1..10 {
            let delay = policy.backoff(attempt);
            assert!(delay <= Duration::from_millis(50));
        }
        assert!(policy.backoff(1) >= Duration::from_millis(5));
    }

    #[test]
    fn test_zero_attempts_means_one() {
        assert_eq!(RetryPolicy::new(0, Duration::ZERO, Duration::ZERO).max_attempts(), 1);
        assert_eq!(RetryPolicy::none().max_attempts(), 1);
    }
}
