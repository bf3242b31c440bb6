//! Bounded exponential backoff.
//!
//! Used where a transient failure is expected during start-up, e.g. dialing a
//! freshly spawned plugin process before its listener is ready. A retry loop
//! stops at whichever comes first: the attempt limit, the elapsed-time
//! budget, or an error that is not [`Retryable`].

use crate::error::Retryable;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// Backoff settings.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry; doubled for each later one
    pub initial_delay: Duration,
    /// Upper bound on a single delay
    pub max_delay: Duration,
    /// Give up once this much time has passed since the first attempt
    pub max_elapsed: Option<Duration>,
    /// Add up to a quarter of the delay at random
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(2),
            max_elapsed: Some(Duration::from_secs(10)),
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Set the retry limit.
    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the first delay.
    #[must_use]
    pub const fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set the delay cap.
    #[must_use]
    pub const fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set or clear the elapsed-time budget.
    #[must_use]
    pub const fn with_max_elapsed(mut self, budget: Option<Duration>) -> Self {
        self.max_elapsed = budget;
        self
    }

    /// Disable jitter.
    #[must_use]
    pub const fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }
}

/// Runs an operation until it succeeds or the backoff gives up.
#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    /// Policy over `config`.
    #[must_use]
    pub const fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Delay before retry number `attempt` (zero-based).
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        let base = self
            .config
            .initial_delay
            .checked_mul(factor)
            .map_or(self.config.max_delay, |d| d.min(self.config.max_delay));
        if !self.config.jitter {
            return base;
        }
        let quarter = u64::try_from(base.as_millis() / 4).unwrap_or(u64::MAX);
        base + Duration::from_millis(rand::thread_rng().gen_range(0..=quarter))
    }

    /// Whether `error` on retry number `attempt` is worth another try.
    #[must_use]
    pub fn should_retry<E: Retryable>(&self, error: &E, attempt: u32) -> bool {
        attempt < self.config.max_retries && error.is_retryable()
    }

    /// Run `operation` with backoff between transient failures.
    ///
    /// # Errors
    ///
    /// Returns the first permanent error, or the last error once the retry
    /// limit or time budget is used up.
    pub async fn execute<F, Fut, T, E>(&self, mut operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + std::fmt::Display,
    {
        let started = Instant::now();
        let mut attempt = 0;
        loop {
            let error = match operation().await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };
            if !self.should_retry(&error, attempt) {
                return Err(error);
            }
            let delay = self.delay_for_attempt(attempt);
            if let Some(budget) = self.config.max_elapsed {
                if started.elapsed() + delay > budget {
                    tracing::debug!(attempt, error = %error, "retry budget exhausted");
                    return Err(error);
                }
            }
            tracing::debug!(attempt, delay_ms = delay.as_millis(), error = %error, "retrying");
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PlatformError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fixed(initial_ms: u64, cap_ms: u64) -> RetryPolicy {
        RetryPolicy::new(
            RetryConfig::default()
                .without_jitter()
                .with_initial_delay(Duration::from_millis(initial_ms))
                .with_max_delay(Duration::from_millis(cap_ms)),
        )
    }

    #[test]
    fn test_delays_double_up_to_cap() {
        let policy = fixed(100, 350);
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(350));
        assert_eq!(policy.delay_for_attempt(40), Duration::from_millis(350));
    }

    #[test]
    fn test_should_retry() {
        let policy = RetryPolicy::new(RetryConfig::default().with_max_retries(3));
        let transient = PlatformError::unavailable("refused");

        assert!(policy.should_retry(&transient, 0));
        assert!(policy.should_retry(&transient, 2));
        assert!(!policy.should_retry(&transient, 3));
        assert!(!policy.should_retry(&PlatformError::NotFound("x".to_string()), 0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_retries_transient_errors() {
        let policy = RetryPolicy::new(RetryConfig::default().with_max_retries(3));
        let calls = AtomicU32::new(0);

        let result: Result<u32, PlatformError> = policy
            .execute(|| async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(PlatformError::unavailable("not listening yet"))
                } else {
                    Ok(n)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_stops_at_time_budget() {
        let policy = RetryPolicy::new(
            fixed(400, 400)
                .config
                .with_max_retries(100)
                .with_max_elapsed(Some(Duration::from_secs(1))),
        );
        let calls = AtomicU32::new(0);
        let result: Result<(), PlatformError> = policy
            .execute(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(PlatformError::timeout("dial"))
            })
            .await;
        assert!(result.is_err());
        // attempts at 0ms, 400ms and 800ms; a fourth would start past 1s
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_execute_non_retryable_error() {
        let policy = RetryPolicy::default();
        let calls = AtomicU32::new(0);
        let result: Result<i32, PlatformError> = policy
            .execute(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(PlatformError::NotFound("binary".to_string()))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
