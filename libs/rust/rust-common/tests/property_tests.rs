//! Property-based tests for rust-common crate.

use proptest::prelude::*;
use rust_common::{PlatformError, RetryConfig, RetryPolicy, Retryable};
use std::time::Duration;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_retryable_errors_are_consistent(msg in "[a-zA-Z0-9 ]{1,50}") {
        let retryable = vec![
            PlatformError::Unavailable(msg.clone()),
            PlatformError::Timeout(msg.clone()),
        ];
        for err in retryable {
            prop_assert!(err.is_retryable(), "Error {:?} should be retryable", err);
        }

        let permanent = vec![
            PlatformError::NotFound(msg.clone()),
            PlatformError::InvalidInput(msg.clone()),
            PlatformError::Internal(msg),
        ];
        for err in permanent {
            prop_assert!(!err.is_retryable(), "Error {:?} should not be retryable", err);
        }
    }

    #[test]
    fn prop_backoff_never_exceeds_cap(
        initial_ms in 1u64..500,
        cap_ms in 500u64..5_000,
        attempt in 0u32..20,
    ) {
        let policy = RetryPolicy::new(
            RetryConfig::default()
                .without_jitter()
                .with_initial_delay(Duration::from_millis(initial_ms))
                .with_max_delay(Duration::from_millis(cap_ms)),
        );
        prop_assert!(policy.delay_for_attempt(attempt) <= Duration::from_millis(cap_ms));
    }

    #[test]
    fn prop_backoff_is_monotonic(attempt in 0u32..15) {
        let policy = RetryPolicy::new(RetryConfig::default().without_jitter());
        prop_assert!(policy.delay_for_attempt(attempt) <= policy.delay_for_attempt(attempt + 1));
    }

    #[test]
    fn prop_jitter_stays_within_quarter(attempt in 0u32..10) {
        let config = RetryConfig::default();
        let base = RetryPolicy::new(config.clone().without_jitter()).delay_for_attempt(attempt);
        let jittered = RetryPolicy::new(config).delay_for_attempt(attempt);
        prop_assert!(jittered >= base);
        prop_assert!(jittered.as_millis() <= base.as_millis() * 5 / 4 + 1);
    }
}
