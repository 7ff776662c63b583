//! Retry policies and delay schedules.
//!
//! A [`RetryPolicy`] is plain data. Two independent instances exist at runtime:
//! one governs job re-delivery by the queue, the other governs the call-level
//! [`retry`](crate::retry) wrapper. The transcript poller has its own
//! [`PollPolicy`](crate::poll::PollPolicy).

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Backoff shape between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffKind {
    /// base * 2^(n-1)
    #[default]
    Exponential,
    /// base * n
    Linear,
}

/// Retry policy configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total number of executions allowed (first attempt included), at least 1.
    pub max_attempts: u32,
    /// Delay after the first failure.
    pub base_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
    pub backoff: BackoffKind,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential(3, Duration::from_secs(1))
    }
}

impl RetryPolicy {
    /// Exponential policy without an effective cap.
    pub fn exponential(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay: Duration::from_secs(24 * 60 * 60),
            backoff: BackoffKind::Exponential,
        }
    }

    /// Linear policy without an effective cap.
    pub fn linear(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            backoff: BackoffKind::Linear,
            ..Self::exponential(max_attempts, base_delay)
        }
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Delay to wait after `failed_attempts` attempts have failed (1-indexed).
    ///
    /// `delay_for_attempt(1)` is the wait before the second execution.
    pub fn delay_for_attempt(&self, failed_attempts: u32) -> Duration {
        if failed_attempts == 0 {
            return Duration::ZERO;
        }

        let delay = match self.backoff {
            BackoffKind::Exponential => {
                let factor = 2u32.saturating_pow(failed_attempts - 1);
                self.base_delay.saturating_mul(factor)
            }
            BackoffKind::Linear => self.base_delay.saturating_mul(failed_attempts),
        };

        delay.min(self.max_delay)
    }

    /// Whether another execution is allowed after `attempts_made` executions.
    pub fn should_retry(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn exponential_backoff_doubles() {
        let policy = RetryPolicy::exponential(5, Duration::from_millis(100));

        assert_eq!(policy.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(800));
    }

    #[test]
    fn linear_backoff_increases_linearly() {
        let policy = RetryPolicy::linear(5, Duration::from_millis(100));

        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(300));
    }

    #[test]
    fn delays_are_capped() {
        let policy = RetryPolicy::exponential(10, Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(5));

        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(4));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_secs(5));
        assert_eq!(policy.delay_for_attempt(40), Duration::from_secs(5));
    }

    #[test]
    fn should_retry_respects_max_attempts() {
        let policy = RetryPolicy::exponential(3, Duration::from_secs(1));

        assert!(policy.should_retry(1));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
        assert!(!policy.should_retry(4));
    }

    #[test]
    fn max_attempts_is_at_least_one() {
        assert_eq!(RetryPolicy::exponential(0, Duration::ZERO).max_attempts, 1);
    }

    proptest! {
        /// Delays never shrink as failures accumulate and never exceed the cap.
        #[test]
        fn delays_are_monotonic_and_capped(
            base_ms in 0u64..10_000,
            cap_ms in 0u64..1_000_000,
            linear in any::<bool>(),
            n in 1u32..64,
        ) {
            let base = Duration::from_millis(base_ms);
            let policy = if linear {
                RetryPolicy::linear(10, base)
            } else {
                RetryPolicy::exponential(10, base)
            }
            .with_max_delay(Duration::from_millis(cap_ms));

            let current = policy.delay_for_attempt(n);
            prop_assert!(current <= policy.max_delay);
            prop_assert!(policy.delay_for_attempt(n + 1) >= current);
        }
    }
}
