//! Retry policy for transport reads
//!
//! The policy is a plain value injected into the telemetry reader so tests
//! can substitute a zero-delay variant.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Upper bound for exponential backoff growth
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// How the delay between attempts grows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Same delay before every retry
    #[default]
    Fixed,
    /// Delay doubles after every failed attempt, capped at 60 s
    Exponential,
}

/// Attempts and delays for a retried operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of tries, including the first one
    pub max_attempts: u32,
    /// Base delay between tries
    pub delay: Duration,
    /// Delay growth strategy
    pub strategy: BackoffStrategy,
}

impl RetryPolicy {
    /// Fixed delay between a bounded number of attempts
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
            strategy: BackoffStrategy::Fixed,
        }
    }

    /// Doubling delay between a bounded number of attempts
    pub fn exponential(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
            strategy: BackoffStrategy::Exponential,
        }
    }

    /// Zero-delay policy, used by tests
    pub fn immediate(max_attempts: u32) -> Self {
        Self::fixed(max_attempts, Duration::ZERO)
    }

    /// Delay to wait after the given failed attempt (1-based)
    pub fn delay_after(&self, attempt: u32) -> Duration {
        match self.strategy {
            BackoffStrategy::Fixed => self.delay,
            BackoffStrategy::Exponential => {
                let shift = attempt.saturating_sub(1).min(16);
                self.delay
                    .checked_mul(1u32 << shift)
                    .unwrap_or(MAX_BACKOFF)
                    .min(MAX_BACKOFF)
            }
        }
    }

    /// Whether another attempt follows the given one (1-based)
    pub fn has_next(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(5, Duration::from_secs(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_delay_is_constant() {
        let p = RetryPolicy::fixed(5, Duration::from_millis(250));
        assert_eq!(p.delay_after(1), Duration::from_millis(250));
        assert_eq!(p.delay_after(4), Duration::from_millis(250));
    }

    #[test]
    fn exponential_delay_doubles_and_caps() {
        let p = RetryPolicy::exponential(10, Duration::from_secs(1));
        assert_eq!(p.delay_after(1), Duration::from_secs(1));
        assert_eq!(p.delay_after(2), Duration::from_secs(2));
        assert_eq!(p.delay_after(3), Duration::from_secs(4));
        assert_eq!(p.delay_after(10), MAX_BACKOFF);
    }

    #[test]
    fn zero_attempts_is_clamped_to_one() {
        let p = RetryPolicy::fixed(0, Duration::ZERO);
        assert_eq!(p.max_attempts, 1);
        assert!(!p.has_next(1));
    }

    #[test]
    fn has_next_counts_attempts() {
        let p = RetryPolicy::immediate(3);
        assert!(p.has_next(1));
        assert!(p.has_next(2));
        assert!(!p.has_next(3));
    }
}
