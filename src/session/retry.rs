//! Reconnect policy for the relay socket
//!
//! The backoff schedule is linear: the wait after the n-th failure is
//! `delay × n`. Kept as its own object so the schedule is testable apart
//! from the socket code.

use std::time::Duration;

/// Retry policy for relay connection attempts
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total connection failures tolerated before giving up
    pub max_retries: u32,

    /// Base delay, multiplied by the failure count
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            delay: Duration::from_millis(2000),
        }
    }
}

impl RetryPolicy {
    /// Whether another attempt is allowed after `failures` failed connects
    #[must_use]
    pub const fn should_retry(&self, failures: u32) -> bool {
        failures < self.max_retries
    }

    /// Delay before the attempt following failure number `failures`
    #[must_use]
    pub const fn delay_for(&self, failures: u32) -> Duration {
        self.delay.saturating_mul(failures)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_backoff_schedule() {
        let policy = RetryPolicy::default();

        assert_eq!(policy.delay_for(1), Duration::from_millis(2000));
        assert_eq!(policy.delay_for(2), Duration::from_millis(4000));
    }

    #[test]
    fn third_failure_is_terminal() {
        let policy = RetryPolicy::default();

        assert!(policy.should_retry(1));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
    }

    #[test]
    fn default_values() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.delay, Duration::from_millis(2000));
    }
}
