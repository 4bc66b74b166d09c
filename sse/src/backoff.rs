//! Capped exponential backoff for push reconnection.

use std::time::Duration;

/// Reconnection delay policy.
///
/// Delays double from `base_delay` on every failed attempt and never exceed
/// `max_delay`. After `max_attempts` consecutive failures the caller should
/// stop and surface the disconnect.
#[derive(Debug, Clone)]
pub struct Backoff {
    base_delay: Duration,
    max_delay: Duration,
    max_attempts: u32,
}

impl Backoff {
    pub fn new(base_delay: Duration, max_delay: Duration, max_attempts: u32) -> Self {
        Self {
            base_delay,
            max_delay: max_delay.max(base_delay),
            max_attempts,
        }
    }

    /// Delay before reconnection attempt number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31) as i32;
        let delay = self.base_delay.as_secs_f64() * 2_f64.powi(exponent);
        Duration::from_secs_f64(delay.min(self.max_delay.as_secs_f64()))
    }

    /// True while another attempt is allowed after `attempts` consecutive failures.
    pub fn should_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(500), Duration::from_secs(30), 10)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_delay() {
        let backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(60), 5);

        assert_eq!(backoff.delay(1).as_secs(), 1);
        assert_eq!(backoff.delay(2).as_secs(), 2);
        assert_eq!(backoff.delay(3).as_secs(), 4);
    }

    #[test]
    fn test_max_delay_cap() {
        let backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(30), 100);

        assert_eq!(backoff.delay(10), Duration::from_secs(30));
        assert_eq!(backoff.delay(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn test_attempt_limit() {
        let backoff = Backoff::new(Duration::from_millis(10), Duration::from_secs(1), 3);
        assert!(backoff.should_retry(0));
        assert!(backoff.should_retry(2));
        assert!(!backoff.should_retry(3));
    }

    #[test]
    fn test_max_delay_never_below_base() {
        let backoff = Backoff::new(Duration::from_secs(5), Duration::from_secs(1), 3);
        assert_eq!(backoff.max_delay(), Duration::from_secs(5));
        assert_eq!(backoff.delay(1), Duration::from_secs(5));
    }
}
