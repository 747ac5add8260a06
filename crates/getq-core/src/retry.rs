//! Backoff policy for throttled (503) segment fetches.

use std::time::Duration;

/// Exponential backoff with caps. Only `ServiceUnavailable` is retried at
/// the worker level; everything else surfaces to the coordinator.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first).
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub base_delay: Duration,
    /// Upper bound on the backoff delay.
    pub max_delay: Duration,
    /// Growth factor per attempt.
    pub factor: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            factor: 2,
        }
    }
}

impl RetryPolicy {
    /// Backoff before retrying after failed attempt number `attempt`
    /// (1-based). `None` means stop retrying. The caller resets its attempt
    /// counter whenever a chunk arrives, so the sequence restarts after any
    /// real progress.
    pub fn backoff(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_attempts {
            return None;
        }
        let exp = self
            .factor
            .saturating_pow(attempt.saturating_sub(1).min(16));
        let raw = self.base_delay.saturating_mul(exp);
        Some(raw.min(self.max_delay))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_sequence_doubles_from_base() {
        let p = RetryPolicy::default();
        assert_eq!(p.backoff(1), Some(Duration::from_secs(1)));
        assert_eq!(p.backoff(2), Some(Duration::from_secs(2)));
        assert_eq!(p.backoff(3), Some(Duration::from_secs(4)));
        assert_eq!(p.backoff(7), Some(Duration::from_secs(60)));
    }

    #[test]
    fn backoff_capped_at_max_delay() {
        let p = RetryPolicy::default();
        for attempt in 7..10 {
            assert_eq!(p.backoff(attempt), Some(p.max_delay));
        }
    }

    #[test]
    fn respects_max_attempts() {
        let p = RetryPolicy::default();
        assert!(p.backoff(9).is_some());
        assert_eq!(p.backoff(10), None);
        assert_eq!(p.backoff(11), None);
    }
}
