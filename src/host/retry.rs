//! Exponential backoff for delivering runs

use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Pause after failed attempt `attempt` (1-based): `base * 2^(attempt - 1)`.
    /// `None` after the last attempt.
    pub fn delay_after(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt >= self.attempts {
            return None;
        }
        let factor = 2u32.saturating_pow(attempt - 1);
        Some(self.base_delay.saturating_mul(factor))
    }

    /// Every pause the policy can make, in order
    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        (1..self.attempts).filter_map(|attempt| self.delay_after(attempt))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_schedule() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.delays().collect::<Vec<_>>(),
            vec![Duration::from_secs(1), Duration::from_secs(2)]
        );
        assert_eq!(policy.delay_after(3), None);
    }

    #[test]
    fn test_longer_schedule() {
        let policy = RetryPolicy {
            attempts: 5,
            base_delay: Duration::from_millis(100),
        };
        assert_eq!(policy.delay_after(4), Some(Duration::from_millis(800)));
        assert_eq!(policy.delays().count(), 4);
    }

    #[test]
    fn test_single_attempt_never_waits() {
        let policy = RetryPolicy {
            attempts: 1,
            base_delay: Duration::from_secs(1),
        };
        assert_eq!(policy.delays().count(), 0);
    }
}
