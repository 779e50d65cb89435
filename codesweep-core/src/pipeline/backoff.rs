//! Exponential backoff with jitter
//!
//! Shared by the fetch retry loop, the per-file analysis retries, and the
//! delivery dispatcher. Jitter keeps parallel retries from synchronizing
//! against a rate-limited host.

use std::time::Duration;

use rand::Rng;

/// Bounded exponential backoff policy
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    /// Delay before the first retry
    pub initial: Duration,
    /// Cap on the exponential growth
    pub max: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(500),
            max: Duration::from_secs(30),
        }
    }
}

impl BackoffPolicy {
    /// Delay before retry number `retry` (1-based), with +/-50% jitter
    pub fn delay(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(16);
        let base = self
            .initial
            .saturating_mul(2u32.saturating_pow(exponent))
            .min(self.max);
        let jitter = rand::thread_rng().gen_range(0.5..1.5);
        base.mul_f64(jitter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_grows_and_caps() {
        let policy = BackoffPolicy {
            initial: Duration::from_millis(100),
            max: Duration::from_secs(1),
        };
        // Jitter is +/-50%, so bound checks use the envelope
        for retry in 1..=10 {
            let delay = policy.delay(retry);
            assert!(delay >= Duration::from_millis(50), "retry {}", retry);
            assert!(delay <= Duration::from_millis(1500), "retry {}", retry);
        }
        // First retry stays near the initial delay
        let first = policy.delay(1);
        assert!(first <= Duration::from_millis(150));
    }

    #[test]
    fn test_large_retry_does_not_overflow() {
        let policy = BackoffPolicy::default();
        let delay = policy.delay(u32::MAX);
        assert!(delay <= Duration::from_secs(45));
    }
}
