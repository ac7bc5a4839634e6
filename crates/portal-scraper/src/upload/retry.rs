//! Exponential backoff policy for uploads.

use std::time::Duration;

use crate::config::RetryConfig;
use crate::upload::BackendError;

/// Pure retry policy: no clocks and no randomness of its own.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Fraction of each delay removed at random, in [0, 1].
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            multiplier: config.multiplier,
            jitter: config.jitter.clamp(0.0, 1.0),
        }
    }

    /// Retries immediately; used where waiting would only slow things down.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            multiplier: 1.0,
            jitter: 0.0,
        }
    }

    /// Delay to wait after failed attempt number `attempt` (1-based).
    ///
    /// `jitter_sample` is a value in [0, 1]; 0 yields the full backoff delay.
    pub fn delay_for(&self, attempt: u32, jitter_sample: f64) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let backoff = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = backoff.min(self.max_delay.as_secs_f64());
        let jittered = capped * (1.0 - self.jitter * jitter_sample.clamp(0.0, 1.0));
        if jittered.is_finite() && jittered > 0.0 {
            Duration::from_secs_f64(jittered)
        } else {
            Duration::ZERO
        }
    }

    /// Whether another attempt should follow `attempts_made` failed ones.
    pub fn should_retry(&self, attempts_made: u32, error: &BackendError) -> bool {
        error.is_transient() && attempts_made < self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 4,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1000),
            multiplier: 2.0,
            jitter: 0.5,
        }
    }

    #[test]
    fn test_delay_grows_exponentially() {
        let p = policy();
        assert_eq!(p.delay_for(1, 0.0), Duration::from_millis(100));
        assert_eq!(p.delay_for(2, 0.0), Duration::from_millis(200));
        assert_eq!(p.delay_for(3, 0.0), Duration::from_millis(400));
    }

    #[test]
    fn test_delay_capped_at_max() {
        let p = policy();
        assert_eq!(p.delay_for(10, 0.0), Duration::from_millis(1000));
        assert_eq!(p.delay_for(u32::MAX, 0.0), Duration::from_millis(1000));
    }

    #[test]
    fn test_jitter_only_shortens_delay() {
        let p = policy();
        assert_eq!(p.delay_for(1, 1.0), Duration::from_millis(50));
        for sample in [0.0, 0.25, 0.5, 0.99, 1.0, 7.0, -3.0] {
            let delay = p.delay_for(2, sample);
            assert!(delay <= Duration::from_millis(200));
            assert!(delay >= Duration::from_millis(100));
        }
    }

    #[test]
    fn test_should_retry_transient_until_exhausted() {
        let p = policy();
        let transient = BackendError::Transient("HTTP 503".into());
        assert!(p.should_retry(1, &transient));
        assert!(p.should_retry(3, &transient));
        assert!(!p.should_retry(4, &transient));
    }

    #[test]
    fn test_permanent_never_retried() {
        let p = policy();
        assert!(!p.should_retry(1, &BackendError::Permanent("HTTP 400".into())));
    }

    #[test]
    fn test_from_config() {
        let p = RetryPolicy::from_config(&RetryConfig {
            max_attempts: 0,
            base_delay_ms: 250,
            max_delay_ms: 2000,
            multiplier: 3.0,
            jitter: 2.0,
        });
        assert_eq!(p.max_attempts, 1);
        assert_eq!(p.base_delay, Duration::from_millis(250));
        assert_eq!(p.jitter, 1.0);
    }

    #[test]
    fn test_immediate_has_no_delay() {
        let p = RetryPolicy::immediate(3);
        assert_eq!(p.delay_for(1, 0.0), Duration::ZERO);
        assert_eq!(p.delay_for(3, 0.5), Duration::ZERO);
    }
}
