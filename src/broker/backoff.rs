//! Reconnect delay schedule.
//!
//! The delay for attempt `n` is `first × factor^n`, clamped to `max`, then
//! jittered. The base is derived from the attempt number alone so jitter
//! never compounds across attempts.
//!
//! `factor = 1.0` with [`JitterPolicy::None`] gives a fixed interval.

use rand::Rng;
use serde::Deserialize;
use std::time::Duration;

/// Randomization applied on top of the computed delay.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JitterPolicy {
    /// Exact delay.
    #[default]
    None,
    /// Uniform in `[0, delay]`.
    Full,
    /// `delay/2 + uniform[0, delay/2]`.
    Equal,
}

impl JitterPolicy {
    pub fn apply(&self, delay: Duration) -> Duration {
        let ms = delay.as_millis() as u64;
        if ms == 0 {
            return Duration::ZERO;
        }
        let mut rng = rand::rng();
        match self {
            JitterPolicy::None => delay,
            JitterPolicy::Full => Duration::from_millis(rng.random_range(0..=ms)),
            JitterPolicy::Equal => {
                let half = ms / 2;
                let jitter = if half == 0 { 0 } else { rng.random_range(0..=half) };
                Duration::from_millis(half + jitter)
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BackoffPolicy {
    /// Delay before the first retry.
    pub first: Duration,
    /// Upper bound for any single delay.
    pub max: Duration,
    /// Growth per attempt.
    pub factor: f64,
    pub jitter: JitterPolicy,
}

impl BackoffPolicy {
    /// Fixed interval, no growth, no jitter.
    pub fn fixed(interval: Duration) -> Self {
        Self {
            first: interval,
            max: interval,
            factor: 1.0,
            jitter: JitterPolicy::None,
        }
    }

    /// Delay to wait after failed attempt number `attempt` (0-indexed).
    pub fn next(&self, attempt: u32) -> Duration {
        let max_secs = self.max.as_secs_f64();
        let exp = attempt.min(i32::MAX as u32) as i32;
        let unclamped = self.first.as_secs_f64() * self.factor.powi(exp);

        let base = if !unclamped.is_finite() || unclamped < 0.0 || unclamped > max_secs {
            self.max
        } else {
            Duration::from_secs_f64(unclamped)
        };

        self.jitter.apply(base)
    }
}

impl Default for BackoffPolicy {
    /// Five seconds between attempts, forever.
    fn default() -> Self {
        Self::fixed(Duration::from_secs(5))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exponential(jitter: JitterPolicy) -> BackoffPolicy {
        BackoffPolicy {
            first: Duration::from_millis(100),
            max: Duration::from_secs(30),
            factor: 2.0,
            jitter,
        }
    }

    #[test]
    fn test_default_is_fixed_five_seconds() {
        let policy = BackoffPolicy::default();
        for attempt in 0..20 {
            assert_eq!(policy.next(attempt), Duration::from_secs(5));
        }
    }

    #[test]
    fn test_exponential_growth_no_jitter() {
        let policy = exponential(JitterPolicy::None);
        assert_eq!(policy.next(0), Duration::from_millis(100));
        assert_eq!(policy.next(1), Duration::from_millis(200));
        assert_eq!(policy.next(2), Duration::from_millis(400));
        assert_eq!(policy.next(3), Duration::from_millis(800));
    }

    #[test]
    fn test_clamped_to_max() {
        let policy = exponential(JitterPolicy::None);
        assert_eq!(policy.next(20), Duration::from_secs(30));
        assert_eq!(policy.next(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn test_equal_jitter_bounds() {
        let policy = exponential(JitterPolicy::Equal);
        for attempt in 0..15 {
            let base_ms = (100.0 * 2.0f64.powi(attempt as i32)).min(30_000.0);
            let delay = policy.next(attempt);
            assert!(delay >= Duration::from_millis((base_ms / 2.0) as u64));
            assert!(delay <= Duration::from_millis(base_ms as u64));
        }
    }

    #[test]
    fn test_full_jitter_never_exceeds_base() {
        let policy = exponential(JitterPolicy::Full);
        for _ in 0..50 {
            assert!(policy.next(3) <= Duration::from_millis(800));
        }
    }

    #[test]
    fn test_jitter_parses_lowercase() {
        let jitter: JitterPolicy = serde_json::from_str("\"equal\"").unwrap();
        assert_eq!(jitter, JitterPolicy::Equal);
    }
}
