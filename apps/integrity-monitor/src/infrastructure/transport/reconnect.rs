//! Reconnect Backoff
//!
//! Exponential backoff with jitter between transport connection attempts.
//! A successful connection resets the schedule.

use std::time::Duration;

use rand::Rng;

/// Backoff schedule parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound on any delay.
    pub max_delay: Duration,
    /// Growth factor per failed attempt.
    pub multiplier: f64,
    /// Fraction of the delay added or removed at random.
    pub jitter: f64,
    /// Give up after this many consecutive failures; 0 retries forever.
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.1,
            max_attempts: 0,
        }
    }
}

/// Stateful backoff for one connection.
#[derive(Debug)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    next: Duration,
    failures: u32,
}

impl ReconnectPolicy {
    /// Fresh schedule.
    #[must_use]
    pub const fn new(config: ReconnectConfig) -> Self {
        let next = config.initial_delay;
        Self {
            config,
            next,
            failures: 0,
        }
    }

    /// Delay before the next attempt, or `None` once attempts are exhausted.
    #[must_use]
    pub fn next_delay(&mut self) -> Option<Duration> {
        if !self.should_retry() {
            return None;
        }
        self.failures += 1;

        let delay = self.jittered(self.next);
        self.next = scale(self.next, self.config.multiplier.max(1.0)).min(self.config.max_delay);
        Some(delay)
    }

    /// Forget previous failures after a successful connection.
    pub const fn reset(&mut self) {
        self.next = self.config.initial_delay;
        self.failures = 0;
    }

    /// Consecutive failures so far.
    #[must_use]
    pub const fn failures(&self) -> u32 {
        self.failures
    }

    /// Whether another attempt is allowed.
    #[must_use]
    pub const fn should_retry(&self) -> bool {
        self.config.max_attempts == 0 || self.failures < self.config.max_attempts
    }

    fn jittered(&self, delay: Duration) -> Duration {
        let spread = self.config.jitter.clamp(0.0, 1.0);
        if spread <= 0.0 {
            return delay;
        }
        let factor = rand::rng().random_range((1.0 - spread)..=(1.0 + spread));
        scale(delay, factor).max(Duration::from_millis(1))
    }
}

/// Multiply a delay, rounding to whole milliseconds and saturating.
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
fn scale(delay: Duration, factor: f64) -> Duration {
    let millis = (delay.as_millis() as f64 * factor).round();
    if !millis.is_finite() || millis <= 0.0 {
        return Duration::ZERO;
    }
    Duration::from_millis(if millis >= u64::MAX as f64 {
        u64::MAX
    } else {
        millis as u64
    })
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    fn fixed(initial_ms: u64, max_ms: u64, multiplier: f64, max_attempts: u32) -> ReconnectPolicy {
        ReconnectPolicy::new(ReconnectConfig {
            initial_delay: Duration::from_millis(initial_ms),
            max_delay: Duration::from_millis(max_ms),
            multiplier,
            jitter: 0.0,
            max_attempts,
        })
    }

    #[test_case(2.0, &[100, 200, 400, 800] ; "doubling")]
    #[test_case(4.0, &[100, 400, 1000, 1000] ; "capped")]
    #[test_case(0.5, &[100, 100, 100, 100] ; "never shrinks")]
    fn schedule(multiplier: f64, expected_ms: &[u64]) {
        let mut policy = fixed(100, 1000, multiplier, 0);
        let delays: Vec<u64> = expected_ms
            .iter()
            .map(|_| u64::try_from(policy.next_delay().unwrap().as_millis()).unwrap())
            .collect();
        assert_eq!(delays, expected_ms);
    }

    #[test]
    fn gives_up_after_max_attempts() {
        let mut policy = fixed(10, 100, 2.0, 2);
        assert!(policy.next_delay().is_some());
        assert!(policy.next_delay().is_some());
        assert!(policy.next_delay().is_none());
        assert!(!policy.should_retry());
        assert_eq!(policy.failures(), 2);
    }

    #[test]
    fn reset_restarts_schedule() {
        let mut policy = fixed(10, 100, 2.0, 2);
        let _ = policy.next_delay();
        let _ = policy.next_delay();
        policy.reset();
        assert_eq!(policy.failures(), 0);
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(10)));
    }

    #[test]
    fn jitter_stays_in_band() {
        for _ in 0..100 {
            let mut policy = ReconnectPolicy::new(ReconnectConfig {
                initial_delay: Duration::from_millis(1000),
                jitter: 0.1,
                ..ReconnectConfig::default()
            });
            let ms = policy.next_delay().unwrap().as_millis();
            assert!((900..=1100).contains(&ms), "{ms}ms outside band");
        }
    }
}
