//! Retry scheduling with exponential backoff and jitter.
//!
//! The queue retries items that exhausted the provider chain. Instead of
//! sleeping inline, [`BackoffConfig::eligible_at`] computes the absolute
//! next-eligible time for an item, keyed off the injected
//! [`Clock`](crate::clock::Clock), so retry state stays inspectable and
//! tests never wait on real timers.

use std::time::Duration;

/// Retry policy for queue items that exhausted the provider chain.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Total attempts per item, counting the first. 1 means no retry.
    pub max_attempts: u32,

    /// Delay before the first retry. Default: 1 second.
    pub initial_delay: Duration,

    /// Growth factor per retry: initial, initial * multiplier,
    /// initial * multiplier^2, ... Default: 2.0.
    pub multiplier: f64,

    /// Cap on the computed delay. Default: 60 seconds.
    pub max_delay: Duration,

    /// Jitter strategy. Default: Full.
    pub jitter: JitterStrategy,
}

/// Jitter strategy to prevent thundering herd on shared rate limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JitterStrategy {
    /// No jitter. Delay is exactly the calculated value.
    None,

    /// Full jitter: random value in `[0, calculated_delay]`.
    Full,

    /// Equal jitter: `calculated_delay/2 + random in [0, calculated_delay/2]`.
    Equal,
}

impl BackoffConfig {
    /// Single attempt, no retry.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::standard()
        }
    }

    /// Defaults for unattended batch runs: 3 attempts, 1s initial,
    /// 2x multiplier, 60s cap, full jitter.
    pub fn standard() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(60),
            jitter: JitterStrategy::Full,
        }
    }

    /// Persistent retry for long overnight queues: 5 attempts, 500ms
    /// initial, 2 minute cap.
    pub fn aggressive() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(500),
            multiplier: 2.0,
            max_delay: Duration::from_secs(120),
            jitter: JitterStrategy::Full,
        }
    }

    /// Delay before retry number `retry` (0-indexed: the delay between
    /// attempt 1 and attempt 2 is `delay_for_retry(0)`).
    ///
    /// The base is `initial_delay * multiplier^retry`, capped at
    /// `max_delay`, then jittered.
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let base = self.initial_delay.as_secs_f64() * self.multiplier.powi(retry as i32);
        let capped = base.min(self.max_delay.as_secs_f64());

        let jittered = match self.jitter {
            JitterStrategy::None => capped,
            JitterStrategy::Full => fastrand::f64() * capped,
            JitterStrategy::Equal => capped / 2.0 + fastrand::f64() * (capped / 2.0),
        };

        Duration::from_secs_f64(jittered)
    }

    /// Absolute time (clock millis) at which an item that just finished
    /// its Nth attempt (`attempts_made`, 1-indexed) becomes eligible
    /// again.
    pub fn eligible_at(&self, now_millis: u64, attempts_made: u32) -> u64 {
        self.eligible_at_with_hint(now_millis, attempts_made, None)
    }

    /// Like [`eligible_at`](Self::eligible_at), honoring a provider wait
    /// hint (Retry-After header, rate window remainder). The effective
    /// delay is the larger of the computed backoff and the hint; retrying
    /// before the hint elapses would only burn an attempt.
    pub fn eligible_at_with_hint(
        &self,
        now_millis: u64,
        attempts_made: u32,
        hint: Option<Duration>,
    ) -> u64 {
        let retry = attempts_made.saturating_sub(1);
        let delay = self.delay_for_retry(retry).max(hint.unwrap_or(Duration::ZERO));
        now_millis + delay.as_millis() as u64
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter(max_attempts: u32) -> BackoffConfig {
        BackoffConfig {
            max_attempts,
            initial_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(60),
            jitter: JitterStrategy::None,
        }
    }

    #[test]
    fn delay_grows_exponentially() {
        let config = no_jitter(5);
        assert_eq!(config.delay_for_retry(0), Duration::from_secs(1));
        assert_eq!(config.delay_for_retry(1), Duration::from_secs(2));
        assert_eq!(config.delay_for_retry(2), Duration::from_secs(4));
        assert_eq!(config.delay_for_retry(3), Duration::from_secs(8));
    }

    #[test]
    fn delay_capped_at_max() {
        let config = BackoffConfig {
            max_delay: Duration::from_secs(5),
            ..no_jitter(10)
        };
        assert_eq!(config.delay_for_retry(3), Duration::from_secs(5));
        assert_eq!(config.delay_for_retry(10), Duration::from_secs(5));
    }

    #[test]
    fn full_jitter_stays_in_range() {
        let config = BackoffConfig {
            jitter: JitterStrategy::Full,
            ..no_jitter(3)
        };
        for _ in 0..100 {
            assert!(config.delay_for_retry(1) <= Duration::from_secs(2));
        }
    }

    #[test]
    fn equal_jitter_keeps_lower_half() {
        let config = BackoffConfig {
            jitter: JitterStrategy::Equal,
            ..no_jitter(3)
        };
        for _ in 0..100 {
            let d = config.delay_for_retry(1);
            assert!(d >= Duration::from_secs(1));
            assert!(d <= Duration::from_secs(2));
        }
    }

    #[test]
    fn eligible_at_is_absolute() {
        let config = no_jitter(3);
        // After the first attempt: now + initial delay.
        assert_eq!(config.eligible_at(10_000, 1), 11_000);
        // After the second: now + 2s.
        assert_eq!(config.eligible_at(10_000, 2), 12_000);
    }

    #[test]
    fn wait_hint_overrides_shorter_backoff() {
        let config = no_jitter(3);
        // 1s computed delay, 30s hint: the hint wins.
        assert_eq!(
            config.eligible_at_with_hint(10_000, 1, Some(Duration::from_secs(30))),
            40_000
        );
    }

    #[test]
    fn longer_backoff_overrides_wait_hint() {
        let config = no_jitter(5);
        // 4s computed delay, 1s hint: backoff wins.
        assert_eq!(
            config.eligible_at_with_hint(10_000, 3, Some(Duration::from_secs(1))),
            14_000
        );
    }

    #[test]
    fn none_preset_is_single_attempt() {
        assert_eq!(BackoffConfig::none().max_attempts, 1);
    }
}
