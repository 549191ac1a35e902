//! Delay policy between generation attempts

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Backoff strategies for inter-attempt delays
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Retry immediately
    #[default]
    None,
    /// Fixed delay between attempts
    Fixed,
    /// Delay multiplied by `base` after every failed attempt
    Exponential,
}

/// Backoff configuration applied by the retrying generator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffConfig {
    #[serde(default)]
    pub strategy: BackoffStrategy,

    /// Growth factor for the exponential strategy
    #[serde(default = "default_exponential_base")]
    pub base: f64,

    /// Delay before the second attempt
    #[serde(default = "default_initial_delay", with = "humantime_serde")]
    pub initial_delay: Duration,

    /// Upper bound for any single delay
    #[serde(default = "default_max_delay", with = "humantime_serde")]
    pub max_delay: Duration,

    /// Jitter factor (0.0 to 1.0); zero disables jitter
    #[serde(default)]
    pub jitter_factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            strategy: BackoffStrategy::None,
            base: default_exponential_base(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            jitter_factor: 0.0,
        }
    }
}

impl BackoffConfig {
    pub fn fixed(delay: Duration) -> Self {
        Self {
            strategy: BackoffStrategy::Fixed,
            base: default_exponential_base(),
            initial_delay: delay,
            max_delay: delay,
            jitter_factor: 0.0,
        }
    }

    /// Delay to wait after the given (1-based) failed attempt
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let base_delay = match &self.strategy {
            BackoffStrategy::None => return Duration::ZERO,
            BackoffStrategy::Fixed => self.initial_delay,
            BackoffStrategy::Exponential => {
                let multiplier = self.base.powi(attempt.saturating_sub(1) as i32);
                Duration::from_secs_f64(self.initial_delay.as_secs_f64() * multiplier)
            }
        };

        self.apply_jitter(base_delay.min(self.max_delay))
    }

    fn apply_jitter(&self, delay: Duration) -> Duration {
        if self.jitter_factor <= 0.0 || delay.is_zero() {
            return delay;
        }

        let mut rng = rand::rng();
        let jitter_range = delay.as_secs_f64() * self.jitter_factor.min(1.0);
        let jitter = rng.random_range(-jitter_range / 2.0..=jitter_range / 2.0);
        Duration::from_secs_f64((delay.as_secs_f64() + jitter).max(0.0))
    }
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(20)
}

fn default_exponential_base() -> f64 {
    2.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_none_never_waits() {
        let config = BackoffConfig::default();
        assert_eq!(config.delay_after(1), Duration::ZERO);
        assert_eq!(config.delay_after(9), Duration::ZERO);
    }

    #[test]
    fn test_fixed() {
        let config = BackoffConfig::fixed(Duration::from_millis(250));
        assert_eq!(config.delay_after(1), Duration::from_millis(250));
        assert_eq!(config.delay_after(4), Duration::from_millis(250));
    }

    #[test]
    fn test_exponential_capped() {
        let config = BackoffConfig {
            strategy: BackoffStrategy::Exponential,
            base: 2.0,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
            jitter_factor: 0.0,
        };
        assert_eq!(config.delay_after(1), Duration::from_secs(1));
        assert_eq!(config.delay_after(2), Duration::from_secs(2));
        assert_eq!(config.delay_after(3), Duration::from_secs(4));
        assert_eq!(config.delay_after(4), Duration::from_secs(5));
    }

    #[test]
    fn test_jitter_stays_in_band() {
        let config = BackoffConfig {
            jitter_factor: 0.5,
            ..BackoffConfig::fixed(Duration::from_secs(10))
        };
        for _ in 0..10 {
            let secs = config.delay_after(1).as_secs_f64();
            assert!((7.5..=12.5).contains(&secs));
        }
    }

    #[test]
    fn test_deserialize_from_toml() {
        let config: BackoffConfig = toml::from_str(
            r#"
            strategy = "exponential"
            base = 3.0
            initial_delay = "500ms"
            max_delay = "10s"
            "#,
        )
        .unwrap();
        assert_eq!(config.strategy, BackoffStrategy::Exponential);
        assert_eq!(config.base, 3.0);
        assert_eq!(config.initial_delay, Duration::from_millis(500));
    }
}
