//! Exponential backoff with optional jitter.

use rand::Rng;
use std::time::Duration;

use crate::config::schema::RetryConfig;

/// Backoff schedule: `initial * multiplier^n`, capped at `max`.
#[derive(Debug, Clone, PartialEq)]
pub struct Backoff {
    pub initial: Duration,
    pub max: Duration,
    pub multiplier: f64,
    /// Fraction of each delay that may be randomly removed (0.0 to 1.0).
    pub jitter_ratio: f64,
}

impl Backoff {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            initial: Duration::from_millis(config.initial_backoff_ms),
            max: Duration::from_millis(config.max_backoff_ms),
            multiplier: config.multiplier,
            jitter_ratio: config.jitter_ratio,
        }
    }

    /// Delay after the `retry`-th failed attempt (0-based), before jitter.
    pub fn base_delay(&self, retry: u32) -> Duration {
        let factor = self.multiplier.max(1.0).powi(retry.min(i32::MAX as u32) as i32);
        let millis = (self.initial.as_millis() as f64 * factor).min(self.max.as_millis() as f64);
        Duration::from_millis(millis as u64)
    }

    /// Delay after the `retry`-th failed attempt with jitter applied.
    ///
    /// Jitter only shortens the delay, so the cap is never exceeded.
    pub fn delay(&self, retry: u32) -> Duration {
        let base = self.base_delay(retry);
        let ratio = self.jitter_ratio.clamp(0.0, 1.0);
        if ratio == 0.0 || base.is_zero() {
            return base;
        }
        let cut = rand::thread_rng().gen_range(0.0..ratio);
        base.mul_f64(1.0 - cut)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}
