//! Retry policy: attempt budget and exponential backoff with jitter.
//!
//! The delay before retry `n` (0-based, so before attempt `n + 2`) is
//! `min(base_delay * 2^n, max_delay)`. With jitter enabled the capped delay
//! is scaled by a uniform factor in `[0.5, 1.5]` and capped again.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const JITTER_MIN: f64 = 0.5;
const JITTER_MAX: f64 = 1.5;

/// Retry configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt
    pub max_retries: u32,

    /// Delay before the first retry
    #[serde(with = "crate::duration_serde")]
    pub base_delay: Duration,

    /// Upper bound for any single delay
    #[serde(with = "crate::duration_serde")]
    pub max_delay: Duration,

    /// Randomize delays to avoid synchronized retries
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Total attempts including the first one.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay before the given retry (0-based). Never exceeds `max_delay`.
    pub fn calculate_delay(&self, retry: u32) -> Duration {
        let max_secs = self.max_delay.as_secs_f64();
        let exponent = retry.min(i32::MAX as u32) as i32;
        let mut secs = (self.base_delay.as_secs_f64() * 2f64.powi(exponent)).min(max_secs);

        if self.jitter {
            let factor = rand::thread_rng().gen_range(JITTER_MIN..=JITTER_MAX);
            secs = (secs * factor).min(max_secs);
        }

        Duration::try_from_secs_f64(secs).unwrap_or(self.max_delay)
    }

    /// Delays for every retry of one execution, in order.
    pub fn backoff(&self) -> RetryBackoff {
        RetryBackoff {
            config: self.clone(),
            retry: 0,
        }
    }
}

/// Iterator over the delays of one retry sequence.
///
/// Yields exactly `max_retries` delays, so a consumer that sleeps once per
/// item performs at most `max_retries + 1` attempts.
#[derive(Debug, Clone)]
pub struct RetryBackoff {
    config: RetryConfig,
    retry: u32,
}

impl Iterator for RetryBackoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        if self.retry >= self.config.max_retries {
            return None;
        }
        let delay = self.config.calculate_delay(self.retry);
        self.retry += 1;
        Some(delay)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.config.max_retries.saturating_sub(self.retry) as usize;
        (remaining, Some(remaining))
    }
}
