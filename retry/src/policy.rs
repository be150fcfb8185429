//! Retry policy with exponential backoff.
//!
//! # Defaults
//!
//! - Max retries: 2 (3 total attempts)
//! - Initial delay: 500ms
//! - Max delay: 8 seconds
//! - Jitter: down-jitter up to 25% (multiplier in [0.75, 1.0])

use std::time::Duration;

use pledge_config::RetryConfig;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of retries (not counting the first attempt).
    pub max_retries: u32,
    /// Backoff delay before the first retry.
    pub initial_delay: Duration,
    /// Maximum backoff delay.
    pub max_delay: Duration,
    /// Jitter factor for down-jitter (0.25 = up to 25% reduction).
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            jitter_factor: 0.25,
        }
    }
}

impl RetryPolicy {
    /// Retry immediately, with no delay between attempts.
    #[must_use]
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter_factor: 0.0,
        }
    }

    /// Defaults overridden by whichever fields the config sets.
    #[must_use]
    pub fn from_config(config: &RetryConfig) -> Self {
        let defaults = Self::default();
        Self {
            max_retries: config.max_retries.unwrap_or(defaults.max_retries),
            initial_delay: config.initial_delay().unwrap_or(defaults.initial_delay),
            max_delay: config.max_delay().unwrap_or(defaults.max_delay),
            jitter_factor: config.jitter_factor.unwrap_or(defaults.jitter_factor),
        }
    }

    /// Total attempts, including the first.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self::from_config(config)
    }
}

/// Calculate retry delay with exponential backoff and jitter.
///
/// `backoff_step` is 0 before the first retry, 1 before the second, etc.
#[must_use]
pub fn calculate_retry_delay(backoff_step: u32, policy: &RetryPolicy) -> Duration {
    // Exponential backoff: initial_delay * 2^backoff_step
    let base = policy.initial_delay.as_secs_f64() * 2.0_f64.powi(backoff_step.min(31) as i32);
    let capped = base.min(policy.max_delay.as_secs_f64());

    // Out-of-range factors from hand-built policies are clamped, NaN disables jitter
    let jitter_factor = if policy.jitter_factor.is_nan() {
        0.0
    } else {
        policy.jitter_factor.clamp(0.0, 1.0)
    };

    // Down-jitter: multiply by random factor in [1 - jitter_factor, 1.0]
    let jitter = 1.0 - rand::random::<f64>() * jitter_factor;
    Duration::from_secs_f64(capped * jitter)
}
