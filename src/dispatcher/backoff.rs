//! Jittered exponential backoff for batch-write retries (§4.F "Batch retry
//! policy"). Grounded on `stormasm-ioxnu22july/backoff`'s `BackoffConfig`/
//! `Backoff`, adapted to the fixed `{maxAttempts, baseDelay, maxDelay,
//! jitter}` shape §4.F names rather than that crate's open-ended
//! `base`-multiplier config.

use std::time::Duration;

use rand::Rng;

/// `{maxAttempts:int=8, baseDelay:duration=100ms, maxDelay:duration=20s,
/// jitter:bool=true}` (§4.F).
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(20),
            jitter: true,
        }
    }
}

/// Computes the delay for retry attempt `i` (0-indexed): `min(maxDelay,
/// baseDelay * 2^i)`, scaled by a uniform random in `[0.5, 1.0]` when
/// `jitter` is set.
pub fn delay_for_attempt(config: &RetryConfig, attempt: u32) -> Duration {
    let exponential = config.base_delay.as_secs_f64() * 2f64.powi(attempt as i32);
    let capped = exponential.min(config.max_delay.as_secs_f64());
    let scaled = if config.jitter {
        let factor = rand::thread_rng().gen_range(0.5..=1.0);
        capped * factor
    } else {
        capped
    };
    Duration::from_secs_f64(scaled)
}
