//! Retry delay: exponential, capped, with uniform jitter.

use std::time::Duration;

use rand::Rng;

use crate::models::BackoffConfig;

/// Deterministic part of the delay before retry number `retry` (1-based):
/// `base * 2^(retry - 1)`, capped at `max`.
pub fn base_delay(config: &BackoffConfig, retry: u32) -> Duration {
    let exponent = retry.saturating_sub(1).min(32);
    let millis = config
        .base_ms
        .saturating_mul(1u64 << exponent)
        .min(config.max_ms);
    Duration::from_millis(millis)
}

/// Delay plus jitter drawn uniformly from `[0, jitter * delay]`.
pub fn delay_with<R: Rng + ?Sized>(config: &BackoffConfig, retry: u32, rng: &mut R) -> Duration {
    let delay = base_delay(config, retry);
    let spread = delay.as_secs_f64() * config.jitter.clamp(0.0, 1.0);
    if spread <= 0.0 {
        return delay;
    }
    delay + Duration::from_secs_f64(rng.gen_range(0.0..=spread))
}

pub fn next_delay(config: &BackoffConfig, retry: u32) -> Duration {
    delay_with(config, retry, &mut rand::thread_rng())
}
