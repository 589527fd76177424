//! Exponential backoff policy for transient push failures.
//!
//! Retry delay follows `base * 2^(attempts - 1)` capped at `max`, then gets
//! a uniform ±20% jitter so a burst of failures does not come back as a
//! synchronized thundering herd.

use rand::Rng;
use std::time::Duration;

/// Jitter window as a fraction of the deterministic delay.
pub const JITTER_RATIO: f64 = 0.2;

/// Backoff curve parameters.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Delay after the first failed attempt.
    pub base: Duration,
    /// Cap for the exponential growth.
    pub max: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(30),
            max: Duration::from_secs(3600),
        }
    }
}

/// What to do with a movement after a transient failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Schedule another attempt after the given delay.
    RetryAfter(chrono::Duration),
    /// The attempt budget is exhausted; fail terminally.
    GiveUp,
}

/// Deterministic delay for the given attempt number, without jitter.
///
/// `attempts` is the number of attempts already made; zero or negative
/// yields a zero delay.
pub fn base_delay(attempts: i32, config: &BackoffConfig) -> chrono::Duration {
    if attempts <= 0 {
        return chrono::Duration::zero();
    }

    let base_ms = config.base.as_millis() as u64;
    let max_ms = config.max.as_millis() as u64;
    let shift = attempts.saturating_sub(1) as u32;
    let multiplier = 1u64.checked_shl(shift).unwrap_or(u64::MAX);
    let delay_ms = base_ms.saturating_mul(multiplier).min(max_ms);

    chrono::Duration::milliseconds(delay_ms as i64)
}

/// Apply uniform jitter of ±[`JITTER_RATIO`] to a delay.
pub fn with_jitter<R: Rng>(delay: chrono::Duration, rng: &mut R) -> chrono::Duration {
    let millis = delay.num_milliseconds();
    if millis <= 0 {
        return delay;
    }

    let window = (millis as f64 * JITTER_RATIO) as i64;
    if window == 0 {
        return delay;
    }

    let jittered = rng.gen_range(millis - window..=millis + window);
    chrono::Duration::milliseconds(jittered)
}

/// Decide whether a movement gets another attempt.
///
/// `attempts` counts the attempt that just failed. Once it reaches
/// `max_attempts` the movement is done; the delay curve is never consulted
/// at the terminal boundary.
pub fn decide<R: Rng>(
    attempts: i32,
    max_attempts: i32,
    config: &BackoffConfig,
    rng: &mut R,
) -> RetryDecision {
    if attempts >= max_attempts {
        return RetryDecision::GiveUp;
    }

    RetryDecision::RetryAfter(with_jitter(base_delay(attempts, config), rng))
}
