//! # Retry Scheduler
//!
//! Pure decision function for failed outbox deliveries: given how many
//! attempts an event has already used, either wait and try again or give up.
//!
//! ## Policy
//!
//! Binary exponential backoff with a cap:
//!
//! ```text
//! delay = min(base * 2^retry_count, max)
//! ```
//!
//! With `base = 1s, max = 60s`:
//!
//! | retry_count | delay |
//! |-------------|-------|
//! | 0           | 1s    |
//! | 1           | 2s    |
//! | 2           | 4s    |
//! | 3           | 8s    |
//! | 4           | 16s   |
//! | 5           | 32s   |
//! | 6+          | 60s   |
//!
//! Optional jitter scales the delay by `1 + jitter_ratio * sample` and
//! re-applies the cap, so events that failed together do not all come due in
//! the same instant.
//!
//! ## Dead letters
//!
//! `retry_count` is the count *before* the failing attempt is recorded. Once
//! `retry_count + 1 >= max_retries` the decision is [`RetryDecision::DeadLetter`]
//! whatever the delay would have been.
//!
//! ## Purity
//!
//! [`decide`] takes the jitter sample as an argument. Callers draw it with
//! [`jitter_sample`] (or pass `0.0`), so the function itself is deterministic
//! and table-testable.

use rand::Rng;
use std::time::Duration;

/// Exponential backoff parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Fraction of the delay to randomize, within `0.0..=1.0`.
    pub jitter_ratio: f64,
}

impl Default for BackoffPolicy {
    /// 1s base, 5 minute cap, ±10% jitter.
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(300),
            jitter_ratio: 0.1,
        }
    }
}

impl BackoffPolicy {
    /// A policy without jitter.
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
            jitter_ratio: 0.0,
        }
    }

    /// Retry immediately every time. Useful for tests and manual drains.
    pub fn immediate() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO)
    }

    pub fn with_jitter(mut self, jitter_ratio: f64) -> Self {
        self.jitter_ratio = jitter_ratio.clamp(0.0, 1.0);
        self
    }

    /// Un-jittered delay after `retry_count` previous failures.
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        let base_ms = duration_ms(self.base_delay);
        let max_ms = duration_ms(self.max_delay);
        let multiplier = 1u64.checked_shl(retry_count).unwrap_or(u64::MAX);
        let delay_ms = base_ms.saturating_mul(multiplier).min(max_ms);
        Duration::from_millis(delay_ms)
    }

    /// Delay with jitter applied. `sample` is clamped to `-1.0..=1.0`.
    pub fn jittered_delay_for(&self, retry_count: u32, sample: f64) -> Duration {
        let delay_ms = duration_ms(self.delay_for(retry_count)) as f64;
        if self.jitter_ratio <= 0.0 || delay_ms == 0.0 {
            return Duration::from_millis(delay_ms as u64);
        }

        let factor = 1.0 + self.jitter_ratio * sample.clamp(-1.0, 1.0);
        let max_ms = duration_ms(self.max_delay) as f64;
        let jittered = (delay_ms * factor).clamp(0.0, max_ms);
        Duration::from_millis(jittered.round() as u64)
    }
}

/// What to do with an event whose attempt just failed (retryably).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Reschedule as PENDING, due after this delay.
    RetryAfter(Duration),
    /// Attempt budget exhausted.
    DeadLetter,
}

/// Decide the fate of an event that has failed `retry_count` times before
/// this attempt.
pub fn decide(
    retry_count: u32,
    policy: &BackoffPolicy,
    max_retries: u32,
    jitter_sample: f64,
) -> RetryDecision {
    if retry_count.saturating_add(1) >= max_retries {
        return RetryDecision::DeadLetter;
    }
    RetryDecision::RetryAfter(policy.jittered_delay_for(retry_count, jitter_sample))
}

/// Draw a jitter sample uniformly from `-1.0..=1.0`.
pub fn jitter_sample<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    rng.gen_range(-1.0..=1.0)
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
