//! Delay computation: exponential backoff, cap, jitter, floor

use rand::Rng;

use crate::config::SchedulerTuning;

/// Fraction of the target delay used as the jitter band (±10%)
const JITTER_RATIO: f64 = 0.1;

/// Compute the next delay for a job
///
/// 1. `target = base × 2^attempt`, capped at `max(base, max_backoff_ms)`
/// 2. uniform jitter in `±round(target × 0.1)`
/// 3. floor at `min_check_interval_ms`
#[must_use]
pub fn compute_delay(base_interval_ms: u64, backoff_attempt: u32, tuning: &SchedulerTuning) -> u64 {
    let cap = base_interval_ms.max(tuning.max_backoff_ms);
    let target = base_interval_ms
        .saturating_mul(2u64.saturating_pow(backoff_attempt))
        .min(cap);

    let band = (target as f64 * JITTER_RATIO).round() as i64;
    let offset = if band > 0 {
        rand::rng().random_range(-band..=band)
    } else {
        0
    };

    let jittered = (target as i64).saturating_add(offset).max(0) as u64;
    jittered.max(tuning.min_check_interval_ms)
}

/// Largest useful backoff exponent: past this, `base × 2^n` is capped anyway
#[must_use]
pub fn max_backoff_attempt(base_interval_ms: u64, tuning: &SchedulerTuning) -> u32 {
    let cap = base_interval_ms.max(tuning.max_backoff_ms);
    let base = base_interval_ms.max(1);
    let mut attempt = 0u32;
    while base.saturating_mul(2u64.saturating_pow(attempt)) < cap && attempt < 63 {
        attempt += 1;
    }
    attempt
}
