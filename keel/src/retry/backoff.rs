use std::time::Duration;

use rand::Rng;

/// Fraction of the computed delay that jitter may add or remove.
pub const JITTER_RATIO: f64 = 0.25;

/// Computes the exponential delay before the attempt after `attempt`.
///
/// Formula: delay = min(max_delay, base * multiplier^(attempt-1))
///
/// `attempt` is 1-based; attempt 0 is treated as attempt 1.
pub fn compute_backoff_delay(
    attempt: u32,
    base: Duration,
    multiplier: f64,
    max_delay: Duration,
) -> Duration {
    let exp = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
    let scaled = (base.as_millis() as f64) * multiplier.powi(exp);
    let capped = scaled.min(max_delay.as_millis() as f64);
    let clamped_ms = if capped.is_finite() { capped.max(0.0) } else { 0.0 };

    Duration::from_millis(clamped_ms.round() as u64)
}

/// Perturbs a delay uniformly by up to ±25%, floored at zero and rounded to
/// the nearest millisecond.
pub fn apply_jitter<R: Rng + ?Sized>(delay: Duration, rng: &mut R) -> Duration {
    let base_ms = delay.as_millis() as f64;
    if base_ms <= 0.0 {
        return Duration::ZERO;
    }
    let range = base_ms * JITTER_RATIO;
    let offset = rng.gen_range(-range..=range);
    let jittered = (base_ms + offset).max(0.0);

    Duration::from_millis(jittered.round() as u64)
}

/// Full delay decision: exponential backoff followed by optional jitter.
pub fn retry_delay(
    attempt: u32,
    base: Duration,
    multiplier: f64,
    max_delay: Duration,
    jitter: bool,
) -> Duration {
    let delay = compute_backoff_delay(attempt, base, multiplier, max_delay);
    if jitter {
        apply_jitter(delay, &mut rand::thread_rng())
    } else {
        delay
    }
}
