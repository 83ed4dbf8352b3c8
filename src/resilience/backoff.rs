//! Exponential backoff.

use std::time::Duration;

/// Upper bound on any single backoff sleep.
pub const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Calculate the delay before retry `attempt` (1-based).
///
/// `base * multiplier^(attempt-1)`, capped at [`MAX_BACKOFF`]. Attempt 0 means
/// "first try" and never waits.
pub fn calculate_backoff(attempt: u32, base: Duration, multiplier: f64) -> Duration {
    if attempt == 0 || base.is_zero() {
        return Duration::ZERO;
    }

    let factor = multiplier.max(1.0).powi(attempt.saturating_sub(1) as i32);
    let delay_ms = base.as_millis() as f64 * factor;
    if !delay_ms.is_finite() || delay_ms >= MAX_BACKOFF.as_millis() as f64 {
        return MAX_BACKOFF;
    }

    Duration::from_millis(delay_ms.round() as u64)
}
