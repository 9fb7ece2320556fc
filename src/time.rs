//! Platform-aware time utilities.
//!
//! Rate-limit deadlines are wall-clock instants because they come from the
//! server as "seconds from now" and are compared across calling contexts.
//! On WASM, chrono's `wasmbind` feature backs `Utc::now()` with `Date.now()`.

use chrono::{DateTime, Utc};
use std::time::Duration;

/// Returns the current wall-clock instant.
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Returns `now + delay`, saturating instead of overflowing.
pub fn after(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|delay| now.checked_add_signed(delay))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Returns `now + seconds` for a server-supplied, possibly fractional delay.
///
/// Negative or non-finite values are treated as zero.
pub fn after_secs_f64(now: DateTime<Utc>, seconds: f64) -> DateTime<Utc> {
    if !seconds.is_finite() || seconds <= 0.0 {
        return now;
    }
    after(now, Duration::from_secs_f64(seconds.min(u32::MAX as f64)))
}
