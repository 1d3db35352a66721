//! Time utilities for remexec

use std::time::{Duration, SystemTime, UNIX_EPOCH};

fn since_epoch() -> Duration {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
}

/// Get the current Unix timestamp in milliseconds.
///
/// # Examples
/// ```
/// use rx_core::time::current_time_millis;
///
/// let now = current_time_millis();
/// assert!(now > 0);
/// ```
pub fn current_time_millis() -> u64 {
    since_epoch().as_millis() as u64
}

/// Get the current Unix timestamp in seconds.
pub fn current_time_secs() -> u64 {
    since_epoch().as_secs()
}

/// Check that a Unix timestamp in seconds is within `max_skew` of now,
/// in either direction.
pub fn within_skew(timestamp_secs: u64, max_skew: Duration) -> bool {
    current_time_secs().abs_diff(timestamp_secs) <= max_skew.as_secs()
}
