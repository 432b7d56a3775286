//! Conversions between [SystemTime] and the millisecond values persisted by storage engines.
//!
//! The forward direction is [SystemTimeExt::epoch_millis](commonware_utils::SystemTimeExt).

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Time `millis` milliseconds after the unix epoch.
pub(crate) fn from_millis(millis: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_millis(millis)
}

/// Returns true if `taken_at` is more than `threshold` before `now`.
pub(crate) fn expired(taken_at: SystemTime, threshold: Duration, now: SystemTime) -> bool {
    match now.duration_since(taken_at) {
        Ok(elapsed) => elapsed > threshold,
        Err(_) => false,
    }
}
