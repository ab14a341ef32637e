//! Cooldown window arithmetic.
//!
//! Timestamps are nanoseconds since the Unix epoch, matching the
//! `tidegrid.last_event` metadata reported by targets.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Whether a target last scaled at `last_event` is still cooling down at
/// `now`. The end of the window counts as inside it.
pub fn is_in_cooldown(cooldown: Duration, now: u64, last_event: u64) -> bool {
    u128::from(last_event) + cooldown.as_nanos() >= u128::from(now)
}

/// Time left until `last_event + cooldown`, measured from `now`.
///
/// Zero once the window has passed.
pub fn remaining_cooldown(cooldown: Duration, now: u64, last_event: u64) -> Duration {
    let window_end = u128::from(last_event) + cooldown.as_nanos();
    let remaining = window_end.saturating_sub(u128::from(now));
    Duration::from_nanos(u64::try_from(remaining).unwrap_or(u64::MAX))
}

/// Current wall-clock time in nanoseconds since the Unix epoch.
pub fn epoch_nanos() -> u64 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    u64::try_from(nanos).unwrap_or(u64::MAX)
}
