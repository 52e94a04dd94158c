use std::time::{SystemTime, UNIX_EPOCH};

/// Wall-clock time as epoch milliseconds.
///
/// A clock set before the epoch reads as `0` instead of panicking.
#[must_use]
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
