// Timekeeping helpers

use std::time::{SystemTime, UNIX_EPOCH};

/// Number of milliseconds since the unix epoch
///
/// Used to stamp log lines and to drive coarse frontend timers
/// that do not need monotonic behavior.
pub fn get_current_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("System time before unix epoch")
        .as_millis() as u64
}
