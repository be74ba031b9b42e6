//! Scheduled-shutdown timing.

use std::time::Duration;

/// Tick interval for shutdown warnings, shrinking as the deadline
/// approaches: hourly down to every second.
pub fn dynamic_tick_duration(remaining: Duration) -> Duration {
    const SEC: u64 = 1;
    const MIN: u64 = 60;
    match remaining.as_secs() {
        0..=5 => Duration::from_secs(SEC),
        6..=15 => Duration::from_secs(5 * SEC),
        16..=60 => Duration::from_secs(15 * SEC),
        61..=300 => Duration::from_secs(MIN),
        301..=900 => Duration::from_secs(5 * MIN),
        901..=3600 => Duration::from_secs(15 * MIN),
        _ => Duration::from_secs(60 * MIN),
    }
}
