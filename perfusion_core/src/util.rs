//! Time formatting and rounding helpers for status snapshots.

use std::time::Duration;

const MINUTE: u64 = 60;
const HOUR: u64 = 60 * MINUTE;
const DAY: u64 = 24 * HOUR;

/// Human phrasing of a span, e.g. "a minute", "3 hours", "12 days".
pub fn natural_delta(d: Duration) -> String {
    let secs = d.as_secs();
    match secs {
        0 => "a moment".to_string(),
        1 => "a second".to_string(),
        s if s < MINUTE => format!("{s} seconds"),
        s if s < 2 * MINUTE => "a minute".to_string(),
        s if s < HOUR => format!("{} minutes", s / MINUTE),
        s if s < 2 * HOUR => "an hour".to_string(),
        s if s < DAY => format!("{} hours", s / HOUR),
        s if s < 2 * DAY => "a day".to_string(),
        s => format!("{} days", s / DAY),
    }
}

/// Relative phrasing of a past instant, e.g. "now", "5 minutes ago".
pub fn natural_time(elapsed: Duration) -> String {
    if elapsed < Duration::from_secs(1) {
        "now".to_string()
    } else {
        format!("{} ago", natural_delta(elapsed))
    }
}

/// Round to one decimal place for display.
#[inline]
pub fn round_tenth(v: f32) -> f32 {
    (v * 10.0).round() / 10.0
}
