// ABOUTME: Timestamp utilities for activation windows and log records.
// ABOUTME: Local-time string parsing and epoch-millisecond conversion.
use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};

/// Wire format for activation-window bounds and alert mail timestamps.
pub const LOCAL_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Parse a local-time string into UTC.
///
/// Empty input means "no bound" and yields `None`, as does a malformed
/// string (callers log and treat the bound as absent).
pub fn parse_local(s: &str) -> Option<DateTime<Utc>> {
    if s.is_empty() {
        return None;
    }
    let naive = NaiveDateTime::parse_from_str(s, LOCAL_TIME_FORMAT).ok()?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Epoch milliseconds for a UTC instant.
pub fn unix_millis(t: DateTime<Utc>) -> i64 {
    t.timestamp_millis()
}

/// Render epoch milliseconds as a local-time string for human output.
pub fn format_local_millis(ms: i64) -> String {
    Local
        .timestamp_millis_opt(ms)
        .earliest()
        .map(|dt| dt.format(LOCAL_TIME_FORMAT).to_string())
        .unwrap_or_default()
}
