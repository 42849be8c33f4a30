// Millisecond timestamp helpers

use chrono::{DateTime, TimeZone, Utc};

/// Distance below which a cursor counts as having reached the end of a range
pub const END_TOLERANCE_MS: i64 = 1_000;

pub const DEFAULT_BUCKET_WIDTH_MS: i64 = 5 * 60 * 1_000;

/// Truncate `timestamp` to the start of its bucket. Buckets are aligned to the
/// epoch, not to the data.
pub fn bucket_floor(timestamp: i64, width_ms: i64) -> i64 {
    timestamp - timestamp.rem_euclid(width_ms)
}

/// True once `cursor` is within the end tolerance of (or past) `end_time`
pub fn reached_end(cursor: i64, end_time: i64) -> bool {
    end_time - cursor < END_TOLERANCE_MS
}

pub fn to_millis(dt: &DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

pub fn from_millis(ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single()
}

/// Parse an RFC 3339 timestamp into epoch milliseconds
pub fn parse_rfc3339_millis(value: &str) -> Result<i64, chrono::ParseError> {
    let dt = DateTime::parse_from_rfc3339(value)?;
    Ok(dt.with_timezone(&Utc).timestamp_millis())
}
