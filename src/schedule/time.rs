//! Minute-resolution timestamps and zone conversion.

use chrono::{DateTime, Duration, LocalResult, NaiveDateTime, NaiveTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use std::fmt;

/// Storage format of `when_utc`. Fixed width and zero padded, so string
/// order equals time order.
pub const MINUTE_FORMAT: &str = "%Y-%m-%d %H:%M";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimeError {
    /// Input is not `YYYY-MM-DD HH:MM`.
    Format(String),
    /// The civil time is skipped by a DST transition in the zone.
    Nonexistent { input: String, zone: Tz },
}

impl fmt::Display for TimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Format(input) => {
                write!(f, "invalid time '{input}', use YYYY-MM-DD HH:MM (24h)")
            }
            Self::Nonexistent { input, zone } => {
                write!(f, "{input} does not exist in {zone} (clocks skip it)")
            }
        }
    }
}

impl std::error::Error for TimeError {}

/// Current UTC time truncated to the minute, in [`MINUTE_FORMAT`].
pub fn now_utc_minute() -> String {
    format_minute(Utc::now())
}

pub fn format_minute<Z: TimeZone>(at: DateTime<Z>) -> String
where
    Z::Offset: fmt::Display,
{
    at.format(MINUTE_FORMAT).to_string()
}

/// Parse civil time `input` in `zone` and convert it to a stored UTC string.
///
/// An ambiguous time (clocks fall back) resolves to the earlier instant.
pub fn local_to_utc(input: &str, zone: Tz) -> Result<String, TimeError> {
    let input = input.trim();
    let naive = NaiveDateTime::parse_from_str(input, MINUTE_FORMAT)
        .map_err(|_| TimeError::Format(input.to_string()))?;
    match zone.from_local_datetime(&naive) {
        LocalResult::Single(local) | LocalResult::Ambiguous(local, _) => {
            Ok(format_minute(local.with_timezone(&Utc)))
        }
        LocalResult::None => Err(TimeError::Nonexistent {
            input: input.to_string(),
            zone,
        }),
    }
}

/// Render a stored UTC string as civil time in `zone`.
pub fn utc_to_local(stored: &str, zone: Tz) -> Result<String, TimeError> {
    Ok(format_minute(parse_utc(stored)?.with_timezone(&zone)))
}

/// Parse a stored UTC string.
pub fn parse_utc(stored: &str) -> Result<DateTime<Utc>, TimeError> {
    NaiveDateTime::parse_from_str(stored.trim(), MINUTE_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|_| TimeError::Format(stored.to_string()))
}

/// First instant at or after civil `naive` in `zone`. Times inside a DST gap
/// move forward to the first civil time that exists.
pub fn resolve_local(zone: Tz, naive: NaiveDateTime) -> DateTime<Tz> {
    let mut candidate = naive;
    // Real-world gaps are at most two hours
    for _ in 0..(3 * 60) {
        if let Some(local) = zone.from_local_datetime(&candidate).earliest() {
            return local;
        }
        candidate += Duration::minutes(1);
    }
    zone.from_utc_datetime(&naive)
}

/// Seconds and sub-seconds dropped.
pub fn truncate_to_minute(time: NaiveTime) -> NaiveTime {
    time.with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(time)
}
