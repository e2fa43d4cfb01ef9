//! Timestamp normalization.
//!
//! The Python source accepts whatever `parse_timestamp` is handed — a date
//! string, a datetime string, a `date`, or a `datetime` — and always
//! returns an aware datetime. Rust has no such dynamic dispatch, so the
//! four accepted shapes become explicit enum variants (see the registration
//! surface's design note on replacing argument introspection with an
//! explicit schema).

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;

use crate::error::{CacheError, Result};

/// The timestamp argument a registered computation may be called with.
///
/// Naive values are localized to the call's timezone; [`TimestampInput::Aware`]
/// is accepted as-is and converted to UTC for internal storage.
#[derive(Debug, Clone)]
pub enum TimestampInput {
    /// A bare calendar date — becomes local midnight in the call's timezone.
    Date(NaiveDate),
    /// A naive datetime — interpreted as wall-clock time in the call's timezone.
    Naive(NaiveDateTime),
    /// An already-aware instant — used as-is.
    Aware(DateTime<Utc>),
    /// A string to be parsed as RFC3339, an ISO datetime, or an ISO date, in that order.
    Str(String),
}

impl From<NaiveDate> for TimestampInput {
    fn from(d: NaiveDate) -> Self {
        TimestampInput::Date(d)
    }
}

impl From<NaiveDateTime> for TimestampInput {
    fn from(d: NaiveDateTime) -> Self {
        TimestampInput::Naive(d)
    }
}

impl From<DateTime<Utc>> for TimestampInput {
    fn from(d: DateTime<Utc>) -> Self {
        TimestampInput::Aware(d)
    }
}

impl From<&str> for TimestampInput {
    fn from(s: &str) -> Self {
        TimestampInput::Str(s.to_string())
    }
}

impl From<String> for TimestampInput {
    fn from(s: String) -> Self {
        TimestampInput::Str(s)
    }
}

/// Parse/normalize a timestamp input to an aware UTC instant.
///
/// Naive values (`Date`, `Naive`, and strings that parse as one of those)
/// are localized to `tz` before conversion to UTC storage form. Fails with
/// [`CacheError::InvalidTimestamp`] if the string is not interpretable as
/// any of the three string forms.
pub fn parse_timestamp(input: impl Into<TimestampInput>, tz: Tz) -> Result<DateTime<Utc>> {
    match input.into() {
        TimestampInput::Aware(dt) => Ok(dt),
        TimestampInput::Naive(naive) => Ok(localize(naive, tz)),
        TimestampInput::Date(date) => {
            let midnight = date.and_hms_opt(0, 0, 0).expect("midnight always valid");
            Ok(localize(midnight, tz))
        }
        TimestampInput::Str(s) => parse_timestamp_str(&s, tz),
    }
}

fn parse_timestamp_str(input: &str, tz: Tz) -> Result<DateTime<Utc>> {
    let trimmed = input.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(dt.with_timezone(&Utc));
    }

    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, fmt) {
            return Ok(localize(naive, tz));
        }
    }

    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        let midnight = date.and_hms_opt(0, 0, 0).expect("midnight always valid");
        return Ok(localize(midnight, tz));
    }

    Err(CacheError::InvalidTimestamp(format!(
        "could not parse '{trimmed}' as rfc3339, an iso datetime, or an iso date"
    )))
}

/// Localize a naive wall-clock datetime in `tz`, resolving DST ambiguity by
/// taking the earlier occurrence and nonexistent times by shifting forward —
/// the same policy [`crate::time::tz::local_to_utc`] uses for bucket boundaries.
fn localize(naive: NaiveDateTime, tz: Tz) -> DateTime<Utc> {
    match tz.from_local_datetime(&naive).single() {
        Some(dt) => dt.with_timezone(&Utc),
        None => tz
            .from_local_datetime(&naive)
            .earliest()
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|| Utc.from_utc_datetime(&naive)),
    }
}
