//! Timezone handling utilities.
//!
//! This module provides functions for parsing timezone names and
//! converting between UTC and local time with proper DST handling.

use chrono::{DateTime, TimeZone, Utc};
use chrono_tz::Tz;

use crate::error::{CacheError, Result};

/// Parse an IANA timezone name into a [`chrono_tz::Tz`].
///
/// # Arguments
///
/// * `name` - The IANA timezone name (e.g., "Europe/Berlin", "America/New_York")
///
/// # Returns
///
/// The parsed timezone on success, or an error if the timezone name is invalid.
///
/// # Examples
///
/// ```
/// use bucketcache_core::time::tz::parse_tz;
///
/// let tz = parse_tz("Europe/Berlin").unwrap();
/// assert_eq!(tz.to_string(), "Europe/Berlin");
/// ```
pub fn parse_tz(name: &str) -> Result<Tz> {
    name.parse::<Tz>()
        .map_err(|_| CacheError::InvalidTimestamp(format!("invalid timezone: {name}")))
}

/// Convert a local datetime in a specific timezone to UTC.
///
/// This function handles DST transitions. For ambiguous times (during fall back),
/// it uses the earlier occurrence. For nonexistent times (during spring forward),
/// it shifts forward to the next valid time.
///
/// # Arguments
///
/// * `local` - The local datetime (without timezone)
/// * `tz` - The timezone to interpret the local time in
///
/// # Returns
///
/// The UTC datetime.
pub fn local_to_utc(local: chrono::NaiveDateTime, tz: Tz) -> DateTime<Utc> {
    // Use `single` which returns None for ambiguous/nonexistent times,
    // then fall back to `earliest` for ambiguous and let chrono handle nonexistent
    match tz.from_local_datetime(&local).single() {
        Some(dt) => dt.with_timezone(&Utc),
        None => {
            // Handle ambiguous or nonexistent times
            // For ambiguous: earliest gives the first occurrence
            // For nonexistent: chrono-tz will shift forward
            tz.from_local_datetime(&local)
                .earliest()
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|| {
                    // Fallback: construct from local components
                    Utc.timestamp_opt(local.and_utc().timestamp(), 0)
                        .single()
                        .unwrap()
                })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn parse_valid_timezone() {
        let tz = parse_tz("Europe/Berlin").unwrap();
        assert_eq!(tz.to_string(), "Europe/Berlin");
    }

    #[test]
    fn parse_invalid_timezone() {
        let result = parse_tz("Invalid/Timezone");
        assert!(matches!(result, Err(CacheError::InvalidTimestamp(_))));
    }

    #[test]
    fn local_to_utc_conversion_normal() {
        let tz = parse_tz("Europe/Berlin").unwrap();
        let local = chrono::NaiveDate::from_ymd_opt(2026, 3, 28)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap();
        let utc = local_to_utc(local, tz);

        // 12:00 local (UTC+1) = 11:00 UTC
        assert_eq!(utc.format("%Y-%m-%d %H:%M").to_string(), "2026-03-28 11:00");
    }
}
