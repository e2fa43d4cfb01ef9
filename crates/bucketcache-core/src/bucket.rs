//! Named and custom bucket rules.
//!
//! A [`BucketRule`] resolves a registration's `bucket` parameter: omitted
//! (pure memoization, timestamp/timezone arguments unconsulted), one of the
//! four named rules, or an arbitrary callable. Named rules get an exact
//! closed-form label and range; a custom rule is only ever a black-box
//! `label = f(dt, tz)`, so its range comes from probing (see
//! [`crate::time::algebra`]).

use std::fmt;
use std::sync::Arc;

use chrono::DateTime;
use chrono::Datelike;
use chrono::Utc;
use chrono_tz::Tz;

use crate::error::Result;
use crate::time::algebra::{self, BucketLabelFn};

/// A user-supplied bucket callable: `label = f(dt, tz)`.
pub type CustomBucketFn = Arc<dyn Fn(DateTime<Utc>, Tz) -> String + Send + Sync>;

/// How a registration's argument-series calls are partitioned into cache
/// entries. `None` means the computation is a plain memoized function —
/// its timestamp/timezone arguments, if any, are not consulted for caching.
#[derive(Clone)]
pub enum BucketRule {
    None,
    Hourly,
    Daily,
    Weekly,
    Monthly,
    Custom(CustomBucketFn),
}

impl fmt::Debug for BucketRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BucketRule::None => write!(f, "BucketRule::None"),
            BucketRule::Hourly => write!(f, "BucketRule::Hourly"),
            BucketRule::Daily => write!(f, "BucketRule::Daily"),
            BucketRule::Weekly => write!(f, "BucketRule::Weekly"),
            BucketRule::Monthly => write!(f, "BucketRule::Monthly"),
            BucketRule::Custom(_) => write!(f, "BucketRule::Custom(..)"),
        }
    }
}

impl BucketRule {
    /// Resolve a name from a registration's `bucket = "..."` argument.
    ///
    /// Returns `None` if `name` is not one of the four reserved names —
    /// callers should treat that as "try a custom callable instead".
    pub fn by_name(name: &str) -> Option<Self> {
        match name {
            "hourly" => Some(BucketRule::Hourly),
            "daily" => Some(BucketRule::Daily),
            "weekly" => Some(BucketRule::Weekly),
            "monthly" => Some(BucketRule::Monthly),
            _ => None,
        }
    }

    pub fn custom(f: impl Fn(DateTime<Utc>, Tz) -> String + Send + Sync + 'static) -> Self {
        BucketRule::Custom(Arc::new(f))
    }

    pub fn is_none(&self) -> bool {
        matches!(self, BucketRule::None)
    }
}

impl BucketLabelFn for BucketRule {
    fn label(&self, dt: DateTime<Utc>, tz: Tz) -> String {
        match self {
            BucketRule::None => String::new(),
            BucketRule::Hourly => {
                algebra::hourly_range(dt, tz).0.with_timezone(&tz).format("%Y-%m-%dT%H").to_string()
            }
            BucketRule::Daily => {
                algebra::daily_range(dt, tz).0.with_timezone(&tz).format("%Y-%m-%d").to_string()
            }
            BucketRule::Weekly => weekly_label(dt, tz),
            BucketRule::Monthly => {
                algebra::monthly_range(dt, tz).0.with_timezone(&tz).format("%Y-%m").to_string()
            }
            BucketRule::Custom(f) => f(dt, tz),
        }
    }

    fn closed_form_range(&self, dt: DateTime<Utc>, tz: Tz) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        match self {
            BucketRule::None => None,
            BucketRule::Hourly => Some(algebra::hourly_range(dt, tz)),
            BucketRule::Daily => Some(algebra::daily_range(dt, tz)),
            BucketRule::Weekly => Some(algebra::weekly_range(dt, tz)),
            BucketRule::Monthly => Some(algebra::monthly_range(dt, tz)),
            BucketRule::Custom(_) => None,
        }
    }
}

/// `YYYYwWW`, Monday-start, `%W`-style week-of-year — matches the named
/// weekly bucket's label format.
fn weekly_label(dt: DateTime<Utc>, tz: Tz) -> String {
    let (start, _) = algebra::weekly_range(dt, tz);
    let local = start.with_timezone(&tz);
    format!("{}w{:02}", local.year(), local.format("%W"))
}

/// The `[start, end]` of the bucket containing `dt` under `rule`.
///
/// Returns `None` when `rule` is [`BucketRule::None`] — there is no bucket
/// to resolve for a pure memoized call.
pub fn bucket_range(rule: &BucketRule, dt: DateTime<Utc>, tz: Tz) -> Result<Option<(DateTime<Utc>, DateTime<Utc>)>> {
    if rule.is_none() {
        return Ok(None);
    }
    algebra::bucket_range(rule, dt, tz).map(Some)
}

/// Every bucket intersecting `[start, end]` under `rule`, ascending.
pub fn find_bucket_ranges(
    rule: &BucketRule,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    tz: Tz,
) -> Result<Vec<(DateTime<Utc>, DateTime<Utc>)>> {
    algebra::find_bucket_ranges(rule, start, end, tz)
}

/// The `num_buckets` most recent buckets ending with the bucket containing
/// `dt`, ascending.
pub fn latest_bucket_ranges(
    rule: &BucketRule,
    dt: DateTime<Utc>,
    tz: Tz,
    num_buckets: usize,
) -> Result<Vec<(DateTime<Utc>, DateTime<Utc>)>> {
    algebra::latest_bucket_ranges(rule, dt, tz, num_buckets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::tz::parse_tz;
    use chrono::TimeZone;

    fn berlin() -> Tz {
        parse_tz("Europe/Berlin").unwrap()
    }

    fn utc_at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).single().unwrap()
    }

    #[test]
    fn by_name_resolves_the_four_reserved_names() {
        assert!(matches!(BucketRule::by_name("hourly"), Some(BucketRule::Hourly)));
        assert!(matches!(BucketRule::by_name("daily"), Some(BucketRule::Daily)));
        assert!(matches!(BucketRule::by_name("weekly"), Some(BucketRule::Weekly)));
        assert!(matches!(BucketRule::by_name("monthly"), Some(BucketRule::Monthly)));
        assert!(BucketRule::by_name("fortnightly").is_none());
    }

    #[test]
    fn daily_label_format() {
        let dt = utc_at(2026, 1, 10, 23, 0);
        assert_eq!(BucketRule::Daily.label(dt, berlin()), "2026-01-11");
    }

    #[test]
    fn monthly_label_format() {
        let dt = utc_at(2026, 2, 15, 10, 0);
        assert_eq!(BucketRule::Monthly.label(dt, berlin()), "2026-02");
    }

    #[test]
    fn weekly_label_format() {
        let dt = utc_at(2026, 1, 15, 10, 0);
        let label = BucketRule::Weekly.label(dt, berlin());
        assert!(label.starts_with("2026w"));
    }

    #[test]
    fn none_rule_has_no_range() {
        let dt = utc_at(2026, 1, 15, 10, 0);
        assert!(bucket_range(&BucketRule::None, dt, berlin()).unwrap().is_none());
    }

    #[test]
    fn custom_rule_range_round_trips_through_probing() {
        let rule = BucketRule::custom(|dt, tz| {
            algebra::daily_range(dt, tz).0.with_timezone(&tz).format("%Y-%m-%d").to_string()
        });
        let dt = utc_at(2026, 1, 15, 10, 0);
        let (start, end) = bucket_range(&rule, dt, berlin()).unwrap().unwrap();
        let (expected_start, expected_end) = algebra::daily_range(dt, berlin());
        assert_eq!(start, expected_start);
        assert_eq!(end, expected_end);
    }
}
