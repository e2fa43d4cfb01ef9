//! Bucket-boundary algebra.
//!
//! Named buckets (hourly/daily/weekly/monthly) have a closed form: their
//! start is a calendar truncation of the local wall clock and their length
//! is fixed in calendar terms, so [`hourly_range`] and friends compute a
//! bucket's `[start, end]` directly. A custom bucket is an opaque
//! `label = f(dt, tz)` function with no known period, so its boundaries can
//! only be *discovered* by probing: nudge the instant by a candidate delta
//! and see whether the label changes. [`find_bucket_start`] and
//! [`find_bucket_step`] do that discovery, walking a ladder of resolutions
//! (seconds, minutes, hours, days, months, years) until the label changes
//! within a bounded search window.
//!
//! All boundary arithmetic goes through [`tz_delta_add`], which applies
//! sub-day deltas in UTC (a second is a second, DST or not) and >=1-day
//! deltas in local wall-clock space before re-converting to UTC. That's
//! what makes a "day" 23 or 25 hours across a DST transition instead of
//! always 24.

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, Timelike, Utc};
use chrono_tz::Tz;

use crate::error::{CacheError, Result};
use crate::time::tz::local_to_utc;

const MICROSECOND: chrono::Duration = chrono::Duration::microseconds(1);

/// A calendar or wall-clock offset to apply to an instant.
///
/// A `Delta` carries either a date-scale component (years/months/days) or a
/// time-scale component (hours/minutes/seconds), never both — mixing the two
/// is rejected by [`tz_delta_add`] because "add one day and three hours" is
/// ambiguous about which side of a DST transition the three hours land on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Delta {
    pub years: i64,
    pub months: i64,
    pub days: i64,
    pub hours: i64,
    pub minutes: i64,
    pub seconds: i64,
}

impl Delta {
    pub fn seconds(n: i64) -> Self {
        Delta { seconds: n, ..Default::default() }
    }

    pub fn minutes(n: i64) -> Self {
        Delta { minutes: n, ..Default::default() }
    }

    pub fn hours(n: i64) -> Self {
        Delta { hours: n, ..Default::default() }
    }

    pub fn days(n: i64) -> Self {
        Delta { days: n, ..Default::default() }
    }

    pub fn months(n: i64) -> Self {
        Delta { months: n, ..Default::default() }
    }

    pub fn years(n: i64) -> Self {
        Delta { years: n, ..Default::default() }
    }

    fn has_date_component(&self) -> bool {
        self.years != 0 || self.months != 0 || self.days != 0
    }

    fn has_time_component(&self) -> bool {
        self.hours != 0 || self.minutes != 0 || self.seconds != 0
    }

    pub fn negated(&self) -> Self {
        Delta {
            years: -self.years,
            months: -self.months,
            days: -self.days,
            hours: -self.hours,
            minutes: -self.minutes,
            seconds: -self.seconds,
        }
    }

    fn scaled(&self, n: i64) -> Self {
        Delta {
            years: self.years * n,
            months: self.months * n,
            days: self.days * n,
            hours: self.hours * n,
            minutes: self.minutes * n,
            seconds: self.seconds * n,
        }
    }
}

/// Apply `delta` to `dt`, resolving >=1-day components in the local wall
/// clock of `tz` and sub-day components as a fixed UTC duration.
///
/// Fails with [`CacheError::InvalidDelta`] if `delta` carries both kinds of
/// component at once.
pub fn tz_delta_add(dt: DateTime<Utc>, tz: Tz, delta: Delta) -> Result<DateTime<Utc>> {
    if delta.has_date_component() && delta.has_time_component() {
        return Err(CacheError::InvalidDelta(
            "cannot mix a sub-day component with a component of one day or more".into(),
        ));
    }

    if delta.has_date_component() {
        let local_date = dt.with_timezone(&tz).date_naive();
        let shifted = shift_date(local_date, delta)?;
        let midnight = shifted.and_hms_opt(0, 0, 0).expect("midnight is always valid");
        Ok(local_to_utc(midnight, tz))
    } else {
        let std_delta = chrono::Duration::seconds(delta.seconds)
            + chrono::Duration::minutes(delta.minutes)
            + chrono::Duration::hours(delta.hours);
        Ok(dt + std_delta)
    }
}

fn shift_date(date: NaiveDate, delta: Delta) -> Result<NaiveDate> {
    let mut date = date;
    let total_months = delta.years * 12 + delta.months;
    if total_months != 0 {
        date = add_months(date, total_months)?;
    }
    if delta.days != 0 {
        date += chrono::Duration::days(delta.days);
    }
    Ok(date)
}

fn add_months(date: NaiveDate, months: i64) -> Result<NaiveDate> {
    let total = date.year() as i64 * 12 + (date.month() as i64 - 1) + months;
    let year = total.div_euclid(12) as i32;
    let month = (total.rem_euclid(12) + 1) as u32;
    let day = date.day().min(last_day_of_month(year, month));
    NaiveDate::from_ymd_opt(year, month, day)
        .ok_or_else(|| CacheError::InvalidDelta("shifted date is out of range".into()))
}

fn last_day_of_month(year: i32, month: u32) -> u32 {
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    }
    .expect("adjacent month is always constructible");
    (next - chrono::Duration::days(1)).day()
}

fn truncate_local(dt: DateTime<Utc>, tz: Tz, f: impl Fn(NaiveDateTime) -> Option<NaiveDateTime>) -> DateTime<Utc> {
    let naive = dt.with_timezone(&tz).naive_local();
    let truncated = f(naive).expect("calendar-field truncation is always valid");
    local_to_utc(truncated, tz)
}

/// The bucket containing `dt` that starts on the hour, in `tz`'s wall clock.
pub fn hourly_range(dt: DateTime<Utc>, tz: Tz) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = truncate_local(dt, tz, |n| n.with_minute(0)?.with_second(0)?.with_nanosecond(0));
    let end = start + chrono::Duration::hours(1) - MICROSECOND;
    (start, end)
}

/// The bucket containing `dt` that starts at local midnight.
pub fn daily_range(dt: DateTime<Utc>, tz: Tz) -> (DateTime<Utc>, DateTime<Utc>) {
    let date = dt.with_timezone(&tz).date_naive();
    let start = local_to_utc(date.and_hms_opt(0, 0, 0).expect("midnight is always valid"), tz);
    let next = date + chrono::Duration::days(1);
    let end = local_to_utc(next.and_hms_opt(0, 0, 0).expect("midnight is always valid"), tz) - MICROSECOND;
    (start, end)
}

/// The Monday-to-Sunday bucket containing `dt`, in local time.
pub fn weekly_range(dt: DateTime<Utc>, tz: Tz) -> (DateTime<Utc>, DateTime<Utc>) {
    let date = dt.with_timezone(&tz).date_naive();
    let since_monday = date.weekday().num_days_from_monday() as i64;
    let week_start = date - chrono::Duration::days(since_monday);
    let week_after = week_start + chrono::Duration::weeks(1);
    let start = local_to_utc(week_start.and_hms_opt(0, 0, 0).expect("midnight is always valid"), tz);
    let end = local_to_utc(week_after.and_hms_opt(0, 0, 0).expect("midnight is always valid"), tz) - MICROSECOND;
    (start, end)
}

/// The calendar-month bucket containing `dt`, in local time.
pub fn monthly_range(dt: DateTime<Utc>, tz: Tz) -> (DateTime<Utc>, DateTime<Utc>) {
    let date = dt.with_timezone(&tz).date_naive();
    let month_start =
        NaiveDate::from_ymd_opt(date.year(), date.month(), 1).expect("first of month is always valid");
    let next_month = add_months(month_start, 1).expect("adding one month never overflows here");
    let start = local_to_utc(month_start.and_hms_opt(0, 0, 0).expect("midnight is always valid"), tz);
    let end = local_to_utc(next_month.and_hms_opt(0, 0, 0).expect("midnight is always valid"), tz) - MICROSECOND;
    (start, end)
}

/// Ladder of (delta-per-step, probe bound) rungs tried by [`find_bucket_start`]
/// and [`find_bucket_step`], coarsest boundary first to keep the common case
/// of a sub-minute or sub-hour custom bucket cheap.
fn check_bucket_delta<F>(label: &F, dt: DateTime<Utc>, tz: Tz, delta: Delta) -> Result<bool>
where
    F: Fn(DateTime<Utc>, Tz) -> String,
{
    let start_label = label(dt, tz);
    let stepped = tz_delta_add(dt, tz, delta)?;
    let previous_label = label(stepped, tz);
    if previous_label != start_label {
        let stepped_twice = tz_delta_add(dt, tz, delta.scaled(2))?;
        if label(stepped_twice, tz) != previous_label {
            return Ok(true);
        }
    }
    Ok(false)
}

fn find_bucket_edge<F>(
    label: &F,
    dt: DateTime<Utc>,
    tz: Tz,
    delta: Delta,
    probe_bound: i64,
) -> Result<Option<DateTime<Utc>>>
where
    F: Fn(DateTime<Utc>, Tz) -> String,
{
    for i in 0..probe_bound {
        if check_bucket_delta(label, dt, tz, delta.scaled(i + 1))? {
            let edge_label = label(dt, tz);
            let mut edge_dt = dt;
            loop {
                let stepped = tz_delta_add(edge_dt, tz, delta)?;
                if label(stepped, tz) != edge_label {
                    break;
                }
                edge_dt = stepped;
            }
            return Ok(Some(edge_dt));
        }
    }
    Ok(None)
}

/// Discover the start of the bucket containing `dt` for an opaque label
/// function, by probing successively coarser resolutions until the label
/// changes within that resolution's bound.
///
/// Fails with [`CacheError::BucketNotDetected`] if the label never changes
/// within 30s, 30m, 12h, 15d, 6mo, or 10y — i.e. `label` looks constant.
pub fn find_bucket_start<F>(label: F, dt: DateTime<Utc>, tz: Tz) -> Result<DateTime<Utc>>
where
    F: Fn(DateTime<Utc>, Tz) -> String,
{
    let start_second = dt.with_nanosecond(0).expect("zeroing nanoseconds is always valid");
    if let Some(found) = find_bucket_edge(&label, start_second, tz, Delta::seconds(-1), 30)? {
        return Ok(found);
    }

    let start_minute = truncate_local(dt, tz, |n| n.with_second(0)?.with_nanosecond(0));
    if let Some(found) = find_bucket_edge(&label, start_minute, tz, Delta::minutes(-1), 30)? {
        return Ok(found);
    }

    let start_hour = truncate_local(dt, tz, |n| n.with_minute(0)?.with_second(0)?.with_nanosecond(0));
    if let Some(found) = find_bucket_edge(&label, start_hour, tz, Delta::hours(-1), 12)? {
        return Ok(found);
    }

    let start_day =
        truncate_local(dt, tz, |n| n.with_hour(0)?.with_minute(0)?.with_second(0)?.with_nanosecond(0));
    if let Some(found) = find_bucket_edge(&label, start_day, tz, Delta::days(-1), 15)? {
        return Ok(found);
    }

    let start_month = truncate_local(dt, tz, |n| {
        n.with_day(1)?.with_hour(0)?.with_minute(0)?.with_second(0)?.with_nanosecond(0)
    });
    if let Some(found) = find_bucket_edge(&label, start_month, tz, Delta::months(-1), 6)? {
        return Ok(found);
    }

    let start_year = truncate_local(dt, tz, |n| {
        n.with_month(1)?.with_day(1)?.with_hour(0)?.with_minute(0)?.with_second(0)?.with_nanosecond(0)
    });
    if let Some(found) = find_bucket_edge(&label, start_year, tz, Delta::years(-1), 10)? {
        return Ok(found);
    }

    Err(CacheError::BucketNotDetected)
}

/// Discover the step from one bucket to the next for an opaque label
/// function, given that bucket's start. Mirrors [`find_bucket_start`]'s
/// ladder but walks forward and returns the delta itself rather than the
/// resulting instant.
pub fn find_bucket_step<F>(label: F, start: DateTime<Utc>, tz: Tz) -> Result<Delta>
where
    F: Fn(DateTime<Utc>, Tz) -> String,
{
    for i in 0..30 {
        let delta = Delta::seconds(i + 1);
        if check_bucket_delta(&label, start, tz, delta)? {
            return Ok(delta);
        }
    }
    for i in 0..30 {
        let delta = Delta::minutes(i + 1);
        if check_bucket_delta(&label, start, tz, delta)? {
            return Ok(delta);
        }
    }
    for i in 0..12 {
        let delta = Delta::hours(i + 1);
        if check_bucket_delta(&label, start, tz, delta)? {
            return Ok(delta);
        }
    }
    for i in 0..15 {
        let delta = Delta::days(i + 1);
        if check_bucket_delta(&label, start, tz, delta)? {
            return Ok(delta);
        }
    }
    for i in 0..6 {
        let delta = Delta::months(i + 1);
        if check_bucket_delta(&label, start, tz, delta)? {
            return Ok(delta);
        }
    }
    for i in 0..10 {
        let delta = Delta::years(i + 1);
        if check_bucket_delta(&label, start, tz, delta)? {
            return Ok(delta);
        }
    }
    Err(CacheError::BucketNotDetected)
}

/// Find the `[start, end]` of the bucket containing `dt` for an opaque
/// label function, by composing [`find_bucket_start`] and [`find_bucket_step`].
pub fn probed_bucket_range<F>(label: &F, dt: DateTime<Utc>, tz: Tz) -> Result<(DateTime<Utc>, DateTime<Utc>)>
where
    F: Fn(DateTime<Utc>, Tz) -> String,
{
    let start = find_bucket_start(label, dt, tz)?;
    let step = find_bucket_step(label, start, tz)?;
    let end = tz_delta_add(start, tz, step)? - MICROSECOND;
    Ok((start, end))
}

/// Anything that can produce a bucket label for an instant, and — for named
/// buckets only — a closed-form range that skips probing entirely.
pub trait BucketLabelFn {
    fn label(&self, dt: DateTime<Utc>, tz: Tz) -> String;

    /// `Some` short-circuits [`bucket_range`] with an exact calendar range;
    /// `None` (the default, used by custom callables) falls back to probing.
    fn closed_form_range(&self, _dt: DateTime<Utc>, _tz: Tz) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        None
    }
}

/// The `[start, end]` of the bucket containing `dt`, taking the closed form
/// when `rule` offers one and falling back to probing otherwise.
pub fn bucket_range<R: BucketLabelFn>(rule: &R, dt: DateTime<Utc>, tz: Tz) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    if let Some(range) = rule.closed_form_range(dt, tz) {
        return Ok(range);
    }
    probed_bucket_range(&|d, t| rule.label(d, t), dt, tz)
}

/// Every bucket that intersects `[start, end]`, in ascending order.
///
/// The first bucket may begin before `start` and the last may end after
/// `end` — callers get whole buckets, not a clipped window.
pub fn find_bucket_ranges<R: BucketLabelFn>(
    rule: &R,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    tz: Tz,
) -> Result<Vec<(DateTime<Utc>, DateTime<Utc>)>> {
    if start > end {
        return Err(CacheError::InvalidTimestamp("range start is after range end".into()));
    }

    let mut buckets = Vec::new();
    let first = bucket_range(rule, start, tz)?;
    let mut b_end = first.1;
    buckets.push(first);
    while b_end < end {
        let next = b_end + MICROSECOND;
        let (s, e) = bucket_range(rule, next, tz)?;
        b_end = e;
        buckets.push((s, e));
    }
    Ok(buckets)
}

/// The `num_buckets` most recent buckets ending with the bucket containing
/// `dt`, in ascending order (oldest first). Returns an empty vec for
/// `num_buckets == 0`.
pub fn latest_bucket_ranges<R: BucketLabelFn>(
    rule: &R,
    dt: DateTime<Utc>,
    tz: Tz,
    num_buckets: usize,
) -> Result<Vec<(DateTime<Utc>, DateTime<Utc>)>> {
    if num_buckets == 0 {
        return Ok(Vec::new());
    }

    let mut buckets = std::collections::VecDeque::with_capacity(num_buckets);
    let (mut start, mut end) = bucket_range(rule, dt, tz)?;
    loop {
        buckets.push_front((start, end));
        if buckets.len() == num_buckets {
            break;
        }
        end = start - MICROSECOND;
        let (prev_start, _) = bucket_range(rule, end, tz)?;
        start = prev_start;
    }
    Ok(buckets.into_iter().collect())
}
