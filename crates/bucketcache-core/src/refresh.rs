//! Refresh policy: decides whether a cache hit should also schedule a
//! background recompute.
//!
//! `all` treats every historical bucket as eligible to refresh once its
//! `refresh_at` has elapsed. `latest` amortizes that work: only the bucket
//! containing "now" (plus a past bucket that has never been refreshed since
//! it closed) is still refreshed — older, settled buckets are left alone.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;

use crate::bucket::BucketRule;
use crate::time::algebra::BucketLabelFn;

/// `all` vs `latest`, see the module docs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshStrategy {
    All,
    Latest,
}

impl RefreshStrategy {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "all" => Some(RefreshStrategy::All),
            "latest" => Some(RefreshStrategy::Latest),
            _ => None,
        }
    }
}

/// The inputs the policy needs about one cache entry. `refresh_at`/`updated_at`
/// are unix-second timestamps, read from the store by the caller (the engine
/// may already have them from a bulk fetch, hence they're passed in rather
/// than fetched here).
pub struct RefreshContext {
    pub timeout_refresh: Option<u64>,
    pub refresh_strategy: RefreshStrategy,
    pub refresh_at: Option<i64>,
    pub updated_at: Option<i64>,
    pub call_dt: DateTime<Utc>,
    pub call_tz: Tz,
    pub now: DateTime<Utc>,
}

/// Decide whether a cache hit should schedule a background refresh.
///
/// Mirrors the design's pseudocode exactly: no refresh configured, or a
/// refresh already scheduled for the future, both short-circuit to `false`;
/// under `latest`, a closed bucket that was already refreshed after it ended
/// also short-circuits to `false`.
pub fn should_refresh(ctx: &RefreshContext, rule: &BucketRule) -> bool {
    if ctx.timeout_refresh.is_none() {
        return false;
    }

    let now_unix = ctx.now.timestamp();
    if let Some(refresh_at) = ctx.refresh_at {
        if refresh_at > now_unix {
            return false;
        }
    }

    if ctx.refresh_strategy == RefreshStrategy::Latest {
        let current_label = rule.label(ctx.call_dt, ctx.call_tz);
        let latest_label = rule.label(ctx.now, ctx.call_tz);
        if current_label != latest_label {
            let Ok(range) = crate::bucket::bucket_range(rule, ctx.call_dt, ctx.call_tz) else {
                return true;
            };
            if let Some((bucket_start, bucket_end)) = range {
                if bucket_start > ctx.now {
                    return false;
                }
                if let Some(updated_at) = ctx.updated_at {
                    if updated_at > bucket_end.timestamp() {
                        return false;
                    }
                }
            }
        }
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::tz::parse_tz;
    use chrono::TimeZone;

    fn berlin() -> Tz {
        parse_tz("Europe/Berlin").unwrap()
    }

    fn utc_at(y: i32, mo: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, 0, 0).single().unwrap()
    }

    fn base_ctx(now: DateTime<Utc>, call_dt: DateTime<Utc>) -> RefreshContext {
        RefreshContext {
            timeout_refresh: Some(60),
            refresh_strategy: RefreshStrategy::All,
            refresh_at: Some(now.timestamp() - 1),
            updated_at: None,
            call_dt,
            call_tz: berlin(),
            now,
        }
    }

    #[test]
    fn no_timeout_refresh_never_refreshes() {
        let now = utc_at(2026, 6, 15, 12);
        let mut ctx = base_ctx(now, now);
        ctx.timeout_refresh = None;
        assert!(!should_refresh(&ctx, &BucketRule::Monthly));
    }

    #[test]
    fn future_refresh_at_does_not_refresh() {
        let now = utc_at(2026, 6, 15, 12);
        let mut ctx = base_ctx(now, now);
        ctx.refresh_at = Some(now.timestamp() + 100);
        assert!(!should_refresh(&ctx, &BucketRule::Monthly));
    }

    #[test]
    fn all_strategy_refreshes_past_bucket_once_eligible() {
        let now = utc_at(2026, 6, 15, 12);
        let call_dt = utc_at(2026, 1, 15, 12); // long-past month, strategy=all
        let ctx = base_ctx(now, call_dt);
        assert!(should_refresh(&ctx, &BucketRule::Monthly));
    }

    #[test]
    fn latest_strategy_skips_past_bucket_already_refreshed() {
        let now = utc_at(2026, 6, 15, 12);
        let call_dt = utc_at(2026, 5, 15, 12); // May, already closed
        let mut ctx = base_ctx(now, call_dt);
        ctx.refresh_strategy = RefreshStrategy::Latest;
        let (_, bucket_end) = crate::bucket::bucket_range(&BucketRule::Monthly, call_dt, berlin()).unwrap().unwrap();
        ctx.updated_at = Some(bucket_end.timestamp() + 10);
        assert!(!should_refresh(&ctx, &BucketRule::Monthly));
    }

    #[test]
    fn latest_strategy_refreshes_the_live_bucket() {
        let now = utc_at(2026, 6, 15, 12);
        let ctx = {
            let mut c = base_ctx(now, now);
            c.refresh_strategy = RefreshStrategy::Latest;
            c
        };
        assert!(should_refresh(&ctx, &BucketRule::Monthly));
    }

    #[test]
    fn latest_strategy_does_not_refresh_a_future_bucket() {
        let now = utc_at(2026, 6, 15, 12);
        let call_dt = utc_at(2026, 7, 15, 12); // future month relative to "now"
        let mut ctx = base_ctx(now, call_dt);
        ctx.refresh_strategy = RefreshStrategy::Latest;
        assert!(!should_refresh(&ctx, &BucketRule::Monthly));
    }
}
