//! # bucketcache-core
//!
//! A time-bucketed memoization layer for expensive, asynchronously-computed
//! values backed by a Redis-compatible store.
//!
//! Given a computation identified by its name plus arguments, [`engine::call`]
//! returns a previously stored result when available, otherwise computes,
//! stores, and returns the value. Beyond plain memoization, the crate
//! supports:
//!
//! - partitioning results into **time buckets** (hourly/daily/weekly/monthly,
//!   or a custom label function) — see [`bucket`] and [`time::algebra`];
//! - **stale-while-revalidate** refresh, where a cache hit may schedule a
//!   background recompute — see [`refresh`] and [`runner`];
//! - **bulk time-series retrieval** over contiguous bucket ranges — see
//!   [`engine::get_timeseries`] and [`engine::get_latest_timeseries`];
//! - an **index** of cache keys per computation enabling range deletion —
//!   see [`engine::clear_cache`].
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use bucketcache_core::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! setup_client(Arc::new(InMemoryStore::new()), Settings::default());
//!
//! let spec = ComputationSpec {
//!     module_name: "billing".to_string(),
//!     lookup_name: "account-total".to_string(),
//!     argument_names: vec!["account_id".to_string(), "dt".to_string(), "tz".to_string()],
//!     timestamp_arg_name: Some("dt".to_string()),
//!     timezone_arg_name: Some("tz".to_string()),
//!     ignore_args: Vec::new(),
//!     bucket_rule: BucketRule::Monthly,
//!     timeout_ttl: Some(3600),
//!     timeout_refresh: None,
//!     refresh_strategy: RefreshStrategy::All,
//!     default_timestamp_fn: Arc::new(chrono::Utc::now),
//!     default_tz: "US/Eastern".parse().unwrap(),
//!     tz_lookup: None,
//! };
//!
//! let computation = Arc::new(register(spec, from_sync(|_args| 42_i64)).unwrap());
//!
//! let mut args = std::collections::HashMap::new();
//! args.insert("account_id".to_string(), serde_json::Value::String("123".to_string()));
//! args.insert("dt".to_string(), serde_json::Value::String("2026-01-10".to_string()));
//! args.insert("tz".to_string(), serde_json::Value::String("US/Eastern".to_string()));
//!
//! let total = computation.call(args, CallOptions::default()).await.unwrap();
//! assert_eq!(total, 42);
//! # }
//! ```

pub mod bucket;
pub mod engine;
pub mod error;
pub mod keys;
pub mod refresh;
pub mod registration;
pub mod runner;
pub mod settings;
pub mod store;
pub mod time;

pub use bucket::BucketRule;
pub use engine::{CallOptions, SeriesEntry};
pub use error::{CacheError, Result};
pub use refresh::RefreshStrategy;
pub use registration::{from_sync, register, CallArgs, ComputationSpec, ComputeFn, Registered, TzLookup, TzLookupFn};
pub use settings::{client, setup_client, setup_client_from_env, settings, Settings};
pub use store::{InMemoryStore, RedisStore, Store};

/// Prelude module for convenient imports.
///
/// ```
/// use bucketcache_core::prelude::*;
/// ```
pub mod prelude {
    pub use crate::bucket::BucketRule;
    pub use crate::engine::{CallOptions, SeriesEntry};
    pub use crate::error::{CacheError, Result};
    pub use crate::refresh::RefreshStrategy;
    pub use crate::registration::{from_sync, register, CallArgs, ComputationSpec, ComputeFn, Registered, TzLookup};
    pub use crate::settings::{setup_client, setup_client_from_env, Settings};
    pub use crate::store::{InMemoryStore, RedisStore, Store};
    pub use crate::time::parse::parse_timestamp;
    pub use crate::time::tz::parse_tz;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prelude::*;
    use serde_json::Value;
    use std::collections::HashMap;
    use std::sync::Arc;

    #[tokio::test]
    async fn full_workflow_monthly_bucket_hit_and_miss() {
        setup_client(Arc::new(InMemoryStore::new()), Settings::default());

        let spec = ComputationSpec {
            module_name: "tests".to_string(),
            lookup_name: "full-workflow".to_string(),
            argument_names: vec!["account_id".to_string(), "dt".to_string(), "tz".to_string()],
            timestamp_arg_name: Some("dt".to_string()),
            timezone_arg_name: Some("tz".to_string()),
            ignore_args: Vec::new(),
            bucket_rule: BucketRule::Monthly,
            timeout_ttl: Some(3600),
            timeout_refresh: None,
            refresh_strategy: RefreshStrategy::All,
            default_timestamp_fn: Arc::new(chrono::Utc::now),
            default_tz: "US/Eastern".parse().unwrap(),
            tz_lookup: None,
        };

        let calls = Arc::new(std::sync::atomic::AtomicU64::new(0));
        let counter = calls.clone();
        let computation = Arc::new(
            register(spec, from_sync(move |_args| counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst) as i64))
                .unwrap(),
        );

        let args = |dt: &str| -> HashMap<String, Value> {
            let mut m = HashMap::new();
            m.insert("account_id".to_string(), Value::String("123".to_string()));
            m.insert("dt".to_string(), Value::String(dt.to_string()));
            m.insert("tz".to_string(), Value::String("US/Eastern".to_string()));
            m
        };

        let jan_first = computation.call(args("2026-01-10"), CallOptions::default()).await.unwrap();
        let jan_second = computation.call(args("2026-01-20"), CallOptions::default()).await.unwrap();
        assert_eq!(jan_first, jan_second);
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);

        let feb = computation.call(args("2026-02-01"), CallOptions::default()).await.unwrap();
        assert_ne!(jan_first, feb);
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[test]
    fn prelude_exports_compile() {
        use crate::prelude::*;

        let _tz = parse_tz("UTC").unwrap();
        let _rule = BucketRule::Daily;
        let _strategy = RefreshStrategy::Latest;
    }
}
