//! The memoization engine: per-call orchestration of the bucket registry,
//! key codec, store adapter, and refresh policy.
//!
//! [`call`] is the single-value path (§4.6 step 1-4); [`get_timeseries`] and
//! [`get_latest_timeseries`] are the two time-series paths, both built on
//! the shared bulk protocol in [`bulk_fetch`].

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::bucket::{self, BucketRule};
use crate::error::{CacheError, Result};
use crate::keys::{self, KeyPrefixes};
use crate::refresh::{should_refresh, RefreshContext};
use crate::registration::{CallArgs, Registered};
use crate::runner;
use crate::store::{codec, update_index, Store};
use crate::time::algebra::BucketLabelFn;

/// Per-call overrides, orthogonal to the user function's own arguments (the
/// design notes' guidance against smuggling these in as untyped kwargs).
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Skip the cache read entirely; always compute and overwrite.
    pub force_cache: bool,
    /// Serve the cached value if present, but still schedule a refresh.
    pub force_refresh: bool,
    /// Override the write TTL for this call only.
    pub cache_ttl: Option<u64>,
}

/// The resolved timestamp/timezone for one call, after normalization.
struct ResolvedCall {
    dt: DateTime<Utc>,
    tz: Tz,
}

async fn resolve_call<T>(registered: &Registered<T>, args: &CallArgs) -> Result<ResolvedCall> {
    let spec = &registered.spec;

    let tz = if let Some(tz_lookup) = &spec.tz_lookup {
        tz_lookup.resolve(args).await?
    } else if let Some(tz_arg) = &spec.timezone_arg_name {
        match args.get(tz_arg) {
            Some(Value::String(s)) => crate::time::tz::parse_tz(s)?,
            Some(_) => {
                return Err(CacheError::InvalidTimestamp(format!(
                    "argument '{tz_arg}' must be a timezone name string"
                )))
            }
            None => spec.default_tz,
        }
    } else {
        spec.default_tz
    };

    let dt = if let Some(ts_arg) = &spec.timestamp_arg_name {
        match args.get(ts_arg) {
            Some(Value::String(s)) => crate::time::parse::parse_timestamp(s.as_str(), tz)?,
            Some(_) => {
                return Err(CacheError::InvalidTimestamp(format!("argument '{ts_arg}' must be a timestamp string")))
            }
            None => (spec.default_timestamp_fn)(),
        }
    } else {
        (spec.default_timestamp_fn)()
    };

    Ok(ResolvedCall { dt, tz })
}

fn bucket_label(rule: &BucketRule, dt: DateTime<Utc>, tz: Tz) -> Option<String> {
    if rule.is_none() {
        None
    } else {
        Some(rule.label(dt, tz))
    }
}

fn derive_cache_key<T>(registered: &Registered<T>, args: &CallArgs, label: Option<&str>) -> String {
    let spec = &registered.spec;
    let arg_values: Vec<String> = spec
        .key_argument_names()
        .into_iter()
        .map(|name| match args.get(name) {
            Some(value) => render_arg(value),
            None => String::new(),
        })
        .collect();
    keys::cache_key(&default_prefixes(), &spec.module_name, &spec.lookup_name, &arg_values, label)
}

fn render_arg(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn default_prefixes() -> KeyPrefixes {
    crate::settings::settings().map(|s| s.key_prefixes()).unwrap_or_default()
}

fn now_unix(now: DateTime<Utc>) -> f64 {
    now.timestamp() as f64
}

/// Compute, store, and index one result, returning the computed value.
///
/// Corresponds to `run_and_cache`: the write (`SET` + `UPDATED` + `REFRESH`
/// via `MSET`, then the index upsert) is best-effort — failures are logged,
/// never propagated, per the error-handling design's write-error rule.
async fn run_and_cache<T>(
    registered: &Registered<T>,
    args: CallArgs,
    cache_key: &str,
    ttl: Option<u64>,
    store: &dyn Store,
) -> Result<T>
where
    T: Serialize + Clone + Send + Sync + 'static,
{
    let spec = &registered.spec;
    let value = (registered.compute)(args).await;

    let prefixes = default_prefixes();
    let now = Utc::now();
    let updated_key = keys::updated_key(&prefixes, cache_key);
    let refresh_key = keys::refresh_key(&prefixes, cache_key);
    let index_key = keys::index_key(&prefixes, &spec.module_name, &spec.lookup_name);
    let effective_ttl = ttl.or(spec.timeout_ttl);

    debug!(cache_key, updated_key = %updated_key, refresh_key = %refresh_key, index_key = %index_key, "computed keys for cache write");
    info!(module = %spec.module_name, lookup = %spec.lookup_name, cache_key, "saved computation result to cache");

    let write = async {
        let encoded_value = codec::encode(&value)?;
        let encoded_updated = codec::encode(&now.timestamp())?;
        let mut entries = vec![(cache_key.to_string(), encoded_value), (updated_key, encoded_updated)];
        if let Some(timeout_refresh) = spec.timeout_refresh {
            let refresh_at = now.timestamp() + timeout_refresh as i64;
            entries.push((refresh_key, codec::encode(&refresh_at)?));
        }
        store.mset(&entries, effective_ttl).await?;
        update_index(store, cache_key, &index_key, effective_ttl, now_unix(now)).await
    };

    if let Err(err) = write.await {
        if err.is_write_error() {
            warn!(cache_key, error = %err, "failed to persist cache entry; serving computed value anyway");
        } else {
            return Err(err);
        }
    }

    Ok(value)
}

async fn maybe_schedule_refresh<T>(
    registered: Arc<Registered<T>>,
    store: Arc<dyn Store>,
    args: CallArgs,
    cache_key: String,
    call_dt: DateTime<Utc>,
    call_tz: Tz,
    refresh_at: Option<i64>,
    updated_at: Option<i64>,
) where
    T: Serialize + Clone + Send + Sync + 'static,
{
    let spec = &registered.spec;
    let ctx = RefreshContext {
        timeout_refresh: spec.timeout_refresh,
        refresh_strategy: spec.refresh_strategy,
        refresh_at,
        updated_at,
        call_dt,
        call_tz,
        now: Utc::now(),
    };

    if !should_refresh(&ctx, &spec.bucket_rule) {
        return;
    }

    info!(cache_key, module = %spec.module_name, lookup = %spec.lookup_name, "scheduling background refresh");
    runner::spawn("bucketcache-refresh", async move {
        run_and_cache(&registered, args, &cache_key, None, store.as_ref()).await.map(|_| ())
    });
}

/// Decode a `(refresh_key, updated_key)` pair fetched in one `mget` round
/// trip into the unix-second scalars the refresh policy needs.
fn decode_scalar(bytes: Option<Vec<u8>>) -> Option<i64> {
    bytes.and_then(|b| codec::decode::<i64>(&b).ok())
}

/// The single-call path: normalize, derive the key, check the cache, and
/// either serve-plus-maybe-refresh or compute-and-store.
pub async fn call<T>(registered: Arc<Registered<T>>, args: CallArgs, options: CallOptions) -> Result<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    let store = crate::settings::client()?;
    let resolved = resolve_call(&registered, &args).await?;
    let label = bucket_label(&registered.spec.bucket_rule, resolved.dt, resolved.tz);
    let cache_key = derive_cache_key(&registered, &args, label.as_deref());

    debug!(cache_key, module = %registered.spec.module_name, lookup = %registered.spec.lookup_name, "derived cache key for call");

    if !options.force_cache {
        if let Some(bytes) = store.get(&cache_key).await? {
            info!(cache_key, "cache hit");
            let value: T = codec::decode(&bytes)?;

            // §4.5 short-circuits on `timeout_refresh is null` before any store
            // read; skip the extra mget entirely so a plain-memoization hit
            // (or a hit under a computation with refresh disabled) stays one GET.
            let (refresh_at, updated_at) = if registered.spec.timeout_refresh.is_some() || options.force_refresh {
                let prefixes = default_prefixes();
                let refresh_key = keys::refresh_key(&prefixes, &cache_key);
                let updated_key = keys::updated_key(&prefixes, &cache_key);
                let pair = store.mget(&[refresh_key, updated_key]).await?;
                (decode_scalar(pair.first().cloned().flatten()), decode_scalar(pair.get(1).cloned().flatten()))
            } else {
                (None, None)
            };

            let should = options.force_refresh
                || should_refresh(
                    &RefreshContext {
                        timeout_refresh: registered.spec.timeout_refresh,
                        refresh_strategy: registered.spec.refresh_strategy,
                        refresh_at,
                        updated_at,
                        call_dt: resolved.dt,
                        call_tz: resolved.tz,
                        now: Utc::now(),
                    },
                    &registered.spec.bucket_rule,
                );

            if should {
                maybe_schedule_refresh(
                    registered.clone(),
                    store.clone(),
                    args,
                    cache_key,
                    resolved.dt,
                    resolved.tz,
                    refresh_at,
                    updated_at,
                )
                .await;
            }

            return Ok(value);
        }
    }

    debug!(cache_key, "cache miss; computing synchronously");
    run_and_cache(&registered, args, &cache_key, options.cache_ttl, store.as_ref()).await
}

/// One point in a time-series result.
pub struct SeriesEntry<T> {
    pub bucket_start: DateTime<Utc>,
    pub value: T,
}

/// The bulk protocol shared by [`get_timeseries`] and [`get_latest_timeseries`]:
/// derive every bucket's key, `mget` them all, synchronously fill in misses,
/// and schedule refreshes for the hits that need one.
async fn bulk_fetch<T>(
    registered: Arc<Registered<T>>,
    args: CallArgs,
    buckets: Vec<(DateTime<Utc>, DateTime<Utc>)>,
    tz: Tz,
) -> Result<Vec<SeriesEntry<T>>>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    let store = crate::settings::client()?;
    let spec = &registered.spec;

    let mut series: Vec<(String, DateTime<Utc>)> = Vec::with_capacity(buckets.len());
    for (bucket_start, _) in &buckets {
        let label = bucket_label(&spec.bucket_rule, *bucket_start, tz);
        let cache_key = derive_cache_key(&registered, &args, label.as_deref());
        series.push((cache_key, *bucket_start));
    }

    let cache_keys: Vec<String> = series.iter().map(|(k, _)| k.clone()).collect();
    let values = store.mget(&cache_keys).await?;

    let mut results: HashMap<String, T> = HashMap::new();
    let mut found_keys = Vec::new();
    let mut missing = Vec::new();

    for ((cache_key, bucket_start), raw) in series.iter().zip(values.into_iter()) {
        match raw {
            Some(bytes) => {
                let value: T = codec::decode(&bytes)?;
                results.insert(cache_key.clone(), value);
                found_keys.push((cache_key.clone(), *bucket_start));
            }
            None => missing.push((cache_key.clone(), *bucket_start)),
        }
    }

    for (cache_key, _bucket_start) in &missing {
        let value = run_and_cache(&registered, args.clone(), cache_key, None, store.as_ref()).await?;
        results.insert(cache_key.clone(), value);
    }

    if !found_keys.is_empty() {
        let prefixes = default_prefixes();
        let mut aux_keys = Vec::with_capacity(found_keys.len() * 2);
        for (cache_key, _) in &found_keys {
            aux_keys.push(keys::refresh_key(&prefixes, cache_key));
            aux_keys.push(keys::updated_key(&prefixes, cache_key));
        }
        let aux_values = store.mget(&aux_keys).await?;

        for (i, (cache_key, bucket_start)) in found_keys.iter().enumerate() {
            let refresh_at = decode_scalar(aux_values.get(i * 2).cloned().flatten());
            let updated_at = decode_scalar(aux_values.get(i * 2 + 1).cloned().flatten());
            maybe_schedule_refresh(
                registered.clone(),
                store.clone(),
                args.clone(),
                cache_key.clone(),
                *bucket_start,
                tz,
                refresh_at,
                updated_at,
            )
            .await;
        }
    }

    Ok(series
        .into_iter()
        .map(|(cache_key, bucket_start)| SeriesEntry {
            bucket_start,
            value: results.remove(&cache_key).expect("every cache_key was either found or computed above"),
        })
        .collect())
}

/// Every bucket intersecting `[start, end]`, in ascending order.
pub async fn get_timeseries<T>(
    registered: Arc<Registered<T>>,
    args: CallArgs,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    tz: Tz,
) -> Result<Vec<SeriesEntry<T>>>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    let buckets = bucket::find_bucket_ranges(&registered.spec.bucket_rule, start, end, tz)?;
    bulk_fetch(registered, args, buckets, tz).await
}

/// The `num_buckets` most recent buckets ending with the bucket containing `dt`.
pub async fn get_latest_timeseries<T>(
    registered: Arc<Registered<T>>,
    args: CallArgs,
    dt: DateTime<Utc>,
    tz: Tz,
    num_buckets: usize,
) -> Result<Vec<SeriesEntry<T>>>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    let buckets = bucket::latest_bucket_ranges(&registered.spec.bucket_rule, dt, tz, num_buckets)?;
    bulk_fetch(registered, args, buckets, tz).await
}

/// Delete every cache entry this computation wrote in `(after, before]`
/// (unix seconds), driven through its index.
pub async fn clear_cache<T>(registered: &Registered<T>, after: f64, before: f64) -> Result<()> {
    let store = crate::settings::client()?;
    let prefixes = default_prefixes();
    let index_key = keys::index_key(&prefixes, &registered.spec.module_name, &registered.spec.lookup_name);
    crate::store::clear_index(store.as_ref(), &index_key, after, before).await
}

/// Ergonomic methods on the registration surface's wrapped value (the design
/// notes' "decorator form": `register(fn, options) -> wrapped` exposing
/// `call`, `get_timeseries`, `get_latest_timeseries`, `clear_cache` rather
/// than attaching state to a bare callable). These simply forward to the
/// free functions above.
impl<T> Registered<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    pub async fn call(self: &Arc<Self>, args: CallArgs, options: CallOptions) -> Result<T> {
        call(Arc::clone(self), args, options).await
    }

    pub async fn get_timeseries(
        self: &Arc<Self>,
        args: CallArgs,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        tz: Tz,
    ) -> Result<Vec<SeriesEntry<T>>> {
        get_timeseries(Arc::clone(self), args, start, end, tz).await
    }

    pub async fn get_latest_timeseries(
        self: &Arc<Self>,
        args: CallArgs,
        dt: DateTime<Utc>,
        tz: Tz,
        num_buckets: usize,
    ) -> Result<Vec<SeriesEntry<T>>> {
        get_latest_timeseries(Arc::clone(self), args, dt, tz, num_buckets).await
    }

    pub async fn clear_cache(&self, after: f64, before: f64) -> Result<()> {
        clear_cache(self, after, before).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bucket::BucketRule;
    use crate::refresh::RefreshStrategy;
    use crate::registration::{register, ComputationSpec};
    use crate::store::InMemoryStore;
    use std::sync::atomic::{AtomicU64, Ordering};

    fn setup(rule: BucketRule) -> Arc<Registered<i64>> {
        static SEQ: AtomicU64 = AtomicU64::new(0);
        let seq = SEQ.fetch_add(1, Ordering::Relaxed);
        let store = Arc::new(InMemoryStore::new());
        crate::settings::setup_client(store, crate::settings::Settings::default());

        let spec = ComputationSpec {
            module_name: "tests".to_string(),
            lookup_name: format!("counter-{seq}"),
            argument_names: vec!["account_id".to_string(), "dt".to_string(), "tz".to_string()],
            timestamp_arg_name: Some("dt".to_string()),
            timezone_arg_name: Some("tz".to_string()),
            ignore_args: Vec::new(),
            bucket_rule: rule,
            timeout_ttl: Some(3600),
            timeout_refresh: None,
            refresh_strategy: RefreshStrategy::All,
            default_timestamp_fn: Arc::new(Utc::now),
            default_tz: "US/Eastern".parse().unwrap(),
            tz_lookup: None,
        };

        let calls = Arc::new(AtomicU64::new(0));
        let compute: crate::registration::ComputeFn<i64> = {
            let calls = calls.clone();
            Arc::new(move |_args| {
                let calls = calls.clone();
                Box::pin(async move { calls.fetch_add(1, Ordering::SeqCst) as i64 })
            })
        };

        Arc::new(register(spec, compute).unwrap())
    }

    fn args(account_id: &str, dt: &str) -> CallArgs {
        let mut map = HashMap::new();
        map.insert("account_id".to_string(), Value::String(account_id.to_string()));
        map.insert("dt".to_string(), Value::String(dt.to_string()));
        map.insert("tz".to_string(), Value::String("US/Eastern".to_string()));
        map
    }

    fn setup_with_refresh(rule: BucketRule, timeout_refresh: u64) -> Arc<Registered<i64>> {
        static SEQ: AtomicU64 = AtomicU64::new(0);
        let seq = SEQ.fetch_add(1, Ordering::Relaxed);
        let store = Arc::new(InMemoryStore::new());
        crate::settings::setup_client(store, crate::settings::Settings::default());

        let spec = ComputationSpec {
            module_name: "tests".to_string(),
            lookup_name: format!("refresh-{seq}"),
            argument_names: vec!["account_id".to_string(), "dt".to_string(), "tz".to_string()],
            timestamp_arg_name: Some("dt".to_string()),
            timezone_arg_name: Some("tz".to_string()),
            ignore_args: Vec::new(),
            bucket_rule: rule,
            timeout_ttl: Some(3600),
            timeout_refresh: Some(timeout_refresh),
            refresh_strategy: RefreshStrategy::All,
            default_timestamp_fn: Arc::new(Utc::now),
            default_tz: "US/Eastern".parse().unwrap(),
            tz_lookup: None,
        };

        let calls = Arc::new(AtomicU64::new(0));
        let compute: crate::registration::ComputeFn<i64> = {
            let calls = calls.clone();
            Arc::new(move |_args| {
                let calls = calls.clone();
                Box::pin(async move { calls.fetch_add(1, Ordering::SeqCst) as i64 })
            })
        };

        Arc::new(register(spec, compute).unwrap())
    }

    #[tokio::test]
    async fn repeated_call_with_same_args_is_a_cache_hit() {
        let registered = setup(BucketRule::Monthly);
        let first = call(registered.clone(), args("123", "2026-01-10"), CallOptions::default()).await.unwrap();
        let second = call(registered.clone(), args("123", "2026-01-20"), CallOptions::default()).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn different_bucket_is_a_miss() {
        let registered = setup(BucketRule::Monthly);
        let jan = call(registered.clone(), args("123", "2026-01-10"), CallOptions::default()).await.unwrap();
        let feb = call(registered.clone(), args("123", "2026-02-10"), CallOptions::default()).await.unwrap();
        assert_ne!(jan, feb);
    }

    #[tokio::test]
    async fn force_cache_always_recomputes() {
        let registered = setup(BucketRule::Monthly);
        let first = call(registered.clone(), args("123", "2026-01-10"), CallOptions::default()).await.unwrap();
        let forced = call(
            registered.clone(),
            args("123", "2026-01-10"),
            CallOptions { force_cache: true, ..Default::default() },
        )
        .await
        .unwrap();
        assert_ne!(first, forced);
    }

    #[tokio::test]
    async fn get_timeseries_returns_one_entry_per_month() {
        let registered = setup(BucketRule::Monthly);
        use chrono::TimeZone;
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).single().unwrap();
        let end = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).single().unwrap();
        let tz: Tz = "US/Eastern".parse().unwrap();
        let series = get_timeseries(registered, args("123", "2026-01-10"), start, end, tz).await.unwrap();
        assert_eq!(series.len(), 3);
    }

    #[tokio::test]
    async fn clear_cache_removes_everything() {
        let registered = setup(BucketRule::Monthly);
        call(registered.clone(), args("123", "2026-01-10"), CallOptions::default()).await.unwrap();
        clear_cache(&registered, f64::NEG_INFINITY, f64::INFINITY).await.unwrap();

        let label = bucket_label(&registered.spec.bucket_rule, {
            use chrono::TimeZone;
            Utc.with_ymd_and_hms(2026, 1, 10, 0, 0, 0).single().unwrap()
        }, "US/Eastern".parse().unwrap());
        let cache_key = derive_cache_key(&registered, &args("123", "2026-01-10"), label.as_deref());
        let store = crate::settings::client().unwrap();
        assert!(store.get(&cache_key).await.unwrap().is_none());
    }

    /// End-to-end stale-while-revalidate (S3): a hit past the refresh window
    /// still serves the stored value immediately, the `updated`/`refresh`
    /// scalars `run_and_cache` wrote are actually decodable as the unix-second
    /// `i64`s the refresh policy reads them as (regression test for the
    /// write-as-datetime/read-as-i64 mismatch that always read `updated_at`
    /// back as `None`), and the background refresh that gets scheduled
    /// eventually replaces the cached value.
    #[tokio::test]
    async fn stale_while_revalidate_serves_cached_value_then_background_refreshes() {
        tokio::time::pause();
        let registered = setup_with_refresh(BucketRule::None, 1);

        let first = registered.call(args("123", "2026-01-10"), CallOptions::default()).await.unwrap();

        tokio::time::advance(std::time::Duration::from_millis(1_100)).await;

        let label = bucket_label(&registered.spec.bucket_rule, Utc::now(), "US/Eastern".parse().unwrap());
        let cache_key = derive_cache_key(&registered, &args("123", "2026-01-10"), label.as_deref());
        let prefixes = default_prefixes();
        let store = crate::settings::client().unwrap();

        let updated_raw = store.get(&keys::updated_key(&prefixes, &cache_key)).await.unwrap();
        let refresh_raw = store.get(&keys::refresh_key(&prefixes, &cache_key)).await.unwrap();
        assert!(decode_scalar(updated_raw).is_some(), "updated_at must round-trip as an i64 unix timestamp");
        assert!(decode_scalar(refresh_raw).is_some(), "refresh_at must round-trip as an i64 unix timestamp");

        let second = registered.call(args("123", "2026-01-10"), CallOptions::default()).await.unwrap();
        assert_eq!(second, first, "a stale hit still serves the cached value immediately");

        // Give the background refresh `second`'s call scheduled a chance to
        // run to completion; it only awaits in-memory store operations, so a
        // handful of yields on the single-threaded test runtime is enough.
        for _ in 0..50 {
            tokio::task::yield_now().await;
        }

        let refreshed_raw = store.get(&cache_key).await.unwrap().expect("value still present after refresh");
        let refreshed: i64 = codec::decode(&refreshed_raw).unwrap();
        assert_ne!(refreshed, first, "the background refresh scheduled by the stale hit ran and overwrote the value");
    }
}
