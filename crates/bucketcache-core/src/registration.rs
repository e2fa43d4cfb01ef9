//! The registration surface: wrapping a user computation with configuration
//! and argument validation.
//!
//! The source introspects a Python function's parameter list at
//! registration time to discover its argument names. Rust has no such
//! reflection, so registration instead takes an explicit schema — an
//! ordered list of argument names, with the timestamp and timezone
//! arguments (if any) called out by name — and the user computation itself
//! takes a [`CallArgs`] map rather than a native parameter list. This is
//! the "explicit schema" option from the design notes, not code generation:
//! simpler to implement correctly, and the validation rules translate
//! directly.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, OnceLock};

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde_json::Value;

use crate::bucket::BucketRule;
use crate::error::{CacheError, Result};
use crate::refresh::RefreshStrategy;

/// The bound arguments for one call, keyed by declared name.
pub type CallArgs = HashMap<String, Value>;

/// A boxed, clonable async computation: `CallArgs -> T`.
pub type ComputeFn<T> = Arc<dyn Fn(CallArgs) -> Pin<Box<dyn Future<Output = T> + Send>> + Send + Sync>;

/// Wrap a synchronous computation so it can be registered like any other:
/// runs on the blocking thread pool so it never stalls the async runtime
/// (the Rust-native replacement for the source's `force_async` dispatch).
pub fn from_sync<T, F>(f: F) -> ComputeFn<T>
where
    F: Fn(CallArgs) -> T + Send + Sync + Clone + 'static,
    T: Send + 'static,
{
    Arc::new(move |args: CallArgs| {
        let f = f.clone();
        Box::pin(async move {
            match tokio::task::spawn_blocking(move || f(args)).await {
                Ok(value) => value,
                Err(join_err) => std::panic::resume_unwind(join_err.into_panic()),
            }
        })
    })
}

/// How the timezone for a call is resolved when it is not passed directly.
pub enum TzLookupFn {
    /// Runs on the blocking thread pool, per the concurrency model's
    /// requirement that sync and async lookups are dispatched uniformly.
    Sync(Arc<dyn Fn(&CallArgs) -> Result<Tz> + Send + Sync>),
    Async(Arc<dyn Fn(CallArgs) -> Pin<Box<dyn Future<Output = Result<Tz>> + Send>> + Send + Sync>),
}

/// A timezone-lookup callable plus the argument names it reads — validated
/// at registration time against the computation's declared argument names.
pub struct TzLookup {
    pub param_names: Vec<String>,
    pub func: TzLookupFn,
}

impl TzLookup {
    pub async fn resolve(&self, args: &CallArgs) -> Result<Tz> {
        match &self.func {
            TzLookupFn::Sync(f) => {
                let f = f.clone();
                let args = args.clone();
                match tokio::task::spawn_blocking(move || f(&args)).await {
                    Ok(result) => result,
                    Err(join_err) => std::panic::resume_unwind(join_err.into_panic()),
                }
            }
            TzLookupFn::Async(f) => f(args.clone()).await,
        }
    }
}

/// The immutable descriptor produced by registration (see the data model's
/// computation descriptor).
pub struct ComputationSpec {
    pub module_name: String,
    pub lookup_name: String,
    pub argument_names: Vec<String>,
    pub timestamp_arg_name: Option<String>,
    pub timezone_arg_name: Option<String>,
    /// Argument names excluded from the cache-key join despite not being
    /// the timestamp/timezone arguments (the `ignore_args` extension).
    pub ignore_args: Vec<String>,
    pub bucket_rule: BucketRule,
    pub timeout_ttl: Option<u64>,
    pub timeout_refresh: Option<u64>,
    pub refresh_strategy: RefreshStrategy,
    pub default_timestamp_fn: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>,
    pub default_tz: Tz,
    pub tz_lookup: Option<TzLookup>,
}

impl ComputationSpec {
    /// Argument names joined into the cache key, in declared order:
    /// everything except the timestamp/timezone arguments and `ignore_args`.
    pub fn key_argument_names(&self) -> Vec<&str> {
        self.argument_names
            .iter()
            .map(String::as_str)
            .filter(|n| Some(*n) != self.timestamp_arg_name.as_deref())
            .filter(|n| Some(*n) != self.timezone_arg_name.as_deref())
            .filter(|n| !self.ignore_args.iter().any(|ignored| ignored == n))
            .collect()
    }
}

fn is_valid_lookup_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_alphanumeric() || c == '-' || c == '.' || c == '_')
}

static REGISTERED_NAMES: OnceLock<Mutex<HashSet<String>>> = OnceLock::new();

fn registered_names() -> &'static Mutex<HashSet<String>> {
    REGISTERED_NAMES.get_or_init(|| Mutex::new(HashSet::new()))
}

/// Validate a [`ComputationSpec`] per the registration-time rules: a bucket
/// rule requires both a timestamp and timezone argument; a `tz_lookup`'s
/// parameters must all be declared arguments; `lookup_name` must match
/// `^[-.\w]+$`; and a `lookup_name` may only be registered once per process.
fn validate(spec: &ComputationSpec) -> Result<()> {
    if !is_valid_lookup_name(&spec.lookup_name) {
        return Err(CacheError::InvalidRegistration(format!(
            "lookup_name '{}' must match ^[-.\\w]+$",
            spec.lookup_name
        )));
    }

    if !spec.bucket_rule.is_none() {
        let has_timestamp = spec
            .timestamp_arg_name
            .as_ref()
            .is_some_and(|n| spec.argument_names.iter().any(|a| a == n));
        let has_timezone = spec
            .timezone_arg_name
            .as_ref()
            .is_some_and(|n| spec.argument_names.iter().any(|a| a == n));
        if !has_timestamp || !has_timezone {
            return Err(CacheError::InvalidRegistration(
                "a bucket rule requires both a timestamp and a timezone argument declared in argument_names".into(),
            ));
        }
    }

    if let Some(tz_lookup) = &spec.tz_lookup {
        for param in &tz_lookup.param_names {
            if !spec.argument_names.iter().any(|a| a == param) {
                return Err(CacheError::InvalidRegistration(format!(
                    "tz_lookup parameter '{param}' is not a declared argument"
                )));
            }
        }
    }

    let mut names = registered_names().lock().expect("registry mutex poisoned");
    if !names.insert(format!("{}:{}", spec.module_name, spec.lookup_name)) {
        return Err(CacheError::InvalidRegistration(format!(
            "'{}:{}' is already registered",
            spec.module_name, spec.lookup_name
        )));
    }

    Ok(())
}

/// A registered computation: the validated descriptor plus the user's
/// compute function. Produced by [`register`]; drive calls through
/// [`crate::engine`].
pub struct Registered<T> {
    pub spec: ComputationSpec,
    pub compute: ComputeFn<T>,
}

/// Validate `spec` and pair it with `compute` to produce a callable
/// registration. This is the Rust-native stand-in for the source's
/// decorator: no attribute is attached to a callable, a plain struct is
/// returned instead (see the design notes' guidance against emulating
/// attribute-on-callable).
pub fn register<T>(spec: ComputationSpec, compute: ComputeFn<T>) -> Result<Registered<T>> {
    validate(&spec)?;
    Ok(Registered { spec, compute })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_spec(bucket_rule: BucketRule) -> ComputationSpec {
        ComputationSpec {
            module_name: "billing".to_string(),
            lookup_name: format!("totals-{}", uuid_like()),
            argument_names: vec!["account_id".to_string(), "dt".to_string(), "tz".to_string()],
            timestamp_arg_name: Some("dt".to_string()),
            timezone_arg_name: Some("tz".to_string()),
            ignore_args: Vec::new(),
            bucket_rule,
            timeout_ttl: Some(3600),
            timeout_refresh: None,
            refresh_strategy: RefreshStrategy::All,
            default_timestamp_fn: Arc::new(Utc::now),
            default_tz: "US/Eastern".parse().unwrap(),
            tz_lookup: None,
        }
    }

    fn uuid_like() -> String {
        static COUNTER: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(0);
        COUNTER.fetch_add(1, std::sync::atomic::Ordering::Relaxed).to_string()
    }

    #[test]
    fn valid_registration_succeeds() {
        let spec = base_spec(BucketRule::Monthly);
        let compute: ComputeFn<i64> = Arc::new(|_args| Box::pin(async { 7 }));
        assert!(register(spec, compute).is_ok());
    }

    #[test]
    fn bucket_rule_without_timestamp_arg_is_rejected() {
        let mut spec = base_spec(BucketRule::Monthly);
        spec.timestamp_arg_name = None;
        let compute: ComputeFn<i64> = Arc::new(|_args| Box::pin(async { 7 }));
        assert!(matches!(register(spec, compute), Err(CacheError::InvalidRegistration(_))));
    }

    #[test]
    fn invalid_lookup_name_is_rejected() {
        let mut spec = base_spec(BucketRule::None);
        spec.lookup_name = "not valid!".to_string();
        let compute: ComputeFn<i64> = Arc::new(|_args| Box::pin(async { 7 }));
        assert!(matches!(register(spec, compute), Err(CacheError::InvalidRegistration(_))));
    }

    #[test]
    fn double_registration_is_rejected() {
        let lookup_name = format!("dup-{}", uuid_like());
        let mut spec = base_spec(BucketRule::None);
        spec.lookup_name = lookup_name.clone();
        let compute: ComputeFn<i64> = Arc::new(|_args| Box::pin(async { 7 }));
        assert!(register(spec, compute.clone()).is_ok());

        let mut spec2 = base_spec(BucketRule::None);
        spec2.lookup_name = lookup_name;
        assert!(matches!(register(spec2, compute), Err(CacheError::InvalidRegistration(_))));
    }

    #[test]
    fn key_argument_names_excludes_timestamp_timezone_and_ignored() {
        let mut spec = base_spec(BucketRule::Monthly);
        spec.argument_names.push("debug".to_string());
        spec.ignore_args = vec!["debug".to_string()];
        assert_eq!(spec.key_argument_names(), vec!["account_id"]);
    }
}
