//! Process-wide configuration.
//!
//! Settings are resolved once, at [`setup_client`], from defaults overridden
//! by `CACHE_UPDATER_<NAME>` environment variables overridden in turn by
//! whatever a caller passes to [`setup_client`] directly. After that they
//! are read-only for the life of the process — the only shared mutable
//! process-wide state this crate has (see the concurrency model's note on
//! shared resources).

use std::env;
use std::sync::OnceLock;

use chrono_tz::Tz;

use crate::error::{CacheError, Result};
use crate::keys::KeyPrefixes;
use crate::refresh::RefreshStrategy;
use crate::store::Store;
use std::sync::Arc;

/// Process-wide defaults, overridable per registration.
#[derive(Debug, Clone)]
pub struct Settings {
    pub key_prefix: String,
    pub index_prefix: String,
    pub refresh_prefix: String,
    pub updated_prefix: String,
    pub default_timezone: Tz,
    pub default_timeout_ttl: u64,
    pub default_timeout_refresh: Option<u64>,
    pub default_refresh_strategy: RefreshStrategy,
    /// Reserved total-bypass hook; not yet consulted by the engine (see the
    /// design notes' open question on `DISABLED` semantics).
    pub disabled: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            key_prefix: "cache_updater".to_string(),
            index_prefix: "cache_index".to_string(),
            refresh_prefix: "cache_refresh_time".to_string(),
            updated_prefix: "cache_updated_time".to_string(),
            default_timezone: "US/Eastern".parse().expect("US/Eastern is a valid IANA zone"),
            default_timeout_ttl: 3600,
            default_timeout_refresh: None,
            default_refresh_strategy: RefreshStrategy::All,
            disabled: false,
        }
    }
}

impl Settings {
    /// Start from [`Settings::default`] and apply any `CACHE_UPDATER_<NAME>`
    /// environment variables that are set, e.g. `CACHE_UPDATER_DEFAULT_TIMEOUT_TTL=120`.
    pub fn from_env() -> Result<Self> {
        let mut settings = Settings::default();
        if let Some(v) = env_var("KEY_PREFIX") {
            settings.key_prefix = v;
        }
        if let Some(v) = env_var("INDEX_PREFIX") {
            settings.index_prefix = v;
        }
        if let Some(v) = env_var("REFRESH_PREFIX") {
            settings.refresh_prefix = v;
        }
        if let Some(v) = env_var("UPDATED_PREFIX") {
            settings.updated_prefix = v;
        }
        if let Some(v) = env_var("DEFAULT_TIMEZONE") {
            settings.default_timezone = v
                .parse()
                .map_err(|_| CacheError::InvalidRegistration(format!("invalid CACHE_UPDATER_DEFAULT_TIMEZONE: {v}")))?;
        }
        if let Some(v) = env_var("DEFAULT_TIMEOUT_TTL") {
            settings.default_timeout_ttl = v.parse().map_err(|_| {
                CacheError::InvalidRegistration(format!("invalid CACHE_UPDATER_DEFAULT_TIMEOUT_TTL: {v}"))
            })?;
        }
        if let Some(v) = env_var("DEFAULT_TIMEOUT_REFRESH") {
            settings.default_timeout_refresh = if v.is_empty() {
                None
            } else {
                Some(v.parse().map_err(|_| {
                    CacheError::InvalidRegistration(format!("invalid CACHE_UPDATER_DEFAULT_TIMEOUT_REFRESH: {v}"))
                })?)
            };
        }
        if let Some(v) = env_var("DEFAULT_REFRESH_STRATEGY") {
            settings.default_refresh_strategy = RefreshStrategy::parse(&v).ok_or_else(|| {
                CacheError::InvalidRegistration(format!("invalid CACHE_UPDATER_DEFAULT_REFRESH_STRATEGY: {v}"))
            })?;
        }
        if let Some(v) = env_var("DISABLED") {
            settings.disabled = matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on");
        }
        Ok(settings)
    }

    pub fn key_prefixes(&self) -> KeyPrefixes {
        KeyPrefixes {
            key_prefix: self.key_prefix.clone(),
            index_prefix: self.index_prefix.clone(),
            updated_prefix: self.updated_prefix.clone(),
            refresh_prefix: self.refresh_prefix.clone(),
        }
    }
}

fn env_var(name: &str) -> Option<String> {
    env::var(format!("CACHE_UPDATER_{name}")).ok()
}

struct Shared {
    settings: Settings,
    client: Arc<dyn Store>,
}

static SHARED: OnceLock<Shared> = OnceLock::new();

/// Install the store client and, optionally, settings overrides. Must be
/// called exactly once before any registered computation runs; subsequent
/// calls are ignored (first writer wins), matching the concurrency model's
/// "settings are written only at startup" guarantee.
pub fn setup_client(client: Arc<dyn Store>, settings: Settings) {
    let _ = SHARED.set(Shared { settings, client });
}

/// Convenience form that resolves settings from the environment.
pub fn setup_client_from_env(client: Arc<dyn Store>) -> Result<()> {
    let settings = Settings::from_env()?;
    setup_client(client, settings);
    Ok(())
}

pub fn settings() -> Result<&'static Settings> {
    SHARED.get().map(|s| &s.settings).ok_or(CacheError::MissingClient)
}

pub fn client() -> Result<Arc<dyn Store>> {
    SHARED.get().map(|s| s.client.clone()).ok_or(CacheError::MissingClient)
}
