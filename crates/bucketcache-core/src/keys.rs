//! Deterministic key derivation.
//!
//! Every key family is derived from a computation's `module_name` and
//! `lookup_name` plus, for the value key, the joined call arguments (the
//! timestamp and timezone arguments excluded) and the bucket label when one
//! applies. Derivation is pure — no I/O, no randomness — so identical
//! normalized call arguments always produce identical keys, in this process
//! or any other.

use sha1::{Digest, Sha1};

/// The four key-prefix settings that scope every key family to one cache.
#[derive(Debug, Clone)]
pub struct KeyPrefixes {
    pub key_prefix: String,
    pub index_prefix: String,
    pub updated_prefix: String,
    pub refresh_prefix: String,
}

impl Default for KeyPrefixes {
    fn default() -> Self {
        KeyPrefixes {
            key_prefix: "cache_updater".to_string(),
            index_prefix: "cache_index".to_string(),
            updated_prefix: "cache_updated_time".to_string(),
            refresh_prefix: "cache_refresh_time".to_string(),
        }
    }
}

/// SHA-1 hex digest of `value`, matching the source's `hashlib.sha1(...).hexdigest()`.
fn sha1_hex(value: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(value.as_bytes());
    hex::encode(hasher.finalize())
}

/// `SHA1("{key_prefix}:{module}:{name}:{arg1}:{arg2}:…[:{bucket_label}]")`.
///
/// `args` must already exclude the timestamp and timezone argument names and
/// be in the computation's declared parameter order.
///
/// When `args` is empty this omits the arg segment entirely rather than
/// hashing a placeholder empty segment (the Python source joins `arglist`
/// into one fixed slot ahead of the bucket label, so a zero-arg computation
/// there hashes `…:name::label`, not `…:name:label`). Intentional: this
/// schema-based codec has no positional arg slot to preserve, and the
/// degenerate zero-arg case collides with nothing else this hashes.
pub fn cache_key(prefixes: &KeyPrefixes, module: &str, name: &str, args: &[String], bucket_label: Option<&str>) -> String {
    let mut parts = vec![prefixes.key_prefix.clone(), module.to_string(), name.to_string()];
    parts.extend(args.iter().cloned());
    if let Some(label) = bucket_label {
        parts.push(label.to_string());
    }
    sha1_hex(&parts.join(":"))
}

/// `{index_prefix}:{module}:{name}` — one sorted-set index per computation,
/// shared across every bucket it ever writes.
pub fn index_key(prefixes: &KeyPrefixes, module: &str, name: &str) -> String {
    format!("{}:{}:{}", prefixes.index_prefix, module, name)
}

/// `{updated_prefix}:{cache_key}`.
pub fn updated_key(prefixes: &KeyPrefixes, cache_key: &str) -> String {
    format!("{}:{}", prefixes.updated_prefix, cache_key)
}

/// `{refresh_prefix}:{cache_key}`.
pub fn refresh_key(prefixes: &KeyPrefixes, cache_key: &str) -> String {
    format!("{}:{}", prefixes.refresh_prefix, cache_key)
}
