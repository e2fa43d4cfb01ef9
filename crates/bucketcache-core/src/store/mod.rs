//! The store adapter: a narrow façade over an external key/value store.
//!
//! Payloads are opaque bytes — encoding lives one layer up, in [`codec`] —
//! and the only structured operation is the sorted-set index used for
//! range deletion. Two implementations ship: [`memory::InMemoryStore`] for
//! tests, and [`redis::RedisStore`] for production use against a
//! Redis-compatible server.

pub mod codec;
pub mod memory;
pub mod redis;

use async_trait::async_trait;

use crate::error::Result;

pub use memory::InMemoryStore;
pub use redis::RedisStore;

/// Minimum operation set a cache backend must provide (see the external
/// store contract). All operations are async; ttl is in seconds and `None`
/// (or `Some(0)`) means no expiry.
#[async_trait]
pub trait Store: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<u64>) -> Result<()>;

    async fn delete(&self, keys: &[String]) -> Result<()>;

    /// Returns a mapping containing only the keys that were present.
    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>>;

    async fn mset(&self, entries: &[(String, Vec<u8>)], ttl: Option<u64>) -> Result<()>;

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<()>;

    async fn zrangebyscore(&self, key: &str, min: f64, max: f64) -> Result<Vec<String>>;

    async fn zremrangebyscore(&self, key: &str, min: f64, max: f64) -> Result<()>;
}

/// `(i) remove index members whose score < now - ttl (when ttl > 0),
/// (ii) upsert cache_key with score = now` — see the store adapter design.
pub async fn update_index(store: &dyn Store, cache_key: &str, index_key: &str, ttl: Option<u64>, now_unix: f64) -> Result<()> {
    if let Some(ttl) = ttl {
        if ttl > 0 {
            store.zremrangebyscore(index_key, f64::NEG_INFINITY, now_unix - ttl as f64).await?;
        }
    }
    store.zadd(index_key, cache_key, now_unix).await
}

/// Fetch the cache-keys in `[after, before]`, delete them, then remove them
/// from the index — the `clear_cache` operation's only moving part.
pub async fn clear_index(store: &dyn Store, index_key: &str, after: f64, before: f64) -> Result<()> {
    let keys = store.zrangebyscore(index_key, after, before).await?;
    if !keys.is_empty() {
        store.delete(&keys).await?;
    }
    store.zremrangebyscore(index_key, after, before).await
}
