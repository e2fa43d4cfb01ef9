//! An in-process store, for tests and local development.
//!
//! Mirrors the shape of a backend like `nucleus_std`'s in-memory cache: a
//! `HashMap` guarded by a `tokio::sync::RwLock`, wrapped in `Arc` so clones
//! share the same underlying table. TTLs are tracked per-entry with
//! `tokio::time::Instant` and enforced lazily on read.
//!
//! Sorted sets are kept as a plain `Vec<(member, score)>` — fine for the
//! sizes this crate's tests and local-dev use exercise; a production
//! deployment should reach for [`crate::store::redis::RedisStore`].

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::error::Result;
use crate::store::Store;

struct Entry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

#[derive(Default)]
struct Tables {
    values: HashMap<String, Entry>,
    zsets: HashMap<String, Vec<(String, f64)>>,
}

/// A cheaply clonable in-memory [`Store`]; clones share state via `Arc`.
#[derive(Clone)]
pub struct InMemoryStore {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        InMemoryStore { tables: Arc::new(RwLock::new(Tables::default())) }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn is_live(entry: &Entry, now: Instant) -> bool {
    entry.expires_at.map(|exp| exp > now).unwrap_or(true)
}

#[async_trait]
impl Store for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let now = Instant::now();
        let tables = self.tables.read().await;
        Ok(tables.values.get(key).filter(|e| is_live(e, now)).map(|e| e.value.clone()))
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<u64>) -> Result<()> {
        let expires_at = ttl.filter(|t| *t > 0).map(|t| Instant::now() + std::time::Duration::from_secs(t));
        let mut tables = self.tables.write().await;
        tables.values.insert(key.to_string(), Entry { value, expires_at });
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<()> {
        let mut tables = self.tables.write().await;
        for key in keys {
            tables.values.remove(key);
        }
        Ok(())
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>> {
        let now = Instant::now();
        let tables = self.tables.read().await;
        Ok(keys
            .iter()
            .map(|k| tables.values.get(k).filter(|e| is_live(e, now)).map(|e| e.value.clone()))
            .collect())
    }

    async fn mset(&self, entries: &[(String, Vec<u8>)], ttl: Option<u64>) -> Result<()> {
        let expires_at = ttl.filter(|t| *t > 0).map(|t| Instant::now() + std::time::Duration::from_secs(t));
        let mut tables = self.tables.write().await;
        for (key, value) in entries {
            tables.values.insert(key.clone(), Entry { value: value.clone(), expires_at });
        }
        Ok(())
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<()> {
        let mut tables = self.tables.write().await;
        let set = tables.zsets.entry(key.to_string()).or_default();
        set.retain(|(m, _)| m != member);
        set.push((member.to_string(), score));
        Ok(())
    }

    async fn zrangebyscore(&self, key: &str, min: f64, max: f64) -> Result<Vec<String>> {
        let tables = self.tables.read().await;
        let mut members: Vec<(String, f64)> = tables
            .zsets
            .get(key)
            .map(|set| set.iter().filter(|(_, score)| *score >= min && *score <= max).cloned().collect())
            .unwrap_or_default();
        members.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap());
        Ok(members.into_iter().map(|(m, _)| m).collect())
    }

    async fn zremrangebyscore(&self, key: &str, min: f64, max: f64) -> Result<()> {
        let mut tables = self.tables.write().await;
        if let Some(set) = tables.zsets.get_mut(key) {
            set.retain(|(_, score)| !(*score >= min && *score <= max));
        }
        Ok(())
    }
}
