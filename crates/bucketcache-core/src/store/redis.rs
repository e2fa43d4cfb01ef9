//! A [`Store`] backed by a Redis-compatible server.
//!
//! Uses `redis`'s `ConnectionManager`, which reconnects transparently and is
//! cheap to clone, so each operation clones it rather than holding a lock
//! across an `.await`. Multi-key writes go through an atomic pipeline
//! (`MULTI`/`EXEC`) rather than a Lua script — `MSET`-with-uniform-TTL needs
//! no scripting, just `SET EX` issued N times in one round trip.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::debug;

use crate::error::{CacheError, Result};
use crate::store::Store;

/// A [`Store`] backed by a live Redis (or Redis-protocol-compatible) server.
#[derive(Clone)]
pub struct RedisStore {
    manager: ConnectionManager,
}

impl RedisStore {
    /// Connect to `url` (e.g. `redis://127.0.0.1:6379`), failing with
    /// [`CacheError::InvalidClient`] if the client cannot be constructed or
    /// the initial connection cannot be established.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).map_err(|e| CacheError::InvalidClient(e.to_string()))?;
        let manager = client
            .get_connection_manager()
            .await
            .map_err(|e| CacheError::InvalidClient(e.to_string()))?;
        debug!(url, "connected to redis store");
        Ok(RedisStore { manager })
    }

    /// Wrap an already-constructed connection manager, e.g. one shared with
    /// other subsystems of a host application.
    pub fn from_connection_manager(manager: ConnectionManager) -> Self {
        RedisStore { manager }
    }
}

#[async_trait]
impl Store for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.manager.clone();
        conn.get(key).await.map_err(|e| CacheError::StoreReadError(e.to_string()))
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<u64>) -> Result<()> {
        let mut conn = self.manager.clone();
        let result = match ttl.filter(|t| *t > 0) {
            Some(ttl) => conn.set_ex(key, value, ttl).await,
            None => conn.set(key, value).await,
        };
        result.map_err(|e| CacheError::StoreWriteError(e.to_string()))
    }

    async fn delete(&self, keys: &[String]) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut conn = self.manager.clone();
        conn.del(keys).await.map_err(|e| CacheError::StoreWriteError(e.to_string()))
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.manager.clone();
        conn.mget(keys).await.map_err(|e| CacheError::StoreReadError(e.to_string()))
    }

    async fn mset(&self, entries: &[(String, Vec<u8>)], ttl: Option<u64>) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut conn = self.manager.clone();
        let mut pipe = redis::pipe();
        pipe.atomic();
        match ttl.filter(|t| *t > 0) {
            Some(ttl) => {
                for (key, value) in entries {
                    pipe.cmd("SET").arg(key).arg(value).arg("EX").arg(ttl);
                }
            }
            None => {
                for (key, value) in entries {
                    pipe.cmd("SET").arg(key).arg(value);
                }
            }
        }
        pipe.query_async::<()>(&mut conn).await.map_err(|e| CacheError::StoreWriteError(e.to_string()))
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<()> {
        let mut conn = self.manager.clone();
        conn.zadd(key, member, score).await.map_err(|e| CacheError::StoreWriteError(e.to_string()))
    }

    async fn zrangebyscore(&self, key: &str, min: f64, max: f64) -> Result<Vec<String>> {
        let mut conn = self.manager.clone();
        conn.zrangebyscore(key, min, max).await.map_err(|e| CacheError::StoreReadError(e.to_string()))
    }

    async fn zremrangebyscore(&self, key: &str, min: f64, max: f64) -> Result<()> {
        let mut conn = self.manager.clone();
        redis::cmd("ZREMRANGEBYSCORE")
            .arg(key)
            .arg(min)
            .arg(max)
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| CacheError::StoreWriteError(e.to_string()))
    }
}
