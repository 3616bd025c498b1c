use async_trait::async_trait;
use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::models::PendingMatch;
use crate::services::{PendingMatchStore, StoreError};

/// Errors that can occur with cache operations
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Redis error: {0}")]
    RedisError(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Cache miss: {0}")]
    CacheMiss(String),
}

/// Multi-tier cache manager
///
/// Implements L1 (in-memory) and L2 (Redis) caching for the ranking listing,
/// keyed by a generation counter that lives in Redis.
/// Pending matches go to L2 only: they must be visible to every instance the
/// moment a vote clears them, which a per-process L1 cannot guarantee.
pub struct CacheManager {
    redis: Arc<tokio::sync::Mutex<ConnectionManager>>,
    l1_cache: moka::future::Cache<String, Vec<u8>>,
    ttl_secs: u64,
}

impl CacheManager {
    /// Create a new cache manager
    pub async fn new(redis_url: &str, l1_size: u64, ttl_secs: u64) -> Result<Self, CacheError> {
        let client = redis::Client::open(redis_url)?;
        let redis = redis::aio::ConnectionManager::new(client).await?;

        let l1_cache = moka::future::CacheBuilder::new(l1_size)
            .time_to_live(Duration::from_secs(ttl_secs))
            .build();

        Ok(Self {
            redis: Arc::new(tokio::sync::Mutex::new(redis)),
            l1_cache,
            ttl_secs,
        })
    }

    /// Get a value from cache (L1 first, then L2)
    pub async fn get<T>(&self, key: &str) -> Result<T, CacheError>
    where
        T: for<'de> Deserialize<'de>,
    {
        if let Some(bytes) = self.l1_cache.get(key).await {
            tracing::trace!("L1 cache hit: {}", key);
            return Ok(serde_json::from_slice(&bytes)?);
        }

        let value = self.get_shared(key).await?;

        if let Some(json) = value {
            tracing::trace!("L2 cache hit: {}", key);
            self.l1_cache.insert(key.to_string(), json.as_bytes().to_vec()).await;
            return Ok(serde_json::from_str(&json)?);
        }

        tracing::trace!("Cache miss: {}", key);
        Err(CacheError::CacheMiss(key.to_string()))
    }

    /// Set a value in cache (both L1 and L2, with the configured TTL)
    pub async fn set<T>(&self, key: &str, value: &T) -> Result<(), CacheError>
    where
        T: Serialize,
    {
        let json = serde_json::to_string(value)?;

        self.l1_cache.insert(key.to_string(), json.as_bytes().to_vec()).await;

        let mut conn = self.redis.lock().await;
        let _: () = redis::cmd("SETEX")
            .arg(key)
            .arg(self.ttl_secs)
            .arg(json)
            .query_async(&mut *conn)
            .await?;
        drop(conn);

        tracing::trace!("Cache set: {}", key);
        Ok(())
    }

    /// Delete a value from both cache tiers
    pub async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.l1_cache.invalidate(key).await;
        let mut conn = self.redis.lock().await;
        let _: () = redis::cmd("DEL")
            .arg(key)
            .query_async(&mut *conn)
            .await?;
        Ok(())
    }

    async fn get_shared(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.redis.lock().await;
        let value: Option<String> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut *conn)
            .await?;
        Ok(value)
    }

    /// Store a value in L2 without expiry
    async fn set_shared(&self, key: &str, json: String) -> Result<(), CacheError> {
        let mut conn = self.redis.lock().await;
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(json)
            .query_async(&mut *conn)
            .await?;
        Ok(())
    }

    /// Store a value in L2 without expiry unless the key exists; returns whether it was stored
    async fn set_shared_if_absent(&self, key: &str, json: String) -> Result<bool, CacheError> {
        let mut conn = self.redis.lock().await;
        let stored: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(json)
            .arg("NX")
            .query_async(&mut *conn)
            .await?;
        Ok(stored.is_some())
    }

    /// Current ranking generation
    ///
    /// Ranking entries are keyed by generation, so a listing computed before a
    /// vote can never be served after [`CacheManager::bump_ranking_generation`].
    pub async fn ranking_generation(&self) -> Result<u64, CacheError> {
        let mut conn = self.redis.lock().await;
        let value: Option<u64> = redis::cmd("GET")
            .arg(CacheKey::ranking_generation())
            .query_async(&mut *conn)
            .await?;
        Ok(value.unwrap_or(0))
    }

    /// Move every instance on to a fresh ranking key
    pub async fn bump_ranking_generation(&self) -> Result<u64, CacheError> {
        let mut conn = self.redis.lock().await;
        let generation: u64 = redis::cmd("INCR")
            .arg(CacheKey::ranking_generation())
            .query_async(&mut *conn)
            .await?;
        Ok(generation)
    }

    async fn delete_shared(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.redis.lock().await;
        let _: () = redis::cmd("DEL")
            .arg(key)
            .query_async(&mut *conn)
            .await?;
        Ok(())
    }

    /// Health check for the Redis connection
    pub async fn health_check(&self) -> bool {
        let mut conn = self.redis.lock().await;
        let pong: redis::RedisResult<String> = redis::cmd("PING").query_async(&mut *conn).await;
        pong.is_ok()
    }
}

#[async_trait]
impl PendingMatchStore for CacheManager {
    async fn get(&self, voter_id: &str) -> Result<Option<PendingMatch>, StoreError> {
        let key = CacheKey::pending_match(voter_id);
        match self.get_shared(&key).await? {
            Some(json) => Ok(Some(serde_json::from_str(&json).map_err(CacheError::from)?)),
            None => Ok(None),
        }
    }

    async fn set(&self, pending: &PendingMatch) -> Result<(), StoreError> {
        let json = serde_json::to_string(pending).map_err(CacheError::from)?;
        self.set_shared(&CacheKey::pending_match(&pending.voter_id), json)
            .await?;
        Ok(())
    }

    async fn set_if_absent(&self, pending: &PendingMatch) -> Result<bool, StoreError> {
        let json = serde_json::to_string(pending).map_err(CacheError::from)?;
        let stored = self
            .set_shared_if_absent(&CacheKey::pending_match(&pending.voter_id), json)
            .await?;
        Ok(stored)
    }

    async fn delete(&self, voter_id: &str) -> Result<(), StoreError> {
        self.delete_shared(&CacheKey::pending_match(voter_id)).await?;
        Ok(())
    }
}

/// Cache key builder
pub struct CacheKey;

impl CacheKey {
    /// Build a cache key for the ranking listing of one generation
    pub fn ranking(generation: u64) -> String {
        format!("ranking:{}", generation)
    }

    /// Build the key holding the current ranking generation
    pub fn ranking_generation() -> String {
        "ranking:generation".to_string()
    }

    /// Build a cache key for a voter's pending match
    pub fn pending_match(voter_id: &str) -> String {
        format!("pending:{}", voter_id)
    }
}
