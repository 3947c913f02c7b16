//! Identity snapshot cache.
//!
//! The cache is advisory: every failure is logged and reported to callers as a
//! miss, so an outage only costs a store lookup.

mod memory;
mod redis_cache;

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::db::IdentitySnapshot;

pub use memory::MemoryCache;
pub use redis_cache::RedisCache;

/// Default snapshot lifetime: 30 minutes
pub const DEFAULT_CACHE_TTL_SECS: u64 = 30 * 60;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache unavailable: {0}")]
    Unavailable(String),
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("invalid cached value: {0}")]
    Serde(#[from] serde_json::Error),
}

#[derive(Clone)]
enum Backend {
    Memory(MemoryCache),
    Redis(Arc<RedisCache>),
}

#[derive(Clone)]
pub struct SessionCache {
    backend: Backend,
    ttl: Duration,
}

fn cache_key(subject_id: &str) -> String {
    format!("user:{}", subject_id)
}

impl SessionCache {
    pub fn memory(ttl_secs: u64) -> Self {
        Self {
            backend: Backend::Memory(MemoryCache::new()),
            ttl: Duration::from_secs(ttl_secs),
        }
    }

    pub fn redis(cache: RedisCache, ttl_secs: u64) -> Self {
        Self {
            backend: Backend::Redis(Arc::new(cache)),
            ttl: Duration::from_secs(ttl_secs),
        }
    }

    /// Look up a snapshot. Errors and undecodable entries count as a miss.
    pub async fn get(&self, subject_id: &str) -> Option<IdentitySnapshot> {
        match self.try_get(subject_id).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(subject_id, error = %e, "Cache read failed, falling back to store");
                None
            }
        }
    }

    /// Store a snapshot under its subject id for the configured TTL.
    pub async fn set(&self, snapshot: &IdentitySnapshot) {
        if let Err(e) = self.try_set(snapshot).await {
            warn!(subject_id = %snapshot.id, error = %e, "Cache write failed");
        }
    }

    pub async fn delete(&self, subject_id: &str) {
        let key = cache_key(subject_id);
        let result = match &self.backend {
            Backend::Memory(cache) => {
                cache.del(&key).await;
                Ok(())
            }
            Backend::Redis(cache) => cache.del(&key).await,
        };
        if let Err(e) = result {
            warn!(subject_id, error = %e, "Cache delete failed");
        }
    }

    async fn try_get(&self, subject_id: &str) -> Result<Option<IdentitySnapshot>, CacheError> {
        let key = cache_key(subject_id);
        let raw = match &self.backend {
            Backend::Memory(cache) => cache.get(&key).await,
            Backend::Redis(cache) => cache.get(&key).await?,
        };
        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn try_set(&self, snapshot: &IdentitySnapshot) -> Result<(), CacheError> {
        let key = cache_key(&snapshot.id);
        let json = serde_json::to_string(snapshot)?;
        match &self.backend {
            Backend::Memory(cache) => {
                cache.set_ex(&key, json, self.ttl).await;
                Ok(())
            }
            Backend::Redis(cache) => cache.set_ex(&key, json, self.ttl).await,
        }
    }
}
