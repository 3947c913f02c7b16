//! Redis cache backend.
//!
//! The connection lives behind a lock and is created lazily. An I/O failure
//! drops it so the next call reconnects; a failed reconnect surfaces as
//! [`CacheError::Unavailable`] and the caller treats it as a miss.

use std::time::Duration;

use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use tokio::sync::RwLock;
use tracing::{info, warn};

use super::CacheError;

/// How long to wait for a connection or a reply before giving up.
const REDIS_TIMEOUT: Duration = Duration::from_secs(2);

pub struct RedisCache {
    client: redis::Client,
    connection: RwLock<Option<MultiplexedConnection>>,
}

impl RedisCache {
    /// Create a cache for the given URI without connecting yet.
    pub fn new(uri: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(uri)?;
        Ok(Self {
            client,
            connection: RwLock::new(None),
        })
    }

    /// Create a cache and try to connect once. A failed attempt is logged and
    /// the cache starts degraded; later calls retry.
    pub async fn connect(uri: &str) -> Result<Self, CacheError> {
        let cache = Self::new(uri)?;
        if let Err(e) = cache.connection().await {
            warn!(error = %e, "Cache unavailable at startup, continuing without it");
        }
        Ok(cache)
    }

    async fn connection(&self) -> Result<MultiplexedConnection, CacheError> {
        if let Some(conn) = self.connection.read().await.as_ref() {
            return Ok(conn.clone());
        }

        // Connect without holding the lock so other callers are not blocked
        // behind a slow or unreachable server.
        let conn = tokio::time::timeout(
            REDIS_TIMEOUT,
            self.client.get_multiplexed_tokio_connection(),
        )
        .await
        .map_err(|_| CacheError::Unavailable("connection timed out".to_string()))?
        .map_err(|e| CacheError::Unavailable(e.to_string()))?;

        let mut guard = self.connection.write().await;
        if guard.is_none() {
            info!("Connected to cache");
        }
        Ok(guard.get_or_insert(conn).clone())
    }

    async fn mark_unhealthy(&self) {
        if self.connection.write().await.take().is_some() {
            warn!("Cache connection marked unhealthy, will reconnect on next use");
        }
    }

    /// Run one command, dropping the connection if it failed at the transport level.
    async fn run<T, F, Fut>(&self, command: F) -> Result<T, CacheError>
    where
        F: FnOnce(MultiplexedConnection) -> Fut,
        Fut: Future<Output = redis::RedisResult<T>>,
    {
        let conn = self.connection().await?;
        match tokio::time::timeout(REDIS_TIMEOUT, command(conn)).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                if e.is_io_error()
                    || e.is_connection_dropped()
                    || e.is_connection_refusal()
                    || e.is_timeout()
                {
                    self.mark_unhealthy().await;
                }
                Err(CacheError::Redis(e))
            }
            Err(_) => {
                self.mark_unhealthy().await;
                Err(CacheError::Unavailable("command timed out".to_string()))
            }
        }
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let key = key.to_string();
        self.run(|mut conn| async move { conn.get::<_, Option<String>>(key).await })
            .await
    }

    pub async fn set_ex(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        let key = key.to_string();
        let secs = ttl.as_secs().max(1);
        self.run(|mut conn| async move { conn.set_ex::<_, _, ()>(key, value, secs).await })
            .await
    }

    pub async fn del(&self, key: &str) -> Result<(), CacheError> {
        let key = key.to_string();
        self.run(|mut conn| async move { conn.del::<_, ()>(key).await })
            .await
    }
}
