//! In-process cache backend for single-node deployments and tests.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Entry count past which a write first drops expired entries.
const PRUNE_THRESHOLD: usize = 1024;

/// Deadline used when a TTL is too large to add to the current instant.
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

#[derive(Clone)]
pub struct MemoryCache {
    entries: Arc<Mutex<HashMap<String, (String, Instant)>>>,
    prune_threshold: usize,
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self {
            entries: Arc::default(),
            prune_threshold: PRUNE_THRESHOLD,
        }
    }
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some((value, expires)) if *expires > Instant::now() => Some(value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub async fn set_ex(&self, key: &str, value: String, ttl: Duration) {
        let now = Instant::now();
        let expires = now
            .checked_add(ttl)
            .or_else(|| now.checked_add(FAR_FUTURE))
            .unwrap_or(now);

        let mut entries = self.entries.lock().await;
        if entries.len() >= self.prune_threshold {
            entries.retain(|_, (_, deadline)| *deadline > now);
        }
        entries.insert(key.to_string(), (value, expires));
    }

    pub async fn del(&self, key: &str) {
        self.entries.lock().await.remove(key);
    }
}
