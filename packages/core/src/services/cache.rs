//! Read-side listing cache
//!
//! In-process TTL cache for children and roots listings, keyed by a
//! [`CACHE_PREFIX`]-prefixed string. Values are stored as `serde_json::Value`
//! so one cache serves every listing shape.
//!
//! # Cache Invalidation
//!
//! - **Time-based**: an entry older than the TTL is a miss and is evicted
//! - **Event-driven**: every committed mutation removes the whole prefix

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::services::collaborators::{CacheInvalidator, CollaboratorError};

/// Prefix shared by every department listing key
pub const CACHE_PREFIX: &str = "departments_";

pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);

struct CacheEntry {
    stored_at: Instant,
    value: Value,
}

/// TTL cache of serialized read models
pub struct ReadCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    ttl: Duration,
}

impl ReadCache {
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_CACHE_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Cached value for `key`, if present, fresh and of the expected shape
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                None => return None,
                Some(entry) if entry.stored_at.elapsed() < self.ttl => {
                    match serde_json::from_value(entry.value.clone()) {
                        Ok(value) => {
                            debug!("Cache hit for {}", key);
                            return Some(value);
                        }
                        Err(e) => warn!("Discarding cache entry {}: {}", key, e),
                    }
                }
                Some(_) => debug!("Cache entry {} expired", key),
            }
        }

        self.entries.write().await.remove(key);
        None
    }

    pub async fn insert<T: Serialize>(&self, key: impl Into<String>, value: &T) {
        let key = key.into();
        match serde_json::to_value(value) {
            Ok(value) => {
                self.entries.write().await.insert(
                    key,
                    CacheEntry {
                        stored_at: Instant::now(),
                        value,
                    },
                );
            }
            Err(e) => warn!("Not caching {}: {}", key, e),
        }
    }

    /// Remove every entry whose key starts with `prefix`; returns the count
    pub async fn invalidate_prefix(&self, prefix: &str) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|key, _| !key.starts_with(prefix));
        before - entries.len()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

impl Default for ReadCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheInvalidator for ReadCache {
    async fn remove_by_prefix(&self, prefix: &str) -> Result<(), CollaboratorError> {
        let removed = self.invalidate_prefix(prefix).await;
        debug!("Invalidated {} cache entries with prefix '{}'", removed, prefix);
        Ok(())
    }
}
