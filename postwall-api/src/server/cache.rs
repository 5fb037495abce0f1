//! Time-bounded storage for rendered pages.
//!
//! An entry is served until its time to live runs out or the cache is
//! cleared, even if the data it was rendered from changed in the meantime.

use std::{collections::HashMap, time::Duration};
use tokio::{sync::RwLock, time::Instant};
use tracing::debug;

#[derive(Clone, Debug)]
struct CacheEntry {
    body: String,
    expires_at: Instant,
}

#[derive(Debug, Default)]
pub struct PageCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl PageCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The stored page, unless it is missing or expired. Expired entries are dropped.
    pub async fn get(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some(entry) if entry.expires_at > now => return Some(entry.body.clone()),
                Some(_) => {}
                None => return None,
            }
        }

        let mut entries = self.entries.write().await;
        if entries.get(key).is_some_and(|entry| entry.expires_at <= now) {
            entries.remove(key);
            debug!(key, "Dropped expired page");
        }
        None
    }

    /// Stores `body` and drops every entry that has expired by now.
    pub async fn set(&self, key: impl Into<String>, body: String, ttl: Duration) {
        let now = Instant::now();
        let entry = CacheEntry {
            body,
            expires_at: now + ttl,
        };

        let mut entries = self.entries.write().await;
        entries.retain(|_, entry| entry.expires_at > now);
        entries.insert(key.into(), entry);
    }

    #[cfg(test)]
    pub async fn entry_count(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn clear(&self) {
        let mut entries = self.entries.write().await;
        debug!(entries = entries.len(), "Clearing page cache");
        entries.clear();
    }
}
