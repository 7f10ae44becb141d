//! In-process cache backend.

use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use lru::LruCache;
use tokio::time::Instant;

use super::backend::{CacheBackend, CacheUnavailable};
use super::config::CacheConfig;
use super::lock::{rw_read, rw_write};

const SOURCE: &str = "cache::store";

#[derive(Debug, Clone)]
struct StoredEntry {
    payload: Bytes,
    created_at: Instant,
    ttl: Duration,
}

impl StoredEntry {
    /// An entry stays live through `created_at + ttl` and expires strictly after.
    fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.created_at) > self.ttl
    }
}

/// LRU-bounded map with per-entry TTL.
///
/// Expired entries are dropped lazily when they are read or scanned; capacity
/// pressure evicts the least recently used entry.
pub struct MemoryBackend {
    entries: RwLock<LruCache<String, StoredEntry>>,
}

impl MemoryBackend {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            entries: RwLock::new(LruCache::new(config.memory_capacity_non_zero())),
        }
    }

    /// Number of entries held, including expired ones not yet dropped.
    pub fn len(&self) -> usize {
        rw_read(&self.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>, CacheUnavailable> {
        let now = Instant::now();
        let mut entries = rw_write(&self.entries, SOURCE, "get");
        match entries.get(key) {
            None => return Ok(None),
            Some(entry) if !entry.is_expired(now) => return Ok(Some(entry.payload.clone())),
            Some(_) => {}
        }
        entries.pop(key);
        Ok(None)
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<(), CacheUnavailable> {
        let entry = StoredEntry {
            payload: value,
            created_at: Instant::now(),
            ttl,
        };
        rw_write(&self.entries, SOURCE, "set").put(key.to_string(), entry);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheUnavailable> {
        Ok(rw_write(&self.entries, SOURCE, "delete")
            .pop(key)
            .is_some())
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, CacheUnavailable> {
        let now = Instant::now();
        let mut entries = rw_write(&self.entries, SOURCE, "scan_prefix");
        let mut live = Vec::new();
        let mut expired = Vec::new();
        for (key, entry) in entries.iter() {
            if !key.starts_with(prefix) {
                continue;
            }
            if entry.is_expired(now) {
                expired.push(key.clone());
            } else {
                live.push(key.clone());
            }
        }
        for key in &expired {
            entries.pop(key);
        }
        live.sort();
        Ok(live)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(capacity: usize) -> MemoryBackend {
        MemoryBackend::new(&CacheConfig {
            memory_capacity: capacity,
            ..Default::default()
        })
    }

    #[tokio::test(start_paused = true)]
    async fn entry_lives_until_ttl_elapses() {
        let store = backend(8);
        store
            .set("k", Bytes::from_static(b"v"), Duration::from_secs(10))
            .await
            .expect("set");

        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(
            store.get("k").await.expect("get"),
            Some(Bytes::from_static(b"v"))
        );

        tokio::time::advance(Duration::from_millis(1)).await;
        assert_eq!(store.get("k").await.expect("get"), None);
        assert!(store.is_empty(), "expired entry dropped on read");
    }

    #[tokio::test]
    async fn capacity_evicts_least_recently_used() {
        let store = backend(2);
        let ttl = Duration::from_secs(60);
        store.set("a", Bytes::from_static(b"1"), ttl).await.expect("set");
        store.set("b", Bytes::from_static(b"2"), ttl).await.expect("set");
        store.get("a").await.expect("get");
        store.set("c", Bytes::from_static(b"3"), ttl).await.expect("set");

        assert!(store.get("a").await.expect("get").is_some());
        assert!(store.get("b").await.expect("get").is_none());
        assert!(store.get("c").await.expect("get").is_some());
    }

    #[tokio::test]
    async fn delete_reports_presence() {
        let store = backend(4);
        store
            .set("k", Bytes::from_static(b"v"), Duration::from_secs(1))
            .await
            .expect("set");
        assert!(store.delete("k").await.expect("delete"));
        assert!(!store.delete("k").await.expect("delete"));
    }

    #[tokio::test(start_paused = true)]
    async fn scan_prefix_skips_other_namespaces_and_expired() {
        let store = backend(8);
        store
            .set("products:a", Bytes::new(), Duration::from_secs(60))
            .await
            .expect("set");
        store
            .set("products:b", Bytes::new(), Duration::from_secs(1))
            .await
            .expect("set");
        store
            .set("orders:a", Bytes::new(), Duration::from_secs(60))
            .await
            .expect("set");

        tokio::time::advance(Duration::from_secs(2)).await;
        let keys = store.scan_prefix("products:").await.expect("scan");
        assert_eq!(keys, vec!["products:a".to_string()]);
        assert_eq!(store.len(), 2);
    }
}
