//! Read-through cache in front of an arbitrary producer.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use metrics::{counter, histogram};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::time::Instant;
use tracing::{debug, warn};

use super::backend::{CacheBackend, CacheUnavailable};

const METRIC_CACHE_HIT: &str = "shopfront_cache_hit_total";
const METRIC_CACHE_MISS: &str = "shopfront_cache_miss_total";
const METRIC_CACHE_UNAVAILABLE: &str = "shopfront_cache_unavailable_total";
const METRIC_CACHE_INVALIDATED: &str = "shopfront_cache_invalidated_total";
const METRIC_CACHE_PRODUCER_MS: &str = "shopfront_cache_producer_ms";

/// Per-key invalidation marks kept before folding them into the floor.
const MAX_KEY_MARKS: usize = 4096;

/// Get-or-compute over a [`CacheBackend`].
///
/// The backend is an optimization only: when it fails, the request is served
/// by calling the producer, and the failure is logged and counted.
///
/// Cached payloads carry the stamp of the moment their producer started.
/// Invalidating a key or prefix records a newer stamp for it, and an entry
/// older than a mark covering its key is read as a miss. A read that begins
/// after `invalidate` returns therefore never sees pre-invalidation data,
/// even when a slow producer writes its result back afterwards.
pub struct CacheFront {
    backend: Arc<dyn CacheBackend>,
    flights: Option<DashMap<String, Arc<AsyncMutex<()>>>>,
    marks: InvalidationMarks,
}

enum Lookup<T> {
    Hit(T),
    Miss,
    Unavailable,
}

#[derive(Serialize)]
struct Envelope<'a, T> {
    stamp: u64,
    value: &'a T,
}

#[derive(Deserialize)]
struct StoredEnvelope<T> {
    stamp: u64,
    value: T,
}

impl CacheFront {
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self {
            backend,
            flights: None,
            marks: InvalidationMarks::default(),
        }
    }

    /// Coalesce concurrent misses for one key into a single producer call.
    /// Has no effect over a backend that is switched off.
    pub fn with_single_flight(mut self, enabled: bool) -> Self {
        self.flights = (enabled && self.backend.is_enabled()).then(DashMap::new);
        self
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Serve `key` from cache, or run `producer`, cache its success for `ttl`
    /// and return it. Producer errors are returned as-is and never cached.
    ///
    /// When the backend cannot answer, misses are not coalesced and nothing
    /// is written back.
    pub async fn get_or_compute<T, E, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        producer: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut reachable = match self.lookup(key).await {
            Lookup::Hit(value) => return Ok(value),
            Lookup::Miss => true,
            Lookup::Unavailable => false,
        };

        let _flight = match &self.flights {
            Some(flights) if reachable => {
                let flight = Flight::join(flights, key).await;
                match self.lookup(key).await {
                    Lookup::Hit(value) => return Ok(value),
                    Lookup::Miss => Some(flight),
                    Lookup::Unavailable => {
                        reachable = false;
                        None
                    }
                }
            }
            _ => None,
        };

        counter!(METRIC_CACHE_MISS, "backend" => self.backend.name()).increment(1);
        let started = self.marks.now();
        let started_at = Instant::now();
        let value = producer().await?;
        histogram!(METRIC_CACHE_PRODUCER_MS)
            .record(started_at.elapsed().as_secs_f64() * 1000.0);

        if !reachable {
            return Ok(value);
        }
        if self.marks.is_stale(key, started) {
            debug!(key, "Skipping cache write for result computed before invalidation");
            return Ok(value);
        }
        self.store(key, &value, started, ttl).await;

        // An invalidation may have landed while the write was in flight.
        if self.marks.is_stale(key, started) {
            debug!(key, "Removing cache write overtaken by invalidation");
            if let Err(err) = self.backend.delete(key).await {
                self.record_unavailable("delete", &err);
            }
        }
        Ok(value)
    }

    /// Remove one entry. Returns whether the backend held it.
    pub async fn invalidate(&self, key: &str) -> bool {
        self.marks.mark_key(key);
        match self.backend.delete(key).await {
            Ok(removed) => {
                if removed {
                    counter!(METRIC_CACHE_INVALIDATED, "backend" => self.backend.name())
                        .increment(1);
                }
                debug!(key, removed, "Cache entry invalidated");
                removed
            }
            Err(err) => {
                self.record_unavailable("invalidate", &err);
                false
            }
        }
    }

    /// Remove every entry whose key starts with `prefix`. Returns the number
    /// removed; entries that vanish concurrently are not counted.
    pub async fn invalidate_prefix(&self, prefix: &str) -> usize {
        self.marks.mark_prefix(prefix);
        let keys = match self.backend.scan_prefix(prefix).await {
            Ok(keys) => keys,
            Err(err) => {
                self.record_unavailable("invalidate_prefix", &err);
                return 0;
            }
        };

        let mut removed = 0usize;
        for key in &keys {
            match self.backend.delete(key).await {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(err) => {
                    self.record_unavailable("invalidate_prefix", &err);
                    break;
                }
            }
        }
        if removed > 0 {
            counter!(METRIC_CACHE_INVALIDATED, "backend" => self.backend.name())
                .increment(removed as u64);
        }
        debug!(prefix, scanned = keys.len(), removed, "Cache prefix invalidated");
        removed
    }

    async fn lookup<T: DeserializeOwned>(&self, key: &str) -> Lookup<T> {
        let payload = match self.backend.get(key).await {
            Ok(Some(payload)) => payload,
            Ok(None) => return Lookup::Miss,
            Err(err) => {
                self.record_unavailable("get", &err);
                return Lookup::Unavailable;
            }
        };

        match serde_json::from_slice::<StoredEnvelope<T>>(&payload) {
            Ok(stored) if self.marks.is_stale(key, stored.stamp) => {
                debug!(key, "Cached payload predates an invalidation; treating as miss");
                Lookup::Miss
            }
            Ok(stored) => {
                counter!(METRIC_CACHE_HIT, "backend" => self.backend.name()).increment(1);
                Lookup::Hit(stored.value)
            }
            Err(err) => {
                warn!(
                    key,
                    error = %err,
                    "Cached payload could not be decoded; treating as miss"
                );
                Lookup::Miss
            }
        }
    }

    async fn store<T: Serialize>(&self, key: &str, value: &T, stamp: u64, ttl: Duration) {
        let payload = match serde_json::to_vec(&Envelope { stamp, value }) {
            Ok(payload) => Bytes::from(payload),
            Err(err) => {
                warn!(key, error = %err, "Result could not be encoded for caching");
                return;
            }
        };
        if let Err(err) = self.backend.set(key, payload, ttl).await {
            self.record_unavailable("set", &err);
        }
    }

    fn record_unavailable(&self, op: &'static str, err: &CacheUnavailable) {
        if matches!(err, CacheUnavailable::Disabled) {
            return;
        }
        counter!(
            METRIC_CACHE_UNAVAILABLE,
            "backend" => self.backend.name(),
            "op" => op
        )
        .increment(1);
        warn!(
            op,
            backend = self.backend.name(),
            error = %err,
            "Cache backend unavailable; serving without cache"
        );
    }
}

/// Stamps of the latest invalidation per key and per prefix.
///
/// Key marks are folded into `floor` once there are too many of them, which
/// makes every older entry a miss at once instead of growing without bound.
#[derive(Default)]
struct InvalidationMarks {
    clock: AtomicU64,
    floor: AtomicU64,
    keys: DashMap<String, u64>,
    prefixes: DashMap<String, u64>,
}

impl InvalidationMarks {
    fn now(&self) -> u64 {
        self.clock.load(Ordering::SeqCst)
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn mark_key(&self, key: &str) {
        let stamp = self.tick();
        self.keys
            .entry(key.to_string())
            .and_modify(|mark| *mark = (*mark).max(stamp))
            .or_insert(stamp);
        if self.keys.len() > MAX_KEY_MARKS {
            self.fold_keys();
        }
    }

    fn mark_prefix(&self, prefix: &str) {
        let stamp = self.tick();
        self.prefixes
            .entry(prefix.to_string())
            .and_modify(|mark| *mark = (*mark).max(stamp))
            .or_insert(stamp);
    }

    /// Raise the floor before dropping marks so no mark is ever lost.
    fn fold_keys(&self) {
        let ceiling = self.now();
        self.floor.fetch_max(ceiling, Ordering::SeqCst);
        self.keys.retain(|_, mark| *mark > ceiling);
    }

    /// Whether data produced at `stamp` for `key` has been invalidated since.
    fn is_stale(&self, key: &str, stamp: u64) -> bool {
        if self.floor.load(Ordering::SeqCst) > stamp {
            return true;
        }
        if self.keys.get(key).is_some_and(|mark| *mark > stamp) {
            return true;
        }
        self.prefixes
            .iter()
            .any(|entry| *entry.value() > stamp && key.starts_with(entry.key().as_str()))
    }
}

/// Held while computing a key under single-flight.
struct Flight<'a> {
    flights: &'a DashMap<String, Arc<AsyncMutex<()>>>,
    key: String,
    _guard: OwnedMutexGuard<()>,
}

impl<'a> Flight<'a> {
    async fn join(flights: &'a DashMap<String, Arc<AsyncMutex<()>>>, key: &str) -> Self {
        let lock = flights.entry(key.to_string()).or_default().clone();
        let guard = lock.lock_owned().await;
        Self {
            flights,
            key: key.to_string(),
            _guard: guard,
        }
    }
}

impl Drop for Flight<'_> {
    fn drop(&mut self) {
        // One reference in the map and one in our guard means nobody is waiting.
        self.flights
            .remove_if(&self.key, |_, lock| Arc::strong_count(lock) <= 2);
    }
}
