//! Bounded key-value caches with TTL and LRU eviction
//!
//! A [`BoundedCache`] stores opaque values under string keys with a per-entry
//! TTL, a memory budget, and an entry-count budget. Expired entries are
//! treated as absent on every read path and lazily purged; an optional
//! background sweeper bounds memory even for keys that are never re-read.
//!
//! Values are typed (`BoundedCache<V>`) and size estimation is an injectable
//! function, so call sites keep type safety instead of serialize-and-measure
//! probing at runtime.

mod registry;

pub use registry::CacheRegistry;

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::config::CacheConfig;
use crate::error::Result;

/// Fallback size when a value cannot be serialized for estimation
const FALLBACK_SIZE_ESTIMATE: usize = 1024;

/// Result of a single read against the entry map
enum ReadOutcome<V> {
    Miss,
    Expired,
    Hit(V),
}

/// Injectable per-value size estimator (bytes)
pub type SizeEstimator<V> = Arc<dyn Fn(&V) -> usize + Send + Sync>;

/// A cached value with TTL and LRU metadata
struct CacheEntry<V> {
    value: V,
    created_at: Instant,
    ttl: Duration,
    last_accessed: Instant,
    access_count: u64,
    size: usize,
    /// Insertion order, used to break `last_accessed` ties during eviction
    seq: u64,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.created_at) >= self.ttl
    }
}

/// Entry map plus memory accounting, guarded by one mutex per cache so the
/// ensure-capacity + insert sequence is atomic under concurrent writers.
struct CacheStore<V> {
    entries: HashMap<String, CacheEntry<V>>,
    memory_used: usize,
    next_seq: u64,
}

impl<V> CacheStore<V> {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            memory_used: 0,
            next_seq: 0,
        }
    }

    fn remove(&mut self, key: &str) -> Option<CacheEntry<V>> {
        let entry = self.entries.remove(key)?;
        self.memory_used = self.memory_used.saturating_sub(entry.size);
        Some(entry)
    }

    /// Key of the least-recently-accessed entry (oldest `last_accessed`,
    /// ties broken by insertion order)
    fn lru_key(&self) -> Option<String> {
        self.entries
            .iter()
            .min_by_key(|(_, entry)| (entry.last_accessed, entry.seq))
            .map(|(key, _)| key.clone())
    }
}

/// Cache counters tracked atomically
struct CacheCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    requests: AtomicU64,
}

impl CacheCounters {
    fn new() -> Self {
        Self {
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            requests: AtomicU64::new(0),
        }
    }
}

/// Thread-safe bounded cache with TTL expiry and LRU eviction
pub struct BoundedCache<V> {
    name: String,
    config: CacheConfig,
    store: Mutex<CacheStore<V>>,
    counters: CacheCounters,
    size_of: SizeEstimator<V>,
    /// Per-key gates de-duplicating concurrent `get_or_compute` misses
    inflight: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
}

impl<V: Clone + Serialize> BoundedCache<V> {
    /// Create a cache whose size estimator measures the serialized JSON
    /// length of each value
    #[must_use]
    pub fn new(name: &str, config: CacheConfig) -> Self {
        Self::with_size_estimator(
            name,
            config,
            Arc::new(|value: &V| {
                serde_json::to_vec(value)
                    .map(|bytes| bytes.len())
                    .unwrap_or(FALLBACK_SIZE_ESTIMATE)
            }),
        )
    }
}

impl<V: Clone> BoundedCache<V> {
    /// Create a cache with a custom size estimator
    #[must_use]
    pub fn with_size_estimator(
        name: &str,
        config: CacheConfig,
        size_of: SizeEstimator<V>,
    ) -> Self {
        Self {
            name: name.to_string(),
            config,
            store: Mutex::new(CacheStore::new()),
            counters: CacheCounters::new(),
            size_of,
            inflight: DashMap::new(),
        }
    }

    /// Cache name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get a value if present and unexpired.
    ///
    /// Expired entries are treated as absent and removed on the spot, even if
    /// no background sweep has run. Hits refresh the entry's LRU position.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<V> {
        self.counters.requests.fetch_add(1, Ordering::Relaxed);
        let now = Instant::now();
        let mut store = self.store.lock();

        let outcome = match store.entries.get_mut(key) {
            None => ReadOutcome::Miss,
            Some(entry) if entry.is_expired(now) => ReadOutcome::Expired,
            Some(entry) => {
                entry.last_accessed = now;
                entry.access_count += 1;
                ReadOutcome::Hit(entry.value.clone())
            }
        };

        match outcome {
            ReadOutcome::Miss => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            ReadOutcome::Expired => {
                store.remove(key);
                self.counters.evictions.fetch_add(1, Ordering::Relaxed);
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                trace!(cache = %self.name, key, "expired entry purged on read");
                None
            }
            ReadOutcome::Hit(value) => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                Some(value)
            }
        }
    }

    /// Insert or overwrite a value. `None` TTL uses the configured default.
    ///
    /// Capacity is ensured and the entry inserted within one critical
    /// section, so concurrent writers cannot both evict and both believe
    /// they have room.
    pub fn set(&self, key: &str, value: V, ttl: Option<Duration>) {
        let size = (self.size_of)(&value);
        let ttl = ttl.unwrap_or(self.config.default_ttl);
        let now = Instant::now();

        let mut store = self.store.lock();

        // An overwrite frees its old footprint before capacity accounting
        store.remove(key);
        self.ensure_capacity(&mut store, size);

        let seq = store.next_seq;
        store.next_seq += 1;
        store.memory_used += size;
        store.entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                created_at: now,
                ttl,
                last_accessed: now,
                access_count: 0,
                size,
                seq,
            },
        );
    }

    /// Get the cached value for `key`, or run `compute` once, cache its
    /// result, and return it.
    ///
    /// Concurrent misses for the same key are coalesced: one caller runs
    /// `compute` while the rest wait and then read the cached value. Errors
    /// from `compute` are propagated and nothing is cached.
    pub async fn get_or_compute<F, Fut>(
        &self,
        key: &str,
        ttl: Option<Duration>,
        compute: F,
    ) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>>,
    {
        if let Some(value) = self.get(key) {
            return Ok(value);
        }

        let gate = self
            .inflight
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        let guard = gate.lock().await;

        // A winner may have populated the key while we waited on the gate
        if let Some(value) = self.get(key) {
            drop(guard);
            self.inflight.remove(key);
            return Ok(value);
        }

        let outcome = compute().await;
        if let Ok(value) = &outcome {
            self.set(key, value.clone(), ttl);
        }
        drop(guard);
        self.inflight.remove(key);
        outcome
    }

    /// Remove a key. Returns whether it was present.
    pub fn delete(&self, key: &str) -> bool {
        self.store.lock().remove(key).is_some()
    }

    /// Remove every entry
    pub fn clear(&self) {
        let mut store = self.store.lock();
        store.entries.clear();
        store.memory_used = 0;
        debug!(cache = %self.name, "cache cleared");
    }

    /// Remove entries whose key matches `predicate`. Returns the count.
    pub fn invalidate_matching<P>(&self, predicate: P) -> usize
    where
        P: Fn(&str) -> bool,
    {
        let mut store = self.store.lock();
        let matching: Vec<String> = store
            .entries
            .keys()
            .filter(|key| predicate(key))
            .cloned()
            .collect();

        for key in &matching {
            store.remove(key);
        }

        if !matching.is_empty() {
            debug!(cache = %self.name, count = matching.len(), "entries invalidated");
        }
        matching.len()
    }

    /// Remove every expired entry (active sweep)
    pub fn evict_expired(&self) {
        let now = Instant::now();
        let mut store = self.store.lock();

        let expired: Vec<String> = store
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            store.remove(key);
        }

        if !expired.is_empty() {
            self.counters
                .evictions
                .fetch_add(expired.len() as u64, Ordering::Relaxed);
            debug!(cache = %self.name, count = expired.len(), "expired entries swept");
        }
    }

    /// Read-only metrics snapshot
    #[must_use]
    pub fn metrics(&self) -> CacheMetrics {
        let (entry_count, memory_bytes) = {
            let store = self.store.lock();
            (store.entries.len(), store.memory_used)
        };

        let hits = self.counters.hits.load(Ordering::Relaxed);
        let requests = self.counters.requests.load(Ordering::Relaxed);

        #[allow(clippy::cast_precision_loss)]
        let hit_rate = if requests == 0 {
            0.0
        } else {
            hits as f64 / requests as f64
        };

        CacheMetrics {
            name: self.name.clone(),
            hits,
            misses: self.counters.misses.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            total_requests: requests,
            hit_rate,
            entry_count,
            memory_bytes,
        }
    }

    /// Evict least-recently-accessed entries until `incoming` bytes fit under
    /// the memory budget, then free one more slot if the entry count budget
    /// would overflow. Caller holds the store lock.
    fn ensure_capacity(&self, store: &mut CacheStore<V>, incoming: usize) {
        let mut evicted = 0u64;

        while store.memory_used + incoming > self.config.max_memory {
            let Some(key) = store.lru_key() else { break };
            store.remove(&key);
            evicted += 1;
        }

        if store.entries.len() >= self.config.max_entries {
            if let Some(key) = store.lru_key() {
                store.remove(&key);
                evicted += 1;
            }
        }

        if evicted > 0 {
            self.counters.evictions.fetch_add(evicted, Ordering::Relaxed);
            debug!(cache = %self.name, count = evicted, "entries evicted for capacity");
        }
    }
}

impl<V: Clone + Send + Sync + 'static> BoundedCache<V> {
    /// Spawn a background task sweeping expired entries every
    /// `sweep_interval`. The task holds only a weak reference and exits once
    /// the cache is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let cache = Arc::downgrade(self);
        let interval = self.config.sweep_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // First tick fires immediately; skip it
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let Some(cache) = cache.upgrade() else { break };
                cache.evict_expired();
            }
        })
    }
}

/// Aggregate cache metrics snapshot
#[derive(Debug, Clone, Serialize)]
pub struct CacheMetrics {
    /// Cache name
    pub name: String,
    /// Reads served from the cache
    pub hits: u64,
    /// Reads that found nothing (absent or expired)
    pub misses: u64,
    /// Entries removed by expiry or capacity pressure
    pub evictions: u64,
    /// Total reads
    pub total_requests: u64,
    /// hits / total requests (0.0-1.0)
    pub hit_rate: f64,
    /// Current number of entries
    pub entry_count: usize,
    /// Current estimated memory usage in bytes
    pub memory_bytes: usize,
}
