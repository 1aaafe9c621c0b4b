//! Named cache registry with aggregate metrics
//!
//! Mirrors the circuit breaker registry: one lazily created cache per name,
//! constructed explicitly and passed by reference rather than held as global
//! state.

use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use tracing::info;

use super::{BoundedCache, CacheMetrics};
use crate::config::CacheConfig;

/// Registry of named bounded caches sharing one value type
pub struct CacheRegistry<V> {
    caches: DashMap<String, Arc<BoundedCache<V>>>,
    default_config: CacheConfig,
}

impl<V: Clone + Serialize> CacheRegistry<V> {
    /// Create a registry that applies `default_config` to new caches
    #[must_use]
    pub fn new(default_config: CacheConfig) -> Self {
        Self {
            caches: DashMap::new(),
            default_config,
        }
    }

    /// Get the cache for `name`, creating it with the registry default
    /// config if absent. Exactly one instance per name, ever.
    #[must_use]
    pub fn get(&self, name: &str) -> Arc<BoundedCache<V>> {
        self.get_with(name, &self.default_config)
    }

    /// Get the cache for `name`, creating it with `config` if absent.
    ///
    /// The config only applies on creation; an existing cache keeps its
    /// original configuration.
    #[must_use]
    pub fn get_with(&self, name: &str, config: &CacheConfig) -> Arc<BoundedCache<V>> {
        self.caches
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(BoundedCache::new(name, config.clone())))
            .clone()
    }

    /// Metrics snapshot per cache
    #[must_use]
    pub fn all_metrics(&self) -> Vec<CacheMetrics> {
        self.caches
            .iter()
            .map(|entry| entry.value().metrics())
            .collect()
    }

    /// Metrics summed across every named cache
    #[must_use]
    pub fn aggregate_metrics(&self) -> CacheMetrics {
        let mut total = CacheMetrics {
            name: "aggregate".to_string(),
            hits: 0,
            misses: 0,
            evictions: 0,
            total_requests: 0,
            hit_rate: 0.0,
            entry_count: 0,
            memory_bytes: 0,
        };

        for entry in &self.caches {
            let metrics = entry.value().metrics();
            total.hits += metrics.hits;
            total.misses += metrics.misses;
            total.evictions += metrics.evictions;
            total.total_requests += metrics.total_requests;
            total.entry_count += metrics.entry_count;
            total.memory_bytes += metrics.memory_bytes;
        }

        #[allow(clippy::cast_precision_loss)]
        if total.total_requests > 0 {
            total.hit_rate = total.hits as f64 / total.total_requests as f64;
        }
        total
    }

    /// Clear every named cache
    pub fn clear_all(&self) {
        for entry in &self.caches {
            entry.value().clear();
        }
        info!(count = self.caches.len(), "all caches cleared");
    }

    /// Number of caches created so far
    #[must_use]
    pub fn len(&self) -> usize {
        self.caches.len()
    }

    /// Whether no cache has been created yet
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.caches.is_empty()
    }
}

impl<V: Clone + Serialize> Default for CacheRegistry<V> {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lazy_creation_returns_same_instance() {
        let registry: CacheRegistry<u32> = CacheRegistry::default();

        let a = registry.get("crawl");
        let b = registry.get("crawl");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_aggregate_metrics() {
        let registry: CacheRegistry<u32> = CacheRegistry::default();

        let crawl = registry.get("crawl");
        let llm = registry.get("llm");

        crawl.set("a", 1, None);
        crawl.get("a");
        crawl.get("missing");
        llm.set("b", 2, None);
        llm.get("b");

        let total = registry.aggregate_metrics();
        assert_eq!(total.hits, 2);
        assert_eq!(total.misses, 1);
        assert_eq!(total.total_requests, 3);
        assert_eq!(total.entry_count, 2);
        assert!(total.memory_bytes > 0);
    }

    #[test]
    fn test_clear_all() {
        let registry: CacheRegistry<u32> = CacheRegistry::default();
        registry.get("a").set("k", 1, None);
        registry.get("b").set("k", 2, None);

        registry.clear_all();

        assert_eq!(registry.aggregate_metrics().entry_count, 0);
    }
}
