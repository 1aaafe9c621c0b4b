//! Named circuit breaker registry
//!
//! Owns one lazily created breaker per dependency name. Constructed once at
//! process start and passed by reference to whatever needs it; there is no
//! global instance.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::info;

use super::{BreakerStatus, CircuitBreaker};
use crate::config::CircuitBreakerConfig;

/// Registry of named circuit breakers, lazily created on first reference
pub struct CircuitBreakerRegistry {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    default_config: CircuitBreakerConfig,
}

impl CircuitBreakerRegistry {
    /// Create a registry that applies `default_config` to new breakers
    #[must_use]
    pub fn new(default_config: CircuitBreakerConfig) -> Self {
        Self {
            breakers: DashMap::new(),
            default_config,
        }
    }

    /// Get the breaker for `name`, creating it with the registry default
    /// config if absent. Creation is idempotent under concurrent
    /// first-access: exactly one instance per name, ever.
    #[must_use]
    pub fn get(&self, name: &str) -> Arc<CircuitBreaker> {
        self.get_with(name, &self.default_config)
    }

    /// Get the breaker for `name`, creating it with `config` if absent.
    ///
    /// The config only applies on creation; an existing breaker keeps its
    /// original configuration.
    #[must_use]
    pub fn get_with(&self, name: &str, config: &CircuitBreakerConfig) -> Arc<CircuitBreaker> {
        // DashMap's entry API holds the shard lock across the closure, so
        // concurrent first-access races construct exactly one breaker.
        self.breakers
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(name, config)))
            .clone()
    }

    /// Status snapshots for every breaker
    #[must_use]
    pub fn all_statuses(&self) -> Vec<BreakerStatus> {
        self.breakers
            .iter()
            .map(|entry| entry.value().status())
            .collect()
    }

    /// Names of breakers currently closed
    #[must_use]
    pub fn healthy_names(&self) -> Vec<String> {
        self.breakers
            .iter()
            .filter(|entry| entry.value().status().is_healthy)
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Names of breakers currently open or half-open
    #[must_use]
    pub fn unhealthy_names(&self) -> Vec<String> {
        self.breakers
            .iter()
            .filter(|entry| !entry.value().status().is_healthy)
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Administrative override: reset every breaker to closed
    pub fn reset_all(&self) {
        for entry in &self.breakers {
            entry.value().reset();
        }
        info!(count = self.breakers.len(), "all circuit breakers reset");
    }

    /// Number of breakers created so far
    #[must_use]
    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    /// Whether no breaker has been created yet
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}
