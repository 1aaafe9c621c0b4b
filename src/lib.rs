//! Resilience core for evaluation agents
//!
//! Wraps every external call an evaluation agent makes (website fetch, LLM
//! query, search API) so the agent can never hard-fail:
//!
//! - **Circuit breakers**: per-dependency failure tracking that blocks calls
//!   to a failing service for a cooldown period, then probes recovery
//! - **Bounded caches**: typed key-value stores with per-entry TTL, LRU and
//!   memory-budget eviction, and hit/miss/eviction metrics
//! - **Fallback orchestration**: an ordered tier ladder that degrades from a
//!   high-quality strategy down to a deterministic synthetic result which is
//!   guaranteed to succeed
//!
//! The crate is an in-process library: no wire protocol, no CLI. The host
//! pipeline supplies targets, tier strategies, and a synthesizer; it gets
//! back a [`orchestrator::Resolution`] plus breaker/cache snapshots for its
//! dashboards. Degraded confidence communicates reliability instead of a
//! thrown error.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod breaker;
pub mod cache;
pub mod config;
pub mod error;
pub mod orchestrator;

pub use breaker::{BreakerStatus, CircuitBreaker, CircuitBreakerRegistry, CircuitState};
pub use cache::{BoundedCache, CacheMetrics, CacheRegistry};
pub use config::{CacheConfig, CircuitBreakerConfig, OrchestratorConfig};
pub use error::{Error, Result};
pub use orchestrator::{FallbackOrchestrator, FallbackTier, Resolution, TierUsed};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging for hosts that don't install their own subscriber
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => {
            subscriber.with(fmt::layer().json()).init();
        }
        _ => {
            subscriber.with(fmt::layer()).init();
        }
    }

    Ok(())
}
