//! Multi-tier fallback orchestration
//!
//! The orchestrator is the entry point an evaluation agent calls for any
//! external lookup. Given a target and an ordered list of strategies, it
//! checks its cache, tries each tier under its own circuit breaker and
//! timeout, and on exhaustion synthesizes a deterministic minimal-confidence
//! result. `resolve` returns a [`Resolution`] in every case; it has no error
//! path.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::breaker::{BreakerStatus, CircuitBreakerRegistry};
use crate::cache::{BoundedCache, CacheMetrics};
use crate::config::OrchestratorConfig;
use crate::error::{Error, Result};

/// Confidence annotated on synthetic resolutions
pub const SYNTHETIC_CONFIDENCE: f64 = 0.2;

/// Confidence annotated on emergency resolutions
pub const EMERGENCY_CONFIDENCE: f64 = 0.05;

/// Type-erased tier strategy: target in, payload out
type Strategy<T> = Arc<dyn Fn(String) -> BoxFuture<'static, Result<T>> + Send + Sync>;

/// One fallback strategy in the orchestrator's ordered list, backed by its
/// own circuit breaker
pub struct FallbackTier<T> {
    name: String,
    priority: u32,
    timeout: Duration,
    quality: f64,
    enabled: bool,
    strategy: Strategy<T>,
}

impl<T> FallbackTier<T> {
    /// Create a tier. `name` doubles as the tier's circuit breaker name;
    /// `priority` orders execution ascending; `quality` becomes the
    /// resolution confidence when this tier satisfies the request.
    pub fn new<F, Fut>(
        name: &str,
        priority: u32,
        timeout: Duration,
        quality: f64,
        strategy: F,
    ) -> Self
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        Self {
            name: name.to_string(),
            priority,
            timeout,
            quality,
            enabled: true,
            strategy: Arc::new(move |target| Box::pin(strategy(target))),
        }
    }

    /// Disable this tier (e.g. the headless-browser tier in a constrained
    /// runtime). Disabled tiers are skipped without touching their breaker.
    #[must_use]
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Set enablement from host configuration
    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Tier and breaker name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Execution order, ascending
    #[must_use]
    pub fn priority(&self) -> u32 {
        self.priority
    }

    /// Whether the tier participates in resolution
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

impl<T> Clone for FallbackTier<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            priority: self.priority,
            timeout: self.timeout,
            quality: self.quality,
            enabled: self.enabled,
            strategy: Arc::clone(&self.strategy),
        }
    }
}

impl<T> fmt::Debug for FallbackTier<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FallbackTier")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("timeout", &self.timeout)
            .field("quality", &self.quality)
            .field("enabled", &self.enabled)
            .finish_non_exhaustive()
    }
}

/// Which path produced a resolution
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TierUsed {
    /// A configured tier, by name
    Tier(String),
    /// Deterministic target-derived fallback after tier exhaustion
    Synthetic,
    /// Last-resort result after a defect in synthetic construction
    Emergency,
    /// The caller's cancellation token fired
    Cancelled,
}

impl fmt::Display for TierUsed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tier(name) => f.write_str(name),
            Self::Synthetic => f.write_str("synthetic"),
            Self::Emergency => f.write_str("emergency"),
            Self::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// Output of [`FallbackOrchestrator::resolve`]
#[derive(Debug, Clone, Serialize)]
pub struct Resolution<T> {
    /// Value produced by the satisfying tier, or the synthetic fallback
    pub payload: T,
    /// Which path satisfied the request
    pub tier_used: TierUsed,
    /// Confidence derived from the tier's quality score
    pub confidence: f64,
    /// Wall-clock duration of the whole resolution
    #[serde(with = "crate::config::humantime_serde")]
    pub elapsed: Duration,
    /// Whether the payload was served from cache
    pub cached: bool,
    /// Captured defect message, set on emergency resolutions only
    pub error: Option<String>,
}

/// Top-level resolution entry point for evaluation agents.
///
/// Holds injected breaker and cache instances (no global state) plus a
/// caller-supplied synthesizer: a deterministic, IO-free function producing a
/// minimal payload from the target alone. The synthesizer is what makes
/// `resolve` total.
pub struct FallbackOrchestrator<T> {
    breakers: Arc<CircuitBreakerRegistry>,
    cache: Arc<BoundedCache<Resolution<T>>>,
    config: OrchestratorConfig,
    synthesize: Arc<dyn Fn(&str) -> T + Send + Sync>,
}

impl<T> FallbackOrchestrator<T>
where
    T: Clone + Default + Send + 'static,
{
    /// Create an orchestrator from injected registries and a synthesizer
    pub fn new<S>(
        breakers: Arc<CircuitBreakerRegistry>,
        cache: Arc<BoundedCache<Resolution<T>>>,
        config: OrchestratorConfig,
        synthesize: S,
    ) -> Self
    where
        S: Fn(&str) -> T + Send + Sync + 'static,
    {
        Self {
            breakers,
            cache,
            config,
            synthesize: Arc::new(synthesize),
        }
    }

    /// Resolve `target` through the tier ladder. Never fails: every outcome,
    /// including tier exhaustion, a synthesizer defect, and cancellation, is
    /// reported as data in the returned [`Resolution`].
    pub async fn resolve(
        &self,
        target: &str,
        tiers: &[FallbackTier<T>],
        cancel: &CancellationToken,
    ) -> Resolution<T> {
        let started = Instant::now();

        if cancel.is_cancelled() {
            return self.cancelled_resolution(target, started);
        }

        let key = cache_key(target);
        if let Some(mut hit) = self.cache.get(&key) {
            hit.cached = true;
            hit.elapsed = started.elapsed();
            debug!(target, tier = %hit.tier_used, "resolution served from cache");
            return hit;
        }

        match self.attempt_tiers(target, &key, tiers, cancel, started).await {
            Ok(resolution) => resolution,
            Err(Error::Cancelled) => self.cancelled_resolution(target, started),
            Err(e) => {
                warn!(target, error = %e, "falling back to synthetic resolution");
                self.synthetic_resolution(target, started)
            }
        }
    }

    /// Try every enabled tier in ascending priority. Returns
    /// [`Error::AllTiersExhausted`] when none succeeds and
    /// [`Error::Cancelled`] when the caller's token fires.
    async fn attempt_tiers(
        &self,
        target: &str,
        key: &str,
        tiers: &[FallbackTier<T>],
        cancel: &CancellationToken,
        started: Instant,
    ) -> Result<Resolution<T>> {
        let mut ordered: Vec<&FallbackTier<T>> =
            tiers.iter().filter(|tier| tier.enabled).collect();
        ordered.sort_by_key(|tier| tier.priority);

        for tier in ordered {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let breaker = self.breakers.get_with(&tier.name, &self.config.tier_breaker);

            let tier_name = tier.name.clone();
            let tier_timeout = tier.timeout;
            let strategy_future = (tier.strategy)(target.to_string());
            let attempt = breaker.execute(move || async move {
                match tokio::time::timeout(tier_timeout, strategy_future).await {
                    Ok(Ok(value)) => Ok(value),
                    Ok(Err(e)) => Err(Error::StrategyFailed {
                        tier: tier_name,
                        message: e.to_string(),
                    }),
                    Err(_) => Err(Error::TierTimeout {
                        tier: tier_name,
                        timeout: tier_timeout,
                    }),
                }
            });

            tokio::select! {
                () = cancel.cancelled() => {
                    // In-flight attempt is dropped, nothing is recorded
                    debug!(target, tier = %tier.name, "tier attempt abandoned on cancellation");
                    return Err(Error::Cancelled);
                }
                outcome = attempt => match outcome {
                    Ok(payload) => {
                        let resolution = Resolution {
                            payload,
                            tier_used: TierUsed::Tier(tier.name.clone()),
                            confidence: tier.quality,
                            elapsed: started.elapsed(),
                            cached: false,
                            error: None,
                        };
                        self.cache
                            .set(key, resolution.clone(), Some(self.config.result_ttl));
                        info!(target, tier = %tier.name, "resolved via tier");
                        return Ok(resolution);
                    }
                    Err(Error::CircuitOpen(name)) => {
                        // The tier's breaker already recorded the history
                        // that opened it; not an orchestration failure.
                        debug!(target, tier = %name, "tier skipped, breaker open");
                    }
                    Err(e) => {
                        warn!(target, tier = %tier.name, error = %e, "tier failed");
                    }
                },
            }
        }

        Err(Error::AllTiersExhausted)
    }

    /// Step 3 of the ladder: deterministic, IO-free fallback. A panic in the
    /// caller-supplied synthesizer is a programming defect; it is caught and
    /// downgraded to an emergency resolution rather than propagated.
    fn synthetic_resolution(&self, target: &str, started: Instant) -> Resolution<T> {
        match catch_unwind(AssertUnwindSafe(|| (self.synthesize)(target))) {
            Ok(payload) => Resolution {
                payload,
                tier_used: TierUsed::Synthetic,
                confidence: SYNTHETIC_CONFIDENCE,
                elapsed: started.elapsed(),
                cached: false,
                error: None,
            },
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(target, message, "synthesizer panicked, emergency resolution");
                Resolution {
                    payload: T::default(),
                    tier_used: TierUsed::Emergency,
                    confidence: EMERGENCY_CONFIDENCE,
                    elapsed: started.elapsed(),
                    cached: false,
                    error: Some(message),
                }
            }
        }
    }

    fn cancelled_resolution(&self, target: &str, started: Instant) -> Resolution<T> {
        debug!(target, "resolution cancelled by caller");
        Resolution {
            payload: T::default(),
            tier_used: TierUsed::Cancelled,
            confidence: 0.0,
            elapsed: started.elapsed(),
            cached: false,
            error: None,
        }
    }

    /// Breaker snapshots for health dashboards
    #[must_use]
    pub fn breaker_statuses(&self) -> Vec<BreakerStatus> {
        self.breakers.all_statuses()
    }

    /// Resolution cache metrics
    #[must_use]
    pub fn cache_metrics(&self) -> CacheMetrics {
        self.cache.metrics()
    }
}

/// Cache key for a target: SHA-256 of the normalized form, so arbitrarily
/// long or strange URLs stay bounded and collision-safe
fn cache_key(target: &str) -> String {
    let normalized = target.trim().to_ascii_lowercase();
    let digest = Sha256::digest(normalized.as_bytes());
    format!("target:{digest:x}")
}

/// Best-effort extraction of a panic payload message
fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
