//! Error types for the resilience core

use std::time::Duration;

use thiserror::Error;

/// Result type alias for the resilience core
pub type Result<T> = std::result::Result<T, Error>;

/// Resilience core errors
#[derive(Error, Debug)]
pub enum Error {
    /// Circuit breaker is rejecting calls
    #[error("circuit breaker '{0}' is open")]
    CircuitOpen(String),

    /// A fallback tier exceeded its allotted duration
    #[error("tier '{tier}' timed out after {timeout:?}")]
    TierTimeout {
        /// Tier name
        tier: String,
        /// Configured timeout
        timeout: Duration,
    },

    /// The wrapped strategy itself returned an error
    #[error("tier '{tier}' strategy failed: {message}")]
    StrategyFailed {
        /// Tier name
        tier: String,
        /// Underlying failure description
        message: String,
    },

    /// Every configured tier failed or was rejected.
    ///
    /// Internal signal only: `FallbackOrchestrator::resolve` absorbs it and
    /// returns a synthetic resolution instead.
    #[error("all fallback tiers exhausted")]
    AllTiersExhausted,

    /// The caller's cancellation token fired
    #[error("resolution cancelled")]
    Cancelled,

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the orchestrator should keep trying further tiers after this
    /// error. Cancellation is terminal; everything else degrades.
    #[must_use]
    pub fn is_degradable(&self) -> bool {
        !matches!(self, Self::Cancelled)
    }
}
