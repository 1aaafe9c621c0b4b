//! Circuit breaker integration tests - per-dependency configuration

use std::sync::Arc;
use std::time::Duration;

use failsafe_core::config::CircuitBreakerConfig;
use failsafe_core::{CircuitBreaker, CircuitBreakerRegistry, CircuitState, Error};

#[test]
fn test_circuit_breaker_with_custom_config() {
    // Stricter configuration
    let custom_config = CircuitBreakerConfig {
        failure_threshold: 2, // Lower than default 3
        success_threshold: 4, // Higher than default 2
        recovery_timeout: Duration::from_secs(60),
    };

    let cb = CircuitBreaker::new("custom-dependency", &custom_config);

    // Should open after 2 failures (not default 3)
    cb.record_failure();
    assert!(cb.try_acquire().is_ok());

    cb.record_failure();
    assert!(cb.try_acquire().is_err());
}

#[test]
fn test_circuit_breaker_with_lenient_config() {
    // More lenient configuration for flaky dependencies
    let lenient_config = CircuitBreakerConfig {
        failure_threshold: 10,
        success_threshold: 2,
        recovery_timeout: Duration::from_secs(30),
    };

    let cb = CircuitBreaker::new("flaky-dependency", &lenient_config);

    // Still closed after 5 failures (default would open)
    for _ in 0..5 {
        cb.record_failure();
    }
    assert!(cb.try_acquire().is_ok());

    // Opens after 10 failures
    for _ in 0..5 {
        cb.record_failure();
    }
    assert!(cb.try_acquire().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_full_recovery_scenario() {
    let config = CircuitBreakerConfig {
        failure_threshold: 3,
        success_threshold: 2,
        recovery_timeout: Duration::from_secs(30),
    };
    let cb = CircuitBreaker::new("recovery-dependency", &config);

    // Feed 3 failures through execute
    for _ in 0..3 {
        let result: Result<(), _> = cb
            .execute(|| async { Err(Error::Internal("upstream 500".to_string())) })
            .await;
        assert!(result.is_err());
    }
    assert_eq!(cb.status().state, CircuitState::Open);

    // Rejected without invoking the wrapped function
    let mut invoked = false;
    let result = cb
        .execute(|| {
            invoked = true;
            async { Ok(()) }
        })
        .await;
    assert!(matches!(result, Err(Error::CircuitOpen(_))));
    assert!(!invoked);

    // Advance past the recovery timeout: the next call probes half-open
    tokio::time::advance(Duration::from_secs(31)).await;
    cb.execute(|| async { Ok(()) }).await.unwrap();
    assert_eq!(cb.status().state, CircuitState::HalfOpen);

    // Second success closes the circuit
    cb.execute(|| async { Ok(()) }).await.unwrap();
    assert_eq!(cb.status().state, CircuitState::Closed);
    assert!(cb.status().is_healthy);
}

#[test]
fn test_multiple_dependencies_independent_state() {
    let registry = CircuitBreakerRegistry::default();

    let crawl = registry.get("crawl");
    let llm = registry.get("llm");

    // Open the crawl breaker only
    for _ in 0..3 {
        crawl.record_failure();
    }

    assert!(crawl.try_acquire().is_err());
    assert!(llm.try_acquire().is_ok());

    let statuses = registry.all_statuses();
    assert_eq!(statuses.len(), 2);
    assert_eq!(registry.healthy_names(), vec!["llm".to_string()]);
    assert_eq!(registry.unhealthy_names(), vec!["crawl".to_string()]);
}

#[test]
fn test_registry_reset_all() {
    let registry = CircuitBreakerRegistry::default();
    registry.get("a").force_open();
    registry.get("b").force_open();

    assert_eq!(registry.unhealthy_names().len(), 2);

    registry.reset_all();
    assert!(registry.unhealthy_names().is_empty());
    assert_eq!(registry.get("a").state(), CircuitState::Closed);
}

#[tokio::test]
async fn test_concurrent_execute_same_breaker() {
    let registry = Arc::new(CircuitBreakerRegistry::default());

    let mut handles = Vec::new();
    for i in 0..8 {
        let registry = Arc::clone(&registry);
        handles.push(tokio::spawn(async move {
            let cb = registry.get("shared");
            cb.execute(|| async move { Ok(i) }).await
        }));
    }

    for handle in handles {
        assert!(handle.await.unwrap().is_ok());
    }

    assert_eq!(registry.len(), 1);
    assert!(registry.get("shared").status().is_healthy);
}
