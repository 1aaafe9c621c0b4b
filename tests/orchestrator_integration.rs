//! Fallback orchestrator integration tests - the full escalation ladder

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use failsafe_core::orchestrator::{EMERGENCY_CONFIDENCE, SYNTHETIC_CONFIDENCE};
use failsafe_core::{
    BoundedCache, CacheConfig, CircuitBreakerRegistry, Error, FallbackOrchestrator, FallbackTier,
    OrchestratorConfig, Resolution, TierUsed,
};

/// Stand-in for a crawl/query payload
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
struct Snapshot {
    content: String,
    quality: u32,
}

fn make_orchestrator(
    breakers: &Arc<CircuitBreakerRegistry>,
) -> FallbackOrchestrator<Snapshot> {
    let cache: Arc<BoundedCache<Resolution<Snapshot>>> =
        Arc::new(BoundedCache::new("resolutions", CacheConfig::default()));
    FallbackOrchestrator::new(
        Arc::clone(breakers),
        cache,
        OrchestratorConfig::default(),
        |target: &str| Snapshot {
            content: format!("synthetic profile for {target}"),
            quality: 10,
        },
    )
}

fn counting_tier(
    name: &str,
    priority: u32,
    quality: f64,
    calls: &Arc<AtomicUsize>,
) -> FallbackTier<Snapshot> {
    let calls = Arc::clone(calls);
    FallbackTier::new(
        name,
        priority,
        Duration::from_secs(1),
        quality,
        move |target: String| {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(Snapshot {
                    content: format!("fetched {target}"),
                    quality: 90,
                })
            }
        },
    )
}

fn failing_tier(name: &str, priority: u32) -> FallbackTier<Snapshot> {
    FallbackTier::new(
        name,
        priority,
        Duration::from_secs(1),
        0.5,
        |_target: String| async {
            Err::<Snapshot, _>(Error::Internal("upstream 500".to_string()))
        },
    )
}

fn slow_tier(name: &str, priority: u32, timeout: Duration) -> FallbackTier<Snapshot> {
    FallbackTier::new(name, priority, timeout, 0.9, |_target: String| async {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(Snapshot::default())
    })
}

#[tokio::test]
async fn test_empty_tier_list_returns_synthetic() {
    let breakers = Arc::new(CircuitBreakerRegistry::default());
    let orchestrator = make_orchestrator(&breakers);
    let cancel = CancellationToken::new();

    let resolution = orchestrator
        .resolve("https://example.com", &[], &cancel)
        .await;

    assert_eq!(resolution.tier_used, TierUsed::Synthetic);
    assert!((resolution.confidence - SYNTHETIC_CONFIDENCE).abs() < f64::EPSILON);
    assert!(resolution.payload.content.contains("example.com"));
    assert!(!resolution.cached);
    assert!(resolution.error.is_none());

    // Synthetic construction is deterministic for the same target
    let again = orchestrator
        .resolve("https://example.com", &[], &cancel)
        .await;
    assert_eq!(again.payload, resolution.payload);
}

#[tokio::test]
async fn test_second_resolve_served_from_cache() {
    let breakers = Arc::new(CircuitBreakerRegistry::default());
    let orchestrator = make_orchestrator(&breakers);
    let cancel = CancellationToken::new();

    let calls = Arc::new(AtomicUsize::new(0));
    let tiers = vec![counting_tier("crawl", 1, 0.9, &calls)];

    let first = orchestrator
        .resolve("https://example.com", &tiers, &cancel)
        .await;
    assert_eq!(first.tier_used, TierUsed::Tier("crawl".to_string()));
    assert!((first.confidence - 0.9).abs() < f64::EPSILON);
    assert!(!first.cached);

    let second = orchestrator
        .resolve("https://example.com", &tiers, &cancel)
        .await;
    assert!(second.cached);
    assert_eq!(second.tier_used, TierUsed::Tier("crawl".to_string()));
    assert_eq!(second.payload, first.payload);

    // The underlying strategy ran exactly once
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_degrades_through_tiers_to_synthetic() {
    let breakers = Arc::new(CircuitBreakerRegistry::default());
    let orchestrator = make_orchestrator(&breakers);
    let cancel = CancellationToken::new();

    // fast: always slower than its 10ms budget; medium: fails outright
    let tiers = vec![
        slow_tier("fast", 1, Duration::from_millis(10)),
        failing_tier("medium", 2),
    ];

    let resolution = orchestrator
        .resolve("https://example.com", &tiers, &cancel)
        .await;

    assert_eq!(resolution.tier_used, TierUsed::Synthetic);
    assert!(resolution.elapsed < Duration::from_millis(100));

    // Both attempts were recorded against their breakers
    assert_eq!(breakers.get("fast").status().consecutive_failures, 1);
    assert_eq!(breakers.get("medium").status().consecutive_failures, 1);
}

#[tokio::test]
async fn test_falls_through_to_next_tier_on_failure() {
    let breakers = Arc::new(CircuitBreakerRegistry::default());
    let orchestrator = make_orchestrator(&breakers);
    let cancel = CancellationToken::new();

    let calls = Arc::new(AtomicUsize::new(0));
    let tiers = vec![
        failing_tier("primary", 1),
        counting_tier("backup", 2, 0.6, &calls),
    ];

    let resolution = orchestrator
        .resolve("https://example.com", &tiers, &cancel)
        .await;

    assert_eq!(resolution.tier_used, TierUsed::Tier("backup".to_string()));
    assert!((resolution.confidence - 0.6).abs() < f64::EPSILON);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_priority_overrides_declaration_order() {
    let breakers = Arc::new(CircuitBreakerRegistry::default());
    let orchestrator = make_orchestrator(&breakers);
    let cancel = CancellationToken::new();

    let first_calls = Arc::new(AtomicUsize::new(0));
    let second_calls = Arc::new(AtomicUsize::new(0));
    // Declared out of order; priority decides
    let tiers = vec![
        counting_tier("second", 2, 0.5, &second_calls),
        counting_tier("first", 1, 0.9, &first_calls),
    ];

    let resolution = orchestrator
        .resolve("https://example.com", &tiers, &cancel)
        .await;

    assert_eq!(resolution.tier_used, TierUsed::Tier("first".to_string()));
    assert_eq!(first_calls.load(Ordering::SeqCst), 1);
    assert_eq!(second_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_open_breaker_skips_tier_without_invoking() {
    let breakers = Arc::new(CircuitBreakerRegistry::default());
    let orchestrator = make_orchestrator(&breakers);
    let cancel = CancellationToken::new();

    breakers.get("flaky").force_open();

    let calls = Arc::new(AtomicUsize::new(0));
    let tiers = vec![counting_tier("flaky", 1, 0.9, &calls)];

    let resolution = orchestrator
        .resolve("https://example.com", &tiers, &cancel)
        .await;

    assert_eq!(resolution.tier_used, TierUsed::Synthetic);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_repeated_failures_open_tier_breaker() {
    let breakers = Arc::new(CircuitBreakerRegistry::default());
    let orchestrator = make_orchestrator(&breakers);
    let cancel = CancellationToken::new();

    let tiers = vec![failing_tier("primary", 1)];

    // Default failure threshold is 3; distinct targets avoid the cache
    for i in 0..3 {
        let resolution = orchestrator
            .resolve(&format!("https://example-{i}.com"), &tiers, &cancel)
            .await;
        assert_eq!(resolution.tier_used, TierUsed::Synthetic);
    }
    assert!(!breakers.get("primary").status().is_healthy);

    // Next resolution skips the tier entirely
    let resolution = orchestrator
        .resolve("https://example-3.com", &tiers, &cancel)
        .await;
    assert_eq!(resolution.tier_used, TierUsed::Synthetic);
}

#[tokio::test]
async fn test_disabled_tier_is_skipped() {
    let breakers = Arc::new(CircuitBreakerRegistry::default());
    let orchestrator = make_orchestrator(&breakers);
    let cancel = CancellationToken::new();

    let calls = Arc::new(AtomicUsize::new(0));
    let tiers = vec![counting_tier("headless-browser", 1, 0.95, &calls).disabled()];

    let resolution = orchestrator
        .resolve("https://example.com", &tiers, &cancel)
        .await;

    assert_eq!(resolution.tier_used, TierUsed::Synthetic);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    // A disabled tier never touches its breaker
    assert!(breakers.is_empty());
}

#[tokio::test]
async fn test_pre_cancelled_token_short_circuits() {
    let breakers = Arc::new(CircuitBreakerRegistry::default());
    let orchestrator = make_orchestrator(&breakers);

    let cancel = CancellationToken::new();
    cancel.cancel();

    let calls = Arc::new(AtomicUsize::new(0));
    let tiers = vec![counting_tier("crawl", 1, 0.9, &calls)];

    let resolution = orchestrator
        .resolve("https://example.com", &tiers, &cancel)
        .await;

    assert_eq!(resolution.tier_used, TierUsed::Cancelled);
    assert_eq!(resolution.confidence, 0.0);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_abandons_in_flight_attempt() {
    let breakers = Arc::new(CircuitBreakerRegistry::default());
    let orchestrator = make_orchestrator(&breakers);
    let cancel = CancellationToken::new();

    let tiers = vec![slow_tier("slow", 1, Duration::from_secs(3600))];

    let (resolution, ()) = tokio::join!(
        orchestrator.resolve("https://example.com", &tiers, &cancel),
        async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            cancel.cancel();
        }
    );

    assert_eq!(resolution.tier_used, TierUsed::Cancelled);
    // The abandoned attempt was not recorded as a breaker failure
    assert_eq!(breakers.get("slow").status().consecutive_failures, 0);
}

#[tokio::test]
async fn test_synthesizer_panic_yields_emergency() {
    let breakers = Arc::new(CircuitBreakerRegistry::default());
    let cache: Arc<BoundedCache<Resolution<Snapshot>>> =
        Arc::new(BoundedCache::new("resolutions", CacheConfig::default()));
    let orchestrator: FallbackOrchestrator<Snapshot> = FallbackOrchestrator::new(
        Arc::clone(&breakers),
        cache,
        OrchestratorConfig::default(),
        |_target: &str| panic!("defect in synthetic construction"),
    );
    let cancel = CancellationToken::new();

    let resolution = orchestrator
        .resolve("https://example.com", &[], &cancel)
        .await;

    assert_eq!(resolution.tier_used, TierUsed::Emergency);
    assert!((resolution.confidence - EMERGENCY_CONFIDENCE).abs() < f64::EPSILON);
    assert_eq!(resolution.payload, Snapshot::default());
    assert_eq!(
        resolution.error.as_deref(),
        Some("defect in synthetic construction")
    );
}

#[tokio::test]
async fn test_dashboard_snapshots() {
    let breakers = Arc::new(CircuitBreakerRegistry::default());
    let orchestrator = make_orchestrator(&breakers);
    let cancel = CancellationToken::new();

    let calls = Arc::new(AtomicUsize::new(0));
    let tiers = vec![counting_tier("crawl", 1, 0.9, &calls)];

    orchestrator
        .resolve("https://example.com", &tiers, &cancel)
        .await;
    orchestrator
        .resolve("https://example.com", &tiers, &cancel)
        .await;

    let statuses = orchestrator.breaker_statuses();
    assert_eq!(statuses.len(), 1);
    assert!(statuses[0].is_healthy);

    let metrics = orchestrator.cache_metrics();
    assert_eq!(metrics.hits, 1);
    assert_eq!(metrics.entry_count, 1);
}
