use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use smart_heating::resilience::{
    BreakerConfig, BreakerError, BreakerEvent, BreakerEventSink, BreakerRegistry, CircuitBreaker, CircuitState,
    DependencyHealth, RecentEvents,
};
use tokio_util::sync::CancellationToken;

async fn fail(breaker: &CircuitBreaker) -> Result<(), BreakerError<String>> {
    breaker.execute(|| async { Err("connection refused".to_string()) }).await
}

#[tokio::test(start_paused = true)]
async fn test_monitor_half_opens_and_trial_recovers() {
    let events = Arc::new(RecentEvents::new(32));
    let sink: Arc<dyn BreakerEventSink> = events.clone();
    let registry = Arc::new(BreakerRegistry::new(BreakerConfig::default(), Some(sink)).unwrap());
    let prices = registry.get("prices");

    for _ in 0..5 {
        let _ = fail(&prices).await;
    }
    assert_eq!(prices.state(), CircuitState::Open);
    assert_eq!(registry.overall_health(), DependencyHealth::Disconnected);

    let cancel = CancellationToken::new();
    let monitor = registry.spawn_monitor(cancel.clone());
    tokio::time::sleep(Duration::from_secs(36)).await;
    assert_eq!(prices.state(), CircuitState::HalfOpen);

    let value: Result<u32, BreakerError<String>> = prices.execute(|| async { Ok(42) }).await;
    assert_eq!(value.unwrap(), 42);
    assert_eq!(prices.state(), CircuitState::Closed);
    assert!(registry.all_closed());

    let newest = &events.recent(1)[0].event;
    assert!(matches!(
        newest,
        BreakerEvent::StateChanged { from: CircuitState::HalfOpen, to: CircuitState::Closed, .. }
    ));
    assert!(events.recent(32).iter().any(|e| matches!(
        e.event,
        BreakerEvent::StateChanged { to: CircuitState::Open, .. }
    )));

    cancel.cancel();
    monitor.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_open_circuit_never_invokes_operation() {
    let breaker = CircuitBreaker::new("device", BreakerConfig::default());
    for _ in 0..5 {
        let _ = fail(&breaker).await;
    }

    let invoked = AtomicUsize::new(0);
    for _ in 0..10 {
        let result: Result<(), BreakerError<String>> = breaker
            .execute(|| async {
                invoked.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;
        match result {
            Err(BreakerError::Open { name, retry_in }) => {
                assert_eq!(name, "device");
                assert!(retry_in <= Duration::from_secs(30));
            }
            other => panic!("expected open circuit, got {other:?}"),
        }
    }
    assert_eq!(invoked.load(Ordering::SeqCst), 0);
    assert_eq!(breaker.stats().rejected_calls, 10);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_callers_share_one_breaker() {
    let breaker = Arc::new(CircuitBreaker::new("weather", BreakerConfig::default()));
    let handles: Vec<_> = (0..20)
        .map(|_| {
            let breaker = breaker.clone();
            tokio::spawn(async move { fail(&breaker).await })
        })
        .collect();

    let mut rejected = 0;
    for handle in handles {
        if let Err(BreakerError::Open { .. }) = handle.await.unwrap() {
            rejected += 1;
        }
    }

    let stats = breaker.stats();
    assert_eq!(stats.state, CircuitState::Open);
    assert_eq!(stats.total_failures + rejected as u64, 20);
    assert!(stats.total_failures >= 5);
}

#[tokio::test(start_paused = true)]
async fn test_failed_trial_restarts_cooldown() {
    let breaker = CircuitBreaker::new("prices", BreakerConfig::default());
    for _ in 0..5 {
        let _ = fail(&breaker).await;
    }
    tokio::time::advance(Duration::from_secs(30)).await;
    assert!(matches!(fail(&breaker).await, Err(BreakerError::Operation(_))));
    assert_eq!(breaker.state(), CircuitState::Open);

    tokio::time::advance(Duration::from_secs(29)).await;
    assert!(fail(&breaker).await.unwrap_err().is_open());
}
