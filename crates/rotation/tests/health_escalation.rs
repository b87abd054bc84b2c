//! Health probe escalation tests.
//!
//! Covers the failure threshold, immediate rotation on authentication
//! failures, exhaustion of the attempt budget and its explicit reset.

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use tidepool_rotation::testing::{InMemorySecretStore, MockPoolFactory};
use tidepool_rotation::{
    ProbeError, RotationConfig, RotationOutcome, RotationService, RotationState, SecretStore,
};

// ---------------------------------------------------------------------------
// Test helpers
// ---------------------------------------------------------------------------

const PATH: &str = "database/creds/payments-app";

fn connectivity() -> ProbeError {
    ProbeError::classify(Some(2003), "Can't connect to MySQL server")
}

fn access_denied() -> ProbeError {
    ProbeError::classify(Some(1045), "Access denied for user 'v-token-1'@'%'")
}

async fn service() -> (
    Arc<RotationService<MockPoolFactory>>,
    MockPoolFactory,
    Arc<InMemorySecretStore>,
) {
    let config = RotationConfig {
        eviction_grace: Duration::from_millis(10),
        ..RotationConfig::default()
    };
    let factory = MockPoolFactory::new();
    let store = Arc::new(InMemorySecretStore::with_issued(PATH));
    let service = RotationService::build(
        config,
        factory.clone(),
        Arc::clone(&store) as Arc<dyn SecretStore>,
    )
    .await
    .expect("service should build");
    (Arc::new(service), factory, store)
}

// ---------------------------------------------------------------------------
// Threshold
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn second_consecutive_failure_triggers_one_rotation() {
    let (service, factory, store) = service().await;
    let monitor = service.monitor();

    factory.push_probe(Err(connectivity()));
    assert!(!monitor.probe_once().await);
    assert_eq!(store.request_count(), 0);
    assert_eq!(service.status().consecutive_failures, 1);

    factory.push_probe(Err(connectivity()));
    assert!(!monitor.probe_once().await);

    assert_eq!(store.request_count(), 1);
    assert_eq!(factory.builds(), 2);
    assert_eq!(service.manager().current_identity().as_str(), "v-token-2");
    let status = service.status();
    assert_eq!(status.consecutive_failures, 0);
    assert_eq!(status.state, RotationState::Idle);
    assert_eq!(status.attempt_count, 1);
}

#[tokio::test(start_paused = true)]
async fn success_between_failures_resets_the_count() {
    let (service, factory, store) = service().await;
    let monitor = service.monitor();

    factory.push_probe(Err(connectivity()));
    monitor.probe_once().await;
    assert!(monitor.probe_once().await);
    factory.push_probe(Err(connectivity()));
    monitor.probe_once().await;

    assert_eq!(store.request_count(), 0);
    assert_eq!(service.status().consecutive_failures, 1);
}

#[tokio::test(start_paused = true)]
async fn third_failure_during_rotation_is_a_no_op() {
    let (service, factory, store) = service().await;
    factory.set_build_delay(Duration::from_secs(5));

    factory.push_probe(Err(connectivity()));
    factory.push_probe(Err(connectivity()));
    let escalating = {
        let service = Arc::clone(&service);
        tokio::spawn(async move {
            service.monitor().probe_once().await;
            service.monitor().probe_once().await;
        })
    };

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(service.status().state, RotationState::InProgress);

    factory.push_probe(Err(connectivity()));
    assert!(!service.monitor().probe_once().await);
    assert_eq!(service.status().consecutive_failures, 3);

    escalating.await.expect("probe task should not panic");
    assert_eq!(store.request_count(), 1);
    assert_eq!(factory.builds(), 2);
    assert_eq!(service.status().attempt_count, 1);
}

// ---------------------------------------------------------------------------
// Authentication failures
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn access_denied_rotates_immediately() {
    let (service, factory, store) = service().await;

    factory.push_probe(Err(access_denied()));
    assert!(!service.monitor().probe_once().await);

    assert_eq!(store.request_count(), 1);
    assert_eq!(factory.builds(), 2);
    assert_eq!(service.status().consecutive_failures, 0);
}

#[tokio::test(start_paused = true)]
async fn probe_timeout_counts_as_generic_failure() {
    let (service, factory, store) = service().await;
    factory.push_probe(Err(ProbeError::Timeout {
        timeout: Duration::from_secs(3),
    }));

    service.monitor().probe_once().await;

    assert_eq!(store.request_count(), 0);
    assert_eq!(service.status().consecutive_failures, 1);
}

// ---------------------------------------------------------------------------
// Exhaustion
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn failed_rebuilds_exhaust_then_reset_reopens() {
    let (service, factory, store) = service().await;
    let monitor = service.monitor();

    // Attempt 1 succeeds.
    factory.push_probe(Err(connectivity()));
    monitor.probe_once().await;
    factory.push_probe(Err(connectivity()));
    monitor.probe_once().await;
    assert_eq!(service.status().consecutive_failures, 0);
    assert_eq!(service.status().state, RotationState::Idle);
    let installed = service.current();

    // Every further rotation fails to build a pool.
    factory.fail_builds(true);
    factory.set_default_probe(Err(connectivity()));
    let mut probes = 0;
    while service.status().state != RotationState::Exhausted {
        monitor.probe_once().await;
        probes += 1;
        assert!(probes < 50, "gate never exhausted");
    }

    let status = service.status();
    assert_eq!(status.attempt_count, 6);
    assert_eq!(store.request_count(), 5);
    assert!(Arc::ptr_eq(&installed, &service.current()));

    // Further failures trigger nothing.
    for _ in 0..4 {
        monitor.probe_once().await;
    }
    assert_eq!(store.request_count(), 5);
    assert_eq!(service.status().attempt_count, 6);
    assert!(matches!(
        service.trigger_manual_rotation().await,
        RotationOutcome::Skipped(_)
    ));

    // Only an explicit reset re-opens the gate.
    assert_eq!(service.reset_attempts(), RotationState::Exhausted);
    factory.fail_builds(false);
    factory.set_default_probe(Ok(()));
    assert!(service.trigger_manual_rotation().await.is_completed());
    assert_eq!(store.request_count(), 6);
    assert_eq!(service.status().attempt_count, 1);
}

// ---------------------------------------------------------------------------
// Stuck gate recovery
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn healthy_probe_only_clears_a_gate_past_its_deadline() {
    let (service, _factory, _store) = service().await;
    let gate = Arc::clone(&service.coordinator().context().gate);

    let permit = gate.try_enter().expect("gate should be idle");
    assert!(service.monitor().probe_once().await);
    assert_eq!(gate.state(), RotationState::InProgress);

    tokio::time::advance(service.config().rotation_deadline).await;
    assert!(service.monitor().probe_once().await);
    assert_eq!(gate.state(), RotationState::Idle);

    // The late leave belongs to a released epoch.
    assert_eq!(permit.leave(true), None);
    assert_eq!(gate.state(), RotationState::Idle);
}
