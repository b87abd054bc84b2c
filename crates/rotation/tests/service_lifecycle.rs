//! Service wiring: construction, diagnostics, request-path reporting and
//! shutdown.

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use rstest::rstest;
use tidepool_rotation::testing::{InMemorySecretStore, MockPoolFactory};
use tidepool_rotation::{
    ConfigError, Credentials, LeaseEvent, LeaseMode, ProbeError, RotationConfig, RotationError,
    RotationEvent, RotationService, RotationState, SecretStore, SecretStoreError,
};

// ---------------------------------------------------------------------------
// Test helpers
// ---------------------------------------------------------------------------

const PATH: &str = "database/creds/payments-app";

fn config() -> RotationConfig {
    RotationConfig {
        eviction_grace: Duration::from_millis(10),
        ..RotationConfig::default()
    }
}

async fn build(
    store: &Arc<InMemorySecretStore>,
) -> (Arc<RotationService<MockPoolFactory>>, MockPoolFactory) {
    let factory = MockPoolFactory::new();
    let service = RotationService::build(
        config(),
        factory.clone(),
        Arc::clone(store) as Arc<dyn SecretStore>,
    )
    .await
    .expect("service should build");
    (Arc::new(service), factory)
}

// ---------------------------------------------------------------------------
// Construction
// ---------------------------------------------------------------------------

#[tokio::test]
async fn invalid_config_is_rejected() {
    let store = Arc::new(InMemorySecretStore::with_issued(PATH));
    let err = RotationService::build(
        RotationConfig {
            failure_threshold: 0,
            ..config()
        },
        MockPoolFactory::new(),
        store as Arc<dyn SecretStore>,
    )
    .await
    .unwrap_err();

    assert!(matches!(
        err,
        RotationError::Config(ConfigError::InvalidValue { ref field, .. }) if field == "failure_threshold"
    ));
}

#[tokio::test]
async fn missing_initial_credentials_is_reported() {
    let store = Arc::new(InMemorySecretStore::new());
    let err = RotationService::build(config(), MockPoolFactory::new(), store as Arc<dyn SecretStore>)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        RotationError::SecretStore(SecretStoreError::NoCredentials { .. })
    ));
}

#[tokio::test]
async fn failed_initial_build_is_reported() {
    let store = Arc::new(InMemorySecretStore::with_issued(PATH));
    let factory = MockPoolFactory::new();
    factory.fail_builds(true);

    let err = RotationService::build(config(), factory, store as Arc<dyn SecretStore>)
        .await
        .unwrap_err();

    assert!(matches!(err, RotationError::Pool(_)));
}

// ---------------------------------------------------------------------------
// Diagnostics
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn status_reflects_fresh_service() {
    let store = Arc::new(InMemorySecretStore::with_issued(PATH));
    let (service, _factory) = build(&store).await;

    let status = service.status();
    assert_eq!(status.state, RotationState::Idle);
    assert_eq!(status.attempt_count, 0);
    assert_eq!(status.max_attempts, 5);
    assert_eq!(status.consecutive_failures, 0);
    assert_eq!(status.identity.as_str(), "v-token-1");
    assert!(status.dynamic_identity);
    assert_eq!(status.pools_built, 1);
    assert_eq!(status.pool.max_size, 5);

    let json = serde_json::to_value(&status).unwrap();
    assert_eq!(json["state"], "idle");
    assert_eq!(json["identity"], "v-token-1");
    assert_eq!(json["pool"]["max_lifetime"], "30m");
}

#[rstest]
#[case("v-token-abc", true)]
#[case("payments_app", false)]
#[tokio::test(start_paused = true)]
async fn status_flags_dynamic_identities(#[case] username: &str, #[case] dynamic: bool) {
    let store = Arc::new(InMemorySecretStore::new());
    store.set_credentials(PATH, Credentials::new(username, "pw"));
    let (service, _factory) = build(&store).await;

    assert_eq!(service.status().dynamic_identity, dynamic);
}

// ---------------------------------------------------------------------------
// Startup and scheduling
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn start_probes_then_schedules() {
    let store = Arc::new(InMemorySecretStore::with_issued(PATH));
    let (service, factory) = build(&store).await;
    let before = factory.probes();

    assert!(service.start().await);
    assert_eq!(factory.probes(), before + 1);
    assert!(service.start().await, "second start is a no-op");
    assert_eq!(factory.probes(), before + 1);
    assert_eq!(store.subscriber_count(), 1);

    tokio::time::sleep(Duration::from_secs(61)).await;
    assert_eq!(factory.probes(), before + 3);

    service.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn failed_startup_probe_is_reported() {
    let store = Arc::new(InMemorySecretStore::with_issued(PATH));
    let (service, factory) = build(&store).await;

    factory.push_probe(Err(ProbeError::classify(Some(2003), "Can't connect")));
    assert!(!service.start().await);
    assert_eq!(service.status().consecutive_failures, 1);

    service.shutdown().await;
}

// ---------------------------------------------------------------------------
// Request-path reporting
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn auth_error_on_request_schedules_rotation() {
    let store = Arc::new(InMemorySecretStore::with_issued(PATH));
    let (service, factory) = build(&store).await;

    let body =
        service.report_connection_error(&ProbeError::classify(Some(1045), "Access denied"));
    assert_eq!(body.status, 503);
    assert!(body.retryable);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(store.request_count(), 1);
    assert_eq!(factory.builds(), 2);
}

#[tokio::test(start_paused = true)]
async fn generic_error_on_request_schedules_probe() {
    let store = Arc::new(InMemorySecretStore::with_issued(PATH));
    let (service, factory) = build(&store).await;

    factory.push_probe(Err(ProbeError::classify(None, "connection reset by peer")));
    let body =
        service.report_connection_error(&ProbeError::classify(None, "connection reset by peer"));
    assert_eq!(body.status, 503);

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(service.status().consecutive_failures, 1);
    assert_eq!(store.request_count(), 0);
}

// ---------------------------------------------------------------------------
// Reset and shutdown
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn reset_emits_event_and_reports_prior_state() {
    let store = Arc::new(InMemorySecretStore::with_issued(PATH));
    let (service, _factory) = build(&store).await;
    let mut events = service.events().subscribe();

    assert_eq!(service.reset_attempts(), RotationState::Idle);
    assert!(matches!(
        events.recv().await.unwrap(),
        RotationEvent::AttemptsReset
    ));
}

#[tokio::test(start_paused = true)]
async fn shutdown_stops_delivery_and_closes_pool() {
    let store = Arc::new(InMemorySecretStore::with_issued(PATH));
    let (service, factory) = build(&store).await;
    service.start().await;

    service.shutdown().await;

    assert_eq!(store.subscriber_count(), 0);
    assert!(service.current().is_closed());
    let probes = factory.probes();

    store.emit(LeaseEvent::expired(PATH, LeaseMode::Renew));
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(store.request_count(), 0);
    assert_eq!(factory.probes(), probes);
}

// ---------------------------------------------------------------------------
// Deadline and retirement
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn eviction_grace_longer_than_deadline_still_completes() {
    let store = Arc::new(InMemorySecretStore::with_issued(PATH));
    let factory = MockPoolFactory::new();
    let service = RotationService::build(
        RotationConfig {
            propagation_grace: Duration::from_millis(10),
            probe_timeout: Duration::from_millis(500),
            rotation_deadline: Duration::from_secs(1),
            eviction_grace: Duration::from_secs(5),
            ..RotationConfig::default()
        },
        factory.clone(),
        Arc::clone(&store) as Arc<dyn SecretStore>,
    )
    .await
    .expect("service should build");
    let old = service.current();

    let outcome = service.trigger_manual_rotation().await;

    assert!(outcome.is_completed(), "unexpected outcome: {outcome:?}");
    assert_eq!(service.current().identity().as_str(), "v-token-2");
    assert_eq!(service.status().consecutive_failures, 0);
    assert_eq!(service.status().state, RotationState::Idle);
    assert!(!old.is_closed());

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(old.is_closed());
    assert_eq!(factory.closes(), 1);
}

#[tokio::test(start_paused = true)]
async fn slow_secret_store_within_deadline_completes_and_retires() {
    let store = Arc::new(InMemorySecretStore::with_issued(PATH));
    store.set_request_delay(Duration::from_secs(59));
    let (service, factory) = build(&store).await;
    let old = service.current();

    let outcome = service.trigger_manual_rotation().await;

    assert!(outcome.is_completed(), "unexpected outcome: {outcome:?}");
    assert_eq!(service.current().identity().as_str(), "v-token-2");
    service.shutdown().await;
    assert!(old.is_closed());
    assert_eq!(factory.closes(), 2);
}

#[tokio::test(start_paused = true)]
async fn report_racing_shutdown_does_not_rotate() {
    let store = Arc::new(InMemorySecretStore::with_issued(PATH));
    let (service, factory) = build(&store).await;

    // Spawned but not yet polled when shutdown begins.
    service.report_connection_error(&ProbeError::classify(Some(1045), "Access denied"));
    service.shutdown().await;
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert_eq!(store.request_count(), 0);
    assert_eq!(factory.builds(), 1);
    assert!(service.current().is_closed());
}
