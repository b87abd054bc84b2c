//! Dry runs against the in-memory secret store and pool.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use serde_json::{Value, json};
use tidepool_rotation::testing::{InMemorySecretStore, MockPoolFactory};
use tidepool_rotation::{
    LeaseEvent, ProbeError, RotationConfig, RotationEvent, RotationOutcome, RotationService,
    SecretStore, SkipReason,
};

/// Longest wait for an event-driven rebuild
const EVENT_WAIT: Duration = Duration::from_secs(10);

/// What to put the coordinator through
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Scenario {
    /// One operator-requested rotation
    Manual,
    /// A probe rejected for bad credentials
    AuthFailure,
    /// The store announces a new credential
    LeaseCreated,
    /// Rotations fail until the attempt budget is spent
    Exhaust,
}

/// Run `scenario` and return a JSON report.
pub async fn run(config: RotationConfig, scenario: Scenario) -> anyhow::Result<Value> {
    let path = config.lease.path.clone();
    let mode = config.lease.mode;
    let max_attempts = config.max_rotation_attempts;
    let store = Arc::new(InMemorySecretStore::with_issued(&path));
    let factory = MockPoolFactory::new();

    let service = RotationService::build(
        config,
        factory.clone(),
        Arc::clone(&store) as Arc<dyn SecretStore>,
    )
    .await
    .context("failed to build rotation service")?;
    let mut events = service.events().subscribe();
    service.start().await;
    tracing::info!(?scenario, %path, "Simulation started");

    let mut outcomes = Vec::new();
    match scenario {
        Scenario::Manual => {
            outcomes.push(describe(&service.trigger_manual_rotation().await));
        }
        Scenario::AuthFailure => {
            factory.push_probe(Err(ProbeError::classify(
                Some(1045),
                "Access denied for user",
            )));
            let healthy = service.monitor().probe_once().await;
            outcomes.push(json!({ "probe_healthy": healthy }));
        }
        Scenario::LeaseCreated => {
            let issued = store.issue(&path);
            store.emit(LeaseEvent::created(
                path.as_str(),
                mode,
                Some(issued.identity().clone()),
            ));
            let rebuilt = tokio::time::timeout(EVENT_WAIT, async {
                loop {
                    match events.recv().await {
                        Ok(RotationEvent::PoolRebuilt { .. }) => return true,
                        Ok(_) => {}
                        Err(_) => return false,
                    }
                }
            })
            .await
            .unwrap_or(false);
            outcomes.push(json!({ "pool_rebuilt": rebuilt }));
        }
        Scenario::Exhaust => {
            factory.fail_builds(true);
            for _ in 0..=max_attempts {
                outcomes.push(describe(&service.trigger_manual_rotation().await));
            }
        }
    }

    let report = json!({
        "scenario": format!("{scenario:?}"),
        "outcomes": outcomes,
        "secret_requests": store.request_count(),
        "pool_builds": factory.builds(),
        "status": service.status(),
    });
    service.shutdown().await;
    Ok(report)
}

fn describe(outcome: &RotationOutcome) -> Value {
    match outcome {
        RotationOutcome::Completed {
            attempt,
            changed_keys,
        } => json!({ "result": "completed", "attempt": attempt, "changed_keys": changed_keys }),
        RotationOutcome::Skipped(reason) => json!({
            "result": "skipped",
            "reason": match reason {
                SkipReason::InProgress => "in_progress",
                SkipReason::Exhausted => "exhausted",
            },
        }),
        RotationOutcome::Failed { attempt, error } => {
            json!({ "result": "failed", "attempt": attempt, "error": error.to_string() })
        }
    }
}
