//! Health probing and escalation to rotation.
//!
//! | Probe outcome            | Action                                          |
//! |--------------------------|-------------------------------------------------|
//! | success                  | reset failures, release a stuck gate            |
//! | generic failure          | count it, rotate once the threshold is reached  |
//! | authentication failure   | rotate immediately                              |

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::RotationConfig;
use crate::context::RotationContext;
use crate::coordinator::{RotationCoordinator, RotationOutcome};
use crate::error::ProbeError;
use crate::pool::{ManagedPool, PoolFactory, PoolLifecycleManager};

/// Probes the current pool and escalates failures.
pub struct HealthMonitor<F: PoolFactory> {
    manager: Arc<PoolLifecycleManager<F>>,
    coordinator: Arc<RotationCoordinator>,
    context: RotationContext,
    failure_threshold: u32,
    probe_timeout: Duration,
    stale_after: Duration,
}

impl<F: PoolFactory> HealthMonitor<F> {
    /// Create a monitor over `manager` escalating to `coordinator`.
    pub fn new(
        config: &RotationConfig,
        context: RotationContext,
        manager: Arc<PoolLifecycleManager<F>>,
        coordinator: Arc<RotationCoordinator>,
    ) -> Self {
        Self {
            manager,
            coordinator,
            context,
            failure_threshold: config.failure_threshold,
            probe_timeout: config.probe_timeout,
            stale_after: config.rotation_deadline,
        }
    }

    /// Probe the current pool once and act on the outcome.
    ///
    /// Any rotation this triggers runs to completion before returning.
    pub async fn probe_once(&self) -> bool {
        let pool = self.manager.current();
        let result = match tokio::time::timeout(self.probe_timeout, pool.probe(self.probe_timeout)).await {
            Ok(result) => result,
            Err(_) => Err(ProbeError::Timeout {
                timeout: self.probe_timeout,
            }),
        };

        match result {
            Ok(()) => {
                self.on_success();
                true
            }
            Err(error) => {
                self.on_failure(&error).await;
                false
            }
        }
    }

    fn on_success(&self) {
        let cleared = self.context.failures.record_success();
        if cleared > 0 {
            tracing::info!(cleared, "Database connection recovered");
        } else {
            tracing::debug!("Database connection healthy");
        }
        // Only a cycle older than the deadline is considered lost.
        if self.context.gate.recover_stale(self.stale_after) {
            tracing::warn!("Cleared a stuck rotation flag after a healthy probe");
        }
    }

    async fn on_failure(&self, error: &ProbeError) {
        let failures = self.context.failures.record_failure();
        if error.is_authentication() {
            tracing::warn!(
                failures,
                error = %error,
                "Authentication failure, rotating credentials immediately"
            );
            self.coordinator.rotate().await;
            return;
        }

        tracing::warn!(
            failures,
            threshold = self.failure_threshold,
            error = %error,
            "Database probe failed"
        );
        if failures >= self.failure_threshold {
            tracing::warn!(failures, "Failure threshold reached, rotating credentials");
            self.coordinator.rotate().await;
        }
    }

    /// Rotate regardless of the failure count. Still single-flight and
    /// still charged to the attempt budget.
    pub async fn trigger_manual_rotation(&self) -> RotationOutcome {
        tracing::info!("Manual credential rotation requested");
        self.coordinator.rotate().await
    }

    /// Probe every `interval` until `cancel` fires.
    pub fn spawn(self: Arc<Self>, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            tracing::debug!(?interval, "Health monitor started");
            loop {
                tokio::select! {
                    () = tokio::time::sleep(interval) => {}
                    () = cancel.cancelled() => break,
                }
                self.probe_once().await;
            }
            tracing::debug!("Health monitor stopped");
        })
    }
}

impl<F: PoolFactory> std::fmt::Debug for HealthMonitor<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthMonitor")
            .field("failures", &self.context.failures.count())
            .field("failure_threshold", &self.failure_threshold)
            .field("probe_timeout", &self.probe_timeout)
            .finish()
    }
}
