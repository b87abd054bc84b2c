//! The rotation procedure.
//!
//! [`RotationCoordinator::rotate`] is the single funnel for every trigger
//! (health escalation, manual request, request-path error). It serializes
//! through the [`RotationGate`](crate::gate::RotationGate); callers that lose
//! the race get [`RotationOutcome::Skipped`] back immediately.
//!
//! One cycle:
//!
//! 1. enter the gate, charging an attempt
//! 2. bail out if the attempt budget is spent
//! 3. request a new rotating credential
//! 4. wait `propagation_grace`
//! 5. refresh configuration, which rebuilds the pool
//! 6. on success reset the failure counter
//!
//! Steps 3 to 5 run under `rotation_deadline`; expiry is a failed attempt.
//! Step 5 ends once the new pool is installed, so draining the previous
//! pool never counts against the deadline.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::config::RotationConfig;
use crate::context::RotationContext;
use crate::error::RotationError;
use crate::events::{RotationEvent, SkipReason};
use crate::gate::RotationState;
use crate::lease::SecretStore;
use crate::refresh::ConfigRefresher;

/// Result of one [`RotationCoordinator::rotate`] call
#[derive(Debug)]
pub enum RotationOutcome {
    /// The cycle ran and succeeded
    Completed {
        /// Lifetime attempt number
        attempt: u32,
        /// Keys the refresh changed
        changed_keys: Vec<String>,
    },
    /// Nothing ran
    Skipped(SkipReason),
    /// The cycle ran and failed; the attempt stays charged
    Failed {
        /// Lifetime attempt number
        attempt: u32,
        /// What went wrong
        error: RotationError,
    },
}

impl RotationOutcome {
    /// Whether a cycle actually executed
    #[must_use]
    pub fn ran(&self) -> bool {
        !matches!(self, Self::Skipped(_))
    }

    /// Whether a cycle executed and succeeded
    #[must_use]
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }
}

/// Runs rotation cycles against the secret store and refresh collaborator.
pub struct RotationCoordinator {
    context: RotationContext,
    store: Arc<dyn SecretStore>,
    refresher: Arc<dyn ConfigRefresher>,
    path: String,
    propagation_grace: Duration,
    deadline: Duration,
}

impl RotationCoordinator {
    /// Create a coordinator for the path configured in `config`.
    pub fn new(
        config: &RotationConfig,
        context: RotationContext,
        store: Arc<dyn SecretStore>,
        refresher: Arc<dyn ConfigRefresher>,
    ) -> Self {
        Self {
            context,
            store,
            refresher,
            path: config.lease.path.clone(),
            propagation_grace: config.propagation_grace,
            deadline: config.rotation_deadline,
        }
    }

    /// Shared rotation state
    #[must_use]
    pub fn context(&self) -> &RotationContext {
        &self.context
    }

    /// Run one rotation cycle, or return at once if one is running.
    pub async fn rotate(&self) -> RotationOutcome {
        let gate = &self.context.gate;
        let Some(permit) = gate.try_enter() else {
            let reason = match gate.state() {
                RotationState::Exhausted => SkipReason::Exhausted,
                _ => SkipReason::InProgress,
            };
            match reason {
                SkipReason::InProgress => tracing::info!("Rotation already in progress"),
                SkipReason::Exhausted => tracing::warn!(
                    attempts = gate.attempts(),
                    "Rotation attempts exhausted, ignoring trigger"
                ),
            }
            self.context.events.emit(RotationEvent::Skipped { reason });
            return RotationOutcome::Skipped(reason);
        };

        let attempt = permit.attempt();
        if permit.over_budget() {
            permit.leave(false);
            tracing::error!(
                attempts = gate.attempts(),
                max_attempts = gate.max_attempts(),
                "Rotation attempt budget exhausted, automatic rotation disabled"
            );
            self.context.events.emit(RotationEvent::Exhausted {
                attempts: gate.attempts(),
            });
            return RotationOutcome::Skipped(SkipReason::Exhausted);
        }

        tracing::info!(
            attempt,
            max_attempts = gate.max_attempts(),
            path = %self.path,
            "Starting credential rotation"
        );
        self.context.events.emit(RotationEvent::Started { attempt });
        let started = Instant::now();

        let result = match tokio::time::timeout(self.deadline, self.run_cycle()).await {
            Ok(result) => result,
            Err(_) => Err(RotationError::DeadlineExceeded {
                deadline: self.deadline,
            }),
        };

        match result {
            Ok(changed_keys) => {
                self.context.failures.record_success();
                if permit.leave(true).is_none() {
                    tracing::warn!(attempt, "Gate was force-released before rotation finished");
                }
                let duration = started.elapsed();
                tracing::info!(
                    attempt,
                    changed = ?changed_keys,
                    elapsed_ms = duration.as_millis() as u64,
                    "Credential rotation completed"
                );
                self.context.events.emit(RotationEvent::Completed {
                    attempt,
                    changed_keys: changed_keys.clone(),
                    duration,
                });
                RotationOutcome::Completed {
                    attempt,
                    changed_keys,
                }
            }
            Err(error) => {
                let next = permit.leave(false);
                tracing::error!(
                    attempt,
                    error = %error,
                    retryable = error.is_retryable(),
                    next = ?next,
                    "Credential rotation failed"
                );
                self.context.events.emit(RotationEvent::Failed {
                    attempt,
                    error: error.to_string(),
                });
                RotationOutcome::Failed { attempt, error }
            }
        }
    }

    async fn run_cycle(&self) -> Result<Vec<String>, RotationError> {
        self.store.request_rotating_credential(&self.path).await?;
        tracing::debug!(grace = ?self.propagation_grace, "Waiting for credential propagation");
        tokio::time::sleep(self.propagation_grace).await;
        self.refresher.refresh().await
    }
}

impl std::fmt::Debug for RotationCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RotationCoordinator")
            .field("path", &self.path)
            .field("gate", &self.context.gate)
            .field("propagation_grace", &self.propagation_grace)
            .field("deadline", &self.deadline)
            .finish()
    }
}
