//! Shared rotation state handed to every component.
//!
//! One instance is built at startup and cloned into the coordinator, the
//! pool lifecycle manager, the health monitor and the lease listener, so
//! their counters and flags are per-instance instead of process-wide.

use std::sync::Arc;

use crate::config::RotationConfig;
use crate::credentials::IdentityTracker;
use crate::events::EventBus;
use crate::failure::FailureTracker;
use crate::gate::RotationGate;

/// Handles to the shared rotation-decision state
#[derive(Debug, Clone)]
pub struct RotationContext {
    /// Single-flight gate and attempt budget
    pub gate: Arc<RotationGate>,
    /// Consecutive probe failures
    pub failures: Arc<FailureTracker>,
    /// Current dynamically issued identity
    pub identities: Arc<IdentityTracker>,
    /// Rotation event bus
    pub events: Arc<EventBus>,
}

impl RotationContext {
    /// Build fresh state sized from `config`.
    #[must_use]
    pub fn new(config: &RotationConfig) -> Self {
        Self {
            gate: Arc::new(RotationGate::new(config.max_rotation_attempts)),
            failures: Arc::new(FailureTracker::new()),
            identities: Arc::new(IdentityTracker::new(
                config.dynamic_identity_prefix.clone(),
            )),
            events: Arc::new(EventBus::default()),
        }
    }
}
