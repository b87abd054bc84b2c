//! Event broadcasting for rotation observability.
//!
//! Provides [`RotationEvent`] variants emitted by the coordinator and the pool
//! lifecycle manager, and an [`EventBus`] backed by `tokio::sync::broadcast`.

use std::time::Duration;

use tokio::sync::broadcast;

use crate::credentials::CredentialIdentity;

// ---------------------------------------------------------------------------
// RotationEvent
// ---------------------------------------------------------------------------

/// Why a rotation request did not run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Another cycle holds the gate.
    InProgress,
    /// The attempt budget is spent.
    Exhausted,
}

/// Events emitted during rotation and pool replacement.
#[derive(Debug, Clone)]
pub enum RotationEvent {
    /// A rotation cycle entered the gate.
    Started {
        /// Lifetime attempt number.
        attempt: u32,
    },
    /// A rotation cycle finished successfully.
    Completed {
        /// Lifetime attempt number.
        attempt: u32,
        /// Configuration keys the refresh changed.
        changed_keys: Vec<String>,
        /// Wall time of the cycle.
        duration: Duration,
    },
    /// A rotation cycle failed; the attempt stays charged.
    Failed {
        /// Lifetime attempt number.
        attempt: u32,
        /// Human-readable error description.
        error: String,
    },
    /// A rotation request was a no-op.
    Skipped {
        /// Why nothing ran.
        reason: SkipReason,
    },
    /// The attempt budget ran out; automatic rotation is disabled.
    Exhausted {
        /// Attempts charged.
        attempts: u32,
    },
    /// An operator reset the attempt budget.
    AttemptsReset,
    /// A new pool was installed as current.
    PoolRebuilt {
        /// Identity the pool is bound to.
        identity: CredentialIdentity,
        /// Whether the post-build probe succeeded.
        probe_ok: bool,
    },
    /// A rebuild was short-circuited by loop detection.
    PoolReused {
        /// Identity that was re-supplied.
        identity: CredentialIdentity,
    },
    /// A previous pool was drained and closed.
    PoolRetired {
        /// Identity the retired pool was bound to.
        identity: CredentialIdentity,
        /// Whether close reported an error.
        clean: bool,
    },
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Broadcast-based event bus for rotation events.
///
/// Emission is fire-and-forget: if no subscribers are listening or a
/// subscriber lags, events are dropped without backpressure on the emitter.
pub struct EventBus {
    sender: broadcast::Sender<RotationEvent>,
}

impl EventBus {
    /// Create a new event bus with the given buffer size.
    #[must_use]
    pub fn new(buffer_size: usize) -> Self {
        let (sender, _) = broadcast::channel(buffer_size);
        Self { sender }
    }

    /// Emit an event to all current subscribers.
    pub fn emit(&self, event: RotationEvent) {
        // No receivers is fine.
        let _ = self.sender.send(event);
    }

    /// Subscribe to events emitted after this call.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<RotationEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.sender.receiver_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emit_without_subscribers_does_not_panic() {
        let bus = EventBus::new(4);
        bus.emit(RotationEvent::AttemptsReset);
    }

    #[tokio::test]
    async fn subscriber_receives_emitted_event() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();

        bus.emit(RotationEvent::Started { attempt: 3 });

        match rx.recv().await.expect("should receive event") {
            RotationEvent::Started { attempt } => assert_eq!(attempt, 3),
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
