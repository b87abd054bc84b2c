//! Consecutive probe-failure counter.

use std::sync::atomic::{AtomicU32, Ordering};

/// Counts consecutive health-check failures; any success resets it.
#[derive(Debug, Default)]
pub struct FailureTracker {
    consecutive: AtomicU32,
}

impl FailureTracker {
    /// Create a tracker at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failure and return the new consecutive count.
    pub fn record_failure(&self) -> u32 {
        let previous = self
            .consecutive
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                Some(count.saturating_add(1))
            })
            .unwrap_or_else(|count| count);
        previous.saturating_add(1)
    }

    /// Record a success, returning the count that was cleared.
    pub fn record_success(&self) -> u32 {
        self.consecutive.swap(0, Ordering::AcqRel)
    }

    /// Current consecutive failure count.
    #[must_use]
    pub fn count(&self) -> u32 {
        self.consecutive.load(Ordering::Acquire)
    }
}
