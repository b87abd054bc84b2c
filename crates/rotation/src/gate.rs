//! Single-flight rotation gate with a lifetime attempt budget.
//!
//! The gate is a lock-free state machine:
//!
//! ```text
//! Idle --try_enter--> InProgress --leave--> Idle
//!                                  \--leave (attempts > max)--> Exhausted
//! Exhausted --reset_attempts--> Idle
//! ```
//!
//! State, a cycle epoch and the entry timestamp share one `AtomicU64`, so a
//! caller that loses the race observes `None` from [`RotationGate::try_enter`]
//! immediately instead of blocking. Every successful entry hands out a
//! [`GatePermit`] tagged with the epoch; `leave` is a no-op for a permit whose
//! epoch is no longer current (its cycle was force-released by
//! [`RotationGate::recover_stale`]).

use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

const STATE_MASK: u64 = 0b11;
const EPOCH_SHIFT: u32 = 2;
const EPOCH_MASK: u64 = (1 << 22) - 1;
const ENTERED_SHIFT: u32 = 24;

const IDLE: u64 = 0;
const IN_PROGRESS: u64 = 1;
const EXHAUSTED: u64 = 2;

/// Rotation decision state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationState {
    /// No rotation running; a trigger may enter
    Idle,
    /// A rotation cycle holds the gate
    InProgress,
    /// The attempt budget is spent; automatic rotation is disabled
    Exhausted,
}

impl fmt::Display for RotationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::InProgress => write!(f, "in-progress"),
            Self::Exhausted => write!(f, "exhausted"),
        }
    }
}

const fn pack(state: u64, epoch: u64, entered_ms: u64) -> u64 {
    (entered_ms << ENTERED_SHIFT) | ((epoch & EPOCH_MASK) << EPOCH_SHIFT) | state
}

const fn state_of(word: u64) -> u64 {
    word & STATE_MASK
}

const fn epoch_of(word: u64) -> u64 {
    (word >> EPOCH_SHIFT) & EPOCH_MASK
}

const fn entered_of(word: u64) -> u64 {
    word >> ENTERED_SHIFT
}

fn decode(word: u64) -> RotationState {
    match state_of(word) {
        IN_PROGRESS => RotationState::InProgress,
        EXHAUSTED => RotationState::Exhausted,
        _ => RotationState::Idle,
    }
}

/// Single-flight guard plus lifetime attempt counter.
pub struct RotationGate {
    word: AtomicU64,
    attempts: AtomicU32,
    max_attempts: u32,
    origin: Instant,
}

impl RotationGate {
    /// Create an idle gate allowing `max_attempts` lifetime rotation cycles.
    #[must_use]
    pub fn new(max_attempts: u32) -> Self {
        Self {
            word: AtomicU64::new(pack(IDLE, 0, 0)),
            attempts: AtomicU32::new(0),
            max_attempts,
            origin: Instant::now(),
        }
    }

    fn now_ms(&self) -> u64 {
        // +1 keeps a freshly entered word distinguishable from "never entered".
        self.origin.elapsed().as_millis() as u64 + 1
    }

    /// Atomically move `Idle -> InProgress`.
    ///
    /// Returns `None` without waiting when a cycle is already running or the
    /// budget is exhausted. A successful entry charges one attempt.
    pub fn try_enter(&self) -> Option<GatePermit<'_>> {
        let mut current = self.word.load(Ordering::Acquire);
        loop {
            if state_of(current) != IDLE {
                return None;
            }
            let epoch = (epoch_of(current) + 1) & EPOCH_MASK;
            let next = pack(IN_PROGRESS, epoch, self.now_ms());
            match self.word.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    let attempt = self.attempts.fetch_add(1, Ordering::AcqRel) + 1;
                    return Some(GatePermit {
                        gate: self,
                        epoch,
                        attempt,
                        released: false,
                    });
                }
                Err(actual) => current = actual,
            }
        }
    }

    fn exit_state(&self) -> u64 {
        if self.attempts.load(Ordering::Acquire) > self.max_attempts {
            EXHAUSTED
        } else {
            IDLE
        }
    }

    fn leave_epoch(&self, epoch: u64) -> Option<RotationState> {
        let mut current = self.word.load(Ordering::Acquire);
        loop {
            if state_of(current) != IN_PROGRESS || epoch_of(current) != epoch {
                return None;
            }
            let next = pack(self.exit_state(), epoch, 0);
            match self
                .word
                .compare_exchange(current, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return Some(decode(next)),
                Err(actual) => current = actual,
            }
        }
    }

    /// Force-release a cycle that has held the gate for at least `stale_after`.
    ///
    /// Returns `true` when a stuck cycle was released. A cycle younger than
    /// `stale_after` is left alone.
    pub fn recover_stale(&self, stale_after: Duration) -> bool {
        let current = self.word.load(Ordering::Acquire);
        if state_of(current) != IN_PROGRESS {
            return false;
        }
        let held_ms = self.now_ms().saturating_sub(entered_of(current));
        if u128::from(held_ms) < stale_after.as_millis() {
            return false;
        }
        let next = pack(self.exit_state(), epoch_of(current), 0);
        let released = self
            .word
            .compare_exchange(current, next, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if released {
            tracing::warn!(
                held_ms,
                attempts = self.attempts(),
                "Force-released a rotation gate held past its deadline"
            );
        }
        released
    }

    /// Zero the attempt counter and re-open an exhausted gate.
    ///
    /// A running cycle keeps the gate; it will exit to `Idle` because the
    /// counter no longer exceeds the budget. Returns the state observed
    /// before the reset.
    pub fn reset_attempts(&self) -> RotationState {
        self.attempts.store(0, Ordering::Release);
        let mut current = self.word.load(Ordering::Acquire);
        loop {
            if state_of(current) != EXHAUSTED {
                return decode(current);
            }
            let next = pack(IDLE, epoch_of(current), 0);
            match self
                .word
                .compare_exchange(current, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return RotationState::Exhausted,
                Err(actual) => current = actual,
            }
        }
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> RotationState {
        decode(self.word.load(Ordering::Acquire))
    }

    /// Whether a cycle currently holds the gate
    #[must_use]
    pub fn is_in_progress(&self) -> bool {
        self.state() == RotationState::InProgress
    }

    /// Lifetime rotation attempts charged so far
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::Acquire)
    }

    /// Configured attempt budget
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

impl fmt::Debug for RotationGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RotationGate")
            .field("state", &self.state())
            .field("attempts", &self.attempts())
            .field("max_attempts", &self.max_attempts)
            .finish()
    }
}

/// Proof of holding the gate for one rotation cycle.
///
/// Dropping a permit without calling [`GatePermit::leave`] releases the gate
/// as a failed cycle.
#[must_use = "dropping a permit immediately ends the rotation cycle"]
pub struct GatePermit<'a> {
    gate: &'a RotationGate,
    epoch: u64,
    attempt: u32,
    released: bool,
}

impl GatePermit<'_> {
    /// Attempt number charged for this cycle (1-based, lifetime)
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Whether this cycle was charged beyond the budget
    #[must_use]
    pub fn over_budget(&self) -> bool {
        self.attempt > self.gate.max_attempts
    }

    /// End the cycle.
    ///
    /// Returns the state the gate moved to, or `None` when this permit had
    /// already been force-released.
    pub fn leave(mut self, success: bool) -> Option<RotationState> {
        self.released = true;
        let next = self.gate.leave_epoch(self.epoch);
        tracing::debug!(
            attempt = self.attempt,
            success,
            next = ?next,
            "Rotation gate released"
        );
        next
    }
}

impl Drop for GatePermit<'_> {
    fn drop(&mut self) {
        if !self.released {
            tracing::warn!(attempt = self.attempt, "Rotation permit dropped mid-cycle");
            self.gate.leave_epoch(self.epoch);
        }
    }
}

impl fmt::Debug for GatePermit<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatePermit")
            .field("epoch", &self.epoch)
            .field("attempt", &self.attempt)
            .finish()
    }
}
