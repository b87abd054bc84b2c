//! # Tidepool Rotation
//!
//! Keeps a connection pool usable while the credentials behind it are
//! short-lived and rotated by an external secret store.
//!
//! Health probes, lease events and manual requests all funnel into one
//! [`RotationCoordinator`], which runs at most one rotation at a time,
//! bounds lifetime attempts and swaps the pool through the
//! [`PoolLifecycleManager`] without ever leaving callers without one.

pub mod config;
pub mod context;
pub mod coordinator;
pub mod credentials;
pub mod error;
pub mod events;
pub mod failure;
pub mod gate;
pub mod health;
pub mod lease;
pub mod pool;
pub mod refresh;
pub mod service;

#[cfg(feature = "mysql")]
pub mod mysql;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use config::{PoolSizing, RotationConfig};
pub use context::RotationContext;
pub use coordinator::{RotationCoordinator, RotationOutcome};
pub use credentials::{CredentialIdentity, Credentials, IdentityTracker};
pub use error::{
    ConfigError, PoolError, ProbeError, Result, RotationError, SecretStoreError,
    ServiceUnavailable,
};
pub use events::{EventBus, RotationEvent, SkipReason};
pub use failure::FailureTracker;
pub use gate::{GatePermit, RotationGate, RotationState};
pub use health::HealthMonitor;
pub use lease::{
    LeaseAction, LeaseEvent, LeaseEventKind, LeaseEventListener, LeaseMode, LeaseSubscription,
    SecretStore, SubscriptionHandle,
};
pub use pool::{ManagedPool, PoolFactory, PoolLifecycleManager, Rebuild};
pub use refresh::{ConfigRefresher, PoolRefresher};
pub use service::{RotationService, RotationStatus};

#[cfg(feature = "mysql")]
pub use mysql::{MySqlManagedPool, MySqlPoolFactory};
