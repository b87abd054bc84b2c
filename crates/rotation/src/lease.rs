//! Lease lifecycle events from the secret store and the listener reacting to them.
//!
//! The listener only reacts to two event shapes for the monitored path:
//!
//! - `Expired` with mode `Renew`: ask the store to mint a new rotating
//!   credential. Nothing is swapped yet.
//! - `Created` with mode `Rotate`: a new credential exists; refresh
//!   configuration (which rebuilds the pool) and record its identity.
//!
//! Events arrive over a broadcast channel and are processed on the
//! listener's own task, so the store's delivery path never waits on a
//! refresh.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::credentials::{CredentialIdentity, Credentials, IdentityTracker};
use crate::error::SecretStoreError;
use crate::refresh::ConfigRefresher;

/// Default secret path monitored for database credentials
pub const DEFAULT_LEASE_PATH: &str = "database/creds/payments-app";

/// How the secret store keeps a lease alive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaseMode {
    /// Extend the existing credential until it can no longer be renewed
    Renew,
    /// Issue a brand-new credential
    Rotate,
}

/// Lifecycle transition reported by the secret store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaseEventKind {
    /// A credential was issued for the lease
    Created,
    /// The lease is about to expire
    Expiring,
    /// The lease expired and was not renewed
    Expired,
    /// The store failed while managing the lease
    Errored {
        /// Store-provided description
        message: String,
    },
}

/// A lease lifecycle event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseEvent {
    /// What happened
    pub kind: LeaseEventKind,
    /// Secret path the lease belongs to
    pub path: String,
    /// Renewal mode of the lease
    pub mode: LeaseMode,
    /// Identity of the issued credential, when the store reports one
    pub identity: Option<CredentialIdentity>,
}

impl LeaseEvent {
    /// A `Created` event
    pub fn created(
        path: impl Into<String>,
        mode: LeaseMode,
        identity: Option<CredentialIdentity>,
    ) -> Self {
        Self {
            kind: LeaseEventKind::Created,
            path: path.into(),
            mode,
            identity,
        }
    }

    /// An `Expired` event
    pub fn expired(path: impl Into<String>, mode: LeaseMode) -> Self {
        Self {
            kind: LeaseEventKind::Expired,
            path: path.into(),
            mode,
            identity: None,
        }
    }

    /// An `Expiring` event
    pub fn expiring(path: impl Into<String>, mode: LeaseMode) -> Self {
        Self {
            kind: LeaseEventKind::Expiring,
            path: path.into(),
            mode,
            identity: None,
        }
    }

    /// An `Errored` event
    pub fn errored(path: impl Into<String>, mode: LeaseMode, message: impl Into<String>) -> Self {
        Self {
            kind: LeaseEventKind::Errored {
                message: message.into(),
            },
            path: path.into(),
            mode,
            identity: None,
        }
    }
}

/// The secret path being monitored and its renewal mode
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LeaseSubscription {
    /// Secret path
    pub path: String,
    /// Renewal mode
    pub mode: LeaseMode,
}

impl LeaseSubscription {
    /// Subscription for `path` with `mode`
    pub fn new(path: impl Into<String>, mode: LeaseMode) -> Self {
        Self {
            path: path.into(),
            mode,
        }
    }

    /// Whether `event` concerns the monitored path
    #[must_use]
    pub fn matches(&self, event: &LeaseEvent) -> bool {
        event.path == self.path
    }
}

impl Default for LeaseSubscription {
    fn default() -> Self {
        Self::new(DEFAULT_LEASE_PATH, LeaseMode::Rotate)
    }
}

// ---------------------------------------------------------------------------
// SecretStore
// ---------------------------------------------------------------------------

/// Client of the external secret-management service.
#[async_trait]
pub trait SecretStore: Send + Sync + 'static {
    /// Ask the store to mint a new rotating credential for `path`.
    async fn request_rotating_credential(&self, path: &str) -> Result<(), SecretStoreError>;

    /// Credentials currently issued for `path`.
    async fn current_credentials(&self, path: &str) -> Result<Credentials, SecretStoreError>;

    /// Stream of lease events. The stream may carry events for other paths;
    /// subscribers filter.
    fn subscribe(&self, path: &str) -> broadcast::Receiver<LeaseEvent>;
}

// ---------------------------------------------------------------------------
// LeaseEventListener
// ---------------------------------------------------------------------------

/// What [`LeaseEventListener::handle`] did with an event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaseAction {
    /// The event needed no action
    Ignored,
    /// A new rotating credential was requested
    CredentialRequested,
    /// Configuration was refreshed for a newly created credential
    Refreshed {
        /// Keys the refresh changed
        changed_keys: Vec<String>,
    },
    /// Handling failed; logged and dropped
    Failed,
}

/// Reacts to lease events for one secret path.
pub struct LeaseEventListener {
    subscription: LeaseSubscription,
    store: Arc<dyn SecretStore>,
    refresher: Arc<dyn ConfigRefresher>,
    identities: Arc<IdentityTracker>,
    proactive_interval: Option<Duration>,
}

impl LeaseEventListener {
    /// Create a listener for `subscription`.
    pub fn new(
        subscription: LeaseSubscription,
        store: Arc<dyn SecretStore>,
        refresher: Arc<dyn ConfigRefresher>,
        identities: Arc<IdentityTracker>,
    ) -> Self {
        Self {
            subscription,
            store,
            refresher,
            identities,
            proactive_interval: None,
        }
    }

    /// Also request a fresh credential every `interval` while running.
    pub fn with_proactive_interval(mut self, interval: Option<Duration>) -> Self {
        self.proactive_interval = interval;
        self
    }

    /// Monitored subscription
    #[must_use]
    pub fn subscription(&self) -> &LeaseSubscription {
        &self.subscription
    }

    /// Process one event. Errors are logged, never returned.
    pub async fn handle(&self, event: &LeaseEvent) -> LeaseAction {
        if !self.subscription.matches(event) {
            tracing::trace!(path = %event.path, "Ignoring lease event for another path");
            return LeaseAction::Ignored;
        }

        match (&event.kind, event.mode) {
            (LeaseEventKind::Expired, LeaseMode::Renew) => {
                tracing::info!(path = %event.path, "Renewable lease expired, requesting rotating credential");
                match self.store.request_rotating_credential(&event.path).await {
                    Ok(()) => LeaseAction::CredentialRequested,
                    Err(e) => {
                        tracing::error!(path = %event.path, error = %e, "Requesting rotating credential failed");
                        LeaseAction::Failed
                    }
                }
            }
            (LeaseEventKind::Created, LeaseMode::Rotate) => self.adopt_created(event).await,
            (LeaseEventKind::Expiring, _) => {
                tracing::debug!(path = %event.path, mode = ?event.mode, "Lease expiring");
                LeaseAction::Ignored
            }
            (LeaseEventKind::Errored { message }, _) => {
                tracing::warn!(path = %event.path, error = %message, "Secret store reported a lease error");
                LeaseAction::Ignored
            }
            (kind, mode) => {
                tracing::debug!(path = %event.path, ?kind, ?mode, "Lease event needs no action");
                LeaseAction::Ignored
            }
        }
    }

    async fn adopt_created(&self, event: &LeaseEvent) -> LeaseAction {
        tracing::info!(
            path = %event.path,
            identity = event.identity.as_ref().map_or("", CredentialIdentity::as_str),
            "Rotated credential created, refreshing configuration"
        );
        let changed_keys = match self.refresher.refresh().await {
            Ok(keys) => keys,
            Err(e) => {
                tracing::error!(path = %event.path, error = %e, "Configuration refresh failed");
                return LeaseAction::Failed;
            }
        };

        let identity = match &event.identity {
            Some(identity) => Some(identity.clone()),
            None => match self.store.current_credentials(&event.path).await {
                Ok(credentials) => Some(credentials.identity().clone()),
                Err(e) => {
                    tracing::warn!(path = %event.path, error = %e, "Could not read identity after refresh");
                    None
                }
            },
        };
        if let Some(identity) = identity {
            self.identities.record(&identity);
        }

        tracing::info!(path = %event.path, changed = ?changed_keys, "Configuration refreshed");
        LeaseAction::Refreshed { changed_keys }
    }

    async fn request_proactively(&self) {
        let path = &self.subscription.path;
        tracing::debug!(path = %path, "Proactively requesting rotating credential");
        if let Err(e) = self.store.request_rotating_credential(path).await {
            tracing::warn!(path = %path, error = %e, "Proactive credential request failed");
        }
    }

    /// Subscribe and process events on a background task until cancelled.
    ///
    /// The subscription is taken before this returns, so no event emitted
    /// afterwards is missed.
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> SubscriptionHandle {
        let mut events = self.store.subscribe(&self.subscription.path);
        let mut proactive = self.proactive_interval.map(|period| {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            interval
        });

        let token = cancel.clone();
        let task = tokio::spawn(async move {
            tracing::debug!(path = %self.subscription.path, "Lease listener started");
            loop {
                tokio::select! {
                    biased;
                    () = token.cancelled() => break,
                    received = events.recv() => match received {
                        Ok(event) => {
                            self.handle(&event).await;
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "Lease listener lagged, events dropped");
                        }
                        Err(RecvError::Closed) => {
                            tracing::info!("Lease event stream closed");
                            break;
                        }
                    },
                    () = next_tick(&mut proactive) => self.request_proactively().await,
                }
            }
            tracing::debug!(path = %self.subscription.path, "Lease listener stopped");
        });

        SubscriptionHandle {
            cancel,
            task: Some(task),
        }
    }
}

async fn next_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

impl std::fmt::Debug for LeaseEventListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeaseEventListener")
            .field("subscription", &self.subscription)
            .field("proactive_interval", &self.proactive_interval)
            .finish()
    }
}

/// Cancellation handle for a running lease listener.
///
/// Dropping the handle cancels delivery; [`SubscriptionHandle::shutdown`]
/// additionally waits for the task to finish.
#[derive(Debug)]
pub struct SubscriptionHandle {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl SubscriptionHandle {
    /// Stop delivering events.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether cancellation was requested
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Cancel and wait for the listener task to exit.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take()
            && let Err(e) = task.await
        {
            tracing::warn!(error = %e, "Lease listener task ended abnormally");
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
