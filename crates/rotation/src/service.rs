//! Wires the rotation components together and exposes operator controls.
//!
//! ```text
//!   HealthMonitor ──┐
//!                   ├──► RotationCoordinator ──► SecretStore
//!   manual / API  ──┘            │
//!                                ▼
//!   LeaseEventListener ──► PoolRefresher ──► PoolLifecycleManager
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::{PoolSizing, RotationConfig};
use crate::context::RotationContext;
use crate::coordinator::{RotationCoordinator, RotationOutcome};
use crate::credentials::CredentialIdentity;
use crate::error::{ProbeError, Result, ServiceUnavailable};
use crate::events::{EventBus, RotationEvent};
use crate::gate::RotationState;
use crate::health::HealthMonitor;
use crate::lease::{LeaseEventListener, SecretStore, SubscriptionHandle};
use crate::pool::{PoolFactory, PoolLifecycleManager};
use crate::refresh::{ConfigRefresher, PoolRefresher};

/// Read-only diagnostics snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RotationStatus {
    /// Gate state
    pub state: RotationState,
    /// Lifetime rotation attempts charged
    pub attempt_count: u32,
    /// Configured attempt budget
    pub max_attempts: u32,
    /// Consecutive probe failures
    pub consecutive_failures: u32,
    /// Identity the current pool is bound to
    pub identity: CredentialIdentity,
    /// Whether that identity was issued dynamically
    pub dynamic_identity: bool,
    /// Pools built since startup, including the first
    pub pools_built: u64,
    /// Sizing of the current pool
    pub pool: PoolSizing,
    /// When the snapshot was taken
    pub checked_at: DateTime<Utc>,
}

/// A running rotation coordinator with its background tasks.
pub struct RotationService<F: PoolFactory> {
    config: RotationConfig,
    context: RotationContext,
    manager: Arc<PoolLifecycleManager<F>>,
    coordinator: Arc<RotationCoordinator>,
    monitor: Arc<HealthMonitor<F>>,
    listener: Arc<LeaseEventListener>,
    cancel: CancellationToken,
    background: TaskTracker,
    scheduler: Mutex<Option<JoinHandle<()>>>,
    subscription: Mutex<Option<SubscriptionHandle>>,
    started: AtomicBool,
}

impl<F: PoolFactory> RotationService<F> {
    /// Validate `config`, build the initial pool from the store's current
    /// credentials and wire every component. Nothing runs until
    /// [`RotationService::start`].
    pub async fn build(
        config: RotationConfig,
        factory: F,
        store: Arc<dyn SecretStore>,
    ) -> Result<Self> {
        config.validate()?;
        let context = RotationContext::new(&config);

        let initial = store.current_credentials(&config.lease.path).await?;
        let manager = Arc::new(
            PoolLifecycleManager::start(factory, initial, &config, context.clone()).await?,
        );
        let refresher: Arc<dyn ConfigRefresher> = Arc::new(PoolRefresher::new(
            Arc::clone(&store),
            config.lease.path.clone(),
            Arc::clone(&manager),
        ));
        let coordinator = Arc::new(RotationCoordinator::new(
            &config,
            context.clone(),
            Arc::clone(&store),
            Arc::clone(&refresher),
        ));
        let monitor = Arc::new(HealthMonitor::new(
            &config,
            context.clone(),
            Arc::clone(&manager),
            Arc::clone(&coordinator),
        ));
        let listener = Arc::new(
            LeaseEventListener::new(
                config.lease.clone(),
                store,
                refresher,
                Arc::clone(&context.identities),
            )
            .with_proactive_interval(config.proactive_rotation_interval),
        );

        Ok(Self {
            config,
            context,
            manager,
            coordinator,
            monitor,
            listener,
            cancel: CancellationToken::new(),
            background: TaskTracker::new(),
            scheduler: Mutex::new(None),
            subscription: Mutex::new(None),
            started: AtomicBool::new(false),
        })
    }

    /// Probe once, then start the probe scheduler and the lease listener.
    ///
    /// Returns the outcome of the startup probe. Calling it again is a no-op
    /// that returns `true`.
    pub async fn start(&self) -> bool {
        if self.started.swap(true, Ordering::AcqRel) {
            return true;
        }
        tracing::info!(
            path = %self.config.lease.path,
            identity = %self.manager.current_identity(),
            "Starting rotation service"
        );
        let healthy = self.monitor.probe_once().await;
        if !healthy {
            tracing::warn!("Startup probe failed");
        }

        *self.subscription.lock() = Some(
            Arc::clone(&self.listener).spawn(self.cancel.child_token()),
        );
        *self.scheduler.lock() = Some(
            Arc::clone(&self.monitor).spawn(self.config.probe_interval, self.cancel.child_token()),
        );
        healthy
    }

    /// The current pool
    #[must_use]
    pub fn current(&self) -> Arc<F::Pool> {
        self.manager.current()
    }

    /// Pool lifecycle manager
    #[must_use]
    pub fn manager(&self) -> &Arc<PoolLifecycleManager<F>> {
        &self.manager
    }

    /// Rotation coordinator
    #[must_use]
    pub fn coordinator(&self) -> &Arc<RotationCoordinator> {
        &self.coordinator
    }

    /// Health monitor
    #[must_use]
    pub fn monitor(&self) -> &Arc<HealthMonitor<F>> {
        &self.monitor
    }

    /// Lease listener
    #[must_use]
    pub fn listener(&self) -> &Arc<LeaseEventListener> {
        &self.listener
    }

    /// Rotation event bus
    #[must_use]
    pub fn events(&self) -> &Arc<EventBus> {
        &self.context.events
    }

    /// Configuration the service runs with
    #[must_use]
    pub fn config(&self) -> &RotationConfig {
        &self.config
    }

    /// Force a rotation cycle. Does not reset the attempt budget.
    pub async fn trigger_manual_rotation(&self) -> RotationOutcome {
        self.monitor.trigger_manual_rotation().await
    }

    /// Zero the attempt budget, re-opening an exhausted gate.
    pub fn reset_attempts(&self) -> RotationState {
        let previous = self.context.gate.reset_attempts();
        tracing::warn!(previous = %previous, "Rotation attempt budget reset by operator");
        self.context.events.emit(RotationEvent::AttemptsReset);
        previous
    }

    /// Diagnostics snapshot
    #[must_use]
    pub fn status(&self) -> RotationStatus {
        let gate = &self.context.gate;
        let identity = self.manager.current_identity();
        RotationStatus {
            state: gate.state(),
            attempt_count: gate.attempts(),
            max_attempts: gate.max_attempts(),
            consecutive_failures: self.context.failures.count(),
            dynamic_identity: identity.is_dynamic(self.context.identities.prefix()),
            identity,
            pools_built: self.manager.builds(),
            pool: self.manager.sizing().clone(),
            checked_at: Utc::now(),
        }
    }

    /// Translate a database error seen on a request into a retryable
    /// response and react in the background: rotate on authentication
    /// failures, probe otherwise.
    pub fn report_connection_error(&self, error: &ProbeError) -> ServiceUnavailable {
        if self.cancel.is_cancelled() {
            return ServiceUnavailable::for_probe_error(error);
        }
        // Shutdown cancels before it waits on the tracker, so a task that
        // starts after the wait has returned always sees the cancellation.
        let cancel = self.cancel.clone();
        if error.is_authentication() {
            tracing::warn!(error = %error, "Request hit an authentication failure, scheduling rotation");
            let coordinator = Arc::clone(&self.coordinator);
            self.background.spawn(async move {
                if cancel.is_cancelled() {
                    tracing::debug!("Service shutting down, dropping scheduled rotation");
                    return;
                }
                coordinator.rotate().await;
            });
        } else {
            tracing::warn!(error = %error, "Request hit a database error, scheduling probe");
            let monitor = Arc::clone(&self.monitor);
            self.background.spawn(async move {
                if cancel.is_cancelled() {
                    tracing::debug!("Service shutting down, dropping scheduled probe");
                    return;
                }
                monitor.probe_once().await;
            });
        }
        ServiceUnavailable::for_probe_error(error)
    }

    /// Stop event delivery and probing, wait for background work, then
    /// close the current pool.
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down rotation service");
        self.cancel.cancel();

        let subscription = self.subscription.lock().take();
        if let Some(subscription) = subscription {
            subscription.shutdown().await;
        }
        let scheduler = self.scheduler.lock().take();
        if let Some(scheduler) = scheduler
            && let Err(e) = scheduler.await
        {
            tracing::warn!(error = %e, "Health monitor task ended abnormally");
        }

        self.background.close();
        self.background.wait().await;
        self.manager.shutdown().await;
    }
}

impl<F: PoolFactory> std::fmt::Debug for RotationService<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RotationService")
            .field("path", &self.config.lease.path)
            .field("manager", &self.manager)
            .field("coordinator", &self.coordinator)
            .field("started", &self.started.load(Ordering::Acquire))
            .finish()
    }
}
