//! Pool collaborator traits and the lifecycle manager that owns the current pool.
//!
//! [`PoolLifecycleManager`] is the only component that builds or destroys
//! pools. Readers call [`PoolLifecycleManager::current`], a lock-free load of
//! the installed handle; a replacement is published atomically and the
//! previous pool is retired only afterwards, so there is never a moment
//! without a usable pool.
//!
//! Retirement runs on a task the manager tracks, not inside
//! [`PoolLifecycleManager::rebuild`]. A caller that stops polling `rebuild`
//! after the swap cannot strand the previous pool unclosed.


use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::task::TaskTracker;

use crate::config::{PoolSizing, RotationConfig};
use crate::context::RotationContext;
use crate::credentials::{CredentialIdentity, Credentials};
use crate::error::{PoolError, ProbeError};
use crate::events::RotationEvent;

// ---------------------------------------------------------------------------
// Collaborator traits
// ---------------------------------------------------------------------------

/// A live connection pool bound to one set of credentials.
#[async_trait]
pub trait ManagedPool: Send + Sync + 'static {
    /// Obtain a connection and validate it within `timeout`.
    async fn probe(&self, timeout: Duration) -> Result<(), ProbeError>;

    /// Mark idle connections for removal without interrupting ones in use.
    async fn soft_evict(&self);

    /// Close the pool.
    async fn close(&self) -> Result<(), PoolError>;
}

/// Builds pools for credentials.
#[async_trait]
pub trait PoolFactory: Send + Sync + 'static {
    /// Pool type produced by this factory
    type Pool: ManagedPool;

    /// Construct a pool bound to `credentials` with `sizing`.
    async fn build(
        &self,
        credentials: &Credentials,
        sizing: &PoolSizing,
    ) -> Result<Self::Pool, PoolError>;
}

// ---------------------------------------------------------------------------
// PoolLifecycleManager
// ---------------------------------------------------------------------------

/// Outcome of [`PoolLifecycleManager::rebuild`]
#[derive(Debug)]
pub enum Rebuild<P> {
    /// A new pool was built and installed
    Replaced(Arc<P>),
    /// Loop detection kept the installed pool
    Reused(Arc<P>),
}

impl<P> Rebuild<P> {
    /// The pool that is current after the call
    #[must_use]
    pub fn pool(&self) -> &Arc<P> {
        match self {
            Self::Replaced(pool) | Self::Reused(pool) => pool,
        }
    }

    /// Whether a new pool was installed
    #[must_use]
    pub fn is_replaced(&self) -> bool {
        matches!(self, Self::Replaced(_))
    }
}

struct Installed<P> {
    pool: Arc<P>,
    credentials: Credentials,
}

/// Owns the active pool and replaces it on credential rotation.
pub struct PoolLifecycleManager<F: PoolFactory> {
    factory: F,
    sizing: PoolSizing,
    probe_timeout: Duration,
    eviction_grace: Duration,
    context: RotationContext,
    current: ArcSwap<Installed<F::Pool>>,
    // Guards construction/destruction only, never read access.
    rebuild_lock: Mutex<()>,
    retiring: TaskTracker,
    builds: AtomicU64,
    shut_down: AtomicBool,
}

impl<F: PoolFactory> PoolLifecycleManager<F> {
    /// Build the initial pool and install it.
    ///
    /// # Errors
    /// Returns the factory error if the first pool cannot be constructed;
    /// a manager never exists without a current pool.
    pub async fn start(
        factory: F,
        initial: Credentials,
        config: &RotationConfig,
        context: RotationContext,
    ) -> Result<Self, PoolError> {
        let identity = initial.identity().clone();
        note_identity(&context, &identity);

        let pool = Arc::new(factory.build(&initial, &config.pool).await?);
        let manager = Self {
            factory,
            sizing: config.pool.clone(),
            probe_timeout: config.probe_timeout,
            eviction_grace: config.eviction_grace,
            context,
            current: ArcSwap::from_pointee(Installed {
                pool: Arc::clone(&pool),
                credentials: initial,
            }),
            rebuild_lock: Mutex::new(()),
            retiring: TaskTracker::new(),
            builds: AtomicU64::new(1),
            shut_down: AtomicBool::new(false),
        };

        let probe_ok = manager.verify(&pool, &identity).await;
        manager
            .context
            .events
            .emit(RotationEvent::PoolRebuilt { identity, probe_ok });
        Ok(manager)
    }

    /// The installed pool. Never blocks.
    #[must_use]
    pub fn current(&self) -> Arc<F::Pool> {
        Arc::clone(&self.current.load().pool)
    }

    /// Identity the installed pool is bound to
    #[must_use]
    pub fn current_identity(&self) -> CredentialIdentity {
        self.current.load().credentials.identity().clone()
    }

    /// Credentials the installed pool is bound to
    #[must_use]
    pub fn current_credentials(&self) -> Credentials {
        self.current.load().credentials.clone()
    }

    /// Pools built over the manager's lifetime, including the initial one
    #[must_use]
    pub fn builds(&self) -> u64 {
        self.builds.load(Ordering::Acquire)
    }

    /// Sizing applied to every pool
    #[must_use]
    pub fn sizing(&self) -> &PoolSizing {
        &self.sizing
    }

    /// Replace the current pool with one bound to `credentials`.
    ///
    /// Re-supplying the installed identity while a rotation holds the gate is
    /// treated as a refresh feedback loop and returns the installed pool
    /// unchanged. On construction failure the installed pool stays current.
    ///
    /// Returns once the new pool is installed; the previous pool drains and
    /// closes in the background over `eviction_grace`.
    pub async fn rebuild(&self, credentials: Credentials) -> Result<Rebuild<F::Pool>, PoolError> {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(PoolError::ShutDown);
        }
        let _guard = self.rebuild_lock.lock().await;
        // Shutdown may have won the lock first.
        if self.shut_down.load(Ordering::Acquire) {
            return Err(PoolError::ShutDown);
        }

        let installed = self.current.load_full();
        let identity = credentials.identity().clone();
        if installed.credentials.identity() == &identity && self.context.gate.is_in_progress() {
            tracing::warn!(
                identity = %identity,
                "Same credentials re-supplied during rotation, reusing current pool"
            );
            self.context
                .events
                .emit(RotationEvent::PoolReused { identity });
            return Ok(Rebuild::Reused(Arc::clone(&installed.pool)));
        }

        note_identity(&self.context, &identity);
        tracing::info!(identity = %identity, max_size = self.sizing.max_size, "Building pool");
        let pool = match self.factory.build(&credentials, &self.sizing).await {
            Ok(pool) => Arc::new(pool),
            Err(e) => {
                tracing::error!(identity = %identity, error = %e, "Pool construction failed, keeping current pool");
                return Err(e);
            }
        };

        let probe_ok = self.verify(&pool, &identity).await;

        let previous = self.current.swap(Arc::new(Installed {
            pool: Arc::clone(&pool),
            credentials,
        }));
        self.builds.fetch_add(1, Ordering::AcqRel);
        self.context.events.emit(RotationEvent::PoolRebuilt {
            identity: identity.clone(),
            probe_ok,
        });
        tracing::info!(identity = %identity, probe_ok, "Pool installed");

        // No await between the swap and this spawn.
        self.retiring.spawn(retire(
            previous,
            self.eviction_grace,
            self.context.clone(),
        ));
        Ok(Rebuild::Replaced(pool))
    }

    /// Probe a freshly built pool once. Failures are logged, never fatal:
    /// the pool is installed anyway and the health monitor escalates later.
    async fn verify(&self, pool: &F::Pool, identity: &CredentialIdentity) -> bool {
        match tokio::time::timeout(self.probe_timeout, pool.probe(self.probe_timeout)).await {
            Ok(Ok(())) => {
                tracing::info!(identity = %identity, "New pool verified");
                true
            }
            Ok(Err(e)) => {
                tracing::warn!(
                    identity = %identity,
                    error = %e,
                    auth = e.is_authentication(),
                    "New pool failed its first probe"
                );
                false
            }
            Err(_) => {
                tracing::warn!(
                    identity = %identity,
                    timeout = ?self.probe_timeout,
                    "New pool probe timed out"
                );
                false
            }
        }
    }

    /// Close the current pool and refuse further rebuilds. Waits for pools
    /// still retiring.
    pub async fn shutdown(&self) {
        let _guard = self.rebuild_lock.lock().await;
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        self.retiring.close();
        self.retiring.wait().await;

        let installed = self.current.load_full();
        installed.pool.soft_evict().await;
        if let Err(e) = installed.pool.close().await {
            tracing::warn!(error = %e, "Closing pool on shutdown failed");
        }
        tracing::info!("Pool lifecycle manager shut down");
    }
}

/// Drain then close a pool that is no longer current.
async fn retire<P: ManagedPool>(
    retired: Arc<Installed<P>>,
    eviction_grace: Duration,
    context: RotationContext,
) {
    let identity = retired.credentials.identity().clone();
    let deadline = Instant::now() + eviction_grace;

    if tokio::time::timeout_at(deadline, retired.pool.soft_evict())
        .await
        .is_err()
    {
        tracing::debug!(identity = %identity, "Soft eviction still running at grace deadline");
    }
    tokio::time::sleep_until(deadline).await;

    let clean = match retired.pool.close().await {
        Ok(()) => {
            tracing::info!(identity = %identity, "Previous pool closed");
            true
        }
        Err(e) => {
            tracing::warn!(identity = %identity, error = %e, "Closing previous pool failed");
            false
        }
    };
    context
        .events
        .emit(RotationEvent::PoolRetired { identity, clean });
}

fn note_identity(context: &RotationContext, identity: &CredentialIdentity) {
    if identity.is_dynamic(context.identities.prefix()) {
        tracing::info!(identity = %identity, "Using dynamically issued credential");
        context.identities.record(identity);
    } else {
        tracing::info!(identity = %identity, "Using static credential");
    }
}

impl<F: PoolFactory> std::fmt::Debug for PoolLifecycleManager<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolLifecycleManager")
            .field("identity", &self.current_identity())
            .field("builds", &self.builds())
            .field("sizing", &self.sizing)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockPoolFactory;

    fn config() -> RotationConfig {
        RotationConfig {
            eviction_grace: Duration::from_millis(10),
            ..RotationConfig::default()
        }
    }

    async fn started(
        factory: &MockPoolFactory,
    ) -> (PoolLifecycleManager<MockPoolFactory>, RotationContext) {
        let config = config();
        let context = RotationContext::new(&config);
        let manager = PoolLifecycleManager::start(
            factory.clone(),
            Credentials::new("v-token-1", "first"),
            &config,
            context.clone(),
        )
        .await
        .unwrap();
        (manager, context)
    }

    #[tokio::test(start_paused = true)]
    async fn start_installs_initial_pool() {
        let factory = MockPoolFactory::new();
        let (manager, context) = started(&factory).await;

        assert_eq!(manager.current().identity().as_str(), "v-token-1");
        assert_eq!(manager.builds(), 1);
        assert_eq!(context.identities.current(), Some("v-token-1".into()));
    }

    #[tokio::test(start_paused = true)]
    async fn rebuild_swaps_then_retires_previous() {
        let factory = MockPoolFactory::new();
        let (manager, context) = started(&factory).await;
        let mut events = context.events.subscribe();
        let old = manager.current();

        let outcome = manager
            .rebuild(Credentials::new("v-token-2", "second"))
            .await
            .unwrap();

        assert!(outcome.is_replaced());
        assert_eq!(manager.current().identity().as_str(), "v-token-2");
        assert_eq!(manager.builds(), 2);
        // Retirement waits out the eviction grace in the background.
        assert!(!old.is_closed());

        assert!(matches!(
            events.recv().await.unwrap(),
            RotationEvent::PoolRebuilt { probe_ok: true, .. }
        ));
        assert!(matches!(
            events.recv().await.unwrap(),
            RotationEvent::PoolRetired { clean: true, .. }
        ));
        assert!(old.is_closed());
        assert_eq!(factory.evictions(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn rebuild_returns_before_eviction_grace() {
        let factory = MockPoolFactory::new();
        let (manager, _context) = started(&factory).await;
        let old = manager.current();

        let began = Instant::now();
        manager
            .rebuild(Credentials::new("v-token-2", "second"))
            .await
            .unwrap();

        assert!(began.elapsed() < config().eviction_grace);
        assert!(!old.is_closed());
        tokio::time::sleep(config().eviction_grace * 2).await;
        assert!(old.is_closed());
        assert_eq!(factory.closes(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_waits_for_retiring_pools() {
        let factory = MockPoolFactory::new();
        let (manager, _context) = started(&factory).await;
        let old = manager.current();

        manager
            .rebuild(Credentials::new("v-token-2", "second"))
            .await
            .unwrap();
        manager.shutdown().await;

        assert!(old.is_closed());
        assert!(manager.current().is_closed());
        assert_eq!(factory.closes(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_build_keeps_current_pool() {
        let factory = MockPoolFactory::new();
        let (manager, _context) = started(&factory).await;
        let before = manager.current();

        factory.fail_builds(true);
        let err = manager
            .rebuild(Credentials::new("v-token-2", "second"))
            .await
            .unwrap_err();

        assert!(matches!(err, PoolError::Build { .. }));
        assert!(Arc::ptr_eq(&before, &manager.current()));
        assert!(!before.is_closed());
        assert_eq!(manager.current_identity().as_str(), "v-token-1");
    }

    #[tokio::test(start_paused = true)]
    async fn failed_probe_still_installs() {
        let factory = MockPoolFactory::new();
        let (manager, _context) = started(&factory).await;

        factory.push_probe(Err(ProbeError::classify(Some(1045), "Access denied")));
        let outcome = manager
            .rebuild(Credentials::new("v-token-2", "second"))
            .await
            .unwrap();

        assert!(outcome.is_replaced());
        assert_eq!(manager.current_identity().as_str(), "v-token-2");
    }

    #[tokio::test(start_paused = true)]
    async fn same_identity_during_rotation_reuses_pool() {
        let factory = MockPoolFactory::new();
        let (manager, context) = started(&factory).await;
        let before = manager.current();

        let permit = context.gate.try_enter().unwrap();
        let outcome = manager
            .rebuild(Credentials::new("v-token-1", "first"))
            .await
            .unwrap();
        permit.leave(true);

        assert!(!outcome.is_replaced());
        assert!(Arc::ptr_eq(&before, outcome.pool()));
        assert_eq!(factory.builds(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn same_identity_while_idle_rebuilds() {
        let factory = MockPoolFactory::new();
        let (manager, _context) = started(&factory).await;

        let outcome = manager
            .rebuild(Credentials::new("v-token-1", "first"))
            .await
            .unwrap();

        assert!(outcome.is_replaced());
        assert_eq!(factory.builds(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn static_identity_is_not_tracked() {
        let factory = MockPoolFactory::new();
        let (manager, context) = started(&factory).await;

        manager
            .rebuild(Credentials::new("app_user", "static"))
            .await
            .unwrap();

        assert_eq!(manager.current_identity().as_str(), "app_user");
        assert_eq!(context.identities.current(), Some("v-token-1".into()));
    }

    #[tokio::test(start_paused = true)]
    async fn close_failure_is_swallowed() {
        let factory = MockPoolFactory::new();
        let (manager, context) = started(&factory).await;
        let mut events = context.events.subscribe();

        factory.fail_close(true);
        manager
            .rebuild(Credentials::new("v-token-2", "second"))
            .await
            .unwrap();

        let _rebuilt = events.recv().await.unwrap();
        assert!(matches!(
            events.recv().await.unwrap(),
            RotationEvent::PoolRetired { clean: false, .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_closes_and_refuses_rebuilds() {
        let factory = MockPoolFactory::new();
        let (manager, _context) = started(&factory).await;

        manager.shutdown().await;
        assert!(manager.current().is_closed());

        let err = manager
            .rebuild(Credentials::new("v-token-2", "second"))
            .await
            .unwrap_err();
        assert!(matches!(err, PoolError::ShutDown));
    }
}
