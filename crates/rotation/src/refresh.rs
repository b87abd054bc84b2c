//! Configuration refresh collaborator.
//!
//! A refresh re-reads the rotated credential values. [`PoolRefresher`] turns
//! that into an explicit [`PoolLifecycleManager::rebuild`] call instead of a
//! side effect of some framework reload.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::RotationError;
use crate::lease::SecretStore;
use crate::pool::{PoolFactory, PoolLifecycleManager, Rebuild};

/// Re-reads rotated configuration into live components.
#[async_trait]
pub trait ConfigRefresher: Send + Sync + 'static {
    /// Refresh and return the configuration keys whose values changed.
    async fn refresh(&self) -> Result<Vec<String>, RotationError>;
}

/// Refresher that fetches the current credentials and rebuilds the pool.
pub struct PoolRefresher<F: PoolFactory> {
    store: Arc<dyn SecretStore>,
    path: String,
    manager: Arc<PoolLifecycleManager<F>>,
}

impl<F: PoolFactory> PoolRefresher<F> {
    /// Refresher reading credentials for `path` from `store`.
    pub fn new(
        store: Arc<dyn SecretStore>,
        path: impl Into<String>,
        manager: Arc<PoolLifecycleManager<F>>,
    ) -> Self {
        Self {
            store,
            path: path.into(),
            manager,
        }
    }
}

#[async_trait]
impl<F: PoolFactory> ConfigRefresher for PoolRefresher<F> {
    async fn refresh(&self) -> Result<Vec<String>, RotationError> {
        let credentials = self.store.current_credentials(&self.path).await?;
        let changed = credentials.changed_keys(&self.manager.current_credentials());

        match self.manager.rebuild(credentials).await? {
            Rebuild::Replaced(_) => Ok(changed),
            Rebuild::Reused(_) => Ok(Vec::new()),
        }
    }
}

impl<F: PoolFactory> std::fmt::Debug for PoolRefresher<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolRefresher")
            .field("path", &self.path)
            .finish()
    }
}
