//! MySQL pools via sqlx.
//!
//! Pools are created lazily so a rebuild never blocks on the network; the
//! post-build probe is what first reaches the server.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::mysql::{MySqlConnectOptions, MySqlDatabaseError, MySqlPool, MySqlPoolOptions};

use crate::config::PoolSizing;
use crate::credentials::Credentials;
use crate::error::{ACCESS_DENIED_CODE, PoolError, ProbeError};
use crate::pool::{ManagedPool, PoolFactory};

/// SQLSTATE for "invalid authorization specification"
const INVALID_AUTHORIZATION: &str = "28000";

/// Builds [`MySqlManagedPool`]s from a base set of connect options.
///
/// The base options carry host, port, database and TLS settings; each
/// build overrides the username and password.
#[derive(Debug, Clone)]
pub struct MySqlPoolFactory {
    base: MySqlConnectOptions,
}

impl MySqlPoolFactory {
    /// Factory over `base` connect options
    pub fn new(base: MySqlConnectOptions) -> Self {
        Self { base }
    }

    /// Factory from a `mysql://` URL. Credentials in the URL are replaced
    /// on every build.
    pub fn from_url(url: &str) -> Result<Self, PoolError> {
        let base = url
            .parse::<MySqlConnectOptions>()
            .map_err(|e| PoolError::Build {
                identity: String::new(),
                reason: "invalid MySQL URL".into(),
                source: Some(Box::new(e)),
            })?;
        Ok(Self::new(base))
    }
}

#[async_trait]
impl PoolFactory for MySqlPoolFactory {
    type Pool = MySqlManagedPool;

    async fn build(
        &self,
        credentials: &Credentials,
        sizing: &PoolSizing,
    ) -> Result<MySqlManagedPool, PoolError> {
        let options = self
            .base
            .clone()
            .username(credentials.username())
            .password(credentials.expose_password());

        let pool = MySqlPoolOptions::new()
            .min_connections(sizing.min_idle)
            .max_connections(sizing.max_size)
            .acquire_timeout(sizing.connection_timeout)
            .idle_timeout(Some(sizing.idle_timeout))
            .max_lifetime(Some(sizing.max_lifetime))
            .test_before_acquire(true)
            .connect_lazy_with(options);

        tracing::debug!(
            identity = %credentials.identity(),
            min_idle = sizing.min_idle,
            max_size = sizing.max_size,
            "MySQL pool created"
        );
        Ok(MySqlManagedPool { pool })
    }
}

/// A sqlx MySQL pool under lifecycle management
#[derive(Debug, Clone)]
pub struct MySqlManagedPool {
    pool: MySqlPool,
}

impl MySqlManagedPool {
    /// The underlying sqlx pool, for running queries
    pub fn inner(&self) -> &MySqlPool {
        &self.pool
    }
}

#[async_trait]
impl ManagedPool for MySqlManagedPool {
    async fn probe(&self, timeout: Duration) -> Result<(), ProbeError> {
        let check = async {
            let mut conn = self.pool.acquire().await?;
            sqlx::query("SELECT 1").execute(&mut *conn).await?;
            Ok::<(), sqlx::Error>(())
        };
        match tokio::time::timeout(timeout, check).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(classify(&e, timeout)),
            Err(_) => Err(ProbeError::Timeout { timeout }),
        }
    }

    async fn soft_evict(&self) {
        let idle = self.pool.num_idle();
        let mut evicted = 0usize;
        for _ in 0..idle {
            // try_acquire hands out idle connections only and never dials.
            let Some(conn) = self.pool.try_acquire() else {
                break;
            };
            match conn.close().await {
                Ok(()) => evicted += 1,
                Err(e) => tracing::debug!(error = %e, "Closing idle connection failed"),
            }
        }
        tracing::debug!(
            evicted,
            in_use = (self.pool.size() as usize).saturating_sub(self.pool.num_idle()),
            "Idle connections evicted"
        );
    }

    async fn close(&self) -> Result<(), PoolError> {
        self.pool.close().await;
        Ok(())
    }
}

/// Map a sqlx error onto the probe taxonomy.
pub fn classify(error: &sqlx::Error, timeout: Duration) -> ProbeError {
    match error {
        sqlx::Error::Database(db) => {
            let mut code = db
                .try_downcast_ref::<MySqlDatabaseError>()
                .map(|e| i32::from(e.number()));
            if code.is_none() && db.code().as_deref() == Some(INVALID_AUTHORIZATION) {
                code = Some(ACCESS_DENIED_CODE);
            }
            ProbeError::classify(code, db.message())
        }
        sqlx::Error::PoolTimedOut => ProbeError::Timeout { timeout },
        other => ProbeError::classify(None, other.to_string()),
    }
}
