//! In-memory collaborators for exercising the coordinator without a real
//! secret store or database.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::broadcast;

use crate::config::PoolSizing;
use crate::credentials::{CredentialIdentity, Credentials, PASSWORD_KEY, USERNAME_KEY};
use crate::error::{PoolError, ProbeError, RotationError, SecretStoreError};
use crate::lease::{LeaseEvent, SecretStore};
use crate::pool::{ManagedPool, PoolFactory};
use crate::refresh::ConfigRefresher;

// ---------------------------------------------------------------------------
// InMemorySecretStore
// ---------------------------------------------------------------------------

/// A recorded `request_rotating_credential` call
#[derive(Debug, Clone)]
pub struct CredentialRequest {
    /// Requested path
    pub path: String,
    /// When the call arrived
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Secret store that keeps credentials in memory.
///
/// By default every request mints a new `v-token-N` credential for the path
/// and makes it current. Lease events are only emitted through
/// [`InMemorySecretStore::emit`].
pub struct InMemorySecretStore {
    sender: broadcast::Sender<LeaseEvent>,
    credentials: Mutex<HashMap<String, Credentials>>,
    requests: Mutex<Vec<CredentialRequest>>,
    issued: AtomicU32,
    auto_issue: AtomicBool,
    fail_requests: AtomicBool,
    request_delay: Mutex<Duration>,
}

impl InMemorySecretStore {
    /// Empty store with auto-issue enabled
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(64);
        Self {
            sender,
            credentials: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
            issued: AtomicU32::new(0),
            auto_issue: AtomicBool::new(true),
            fail_requests: AtomicBool::new(false),
            request_delay: Mutex::new(Duration::ZERO),
        }
    }

    /// Store with a freshly issued credential for `path`
    pub fn with_issued(path: &str) -> Self {
        let store = Self::new();
        store.issue(path);
        store
    }

    /// Make `credentials` current for `path`.
    pub fn set_credentials(&self, path: &str, credentials: Credentials) {
        self.credentials.lock().insert(path.to_string(), credentials);
    }

    /// Mint a new dynamic credential for `path` and make it current.
    pub fn issue(&self, path: &str) -> Credentials {
        let n = self.issued.fetch_add(1, Ordering::AcqRel) + 1;
        let credentials = Credentials::new(format!("v-token-{n}"), format!("secret-{n}"));
        self.set_credentials(path, credentials.clone());
        credentials
    }

    /// Deliver a lease event to subscribers; returns how many received it.
    pub fn emit(&self, event: LeaseEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    /// Whether requests mint new credentials
    pub fn set_auto_issue(&self, enabled: bool) {
        self.auto_issue.store(enabled, Ordering::Release);
    }

    /// Make requests fail
    pub fn fail_requests(&self, fail: bool) {
        self.fail_requests.store(fail, Ordering::Release);
    }

    /// Delay every request by `delay`
    pub fn set_request_delay(&self, delay: Duration) {
        *self.request_delay.lock() = delay;
    }

    /// Recorded requests
    pub fn requests(&self) -> Vec<CredentialRequest> {
        self.requests.lock().clone()
    }

    /// Number of recorded requests
    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }

    /// Number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for InMemorySecretStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SecretStore for InMemorySecretStore {
    async fn request_rotating_credential(&self, path: &str) -> Result<(), SecretStoreError> {
        self.requests.lock().push(CredentialRequest {
            path: path.to_string(),
            timestamp: chrono::Utc::now(),
        });
        let delay = *self.request_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.fail_requests.load(Ordering::Acquire) {
            return Err(SecretStoreError::Unavailable("store offline".into()));
        }
        if self.auto_issue.load(Ordering::Acquire) {
            self.issue(path);
        }
        Ok(())
    }

    async fn current_credentials(&self, path: &str) -> Result<Credentials, SecretStoreError> {
        self.credentials
            .lock()
            .get(path)
            .cloned()
            .ok_or_else(|| SecretStoreError::NoCredentials {
                path: path.to_string(),
            })
    }

    fn subscribe(&self, _path: &str) -> broadcast::Receiver<LeaseEvent> {
        self.sender.subscribe()
    }
}

// ---------------------------------------------------------------------------
// MockPoolFactory / MockPool
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct Backend {
    probe_script: Mutex<VecDeque<Result<(), ProbeError>>>,
    default_probe: Mutex<Result<(), ProbeError>>,
    fail_builds: AtomicBool,
    fail_close: AtomicBool,
    build_delay: Mutex<Duration>,
    built: Mutex<Vec<CredentialIdentity>>,
    build_attempts: AtomicU32,
    active_builds: AtomicU32,
    max_concurrent_builds: AtomicU32,
    probes: AtomicU32,
    evictions: AtomicU32,
    closes: AtomicU32,
}

impl Default for Backend {
    fn default() -> Self {
        Self {
            probe_script: Mutex::new(VecDeque::new()),
            default_probe: Mutex::new(Ok(())),
            fail_builds: AtomicBool::new(false),
            fail_close: AtomicBool::new(false),
            build_delay: Mutex::new(Duration::ZERO),
            built: Mutex::new(Vec::new()),
            build_attempts: AtomicU32::new(0),
            active_builds: AtomicU32::new(0),
            max_concurrent_builds: AtomicU32::new(0),
            probes: AtomicU32::new(0),
            evictions: AtomicU32::new(0),
            closes: AtomicU32::new(0),
        }
    }
}

/// Pool factory with scripted behavior shared by every pool it builds.
#[derive(Debug, Clone, Default)]
pub struct MockPoolFactory {
    backend: Arc<Backend>,
}

impl MockPoolFactory {
    /// Factory whose pools always probe healthy
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a one-shot probe result, consumed by the next probe of any pool.
    pub fn push_probe(&self, result: Result<(), ProbeError>) {
        self.backend.probe_script.lock().push_back(result);
    }

    /// Result returned once the queue is empty
    pub fn set_default_probe(&self, result: Result<(), ProbeError>) {
        *self.backend.default_probe.lock() = result;
    }

    /// Make builds fail
    pub fn fail_builds(&self, fail: bool) {
        self.backend.fail_builds.store(fail, Ordering::Release);
    }

    /// Make close fail
    pub fn fail_close(&self, fail: bool) {
        self.backend.fail_close.store(fail, Ordering::Release);
    }

    /// Delay every build by `delay`
    pub fn set_build_delay(&self, delay: Duration) {
        *self.backend.build_delay.lock() = delay;
    }

    /// Pools successfully built
    pub fn builds(&self) -> usize {
        self.backend.built.lock().len()
    }

    /// Build calls, including failed ones
    pub fn build_attempts(&self) -> u32 {
        self.backend.build_attempts.load(Ordering::Acquire)
    }

    /// Identities of successfully built pools, in order
    pub fn built_identities(&self) -> Vec<CredentialIdentity> {
        self.backend.built.lock().clone()
    }

    /// Highest number of builds observed running at once
    pub fn max_concurrent_builds(&self) -> u32 {
        self.backend.max_concurrent_builds.load(Ordering::Acquire)
    }

    /// Probes served
    pub fn probes(&self) -> u32 {
        self.backend.probes.load(Ordering::Acquire)
    }

    /// Soft evictions performed
    pub fn evictions(&self) -> u32 {
        self.backend.evictions.load(Ordering::Acquire)
    }

    /// Pools closed
    pub fn closes(&self) -> u32 {
        self.backend.closes.load(Ordering::Acquire)
    }
}

#[async_trait]
impl PoolFactory for MockPoolFactory {
    type Pool = MockPool;

    async fn build(
        &self,
        credentials: &Credentials,
        sizing: &PoolSizing,
    ) -> Result<MockPool, PoolError> {
        let backend = &self.backend;
        backend.build_attempts.fetch_add(1, Ordering::AcqRel);
        let active = backend.active_builds.fetch_add(1, Ordering::AcqRel) + 1;
        backend
            .max_concurrent_builds
            .fetch_max(active, Ordering::AcqRel);

        let delay = *backend.build_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        backend.active_builds.fetch_sub(1, Ordering::AcqRel);

        if backend.fail_builds.load(Ordering::Acquire) {
            return Err(PoolError::build(
                credentials.username(),
                "mock backend refused connection",
            ));
        }

        let identity = credentials.identity().clone();
        let id = {
            let mut built = backend.built.lock();
            built.push(identity.clone());
            built.len() as u32
        };
        Ok(MockPool {
            id,
            identity,
            max_size: sizing.max_size,
            closed: AtomicBool::new(false),
            backend: Arc::clone(&self.backend),
        })
    }
}

/// Pool built by [`MockPoolFactory`]
#[derive(Debug)]
pub struct MockPool {
    id: u32,
    identity: CredentialIdentity,
    max_size: u32,
    closed: AtomicBool,
    backend: Arc<Backend>,
}

impl MockPool {
    /// Build sequence number, starting at 1
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Identity the pool was built with
    pub fn identity(&self) -> &CredentialIdentity {
        &self.identity
    }

    /// Configured maximum size
    pub fn max_size(&self) -> u32 {
        self.max_size
    }

    /// Whether `close` ran
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[async_trait]
impl ManagedPool for MockPool {
    async fn probe(&self, _timeout: Duration) -> Result<(), ProbeError> {
        self.backend.probes.fetch_add(1, Ordering::AcqRel);
        if self.is_closed() {
            return Err(ProbeError::Connectivity {
                message: "pool is closed".into(),
            });
        }
        let scripted = self.backend.probe_script.lock().pop_front();
        scripted.unwrap_or_else(|| self.backend.default_probe.lock().clone())
    }

    async fn soft_evict(&self) {
        self.backend.evictions.fetch_add(1, Ordering::AcqRel);
    }

    async fn close(&self) -> Result<(), PoolError> {
        self.closed.store(true, Ordering::Release);
        self.backend.closes.fetch_add(1, Ordering::AcqRel);
        if self.backend.fail_close.load(Ordering::Acquire) {
            return Err(PoolError::Close {
                reason: "mock close failure".into(),
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// RecordingRefresher
// ---------------------------------------------------------------------------

/// Refresher that records calls instead of rebuilding anything.
#[derive(Debug)]
pub struct RecordingRefresher {
    calls: AtomicU32,
    in_flight: AtomicU32,
    max_in_flight: AtomicU32,
    fail: AtomicBool,
    delay: Mutex<Duration>,
}

impl RecordingRefresher {
    /// Refresher that succeeds immediately
    pub fn new() -> Self {
        Self {
            calls: AtomicU32::new(0),
            in_flight: AtomicU32::new(0),
            max_in_flight: AtomicU32::new(0),
            fail: AtomicBool::new(false),
            delay: Mutex::new(Duration::ZERO),
        }
    }

    /// Make refreshes fail
    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::Release);
    }

    /// Delay every refresh by `delay`
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    /// Refresh calls so far
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::Acquire)
    }

    /// Highest number of refreshes observed running at once
    pub fn max_in_flight(&self) -> u32 {
        self.max_in_flight.load(Ordering::Acquire)
    }
}

impl Default for RecordingRefresher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConfigRefresher for RecordingRefresher {
    async fn refresh(&self) -> Result<Vec<String>, RotationError> {
        self.calls.fetch_add(1, Ordering::AcqRel);
        let active = self.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
        self.max_in_flight.fetch_max(active, Ordering::AcqRel);

        let delay = *self.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::AcqRel);

        if self.fail.load(Ordering::Acquire) {
            return Err(RotationError::refresh("scripted refresh failure"));
        }
        Ok(vec![USERNAME_KEY.to_string(), PASSWORD_KEY.to_string()])
    }
}
