//! Credentials issued by the secret store and the identity they carry.
//!
//! Passwords are held in [`SecretString`] and never reach `Debug` output or
//! logs. The username doubles as the [`CredentialIdentity`] used for loop
//! detection when pools are rebuilt.

use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

/// Opaque identity of a credential, in practice the issued username.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CredentialIdentity(String);

impl CredentialIdentity {
    /// Wrap an identity string.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The raw identity.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this identity was issued dynamically, tested by prefix.
    #[must_use]
    pub fn is_dynamic(&self, prefix: &str) -> bool {
        !prefix.is_empty() && self.0.starts_with(prefix)
    }
}

impl fmt::Display for CredentialIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CredentialIdentity {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// A username/password pair bound to a pool.
#[derive(Clone)]
pub struct Credentials {
    identity: CredentialIdentity,
    password: SecretString,
}

impl Credentials {
    /// Create credentials from a username and password.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            identity: CredentialIdentity::new(username),
            password: SecretString::from(password.into()),
        }
    }

    /// Identity (username) of these credentials.
    #[must_use]
    pub fn identity(&self) -> &CredentialIdentity {
        &self.identity
    }

    /// Username, for drivers.
    #[must_use]
    pub fn username(&self) -> &str {
        self.identity.as_str()
    }

    /// Expose the password. Only pool factories should call this.
    #[must_use]
    pub fn expose_password(&self) -> &str {
        self.password.expose_secret()
    }

    /// Configuration keys whose values differ from `previous`.
    ///
    /// Key names follow the property layout the pool is configured from.
    #[must_use]
    pub fn changed_keys(&self, previous: &Self) -> Vec<String> {
        let mut keys = Vec::new();
        if self.identity != previous.identity {
            keys.push(USERNAME_KEY.to_string());
        }
        if self.expose_password() != previous.expose_password() {
            keys.push(PASSWORD_KEY.to_string());
        }
        keys
    }
}

/// Configuration key holding the pool username.
pub const USERNAME_KEY: &str = "datasource.username";
/// Configuration key holding the pool password.
pub const PASSWORD_KEY: &str = "datasource.password";

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("identity", &self.identity)
            .field("password", &"***")
            .finish()
    }
}

/// Records the credential identity currently in use.
///
/// Only dynamically issued identities (those carrying the configured prefix)
/// are accepted; anything else is logged and ignored. Reads are lock-free.
#[derive(Debug)]
pub struct IdentityTracker {
    prefix: String,
    current: ArcSwapOption<CredentialIdentity>,
}

impl IdentityTracker {
    /// Create a tracker accepting identities with `prefix`.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            current: ArcSwapOption::empty(),
        }
    }

    /// Dynamic-identity prefix this tracker accepts.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Record `identity` as current.
    ///
    /// Returns `false` (and leaves the record untouched) when the identity is
    /// not dynamically issued.
    pub fn record(&self, identity: &CredentialIdentity) -> bool {
        if !identity.is_dynamic(&self.prefix) {
            tracing::warn!(
                identity = %identity,
                prefix = %self.prefix,
                "Ignoring identity without dynamic prefix"
            );
            return false;
        }

        let previous = self.current.swap(Some(Arc::new(identity.clone())));
        if previous.as_deref() != Some(identity) {
            tracing::info!(
                previous = previous.as_deref().map_or("", CredentialIdentity::as_str),
                current = %identity,
                "Dynamic credential identity updated"
            );
        }
        true
    }

    /// Currently recorded identity, if any.
    #[must_use]
    pub fn current(&self) -> Option<CredentialIdentity> {
        self.current.load_full().map(|id| (*id).clone())
    }

    /// Whether `identity` equals the recorded one.
    #[must_use]
    pub fn matches(&self, identity: &CredentialIdentity) -> bool {
        self.current.load().as_deref() == Some(identity)
    }
}
