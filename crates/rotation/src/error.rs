//! Error types for credential rotation
//!
//! One enum per concern: probing, pool construction, the secret store,
//! configuration, and the rotation pipeline that ties them together.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

/// Result type for rotation operations
pub type Result<T> = std::result::Result<T, RotationError>;

/// MySQL "access denied for user" error number.
pub const ACCESS_DENIED_CODE: i32 = 1045;

/// Message fragments that identify a rejected credential.
const ACCESS_DENIED_SIGNATURES: &[&str] = &["Access denied", "acesso negado"];

/// Errors produced by a single probe of the pooled resource.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProbeError {
    /// The backing resource rejected the credential.
    #[error("Authentication rejected (code {code:?}): {message}")]
    Authentication {
        /// Vendor error code, when the driver reported one
        code: Option<i32>,
        /// Driver message
        message: String,
    },

    /// Generic connectivity failure (network, pool exhausted, server gone).
    #[error("Connectivity failure: {message}")]
    Connectivity {
        /// Driver message
        message: String,
    },

    /// A connection was obtained but reported itself as invalid.
    #[error("Connection reported invalid status")]
    Invalid,

    /// The probe did not finish within its timeout.
    #[error("Probe timed out after {timeout:?}")]
    Timeout {
        /// Timeout that elapsed
        timeout: Duration,
    },
}

impl ProbeError {
    /// Classify a driver failure by its error code and message.
    ///
    /// Error number 1045 or an "access denied" message is authentication-class;
    /// everything else counts as connectivity.
    pub fn classify(code: Option<i32>, message: impl Into<String>) -> Self {
        let message = message.into();
        let denied = code == Some(ACCESS_DENIED_CODE)
            || ACCESS_DENIED_SIGNATURES
                .iter()
                .any(|signature| message.contains(signature));
        if denied {
            Self::Authentication { code, message }
        } else {
            Self::Connectivity { message }
        }
    }

    /// Whether this failure indicates stale credentials.
    #[must_use]
    pub fn is_authentication(&self) -> bool {
        matches!(self, Self::Authentication { .. })
    }
}

/// Errors from the pool collaborator.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Pool construction failed
    #[error("Pool construction failed for '{identity}': {reason}")]
    Build {
        /// Identity the pool was being bound to
        identity: String,
        /// Failure reason
        reason: String,
        /// Underlying driver error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Closing a retired pool failed
    #[error("Pool close failed: {reason}")]
    Close {
        /// Failure reason
        reason: String,
    },

    /// The lifecycle manager has been shut down
    #[error("Pool lifecycle manager is shut down")]
    ShutDown,
}

impl PoolError {
    /// Create a build error without an underlying source
    pub fn build(identity: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Build {
            identity: identity.into(),
            reason: reason.into(),
            source: None,
        }
    }
}

/// Errors from the secret-store collaborator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SecretStoreError {
    /// A request to the secret store failed
    #[error("Secret store request for '{path}' failed: {reason}")]
    Request {
        /// Secret path
        path: String,
        /// Failure reason
        reason: String,
    },

    /// The secret store cannot be reached
    #[error("Secret store unavailable: {0}")]
    Unavailable(String),

    /// No credential has been issued for the path yet
    #[error("No credential issued for '{path}'")]
    NoCredentials {
        /// Secret path
        path: String,
    },
}

/// Configuration error types
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// Invalid configuration value
    #[error("Invalid configuration: {field}: {reason}")]
    InvalidValue {
        /// Offending field
        field: String,
        /// Why it is invalid
        reason: String,
    },

    /// Missing required configuration
    #[error("Missing required configuration: {field}")]
    MissingRequired {
        /// Missing field
        field: String,
    },
}

impl ConfigError {
    pub(crate) fn invalid(field: &str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

/// Errors that can fail a rotation cycle
#[derive(Debug, Error)]
pub enum RotationError {
    /// Requesting or reading a credential failed
    #[error("Secret store error: {0}")]
    SecretStore(#[from] SecretStoreError),

    /// Configuration refresh failed
    #[error("Configuration refresh failed: {reason}")]
    Refresh {
        /// Failure reason
        reason: String,
    },

    /// Pool rebuild failed
    #[error("Pool error: {0}")]
    Pool(#[from] PoolError),

    /// The whole cycle did not finish before the rotation deadline
    #[error("Rotation exceeded its deadline of {deadline:?}")]
    DeadlineExceeded {
        /// Configured ceiling
        deadline: Duration,
    },

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl RotationError {
    /// Create a refresh error
    pub fn refresh(reason: impl Into<String>) -> Self {
        Self::Refresh {
            reason: reason.into(),
        }
    }

    /// Check if a later cycle could plausibly succeed
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::SecretStore(_) | Self::Refresh { .. } | Self::DeadlineExceeded { .. } => true,
            Self::Pool(PoolError::ShutDown) => false,
            Self::Pool(_) => true,
            Self::Config(_) => false,
        }
    }
}

/// Retryable "service unavailable" body returned to a request that hit a
/// database error while rotation proceeds in the background.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[error("{error}: {message}")]
pub struct ServiceUnavailable {
    /// When the error was reported
    pub timestamp: DateTime<Utc>,
    /// HTTP-style status code, always 503
    pub status: u16,
    /// Short status text
    pub error: String,
    /// Message safe to show to clients
    pub message: String,
    /// Clients should retry
    pub retryable: bool,
}

impl ServiceUnavailable {
    /// Status code carried by every instance
    pub const STATUS: u16 = 503;

    /// Body for a failure of the given class.
    #[must_use]
    pub fn for_probe_error(error: &ProbeError) -> Self {
        let message = if error.is_authentication() {
            "Database credentials are being rotated. Please retry shortly."
        } else {
            "Database temporarily unavailable. Please retry shortly."
        };
        Self {
            timestamp: Utc::now(),
            status: Self::STATUS,
            error: "Service Unavailable".to_string(),
            message: message.to_string(),
            retryable: true,
        }
    }
}
