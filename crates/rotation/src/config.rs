//! Rotation configuration
//!
//! All durations (de)serialize as human-readable strings ("500ms", "30m")
//! through `humantime-serde`.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::lease::LeaseSubscription;

/// Sizing for pools built on rotated credentials.
///
/// Kept deliberately small, and `max_lifetime` must stay below the
/// credential's time-to-live so connections retire before the credential does.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolSizing {
    /// Minimum idle connections kept open
    pub min_idle: u32,
    /// Maximum connections (idle + in use)
    pub max_size: u32,
    /// Timeout for obtaining a connection
    #[serde(with = "humantime_serde")]
    pub connection_timeout: Duration,
    /// Idle connections older than this are dropped
    #[serde(with = "humantime_serde")]
    pub idle_timeout: Duration,
    /// Hard cap on connection age
    #[serde(with = "humantime_serde")]
    pub max_lifetime: Duration,
    /// Expected TTL of issued credentials, if known
    #[serde(with = "humantime_serde")]
    pub credential_ttl: Option<Duration>,
    /// Timeout for validating a single connection
    #[serde(with = "humantime_serde")]
    pub validation_timeout: Duration,
}

impl Default for PoolSizing {
    fn default() -> Self {
        Self {
            min_idle: 1,
            max_size: 5,
            connection_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(60),
            max_lifetime: Duration::from_secs(30 * 60),
            credential_ttl: Some(Duration::from_secs(60 * 60)),
            validation_timeout: Duration::from_secs(3),
        }
    }
}

impl PoolSizing {
    /// Validate pool sizing
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_size == 0 {
            return Err(ConfigError::invalid(
                "pool.max_size",
                "must be greater than 0",
            ));
        }
        if self.min_idle > self.max_size {
            return Err(ConfigError::invalid(
                "pool.min_idle",
                format!(
                    "min_idle ({}) must not exceed max_size ({})",
                    self.min_idle, self.max_size
                ),
            ));
        }
        if self.connection_timeout.is_zero() {
            return Err(ConfigError::invalid(
                "pool.connection_timeout",
                "must be greater than zero",
            ));
        }
        if let Some(ttl) = self.credential_ttl
            && self.max_lifetime >= ttl
        {
            return Err(ConfigError::invalid(
                "pool.max_lifetime",
                format!(
                    "must be shorter than the credential TTL ({ttl:?}), got {:?}",
                    self.max_lifetime
                ),
            ));
        }
        Ok(())
    }
}

/// Configuration for the rotation coordinator and its triggers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RotationConfig {
    /// Secret path and renewal mode being monitored
    pub lease: LeaseSubscription,

    /// Consecutive generic probe failures before rotating
    pub failure_threshold: u32,

    /// Lifetime cap on rotation attempts
    pub max_rotation_attempts: u32,

    /// Timeout for a single health probe
    #[serde(with = "humantime_serde")]
    pub probe_timeout: Duration,

    /// Interval between scheduled health probes
    #[serde(with = "humantime_serde")]
    pub probe_interval: Duration,

    /// Wait between requesting a credential and refreshing configuration
    #[serde(with = "humantime_serde")]
    pub propagation_grace: Duration,

    /// Ceiling for one whole rotation cycle
    #[serde(with = "humantime_serde")]
    pub rotation_deadline: Duration,

    /// How long a retired pool gets to drain before it is closed
    #[serde(with = "humantime_serde")]
    pub eviction_grace: Duration,

    /// Username prefix of dynamically issued credentials
    pub dynamic_identity_prefix: String,

    /// Periodically ask the secret store for a fresh credential
    #[serde(with = "humantime_serde")]
    pub proactive_rotation_interval: Option<Duration>,

    /// Sizing for rebuilt pools
    pub pool: PoolSizing,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            lease: LeaseSubscription::default(),
            failure_threshold: 2,
            max_rotation_attempts: 5,
            probe_timeout: Duration::from_secs(3),
            probe_interval: Duration::from_secs(30),
            propagation_grace: Duration::from_millis(500),
            rotation_deadline: Duration::from_secs(60),
            eviction_grace: Duration::from_secs(1),
            dynamic_identity_prefix: "v-".to_string(),
            proactive_rotation_interval: None,
            pool: PoolSizing::default(),
        }
    }
}

impl RotationConfig {
    /// Validate configuration parameters
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.lease.path.trim().is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "lease.path".into(),
            });
        }
        if self.failure_threshold == 0 {
            return Err(ConfigError::invalid(
                "failure_threshold",
                "must be greater than 0",
            ));
        }
        if self.max_rotation_attempts == 0 {
            return Err(ConfigError::invalid(
                "max_rotation_attempts",
                "must be greater than 0",
            ));
        }
        if self.probe_timeout.is_zero() {
            return Err(ConfigError::invalid(
                "probe_timeout",
                "must be greater than zero",
            ));
        }
        if self.probe_interval.is_zero() {
            return Err(ConfigError::invalid(
                "probe_interval",
                "must be greater than zero",
            ));
        }
        // The cycle waits out the grace and then probes the new pool once;
        // retiring the old pool happens outside the deadline.
        let cycle_floor = self.propagation_grace.saturating_add(self.probe_timeout);
        if self.rotation_deadline <= cycle_floor {
            return Err(ConfigError::invalid(
                "rotation_deadline",
                format!(
                    "must exceed propagation_grace + probe_timeout ({cycle_floor:?}), got {:?}",
                    self.rotation_deadline
                ),
            ));
        }
        if matches!(self.proactive_rotation_interval, Some(interval) if interval.is_zero()) {
            return Err(ConfigError::invalid(
                "proactive_rotation_interval",
                "must be greater than zero when set",
            ));
        }
        self.pool.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults_are_valid_and_match_documented_values() {
        let config = RotationConfig::default();
        config.validate().unwrap();
        assert_eq!(config.failure_threshold, 2);
        assert_eq!(config.max_rotation_attempts, 5);
        assert_eq!(config.lease.path, "database/creds/payments-app");
        assert!(config.pool.max_lifetime < config.pool.credential_ttl.unwrap());
    }

    #[test]
    fn lifetime_must_stay_below_credential_ttl() {
        let mut config = RotationConfig::default();
        config.pool.max_lifetime = Duration::from_secs(3600);
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "pool.max_lifetime"));
    }

    #[test]
    fn min_idle_above_max_size_is_rejected() {
        let mut config = RotationConfig::default();
        config.pool.min_idle = 10;
        assert!(config.validate().is_err());
    }

    #[test]
    fn deadline_must_leave_room_for_grace_and_first_check() {
        let config = RotationConfig {
            propagation_grace: Duration::from_secs(1),
            probe_timeout: Duration::from_secs(3),
            rotation_deadline: Duration::from_secs(4),
            ..RotationConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "rotation_deadline"));

        let config = RotationConfig {
            rotation_deadline: Duration::from_millis(4001),
            ..config
        };
        config.validate().unwrap();
    }

    #[test]
    fn deadline_must_exceed_grace() {
        let config = RotationConfig {
            propagation_grace: Duration::from_secs(5),
            rotation_deadline: Duration::from_secs(5),
            ..RotationConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn durations_deserialize_from_humantime_strings() {
        let json = serde_json::json!({
            "failure_threshold": 3,
            "propagation_grace": "250ms",
            "pool": { "max_lifetime": "20m", "credential_ttl": "1h" }
        });
        let config: RotationConfig = serde_json::from_value(json).unwrap();
        assert_eq!(config.failure_threshold, 3);
        assert_eq!(config.propagation_grace, Duration::from_millis(250));
        assert_eq!(config.pool.max_lifetime, Duration::from_secs(20 * 60));
        assert_eq!(config.max_rotation_attempts, 5);
        config.validate().unwrap();
    }
}
