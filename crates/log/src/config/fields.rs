use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Static fields recorded on the root span
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Fields {
    /// Service name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    /// Deployment environment
    #[serde(skip_serializing_if = "Option::is_none")]
    pub env: Option<String>,
    /// Build version
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Instance or pod name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
    /// Anything else, recorded as `custom`
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub custom: BTreeMap<String, String>,
}

impl Fields {
    /// Read from `TIDEPOOL_SERVICE`, `TIDEPOOL_ENV`, `TIDEPOOL_VERSION`
    /// and `TIDEPOOL_INSTANCE` (falling back to `HOSTNAME`).
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            service: lookup("TIDEPOOL_SERVICE"),
            env: lookup("TIDEPOOL_ENV"),
            version: lookup("TIDEPOOL_VERSION"),
            instance: lookup("TIDEPOOL_INSTANCE").or_else(|| lookup("HOSTNAME")),
            custom: BTreeMap::new(),
        }
    }

    /// No field is set
    pub fn is_empty(&self) -> bool {
        self.service.is_none()
            && self.env.is_none()
            && self.version.is_none()
            && self.instance.is_none()
            && self.custom.is_empty()
    }

    /// Custom fields rendered as `k=v,k=v`
    pub(crate) fn custom_summary(&self) -> Option<String> {
        if self.custom.is_empty() {
            return None;
        }
        Some(
            self.custom
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join(","),
        )
    }
}
