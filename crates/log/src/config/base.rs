use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::{DisplayConfig, Fields, WriterConfig};
use crate::LogError;

/// Logger configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Filter directive, `EnvFilter` syntax (e.g. `info,tidepool_rotation=debug`)
    pub level: String,
    /// Output format
    pub format: Format,
    /// Output destination
    pub writer: WriterConfig,
    /// What each line shows
    pub display: DisplayConfig,
    /// Fields attached to a root span
    pub fields: Fields,
    /// Allow changing the filter at runtime through [`ReloadHandle`](crate::ReloadHandle)
    pub reloadable: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: Format::default(),
            writer: WriterConfig::default(),
            display: DisplayConfig::default(),
            fields: Fields::default(),
            reloadable: false,
        }
    }
}

/// Output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    /// Multi-line, human readable
    Pretty,
    /// Single line per event
    #[default]
    Compact,
    /// One JSON object per event
    Json,
}

impl FromStr for Format {
    type Err = LogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            other => Err(LogError::Config(format!("unknown log format '{other}'"))),
        }
    }
}
