//! Layered configuration: defaults, then an optional TOML file, then
//! `TIDEPOOL_*` environment variables, then command-line flags.
//!
//! Nested keys use a double underscore in the environment, so
//! `TIDEPOOL_POOL__MAX_SIZE=20` sets `pool.max_size`.

use std::path::Path;

use anyhow::Context;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use tidepool_rotation::RotationConfig;

/// Environment prefix for configuration keys
pub const ENV_PREFIX: &str = "TIDEPOOL_";

/// Flags that override every other source
#[derive(Debug, Default, Clone, clap::Args)]
pub struct Overrides {
    /// Secret-store path of the rotating credential
    #[arg(long, global = true, value_name = "PATH")]
    pub lease_path: Option<String>,

    /// Lifetime rotation attempt budget
    #[arg(long, global = true, value_name = "N")]
    pub max_attempts: Option<u32>,

    /// Consecutive probe failures before rotating
    #[arg(long, global = true, value_name = "N")]
    pub failure_threshold: Option<u32>,
}

/// Resolve and validate the configuration.
pub fn load(file: Option<&Path>, overrides: &Overrides) -> anyhow::Result<RotationConfig> {
    let mut figment = Figment::new();
    if let Some(file) = file {
        anyhow::ensure!(file.exists(), "config file {} not found", file.display());
        figment = figment.merge(Toml::file(file));
    }
    let mut config: RotationConfig = figment
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
        .extract()
        .context("failed to read configuration")?;

    if let Some(path) = &overrides.lease_path {
        config.lease.path.clone_from(path);
    }
    if let Some(max) = overrides.max_attempts {
        config.max_rotation_attempts = max;
    }
    if let Some(threshold) = overrides.failure_threshold {
        config.failure_threshold = threshold;
    }

    config.validate().context("invalid configuration")?;
    Ok(config)
}
