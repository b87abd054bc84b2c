//! # Tidepool Log
//!
//! Tracing bootstrap shared by tidepool binaries.
//!
//! ```no_run
//! // Picks up TIDEPOOL_LOG / RUST_LOG when set
//! let _guard = tidepool_log::auto_init()?;
//! tracing::info!("ready");
//! # Ok::<(), tidepool_log::LogError>(())
//! ```

mod builder;
pub mod config;

pub use builder::{LoggerBuilder, LoggerGuard, ReloadHandle};
pub use config::{Config, DisplayConfig, Fields, Format, WriterConfig};

/// Logging setup errors
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    /// Configuration could not be interpreted
    #[error("invalid log configuration: {0}")]
    Config(String),

    /// Filter directive failed to parse
    #[error("invalid log filter '{directive}': {reason}")]
    Filter {
        /// The rejected directive
        directive: String,
        /// Parser message
        reason: String,
    },

    /// A global subscriber is already installed
    #[error("global subscriber already installed: {0}")]
    AlreadyInitialized(String),
}

/// Result type for this crate
pub type LogResult<T> = Result<T, LogError>;

/// Initialize from the environment when it carries a filter, otherwise
/// from the build profile's preset.
pub fn auto_init() -> LogResult<LoggerGuard> {
    if std::env::var_os(config::ENV_FILTER).is_some() || std::env::var_os("RUST_LOG").is_some() {
        init_with(Config::from_env())
    } else if cfg!(debug_assertions) {
        init_with(Config::development())
    } else {
        init_with(Config::production())
    }
}

/// Initialize with the default configuration
pub fn init() -> LogResult<LoggerGuard> {
    init_with(Config::default())
}

/// Initialize with an explicit configuration
pub fn init_with(config: Config) -> LogResult<LoggerGuard> {
    LoggerBuilder::from_config(config).build()
}
