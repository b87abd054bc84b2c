//! Logger configuration

mod base;
mod fields;
mod presets;
mod writer;

pub use base::{Config, Format};
pub use fields::Fields;
pub use writer::{DisplayConfig, WriterConfig};

/// Primary filter variable, checked before `RUST_LOG`
pub const ENV_FILTER: &str = "TIDEPOOL_LOG";
/// Output format variable (`pretty`, `compact`, `json`)
pub const ENV_FORMAT: &str = "TIDEPOOL_LOG_FORMAT";
