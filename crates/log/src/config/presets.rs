use super::{Config, DisplayConfig, ENV_FILTER, ENV_FORMAT, Fields, Format, WriterConfig};

impl Config {
    /// Build from `TIDEPOOL_LOG` (or `RUST_LOG`), `TIDEPOOL_LOG_FORMAT`,
    /// the display toggles and the field variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let level = lookup(ENV_FILTER)
            .or_else(|| lookup("RUST_LOG"))
            .unwrap_or_else(|| "info".to_string());
        let format = lookup(ENV_FORMAT)
            .and_then(|raw| raw.parse::<Format>().ok())
            .unwrap_or_default();
        let mut display = DisplayConfig::default();
        display.apply(&lookup);

        Self {
            level,
            format,
            writer: WriterConfig::Stderr,
            display,
            fields: Fields::from_lookup(&lookup),
            reloadable: false,
        }
    }

    /// Verbose, colored, with source locations
    pub fn development() -> Self {
        Self {
            level: "debug".to_string(),
            format: Format::Pretty,
            display: DisplayConfig {
                source: true,
                colors: true,
                ..DisplayConfig::default()
            },
            reloadable: true,
            ..Self::default()
        }
    }

    /// JSON with environment fields
    pub fn production() -> Self {
        Self {
            level: "info".to_string(),
            format: Format::Json,
            display: DisplayConfig {
                colors: false,
                span_list: true,
                ..DisplayConfig::default()
            },
            fields: Fields::from_env(),
            ..Self::default()
        }
    }

    #[cfg(test)]
    pub(crate) fn test() -> Self {
        Self {
            level: "trace".to_string(),
            format: Format::Compact,
            display: DisplayConfig {
                time: false,
                colors: false,
                ..DisplayConfig::default()
            },
            reloadable: true,
            ..Self::default()
        }
    }
}
