//! Subscriber assembly

mod format;
mod reload;

use tracing_subscriber::Registry;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

pub use reload::ReloadHandle;

use self::format::{install, json_layer, text_layer};
use crate::config::{Config, Format, WriterConfig};
use crate::{LogError, LogResult};

/// Installs the global subscriber described by a [`Config`].
#[derive(Debug)]
pub struct LoggerBuilder {
    config: Config,
}

/// Keeps the root span entered and exposes the reload handle.
///
/// Dropping it exits the root span; the subscriber itself stays installed.
#[must_use = "dropping the guard exits the root span"]
pub struct LoggerGuard {
    reload: Option<ReloadHandle>,
    _root_span: Option<tracing::span::EnteredSpan>,
}

impl LoggerBuilder {
    /// Builder for `config`
    pub fn from_config(config: Config) -> Self {
        Self { config }
    }

    /// Install the subscriber. Fails when the filter does not parse or a
    /// global subscriber already exists.
    pub fn build(self) -> LogResult<LoggerGuard> {
        let Config {
            level,
            format,
            writer,
            display,
            fields,
            reloadable,
        } = self.config;

        let filter = reload::parse_filter(&level)?;
        let (filter_layer, reload) = reload::create_filter_layer(filter, &level, reloadable);
        let subscriber = Registry::default().with(filter_layer);
        let writer = make_writer(writer);

        let installed = match format {
            Format::Pretty => install!(subscriber, text_layer!(display, writer, pretty), display.time),
            Format::Compact => {
                install!(subscriber, text_layer!(display, writer, compact), display.time)
            }
            Format::Json => install!(subscriber, json_layer!(display, writer), display.time),
        };
        installed.map_err(|e| LogError::AlreadyInitialized(e.to_string()))?;

        let root_span = (!fields.is_empty()).then(|| {
            tracing::info_span!(
                "service",
                service = fields.service.as_deref(),
                env = fields.env.as_deref(),
                version = fields.version.as_deref(),
                instance = fields.instance.as_deref(),
                custom = fields.custom_summary(),
            )
            .entered()
        });

        tracing::debug!(filter = %level, ?format, reloadable, "Logger initialized");
        Ok(LoggerGuard {
            reload,
            _root_span: root_span,
        })
    }
}

impl LoggerGuard {
    /// Filter reload handle, present when the config was `reloadable`
    pub fn reload_handle(&self) -> Option<&ReloadHandle> {
        self.reload.as_ref()
    }
}

impl std::fmt::Debug for LoggerGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoggerGuard")
            .field("reload", &self.reload)
            .finish_non_exhaustive()
    }
}

fn make_writer(writer: WriterConfig) -> BoxMakeWriter {
    match writer {
        WriterConfig::Stderr => BoxMakeWriter::new(std::io::stderr),
        WriterConfig::Stdout => BoxMakeWriter::new(std::io::stdout),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Fields;

    #[test]
    fn bad_filter_fails_before_installing() {
        let config = Config {
            level: "tidepool_rotation=[[".into(),
            ..Config::test()
        };
        let err = LoggerBuilder::from_config(config)
            .build()
            .expect_err("filter must not parse");
        assert!(matches!(err, LogError::Filter { .. }));
    }

    // Only test in this binary that installs the global subscriber.
    #[test]
    fn installs_once_and_reloads() {
        let mut config = Config::test();
        config.fields = Fields {
            service: Some("tidepool-test".into()),
            ..Fields::default()
        };
        let guard = LoggerBuilder::from_config(config).build().expect("first install");

        let handle = guard.reload_handle().expect("test preset is reloadable");
        assert_eq!(handle.current_filter().as_str(), "trace");
        handle.reload("info,tidepool_rotation=debug").expect("valid directive");
        assert_eq!(handle.current_filter().as_str(), "info,tidepool_rotation=debug");

        assert!(matches!(handle.reload("=[["), Err(LogError::Filter { .. })));
        assert_eq!(handle.current_filter().as_str(), "info,tidepool_rotation=debug");

        let second = LoggerBuilder::from_config(Config::test()).build();
        assert!(matches!(second, Err(LogError::AlreadyInitialized(_))));
    }
}
