//! Runtime filter changes

use std::sync::Arc;

use arc_swap::ArcSwap;
use tracing_subscriber::{EnvFilter, Registry, layer::Layer};

use crate::{LogError, LogResult};

/// Swaps the active filter directive without reinstalling the subscriber.
#[derive(Clone)]
pub struct ReloadHandle {
    filter: tracing_subscriber::reload::Handle<EnvFilter, Registry>,
    current_filter: Arc<ArcSwap<String>>,
}

impl ReloadHandle {
    /// Replace the filter. The old filter stays active if `directive`
    /// does not parse.
    pub fn reload(&self, directive: &str) -> LogResult<()> {
        let filter = parse_filter(directive)?;
        self.filter
            .reload(filter)
            .map_err(|e| LogError::Config(format!("failed to reload filter: {e}")))?;
        self.current_filter.store(Arc::new(directive.to_string()));
        tracing::info!(filter = directive, "Log filter reloaded");
        Ok(())
    }

    /// Directive currently in effect
    pub fn current_filter(&self) -> Arc<String> {
        self.current_filter.load_full()
    }
}

impl std::fmt::Debug for ReloadHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReloadHandle")
            .field("current_filter", &self.current_filter.load())
            .finish_non_exhaustive()
    }
}

pub(super) fn parse_filter(directive: &str) -> LogResult<EnvFilter> {
    EnvFilter::try_new(directive).map_err(|e| LogError::Filter {
        directive: directive.to_string(),
        reason: e.to_string(),
    })
}

/// Filter layer, wrapped for reloading when asked.
pub(super) fn create_filter_layer(
    filter: EnvFilter,
    directive: &str,
    reloadable: bool,
) -> (
    Box<dyn Layer<Registry> + Send + Sync + 'static>,
    Option<ReloadHandle>,
) {
    if reloadable {
        let (layer, handle) = tracing_subscriber::reload::Layer::new(filter);
        let reload_handle = ReloadHandle {
            filter: handle,
            current_filter: Arc::new(ArcSwap::from_pointee(directive.to_string())),
        };
        (Box::new(layer), Some(reload_handle))
    } else {
        (Box::new(filter), None)
    }
}
