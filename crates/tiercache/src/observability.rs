//! Tracing setup driven by [`LoggingConfig`].
//!
//! The first call installs a global subscriber whose filter sits behind a
//! reload layer; later calls only swap the filter. `RUST_LOG` wins over the
//! configured level when it parses.

use std::sync::OnceLock;
use tracing_subscriber::{EnvFilter, Registry, fmt, prelude::*, reload};

use crate::config::LoggingConfig;

static FILTER_HANDLE: OnceLock<reload::Handle<EnvFilter, Registry>> = OnceLock::new();

/// Install the tracing subscriber, or apply a new level if already installed.
///
/// Returns `true` when this call installed the subscriber.
pub fn init_tracing(logging: &LoggingConfig) -> bool {
    let filter = build_filter(&logging.level, std::env::var("RUST_LOG").ok().as_deref());

    if let Some(handle) = FILTER_HANDLE.get() {
        if let Err(e) = handle.reload(filter) {
            tracing::warn!(error = %e, "failed to apply log level");
        }
        return false;
    }

    let (layer, handle) = reload::Layer::new(filter);
    if FILTER_HANDLE.set(handle).is_err() {
        return false;
    }
    let installed = tracing_subscriber::registry()
        .with(layer)
        .with(fmt::layer())
        .try_init()
        .is_ok();
    if installed {
        tracing::debug!(level = %logging.level, "tracing initialized");
    }
    installed
}

/// Directives of the active filter, if [`init_tracing`] ran.
pub fn current_filter() -> Option<String> {
    FILTER_HANDLE
        .get()
        .and_then(|handle| handle.with_current(|filter| filter.to_string()).ok())
}

fn build_filter(level: &str, env: Option<&str>) -> EnvFilter {
    env.and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(level))
}
