//! Logging setup utilities for the debugport binaries.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber with the specified default log level.
///
/// Every crate named in `crate_names` logs at `default_log_level`. The filter can
/// be overridden using the `RUST_LOG` environment variable.
///
/// # Arguments
///
/// * `crate_names` - Crates to enable (e.g., `&["debugport_server", "tower_http"]`)
/// * `default_log_level` - The default log level (e.g., "debug", "info", "warn", "error")
///
/// # Examples
///
/// ```no_run
/// use debugport_shared::logger::setup_logger;
///
/// setup_logger(&[env!("CARGO_CRATE_NAME")], "debug");
/// ```
pub fn setup_logger(crate_names: &[&str], default_log_level: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_directives(crate_names, default_log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Build the `EnvFilter` directives used when `RUST_LOG` is not set.
///
/// Crate names are normalized to their module form (`-` becomes `_`).
pub fn default_directives(crate_names: &[&str], default_log_level: &str) -> String {
    crate_names
        .iter()
        .map(|name| format!("{}={}", name.replace('-', "_"), default_log_level))
        .collect::<Vec<_>>()
        .join(",")
}
