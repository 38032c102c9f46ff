//! Tracing subscriber setup shared by the daemon and the CLI.

use tracing_subscriber::EnvFilter;

/// Installs the global subscriber.
///
/// `RUST_LOG` directives take precedence; `default_level` applies when the
/// variable is unset. `format` is `"json"` for one JSON object per line,
/// anything else for human-readable text.
///
/// Calling it twice is harmless: the second installation attempt is ignored.
pub fn init_tracing(default_level: &str, format: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let installed = if format == "json" {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .with_current_span(false)
            .try_init()
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .try_init()
    };

    if installed.is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }
}
