//! Logging setup

use tracing_subscriber::EnvFilter;

/// Build the filter: `RUST_LOG` wins, otherwise `default_level`
pub fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global fmt subscriber; later calls are ignored
pub fn init(default_level: &str) {
    let installed = tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(env_filter(default_level))
        .try_init();
    if installed.is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }
}
