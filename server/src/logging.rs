//! Structured logging initialization.
//!
//! The RUST_LOG environment variable takes precedence over the level
//! configured in the config file.

use crate::config::LoggingConfig;
use tracing_subscriber::EnvFilter;

/// Initialize the tracing subscriber.
pub fn init(config: &LoggingConfig) {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::new(config.level.as_str())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
