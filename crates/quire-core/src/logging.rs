//! Logging setup
//!
//! Installs a `tracing` subscriber filtered by `Config::log_level`. Logs go to
//! stderr, or to `quire.log` in the data directory when `log_to_file` is set.
//! Initialisation is idempotent: a second call leaves the first subscriber in
//! place.

use std::fs::OpenOptions;
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::Config;

/// Build the filter for a configured level.
///
/// A bare level (`debug`) is scoped to this crate; anything containing `=` or
/// `,` is taken as a full directive.
pub fn env_filter(log_level: &str) -> EnvFilter {
    if log_level.contains('=') || log_level.contains(',') {
        EnvFilter::new(log_level)
    } else {
        EnvFilter::new(format!("quire_core={}", log_level))
    }
}

/// Initialise logging for the given configuration.
pub fn init(config: &Config) -> Result<()> {
    let filter = env_filter(&config.log_level);

    if config.log_to_file {
        let log_path = config.log_path();
        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create log directory {:?}", parent))?;
        }
        let log_file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .with_context(|| format!("Failed to open log file {:?}", log_path))?;

        // Ignore error if a subscriber is already installed
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_ansi(false)
            .with_writer(Mutex::new(log_file))
            .try_init();

        info!("Logging initialized to {:?}", log_path);
    } else {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init();
    }

    Ok(())
}
