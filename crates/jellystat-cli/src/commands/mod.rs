//! CLI command implementations.

pub mod config;
pub mod migrate;
pub mod run;

pub use config::run_config;
pub use migrate::run_migrate;
pub use run::run_server;

use std::path::Path;

use anyhow::{Context, Result};
use jellystat_core::Config;

/// Load the configuration file (or defaults) and apply environment overrides.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let config = match path {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => Config::load_default().context("Failed to load config")?,
    };

    config
        .with_env_overrides()
        .context("Invalid environment override")
}
