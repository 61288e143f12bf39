//! Run command - check the secret, then run the startup pipeline and serve.

use std::path::PathBuf;

use anyhow::{Context, Result};
use jellystat_core::{AuthSettings, Config, ConfigError};
use jellystat_gateway::Bootstrapper;

use crate::ui;

/// Run command arguments.
#[derive(Debug, Clone, Default)]
pub struct RunArgs {
    /// Port override.
    pub port: Option<u16>,
    /// Bind address override.
    pub bind: Option<String>,
    /// Config file override.
    pub config: Option<PathBuf>,
}

/// Start the server.
///
/// Exits the process with status 1 if the signing secret is missing; no
/// pipeline stage runs in that case.
pub async fn run_server(args: RunArgs) -> Result<()> {
    let settings = match AuthSettings::from_env() {
        Ok(settings) => settings,
        Err(ConfigError::MissingSecret) => {
            tracing::error!("JWT Secret cannot be undefined");
            std::process::exit(1);
        }
        Err(e) => return Err(e.into()),
    };

    let config = apply_overrides(super::load_config(args.config.as_deref())?, args)?;

    ui::header("Starting Jellystat");
    ui::kv("Address", &config.listen_address());
    ui::kv("Data", &config.data_dir().display().to_string());
    ui::kv("On startup failure", &config.startup.on_failure.to_string());
    println!();

    let boot = Bootstrapper::new(config, settings).run().await?;
    if let Some(failure) = boot.failure() {
        ui::warning(&format!("Startup did not complete: {failure}"));
    }

    let shutdown = boot.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutting down");
            shutdown.shutdown();
        }
    });

    boot.wait().await?;
    Ok(())
}

/// Apply command-line overrides and validate the result.
fn apply_overrides(mut config: Config, args: RunArgs) -> Result<Config> {
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(bind) = args.bind {
        config.server.bind_address = bind;
    }
    config.validate().context("Invalid command-line override")?;
    Ok(config)
}
