//! Jellystat CLI - serve the statistics dashboard and manage its store.

mod commands;
mod ui;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use commands::config::{ConfigAction, ConfigArgs};
use commands::run::RunArgs;

#[derive(Parser)]
#[command(name = "jellystat")]
#[command(about = "Jellystat - statistics dashboard for media servers")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the server (default)
    Run {
        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,

        /// Bind address
        #[arg(long)]
        bind: Option<String>,

        /// Config file
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Create the database if needed and apply pending migrations
    Migrate {
        /// Config file
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Inspect configuration
    Config {
        #[command(subcommand)]
        action: Option<ConfigCommands>,

        /// Config file
        #[arg(long, global = true)]
        config: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show the effective configuration
    Show,

    /// Get a configuration value
    Get {
        /// Configuration key (e.g., server.port)
        key: String,
    },

    /// Print the config file location
    Path,

    /// Validate the config file
    Validate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });

    if cli.json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_target(false))
            .with(filter)
            .init();
    }

    let command = cli.command.unwrap_or(Commands::Run {
        port: None,
        bind: None,
        config: None,
    });

    match command {
        Commands::Run { port, bind, config } => {
            commands::run_server(RunArgs { port, bind, config }).await?;
        }

        Commands::Migrate { config } => {
            commands::run_migrate(config)?;
        }

        Commands::Config { action, config } => {
            let action = match action {
                Some(ConfigCommands::Show) | None => ConfigAction::Show,
                Some(ConfigCommands::Get { key }) => ConfigAction::Get(key),
                Some(ConfigCommands::Path) => ConfigAction::Path,
                Some(ConfigCommands::Validate) => ConfigAction::Validate,
            };
            commands::run_config(ConfigArgs { action, config })?;
        }
    }

    Ok(())
}
