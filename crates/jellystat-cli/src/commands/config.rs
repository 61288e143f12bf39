//! Config inspection command.

use std::path::PathBuf;

use anyhow::Result;
use jellystat_core::Config;
use serde_json::Value;

use crate::ui;

/// What to do with the configuration.
#[derive(Debug, Clone, Default)]
pub enum ConfigAction {
    /// Print the effective configuration.
    #[default]
    Show,
    /// Print one value by dotted path (e.g. `server.port`).
    Get(String),
    /// Print the config file location.
    Path,
    /// Check the config file.
    Validate,
}

/// Config command arguments.
#[derive(Debug, Clone, Default)]
pub struct ConfigArgs {
    /// Action to run.
    pub action: ConfigAction,
    /// Config file override.
    pub config: Option<PathBuf>,
}

/// Run the config command.
pub fn run_config(args: ConfigArgs) -> Result<()> {
    match args.action {
        ConfigAction::Path => {
            let path = args.config.unwrap_or_else(Config::default_path);
            println!("{}", path.display());
            Ok(())
        }
        ConfigAction::Validate => validate_config(args.config),
        ConfigAction::Show => {
            let config = super::load_config(args.config.as_deref())?;
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
        ConfigAction::Get(key) => {
            let config = super::load_config(args.config.as_deref())?;
            let value = serde_json::to_value(&config)?;
            match lookup(&value, &key) {
                Some(Value::String(s)) => println!("{s}"),
                Some(other) => println!("{}", serde_json::to_string_pretty(other)?),
                None => anyhow::bail!("Key not found: {key}"),
            }
            Ok(())
        }
    }
}

/// Navigate a dotted path through objects and arrays.
fn lookup<'a>(root: &'a Value, key: &str) -> Option<&'a Value> {
    key.split('.').try_fold(root, |current, part| match current {
        Value::Object(map) => map.get(part),
        Value::Array(items) => part.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn validate_config(path: Option<PathBuf>) -> Result<()> {
    let path = path.unwrap_or_else(Config::default_path);
    ui::header("Validating Configuration");
    ui::kv("File", &path.display().to_string());

    if !path.exists() {
        ui::info("No config file, defaults apply");
        return Ok(());
    }

    match Config::load(&path) {
        Ok(config) => {
            ui::success("Configuration is valid");
            ui::kv("Address", &config.listen_address());
            Ok(())
        }
        Err(e) => {
            ui::error(&e.to_string());
            anyhow::bail!("Invalid configuration")
        }
    }
}
