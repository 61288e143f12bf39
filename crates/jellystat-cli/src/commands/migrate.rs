//! Migrate command - provision the store and apply pending migrations.

use std::path::PathBuf;

use anyhow::{Context, Result};
use jellystat_core::{ProvisionOutcome, Store};

use crate::ui;

/// Provision and migrate, then exit.
pub fn run_migrate(config: Option<PathBuf>) -> Result<()> {
    let config = super::load_config(config.as_deref())?;
    let data_dir = config.data_dir();

    ui::header("Migrating database");
    ui::kv("Data", &data_dir.display().to_string());

    match Store::provision(&data_dir).context("Failed to provision database")? {
        ProvisionOutcome::Created => ui::success("Database created"),
        ProvisionOutcome::AlreadyPresent => ui::info("Database already present"),
    }

    let store = Store::open(&data_dir).context("Failed to open database")?;
    let applied = store.migrate().context("Migration failed")?;

    if applied.is_empty() {
        ui::info("Schema is up to date");
    } else {
        for name in &applied {
            ui::success(&format!("Applied {name}"));
        }
    }
    ui::kv("Schema version", &store.schema_version()?.to_string());

    Ok(())
}
