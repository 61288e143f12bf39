//! Periodic backup.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use jellystat_core::{CONFIG_TREE, LOG_TREE, Store};
use serde_json::json;

use super::{BackgroundJob, JobError, JobReport};
use crate::store_io;

/// Number of backup files kept in the backup directory.
pub const DEFAULT_BACKUP_RETENTION: usize = 10;

const BACKUP_FILE_PREFIX: &str = "backup_";
const BACKUP_FILE_SUFFIX: &str = ".json";

/// Writes the configuration record and the job run log to a timestamped
/// JSON file.
///
/// The first pass waits one interval, so a restart does not produce a new
/// file. Only the newest `retention` files are kept.
#[derive(Debug, Clone)]
pub struct BackupTask {
    store: Store,
    backup_dir: PathBuf,
    interval: Duration,
    retention: usize,
}

impl BackupTask {
    /// Create the backup job writing into `backup_dir`.
    #[must_use]
    pub const fn new(store: Store, backup_dir: PathBuf, interval: Duration) -> Self {
        Self {
            store,
            backup_dir,
            interval,
            retention: DEFAULT_BACKUP_RETENTION,
        }
    }

    /// Keep at most `retention` backup files (at least one).
    #[must_use]
    pub fn with_retention(mut self, retention: usize) -> Self {
        self.retention = retention.max(1);
        self
    }
}

#[async_trait]
impl BackgroundJob for BackupTask {
    fn name(&self) -> &'static str {
        "backup"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    fn runs_at_launch(&self) -> bool {
        false
    }

    async fn run_once(&self) -> Result<JobReport, JobError> {
        let (record, runs) = store_io::run(&self.store, |store| {
            Ok((store.config_record()?, store.job_runs(usize::MAX)?))
        })
        .await?;

        let document = json!({
            "createdAt": Utc::now(),
            CONFIG_TREE: record,
            LOG_TREE: runs,
        });

        tokio::fs::create_dir_all(&self.backup_dir).await?;
        let file_name = format!(
            "{BACKUP_FILE_PREFIX}{}{BACKUP_FILE_SUFFIX}",
            Utc::now().format("%Y-%m-%d_%H-%M-%S%.3f")
        );
        let path = self.backup_dir.join(file_name);
        tokio::fs::write(&path, serde_json::to_vec_pretty(&document)?).await?;
        tracing::info!(path = %path.display(), "Backup written");

        let removed = prune_backups(&self.backup_dir, self.retention).await?;
        if removed > 0 {
            tracing::debug!(removed, "Removed old backups");
        }

        Ok(JobReport::new(format!("Backup written to {}", path.display())))
    }
}

/// Delete all but the newest `keep` backup files; returns how many went.
///
/// File names embed the creation time, so name order is age order.
async fn prune_backups(dir: &Path, keep: usize) -> std::io::Result<usize> {
    let mut backups = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with(BACKUP_FILE_PREFIX) && name.ends_with(BACKUP_FILE_SUFFIX) {
            backups.push(entry.path());
        }
    }

    if backups.len() <= keep {
        return Ok(0);
    }

    backups.sort();
    let expired = backups.len() - keep;
    for path in &backups[..expired] {
        tokio::fs::remove_file(path).await?;
    }
    Ok(expired)
}
