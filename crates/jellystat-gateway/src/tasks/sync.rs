//! Library sync.

use std::time::Duration;

use async_trait::async_trait;
use jellystat_core::Store;

use super::{BackgroundJob, JobError, JobReport};
use crate::store_io;

/// Setting naming the media server the sync pulls from.
pub const HOST_SETTING: &str = "JF_HOST";

/// Pulls library data from the configured media server.
///
/// The transfer itself lives outside this crate. A pass checks that the
/// configuration record is present and names a server.
#[derive(Debug, Clone)]
pub struct SyncTask {
    store: Store,
    interval: Duration,
}

impl SyncTask {
    /// Create the sync job.
    #[must_use]
    pub const fn new(store: Store, interval: Duration) -> Self {
        Self { store, interval }
    }
}

#[async_trait]
impl BackgroundJob for SyncTask {
    fn name(&self) -> &'static str {
        "sync"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn run_once(&self) -> Result<JobReport, JobError> {
        let record = store_io::run(&self.store, Store::config_record)
            .await?
            .ok_or_else(|| JobError::Failed("Configuration record is missing".to_string()))?;

        let host = record
            .settings
            .get(HOST_SETTING)
            .and_then(serde_json::Value::as_str)
            .filter(|host| !host.is_empty());

        Ok(match host {
            Some(host) => JobReport::new(format!("Sync pass completed for {host}")),
            None => JobReport::new("No media server configured, nothing to sync"),
        })
    }
}
