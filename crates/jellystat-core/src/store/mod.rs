//! Persistent storage backed by sled.
//!
//! The database lives in a single directory and holds:
//! - `meta`: bookkeeping such as the applied schema version
//! - `app_config`: the singleton configuration record (id `1`)
//! - `jf_logging`: run history of the periodic jobs
//! - `jf_logging_by_job`: index of that history keyed by job name

mod migrations;

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use migrations::{MIGRATIONS, Migration};

/// Tree holding the singleton configuration record.
pub const CONFIG_TREE: &str = "app_config";
/// Tree holding the job run log.
pub const LOG_TREE: &str = "jf_logging";
/// Index tree: `job 0x00 run-id` for every entry of [`LOG_TREE`].
pub const LOG_INDEX_TREE: &str = "jf_logging_by_job";
/// Tree holding store bookkeeping.
pub const META_TREE: &str = "meta";

/// Key of the singleton configuration record.
const CONFIG_RECORD_ID: &[u8] = b"1";
/// How often opening a locked database is attempted.
const OPEN_ATTEMPTS: u32 = 40;
/// Pause between attempts to open a locked database.
const OPEN_RETRY_DELAY: Duration = Duration::from_millis(50);
/// Number of runs kept in the log for each job.
pub const MAX_RUNS_PER_JOB: usize = 1000;

/// Storage errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying database error.
    #[error("Database error: {0}")]
    Database(#[from] sled::Error),

    /// IO error while provisioning.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Record could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A migration failed to apply.
    #[error("Migration {version} ({name}) failed: {reason}")]
    Migration {
        /// Migration version.
        version: u64,
        /// Migration name.
        name: &'static str,
        /// Failure description.
        reason: String,
    },

    /// Stored bytes are not in the expected layout.
    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

/// Result of [`Store::provision`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionOutcome {
    /// The database did not exist and was created.
    Created,
    /// The database was already present; nothing was done.
    AlreadyPresent,
}

/// One configured API key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiKeyEntry {
    /// The key value presented by clients.
    pub key: String,
    /// Display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Any other metadata stored alongside the key.
    #[serde(flatten)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl ApiKeyEntry {
    /// Create an entry with a key and no metadata.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            name: None,
            metadata: serde_json::Map::new(),
        }
    }

    /// Set the display name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// The singleton configuration record.
///
/// `api_keys` being absent and being empty are both "no keys configured";
/// they are kept apart so the stored document round-trips unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigRecord {
    /// Configured API keys.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_keys: Option<Vec<ApiKeyEntry>>,
    /// Remaining settings, preserved as-is.
    #[serde(flatten)]
    pub settings: serde_json::Map<String, serde_json::Value>,
}

/// Outcome of a single job pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobRunOutcome {
    /// The pass completed.
    Success,
    /// The pass failed.
    Failed,
}

/// One entry of the job run log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRun {
    /// Monotonic entry ID.
    pub id: u64,
    /// Job name.
    pub job: String,
    /// When the pass finished.
    pub timestamp: DateTime<Utc>,
    /// How long the pass took.
    pub duration_ms: u64,
    /// Pass outcome.
    pub outcome: JobRunOutcome,
    /// Human-readable detail.
    pub message: String,
}

/// Handle to the sled database.
#[derive(Clone)]
pub struct Store {
    db: sled::Db,
    path: PathBuf,
}

impl Store {
    /// Ensure the database exists at `data_dir`, creating it if absent.
    ///
    /// Calling this on an existing database is a no-op.
    ///
    /// # Errors
    ///
    /// Returns error if the directory or database cannot be created.
    pub fn provision(data_dir: &Path) -> Result<ProvisionOutcome, StoreError> {
        if data_dir.exists() && std::fs::read_dir(data_dir)?.next().is_some() {
            tracing::debug!(path = %data_dir.display(), "Database already present");
            return Ok(ProvisionOutcome::AlreadyPresent);
        }

        std::fs::create_dir_all(data_dir)?;
        let db = open_db(data_dir)?;
        db.flush()?;
        tracing::info!(path = %data_dir.display(), "Database created");

        Ok(ProvisionOutcome::Created)
    }

    /// Open an existing (or new) database.
    ///
    /// # Errors
    ///
    /// Returns error if the database cannot be opened.
    pub fn open(data_dir: &Path) -> Result<Self, StoreError> {
        let db = open_db(data_dir)?;
        Ok(Self {
            db,
            path: data_dir.to_path_buf(),
        })
    }

    /// Open a throwaway in-memory database.
    ///
    /// # Errors
    ///
    /// Returns error if sled fails to start.
    pub fn temporary() -> Result<Self, StoreError> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self {
            db,
            path: PathBuf::new(),
        })
    }

    /// Database directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get the underlying sled database.
    #[must_use]
    pub fn db(&self) -> &sled::Db {
        &self.db
    }

    /// Highest applied migration version (0 for a fresh database).
    ///
    /// # Errors
    ///
    /// Returns error if the version cannot be read.
    pub fn schema_version(&self) -> Result<u64, StoreError> {
        migrations::current_version(&self.db)
    }

    /// Apply all pending migrations in order.
    ///
    /// Returns the names of the migrations that ran.
    ///
    /// # Errors
    ///
    /// Returns error on the first migration that fails; earlier ones stay applied.
    pub fn migrate(&self) -> Result<Vec<&'static str>, StoreError> {
        migrations::apply_pending(&self.db, MIGRATIONS)
    }

    /// Read the singleton configuration record.
    ///
    /// # Errors
    ///
    /// Returns error if the record cannot be read or decoded.
    pub fn config_record(&self) -> Result<Option<ConfigRecord>, StoreError> {
        let tree = self.db.open_tree(CONFIG_TREE)?;
        tree.get(CONFIG_RECORD_ID)?
            .map(|bytes| serde_json::from_slice(&bytes).map_err(StoreError::from))
            .transpose()
    }

    /// Configured API keys; `None` if the record or its key list is absent.
    ///
    /// # Errors
    ///
    /// Returns error if the record cannot be read or decoded.
    pub fn api_keys(&self) -> Result<Option<Vec<ApiKeyEntry>>, StoreError> {
        Ok(self.config_record()?.and_then(|record| record.api_keys))
    }

    /// Replace the configured API keys, creating the record if needed.
    ///
    /// # Errors
    ///
    /// Returns error if the record cannot be written.
    pub fn set_api_keys(&self, keys: Vec<ApiKeyEntry>) -> Result<ConfigRecord, StoreError> {
        self.update_config_record(|record| record.api_keys = Some(keys.clone()))
    }

    /// Atomically modify the configuration record.
    ///
    /// `update` may run more than once if the record changes concurrently.
    ///
    /// # Errors
    ///
    /// Returns error if the record cannot be read, decoded or written.
    pub fn update_config_record<F>(&self, mut update: F) -> Result<ConfigRecord, StoreError>
    where
        F: FnMut(&mut ConfigRecord),
    {
        let tree = self.db.open_tree(CONFIG_TREE)?;

        loop {
            let current = tree.get(CONFIG_RECORD_ID)?;
            let mut record: ConfigRecord = match &current {
                Some(bytes) => serde_json::from_slice(bytes)?,
                None => ConfigRecord::default(),
            };
            update(&mut record);
            let encoded = serde_json::to_vec(&record)?;

            if tree
                .compare_and_swap(CONFIG_RECORD_ID, current, Some(encoded))?
                .is_ok()
            {
                tree.flush()?;
                return Ok(record);
            }
            tracing::debug!("Configuration record changed concurrently, retrying update");
        }
    }

    /// Append an entry to the job run log.
    ///
    /// Only the newest [`MAX_RUNS_PER_JOB`] entries of `job` are kept, so a
    /// frequent job never displaces the history of the others.
    ///
    /// # Errors
    ///
    /// Returns error if the entry cannot be written.
    pub fn record_job_run(
        &self,
        job: &str,
        outcome: JobRunOutcome,
        message: impl Into<String>,
        duration_ms: u64,
    ) -> Result<JobRun, StoreError> {
        let log = self.db.open_tree(LOG_TREE)?;
        let index = self.db.open_tree(LOG_INDEX_TREE)?;
        let id = self.db.generate_id()?;

        let run = JobRun {
            id,
            job: job.to_string(),
            timestamp: Utc::now(),
            duration_ms,
            outcome,
            message: message.into(),
        };

        log.insert(id.to_be_bytes(), serde_json::to_vec(&run)?)?;
        index.insert(job_index_key(job, id), &b""[..])?;

        let prefix = job_index_prefix(job);
        let kept = index.scan_prefix(&prefix).count();
        if kept > MAX_RUNS_PER_JOB {
            let expired = index
                .scan_prefix(&prefix)
                .keys()
                .take(kept - MAX_RUNS_PER_JOB)
                .collect::<Result<Vec<_>, _>>()?;

            for key in expired {
                index.remove(&key)?;
                log.remove(&key[prefix.len()..])?;
            }
        }

        Ok(run)
    }

    /// Most recent job runs across all jobs, newest first.
    ///
    /// # Errors
    ///
    /// Returns error if the log cannot be read.
    pub fn job_runs(&self, limit: usize) -> Result<Vec<JobRun>, StoreError> {
        let tree = self.db.open_tree(LOG_TREE)?;
        let mut runs = Vec::new();

        for entry in tree.iter().rev().take(limit) {
            let (_, value) = entry?;
            runs.push(serde_json::from_slice(&value)?);
        }

        Ok(runs)
    }

    /// Most recent runs of a named job, newest first.
    ///
    /// # Errors
    ///
    /// Returns error if the log cannot be read.
    pub fn job_runs_for(&self, job: &str, limit: usize) -> Result<Vec<JobRun>, StoreError> {
        let log = self.db.open_tree(LOG_TREE)?;
        let index = self.db.open_tree(LOG_INDEX_TREE)?;
        let prefix = job_index_prefix(job);
        let mut runs = Vec::new();

        for key in index.scan_prefix(&prefix).keys().rev().take(limit) {
            let key = key?;
            if let Some(value) = log.get(&key[prefix.len()..])? {
                runs.push(serde_json::from_slice(&value)?);
            }
        }

        Ok(runs)
    }

    /// Most recent run of a named job.
    ///
    /// # Errors
    ///
    /// Returns error if the log cannot be read.
    pub fn last_run(&self, job: &str) -> Result<Option<JobRun>, StoreError> {
        Ok(self.job_runs_for(job, 1)?.pop())
    }
}

/// Open the sled database, waiting out a lock still held by a handle that
/// was just dropped.
///
/// sled releases its file lock from background threads, so reopening right
/// after a drop can briefly fail.
fn open_db(path: &Path) -> Result<sled::Db, StoreError> {
    let mut attempt = 1;
    loop {
        match sled::open(path) {
            Err(sled::Error::Io(e)) if attempt < OPEN_ATTEMPTS && is_lock_contention(&e) => {
                tracing::debug!(
                    attempt,
                    path = %path.display(),
                    "Database locked, retrying open"
                );
                std::thread::sleep(OPEN_RETRY_DELAY);
                attempt += 1;
            }
            result => return Ok(result?),
        }
    }
}

fn is_lock_contention(error: &std::io::Error) -> bool {
    error.kind() == std::io::ErrorKind::WouldBlock
        || error.to_string().contains("could not acquire lock")
}

fn job_index_prefix(job: &str) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(job.len() + 1);
    prefix.extend_from_slice(job.as_bytes());
    prefix.push(0);
    prefix
}

pub(crate) fn job_index_key(job: &str, id: u64) -> Vec<u8> {
    let mut key = job_index_prefix(job);
    key.extend_from_slice(&id.to_be_bytes());
    key
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}
