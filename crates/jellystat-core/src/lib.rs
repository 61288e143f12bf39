//! # Jellystat Core
//!
//! Configuration and storage for Jellystat.
//!
//! This crate provides:
//! - Configuration loading (JSON5 format) with environment overrides
//! - The signing secret, read once at process start
//! - The sled-backed store: provisioning, ordered migrations, the singleton
//!   configuration record and the background job run log

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod store;

pub use config::{AuthSettings, Config, ConfigError, StartupPolicy};
pub use store::{
    ApiKeyEntry, CONFIG_TREE, ConfigRecord, JobRun, JobRunOutcome, LOG_INDEX_TREE, LOG_TREE,
    MAX_RUNS_PER_JOB, ProvisionOutcome, Store, StoreError,
};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{AuthSettings, Config, StartupPolicy};
    pub use crate::store::{ApiKeyEntry, ConfigRecord, Store};
}
