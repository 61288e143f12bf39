//! Ordered schema migrations.

use super::{
    CONFIG_RECORD_ID, CONFIG_TREE, ConfigRecord, JobRun, LOG_INDEX_TREE, LOG_TREE, META_TREE,
    StoreError, job_index_key,
};

const SCHEMA_VERSION_KEY: &[u8] = b"schema_version";

/// A single schema migration.
pub struct Migration {
    /// Version number; migrations run in ascending order.
    pub version: u64,
    /// Short name used in logs.
    pub name: &'static str,
    apply: fn(&sled::Db) -> Result<(), StoreError>,
}

impl std::fmt::Debug for Migration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Migration")
            .field("version", &self.version)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// All migrations, in the order they must be applied.
pub static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "create_app_config",
        apply: create_app_config,
    },
    Migration {
        version: 2,
        name: "create_activity_log",
        apply: create_activity_log,
    },
    Migration {
        version: 3,
        name: "index_activity_log",
        apply: index_activity_log,
    },
];

fn create_app_config(db: &sled::Db) -> Result<(), StoreError> {
    let tree = db.open_tree(CONFIG_TREE)?;
    let record = serde_json::to_vec(&ConfigRecord::default())?;
    // Leave an existing record alone.
    let _ = tree.compare_and_swap(CONFIG_RECORD_ID, None::<&[u8]>, Some(record))?;
    Ok(())
}

fn create_activity_log(db: &sled::Db) -> Result<(), StoreError> {
    db.open_tree(LOG_TREE)?;
    Ok(())
}

fn index_activity_log(db: &sled::Db) -> Result<(), StoreError> {
    let log = db.open_tree(LOG_TREE)?;
    let index = db.open_tree(LOG_INDEX_TREE)?;

    for entry in log.iter() {
        let (_, value) = entry?;
        let run: JobRun = serde_json::from_slice(&value)?;
        index.insert(job_index_key(&run.job, run.id), &b""[..])?;
    }
    Ok(())
}

pub(super) fn current_version(db: &sled::Db) -> Result<u64, StoreError> {
    let meta = db.open_tree(META_TREE)?;
    match meta.get(SCHEMA_VERSION_KEY)? {
        Some(bytes) => {
            let raw: [u8; 8] = bytes.as_ref().try_into().map_err(|_| {
                StoreError::Corrupt(format!("schema version has {} bytes", bytes.len()))
            })?;
            Ok(u64::from_be_bytes(raw))
        }
        None => Ok(0),
    }
}

pub(super) fn apply_pending(
    db: &sled::Db,
    migrations: &[Migration],
) -> Result<Vec<&'static str>, StoreError> {
    let meta = db.open_tree(META_TREE)?;
    let version = current_version(db)?;
    let mut applied = Vec::new();

    for migration in migrations.iter().filter(|m| m.version > version) {
        tracing::info!(
            version = migration.version,
            name = migration.name,
            "Applying migration"
        );

        (migration.apply)(db).map_err(|e| StoreError::Migration {
            version: migration.version,
            name: migration.name,
            reason: e.to_string(),
        })?;

        meta.insert(SCHEMA_VERSION_KEY, &migration.version.to_be_bytes()[..])?;
        db.flush()?;

        applied.push(migration.name);
    }

    if applied.is_empty() {
        tracing::debug!(version, "Schema up to date");
    }

    Ok(applied)
}
