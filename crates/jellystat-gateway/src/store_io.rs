//! Store access from async code.
//!
//! sled reads may hit disk and writes flush, so every call from a handler or
//! job goes through the blocking pool instead of a runtime worker.

use jellystat_core::{Store, StoreError};

/// Run `op` against `store` on the blocking pool.
///
/// # Errors
///
/// Returns the operation's error, or an IO error if the blocking task
/// panicked or was cancelled.
pub(crate) async fn run<T, F>(store: &Store, op: F) -> Result<T, StoreError>
where
    F: FnOnce(&Store) -> Result<T, StoreError> + Send + 'static,
    T: Send + 'static,
{
    let store = store.clone();
    tokio::task::spawn_blocking(move || op(&store))
        .await
        .map_err(|e| StoreError::Io(std::io::Error::other(e)))?
}
