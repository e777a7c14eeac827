//! Local Key-Value Storage Abstraction
//!
//! Information Hiding:
//! - Storage backend implementation details hidden behind trait
//! - Allows swapping between memory and filesystem without touching the backup store
//! - Each backend enforces its own byte quota and reports QuotaExceeded uniformly

use crate::error::{PersistenceError, PersistenceResult};
use async_trait::async_trait;

pub mod filesystem;
pub mod local;
pub mod memory;

pub use filesystem::FileSystemKeyValueStore;
pub use local::{LocalBackupStore, LocalSaveOutcome};
pub use memory::InMemoryKeyValueStore;

/// String key-value space with an optional capacity limit
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read a value; `None` if the key is absent
    async fn get(&self, key: &str) -> PersistenceResult<Option<String>>;

    /// Write a value, replacing any previous one
    /// Fails with `QuotaExceeded` when the write does not fit
    async fn set(&self, key: &str, value: &str) -> PersistenceResult<()>;

    /// Remove a key; absent keys are not an error
    async fn remove(&self, key: &str) -> PersistenceResult<()>;

    /// List every key currently stored
    async fn keys(&self) -> PersistenceResult<Vec<String>>;

    /// Check if a key exists
    async fn contains(&self, key: &str) -> PersistenceResult<bool> {
        Ok(self.get(key).await?.is_some())
    }
}

/// Any non-empty key without NUL is accepted; backends escape the rest
pub(crate) fn validate_key(key: &str) -> PersistenceResult<()> {
    if !key.is_empty() && !key.contains('\0') {
        Ok(())
    } else {
        Err(PersistenceError::InvalidKey(key.to_string()))
    }
}

/// Fails unless `required` bytes fit once the `previous` value for the key is dropped
pub(crate) fn check_quota(
    key: &str,
    quota: Option<usize>,
    used: usize,
    previous: usize,
    required: usize,
) -> PersistenceResult<()> {
    let Some(quota) = quota else {
        return Ok(());
    };

    let available = quota.saturating_sub(used.saturating_sub(previous));
    if required > available {
        return Err(PersistenceError::QuotaExceeded {
            key: key.to_string(),
            required,
            available,
        });
    }
    Ok(())
}
