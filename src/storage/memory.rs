//! In-Memory Key-Value Storage
//!
//! Information Hiding:
//! - HashMap storage structure hidden from users
//! - Thread-safe access via RwLock hidden behind async interface
//! - Suitable for testing and ephemeral sessions

use super::{check_quota, KeyValueStore};
use crate::error::PersistenceResult;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// In-memory key-value space using HashMap
/// Data is lost when process terminates
#[derive(Clone)]
pub struct InMemoryKeyValueStore {
    entries: Arc<RwLock<HashMap<String, String>>>,
    quota_bytes: Option<usize>,
}

impl InMemoryKeyValueStore {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            quota_bytes: None,
        }
    }

    /// Limit the total size of stored values, like a browser storage quota
    pub fn with_quota(mut self, quota_bytes: usize) -> Self {
        self.quota_bytes = Some(quota_bytes);
        self
    }

    pub async fn used_bytes(&self) -> usize {
        self.entries.read().await.values().map(String::len).sum()
    }
}

impl Default for InMemoryKeyValueStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyValueStore for InMemoryKeyValueStore {
    async fn get(&self, key: &str) -> PersistenceResult<Option<String>> {
        let entries = self.entries.read().await;
        Ok(entries.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> PersistenceResult<()> {
        let mut entries = self.entries.write().await;
        let used: usize = entries.values().map(String::len).sum();
        let previous = entries.get(key).map(String::len).unwrap_or(0);
        check_quota(key, self.quota_bytes, used, previous, value.len())?;

        entries.insert(key.to_string(), value.to_string());
        tracing::trace!("[InMemoryKeyValueStore] Stored {} bytes under '{}'", value.len(), key);
        Ok(())
    }

    async fn remove(&self, key: &str) -> PersistenceResult<()> {
        let mut entries = self.entries.write().await;
        entries.remove(key);
        tracing::trace!("[InMemoryKeyValueStore] Removed '{}'", key);
        Ok(())
    }

    async fn keys(&self) -> PersistenceResult<Vec<String>> {
        let entries = self.entries.read().await;
        Ok(entries.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PersistenceError;

    #[tokio::test]
    async fn test_set_and_get() {
        let store = InMemoryKeyValueStore::new();
        store.set("greeting", "namaste").await.unwrap();

        assert_eq!(store.get("greeting").await.unwrap().as_deref(), Some("namaste"));
        assert!(store.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let store = InMemoryKeyValueStore::new();
        store.set("k", "v").await.unwrap();

        store.remove("k").await.unwrap();
        store.remove("k").await.unwrap();
        assert!(!store.contains("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_quota_rejects_oversized_write() {
        let store = InMemoryKeyValueStore::new().with_quota(10);
        store.set("a", "12345").await.unwrap();

        let err = store.set("b", "1234567").await.unwrap_err();
        assert!(matches!(err, PersistenceError::QuotaExceeded { .. }));
        assert!(store.get("b").await.unwrap().is_none());

        // Replacing an existing value only needs room for the difference
        store.set("a", "1234567890").await.unwrap();
        assert_eq!(store.used_bytes().await, 10);
    }

    #[tokio::test]
    async fn test_list_keys() {
        let store = InMemoryKeyValueStore::new();
        store.set("key-1", "x").await.unwrap();
        store.set("key-2", "y").await.unwrap();

        let keys = store.keys().await.unwrap();
        assert_eq!(keys.len(), 2);
        assert!(keys.contains(&"key-1".to_string()));
        assert!(keys.contains(&"key-2".to_string()));
    }
}
