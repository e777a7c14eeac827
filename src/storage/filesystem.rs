//! File System Key-Value Storage
//!
//! Information Hiding:
//! - File paths and on-disk layout hidden from users
//! - Directory structure management hidden behind interface
//! - Quota accounting done by scanning file sizes
//! - Keys percent-encoded into file names, so any key maps to one file inside base_path

use super::{check_quota, validate_key, KeyValueStore};
use crate::error::PersistenceResult;
use async_trait::async_trait;
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use std::path::PathBuf;
use tokio::fs;

const ENTRY_EXTENSION: &str = "json";

/// Everything except `[A-Za-z0-9_-]` is escaped, including `.` and `/`
const FILE_NAME: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_');

fn encode_key(key: &str) -> String {
    utf8_percent_encode(key, FILE_NAME).to_string()
}

fn decode_key(file_stem: &str) -> Option<String> {
    percent_decode_str(file_stem)
        .decode_utf8()
        .ok()
        .map(|key| key.into_owned())
}

/// File system storage - each key is a file
/// Files are stored as {base_path}/{encoded key}.json
pub struct FileSystemKeyValueStore {
    base_path: PathBuf,
    quota_bytes: Option<usize>,
}

impl FileSystemKeyValueStore {
    pub async fn new(base_path: PathBuf) -> PersistenceResult<Self> {
        fs::create_dir_all(&base_path).await?;
        Ok(Self {
            base_path,
            quota_bytes: None,
        })
    }

    pub fn with_quota(mut self, quota_bytes: Option<usize>) -> Self {
        self.quota_bytes = quota_bytes;
        self
    }

    pub fn base_path(&self) -> &PathBuf {
        &self.base_path
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.base_path
            .join(format!("{}.{}", encode_key(key), ENTRY_EXTENSION))
    }

    async fn used_bytes(&self) -> PersistenceResult<usize> {
        let mut used = 0usize;
        let mut entries = fs::read_dir(&self.base_path).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) == Some(ENTRY_EXTENSION) {
                used += entry.metadata().await?.len() as usize;
            }
        }
        Ok(used)
    }
}

#[async_trait]
impl KeyValueStore for FileSystemKeyValueStore {
    async fn get(&self, key: &str) -> PersistenceResult<Option<String>> {
        validate_key(key)?;
        let path = self.entry_path(key);

        match fs::read_to_string(&path).await {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set(&self, key: &str, value: &str) -> PersistenceResult<()> {
        validate_key(key)?;
        let path = self.entry_path(key);

        if self.quota_bytes.is_some() {
            let used = self.used_bytes().await?;
            let previous = match fs::metadata(&path).await {
                Ok(meta) => meta.len() as usize,
                Err(_) => 0,
            };
            check_quota(key, self.quota_bytes, used, previous, value.len())?;
        }

        // Write then rename so a crash never leaves a half-written entry
        let tmp_path = self.base_path.join(format!(".{}.tmp", encode_key(key)));
        fs::write(&tmp_path, value).await?;
        fs::rename(&tmp_path, &path).await?;

        tracing::debug!(
            "[FileSystemKeyValueStore] Wrote {} bytes for '{}' to {:?}",
            value.len(),
            key,
            path
        );
        Ok(())
    }

    async fn remove(&self, key: &str) -> PersistenceResult<()> {
        validate_key(key)?;
        let path = self.entry_path(key);

        match fs::remove_file(&path).await {
            Ok(()) => {
                tracing::debug!("[FileSystemKeyValueStore] Deleted '{}' at {:?}", key, path);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(
                    "[FileSystemKeyValueStore] '{}' does not exist, nothing to delete",
                    key
                );
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn keys(&self) -> PersistenceResult<Vec<String>> {
        let mut keys = Vec::new();
        let mut entries = fs::read_dir(&self.base_path).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) == Some(ENTRY_EXTENSION) {
                let key = path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .and_then(decode_key);
                match key {
                    Some(key) if validate_key(&key).is_ok() => keys.push(key),
                    _ => tracing::debug!(
                        "[FileSystemKeyValueStore] Skipping unrecognised file {:?}",
                        path
                    ),
                }
            }
        }

        tracing::debug!("[FileSystemKeyValueStore] Listed {} keys", keys.len());
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PersistenceError;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_set_and_get() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileSystemKeyValueStore::new(temp_dir.path().to_path_buf())
            .await
            .unwrap();

        store.set("conversation_backup_c1", "{\"a\":1}").await.unwrap();
        let loaded = store.get("conversation_backup_c1").await.unwrap();
        assert_eq!(loaded.as_deref(), Some("{\"a\":1}"));
        assert!(temp_dir.path().join("conversation_backup_c1.json").exists());
    }

    #[tokio::test]
    async fn test_get_nonexistent_key() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileSystemKeyValueStore::new(temp_dir.path().to_path_buf())
            .await
            .unwrap();

        assert!(store.get("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_remove_missing_key_is_ok() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileSystemKeyValueStore::new(temp_dir.path().to_path_buf())
            .await
            .unwrap();

        store.set("k", "v").await.unwrap();
        store.remove("k").await.unwrap();
        store.remove("k").await.unwrap();
        assert!(!store.contains("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_rejects_empty_key() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileSystemKeyValueStore::new(temp_dir.path().to_path_buf())
            .await
            .unwrap();

        let err = store.set("", "v").await.unwrap_err();
        assert!(matches!(err, PersistenceError::InvalidKey(_)));
    }

    #[tokio::test]
    async fn test_path_like_keys_stay_inside_base_dir() {
        let outer = TempDir::new().unwrap();
        let base = outer.path().join("store");
        let store = FileSystemKeyValueStore::new(base.clone()).await.unwrap();

        store.set("../outside", "v").await.unwrap();

        assert!(!outer.path().join("outside.json").exists());
        assert_eq!(std::fs::read_dir(&base).unwrap().count(), 1);
        assert_eq!(store.get("../outside").await.unwrap().as_deref(), Some("v"));
        assert_eq!(store.keys().await.unwrap(), vec!["../outside".to_string()]);
    }

    #[tokio::test]
    async fn test_keys_with_spaces_and_slashes_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileSystemKeyValueStore::new(temp_dir.path().to_path_buf())
            .await
            .unwrap();

        let key = "conversation_backup_chat 1/draft?v=2";
        store.set(key, "{}").await.unwrap();
        assert_eq!(store.get(key).await.unwrap().as_deref(), Some("{}"));
        assert_eq!(store.keys().await.unwrap(), vec![key.to_string()]);

        store.remove(key).await.unwrap();
        store.remove(key).await.unwrap();
        assert!(store.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_plain_keys_keep_readable_file_names() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileSystemKeyValueStore::new(temp_dir.path().to_path_buf())
            .await
            .unwrap();

        store.set("conversation_backup_3f2a-11", "{}").await.unwrap();
        store.set("a.b", "{}").await.unwrap();
        assert!(temp_dir.path().join("conversation_backup_3f2a-11.json").exists());
        assert!(temp_dir.path().join("a%2Eb.json").exists());
    }

    #[tokio::test]
    async fn test_quota_exceeded() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileSystemKeyValueStore::new(temp_dir.path().to_path_buf())
            .await
            .unwrap()
            .with_quota(Some(16));

        store.set("a", "0123456789").await.unwrap();
        let err = store.set("b", "0123456789").await.unwrap_err();
        assert!(err.is_quota_exceeded());
        assert!(store.get("b").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_persistence_across_instances() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().to_path_buf();

        {
            let store = FileSystemKeyValueStore::new(path.clone()).await.unwrap();
            store.set("persist-test", "kept").await.unwrap();
        }

        {
            let store = FileSystemKeyValueStore::new(path).await.unwrap();
            assert_eq!(store.get("persist-test").await.unwrap().as_deref(), Some("kept"));
            assert_eq!(store.keys().await.unwrap(), vec!["persist-test".to_string()]);
        }
    }
}
