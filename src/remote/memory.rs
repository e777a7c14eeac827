//! In-Memory Remote Store
//!
//! Information Hiding:
//! - Document map hidden behind the RemoteStore trait
//! - Availability switch simulates network outages for offline testing

use super::{select_for_owner, RemoteDocument, RemoteStore};
use crate::core::backup::ConversationBackup;
use crate::error::{PersistenceError, PersistenceResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Remote store held in process memory
#[derive(Clone)]
pub struct InMemoryRemoteStore {
    documents: Arc<RwLock<HashMap<String, RemoteDocument>>>,
    available: Arc<AtomicBool>,
    save_calls: Arc<AtomicUsize>,
}

impl InMemoryRemoteStore {
    pub fn new() -> Self {
        Self {
            documents: Arc::new(RwLock::new(HashMap::new())),
            available: Arc::new(AtomicBool::new(true)),
            save_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Toggle simulated reachability; while unavailable every call fails
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Raw document including soft-deleted ones
    pub async fn document(&self, conversation_id: &str) -> Option<RemoteDocument> {
        self.documents.read().await.get(conversation_id).cloned()
    }

    /// Seed a document directly, bypassing availability
    pub async fn insert_document(&self, document: RemoteDocument) {
        self.documents
            .write()
            .await
            .insert(document.conversation.id.clone(), document);
    }

    /// Number of save attempts, successful or not
    pub fn save_calls(&self) -> usize {
        self.save_calls.load(Ordering::SeqCst)
    }

    fn ensure_available(&self) -> PersistenceResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(PersistenceError::RemoteUnavailable(
                "in-memory remote store is offline".to_string(),
            ))
        }
    }
}

impl Default for InMemoryRemoteStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteStore for InMemoryRemoteStore {
    async fn save(&self, backup: &ConversationBackup) -> PersistenceResult<()> {
        self.save_calls.fetch_add(1, Ordering::SeqCst);
        self.ensure_available()?;

        let mut documents = self.documents.write().await;
        documents.insert(
            backup.conversation_id().to_string(),
            RemoteDocument::from_backup(backup),
        );
        tracing::debug!(
            "[InMemoryRemoteStore] Upserted '{}' at revision {}",
            backup.conversation_id(),
            backup.revision
        );
        Ok(())
    }

    async fn load(&self, conversation_id: &str) -> PersistenceResult<Option<ConversationBackup>> {
        self.ensure_available()?;

        let documents = self.documents.read().await;
        Ok(documents
            .get(conversation_id)
            .filter(|doc| !doc.deleted)
            .cloned()
            .map(RemoteDocument::into_backup))
    }

    async fn list_all(
        &self,
        user_id: &str,
        limit: usize,
    ) -> PersistenceResult<Vec<ConversationBackup>> {
        self.ensure_available()?;

        let documents = self.documents.read().await;
        Ok(select_for_owner(documents.values().cloned(), user_id, limit))
    }

    async fn delete(&self, conversation_id: &str) -> PersistenceResult<()> {
        self.ensure_available()?;

        let mut documents = self.documents.write().await;
        if let Some(doc) = documents.get_mut(conversation_id) {
            doc.mark_deleted();
            tracing::debug!("[InMemoryRemoteStore] Soft-deleted '{}'", conversation_id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::conversation::{ConversationData, ConversationState};

    fn backup(id: &str) -> ConversationBackup {
        ConversationBackup::new(
            ConversationData::with_id(id, "artisan-1", "en"),
            ConversationState::default(),
            1,
        )
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let store = InMemoryRemoteStore::new();
        store.save(&backup("c1")).await.unwrap();

        let loaded = store.load("c1").await.unwrap().unwrap();
        assert_eq!(loaded.conversation_id(), "c1");
        assert!(store.load("c2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_every_call() {
        let store = InMemoryRemoteStore::new();
        store.set_available(false);

        assert!(store.save(&backup("c1")).await.unwrap_err().is_remote_unavailable());
        assert!(store.load("c1").await.unwrap_err().is_remote_unavailable());
        assert!(store.list_all("artisan-1", 10).await.is_err());
        assert!(store.delete("c1").await.is_err());
        assert_eq!(store.save_calls(), 1);
    }

    #[tokio::test]
    async fn test_delete_is_soft() {
        let store = InMemoryRemoteStore::new();
        store.save(&backup("c1")).await.unwrap();
        store.delete("c1").await.unwrap();
        store.delete("never-existed").await.unwrap();

        assert!(store.load("c1").await.unwrap().is_none());
        assert!(store.list_all("artisan-1", 10).await.unwrap().is_empty());

        let doc = store.document("c1").await.unwrap();
        assert!(doc.deleted);
        assert!(doc.deleted_at.is_some());
    }
}
