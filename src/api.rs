//! Conversation Persistence API
//!
//! The entry points the UI layer calls: start auto-save, save now, load,
//! resume, delete and list available backups. Everything is owned by one
//! `ConversationPersistence` value built at the composition root; there is
//! no global state.

use crate::config::Settings;
use crate::core::backup::ConversationBackup;
use crate::core::conversation::{ConversationData, ConversationState};
use crate::error::PersistenceResult;
use crate::remote::{HttpDocumentStore, RemoteStore};
use crate::storage::{FileSystemKeyValueStore, KeyValueStore, LocalBackupStore};
use crate::sync::{
    AutoSaveScheduler, Connectivity, FlushReport, SaveReport, SyncCoordinator,
    DEFAULT_AUTOSAVE_INTERVAL,
};
use anyhow::Context;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Duration;

pub struct ConversationPersistence {
    user_id: String,
    coordinator: Arc<SyncCoordinator>,
    scheduler: AutoSaveScheduler,
    autosave_interval: Duration,
}

impl ConversationPersistence {
    pub fn new(user_id: impl Into<String>, coordinator: Arc<SyncCoordinator>) -> Self {
        let scheduler = AutoSaveScheduler::new(Arc::clone(&coordinator));
        Self {
            user_id: user_id.into(),
            coordinator,
            scheduler,
            autosave_interval: DEFAULT_AUTOSAVE_INTERVAL,
        }
    }

    /// Wire explicit stores together
    pub fn with_stores(
        user_id: impl Into<String>,
        local: Arc<dyn KeyValueStore>,
        remote: Arc<dyn RemoteStore>,
    ) -> Self {
        let local = Arc::new(LocalBackupStore::new(local));
        Self::new(user_id, Arc::new(SyncCoordinator::new(local, remote)))
    }

    /// Build the filesystem + HTTP stack described by the settings
    pub async fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let kv = FileSystemKeyValueStore::new(settings.local.storage_dir.clone())
            .await
            .with_context(|| {
                format!(
                    "Failed to open local backup directory {:?}",
                    settings.local.storage_dir
                )
            })?
            .with_quota(settings.local.quota_bytes);
        let local = LocalBackupStore::new(Arc::new(kv))
            .with_key_prefix(settings.local.key_prefix.clone())
            .with_max_backups(settings.local.max_backups);

        let remote = HttpDocumentStore::new(
            settings.remote.base_url.clone(),
            settings.remote.collection.clone(),
            settings.remote_timeout(),
        )
        .context("Failed to build remote document store client")?
        .with_api_key(settings.remote.api_key.clone());

        let coordinator = SyncCoordinator::new(Arc::new(local), Arc::new(remote))
            .with_remote_list_limit(settings.remote.list_limit);

        tracing::info!(
            "Persistence ready for user '{}' (local: {:?}, remote: {})",
            settings.user.id,
            settings.local.storage_dir,
            settings.remote.base_url
        );
        Ok(Self::new(settings.user.id.clone(), Arc::new(coordinator))
            .with_autosave_interval(settings.autosave_interval()))
    }

    pub fn with_autosave_interval(mut self, interval: Duration) -> Self {
        self.autosave_interval = interval;
        self
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn coordinator(&self) -> &Arc<SyncCoordinator> {
        &self.coordinator
    }

    /// Begin auto-saving a conversation; restarts the timer if one is running
    pub async fn start_persistence(&self, conversation_id: &str) {
        self.scheduler
            .start(conversation_id, self.autosave_interval)
            .await;
    }

    pub async fn stop_persistence(&self) {
        self.scheduler.stop().await;
    }

    pub async fn active_conversation(&self) -> Option<String> {
        self.scheduler.active_conversation().await
    }

    /// Persist immediately and make this the snapshot future ticks save
    pub async fn save_now(
        &self,
        data: &ConversationData,
        state: &ConversationState,
    ) -> PersistenceResult<SaveReport> {
        self.scheduler.register(data.clone(), state.clone()).await;
        let report = self
            .coordinator
            .save(data.clone(), state.clone(), false)
            .await?;

        if let Some(message) = report.status_message() {
            tracing::warn!("Conversation '{}': {}", data.id, message);
        }
        Ok(report)
    }

    /// Mark the conversation complete, push it to every store and stop auto-save
    ///
    /// Rejected, with nothing saved, while required product fields are empty.
    pub async fn complete_conversation(
        &self,
        data: &mut ConversationData,
        state: &ConversationState,
    ) -> PersistenceResult<SaveReport> {
        data.mark_completed()?;

        if self.scheduler.active_conversation().await.as_deref() == Some(data.id.as_str()) {
            self.scheduler.stop().await;
        }
        self.scheduler.register(data.clone(), state.clone()).await;

        let report = self
            .coordinator
            .save(data.clone(), state.clone(), true)
            .await?;
        tracing::info!(
            "Conversation '{}' completed at revision {}",
            data.id,
            report.revision
        );
        Ok(report)
    }

    pub async fn load_conversation(
        &self,
        conversation_id: &str,
    ) -> PersistenceResult<Option<ConversationBackup>> {
        self.coordinator.load(conversation_id).await
    }

    /// Load a backup and, if found, continue auto-saving it
    pub async fn resume_conversation(
        &self,
        conversation_id: &str,
    ) -> PersistenceResult<Option<ConversationBackup>> {
        let Some(backup) = self.coordinator.load(conversation_id).await? else {
            tracing::info!("No backup available to resume '{}'", conversation_id);
            return Ok(None);
        };

        self.scheduler
            .register(
                backup.conversation_data.clone(),
                backup.conversation_state.clone(),
            )
            .await;
        self.scheduler
            .start(conversation_id, self.autosave_interval)
            .await;

        tracing::info!(
            "Resumed conversation '{}' at revision {} with {} turns",
            conversation_id,
            backup.revision,
            backup.conversation_data.turns().len()
        );
        Ok(Some(backup))
    }

    /// Delete from both stores and the pending queue
    ///
    /// Remote failures are logged; the local delete always runs.
    pub async fn delete_conversation(&self, conversation_id: &str) -> PersistenceResult<()> {
        if self.scheduler.active_conversation().await.as_deref() == Some(conversation_id) {
            self.scheduler.stop().await;
        }
        self.coordinator.delete(conversation_id).await
    }

    pub async fn load_available_backups(&self) -> PersistenceResult<Vec<ConversationBackup>> {
        self.coordinator.list_all(&self.user_id).await
    }

    pub async fn set_connectivity(&self, connectivity: Connectivity) -> Option<FlushReport> {
        self.coordinator.set_connectivity(connectivity).await
    }

    /// Sender for the runtime's online/offline signal, with its listener task
    pub fn connectivity_sender(&self) -> (watch::Sender<Connectivity>, JoinHandle<()>) {
        let (tx, rx) = watch::channel(self.coordinator.connectivity());
        let listener = self.coordinator.spawn_connectivity_listener(rx);
        (tx, listener)
    }

    /// Stop the timer; queued remote writes stay in memory until dropped
    pub async fn shutdown(&self) {
        self.scheduler.stop().await;
        let pending = self.coordinator.pending_count().await;
        if pending > 0 {
            tracing::warn!(
                "Shutting down with {} conversations not yet synced remotely",
                pending
            );
        }
        let deletes = self.coordinator.pending_deletes().await;
        if !deletes.is_empty() {
            tracing::warn!(
                "Shutting down before remote copies of {} deleted conversations were removed",
                deletes.len()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::conversation::{ConversationStatus, ConversationTurn, ProductInfo};
    use crate::error::PersistenceError;
    use crate::remote::InMemoryRemoteStore;
    use crate::storage::InMemoryKeyValueStore;

    fn persistence() -> (ConversationPersistence, InMemoryKeyValueStore, InMemoryRemoteStore) {
        let kv = InMemoryKeyValueStore::new();
        let remote = InMemoryRemoteStore::new();
        let persistence = ConversationPersistence::with_stores(
            "artisan-1",
            Arc::new(kv.clone()),
            Arc::new(remote.clone()),
        );
        (persistence, kv, remote)
    }

    #[tokio::test]
    async fn test_save_now_then_load() {
        let (persistence, _kv, _remote) = persistence();
        let data = ConversationData::with_id("c1", "artisan-1", "en");

        persistence
            .save_now(&data, &ConversationState::default())
            .await
            .unwrap();
        let loaded = persistence.load_conversation("c1").await.unwrap().unwrap();

        assert_eq!(loaded.conversation_data.id, "c1");
        assert_eq!(loaded.conversation_data.status(), ConversationStatus::InProgress);
    }

    #[tokio::test]
    async fn test_complete_rejects_missing_product_fields() {
        let (persistence, _kv, remote) = persistence();
        let mut data = ConversationData::with_id("c1", "artisan-1", "en");

        let err = persistence
            .complete_conversation(&mut data, &ConversationState::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PersistenceError::IncompleteConversation { .. }));
        assert_eq!(data.status(), ConversationStatus::InProgress);
        assert_eq!(remote.save_calls(), 0);
    }

    #[tokio::test]
    async fn test_complete_force_syncs_while_offline() {
        let (persistence, _kv, remote) = persistence();
        persistence.set_connectivity(Connectivity::Offline).await;

        let mut data = ConversationData::with_id("c1", "artisan-1", "en");
        data.add_turn(ConversationTurn::user_response("Brass lamps", "en"))
            .unwrap();
        data.update_extracted_info(ProductInfo {
            product_type: "Lamp".to_string(),
            materials: ["brass".to_string()].into_iter().collect(),
            colors: ["gold".to_string()].into_iter().collect(),
            crafting_process: "Lost-wax casting".to_string(),
            ..ProductInfo::default()
        })
        .unwrap();

        let report = persistence
            .complete_conversation(&mut data, &ConversationState::default())
            .await
            .unwrap();
        assert!(report.is_synced());

        let doc = remote.document("c1").await.unwrap();
        assert_eq!(doc.conversation.status(), ConversationStatus::Completed);
    }

    #[tokio::test]
    async fn test_resume_missing_conversation_returns_none() {
        let (persistence, _kv, _remote) = persistence();
        assert!(persistence.resume_conversation("nope").await.unwrap().is_none());
        assert!(persistence.active_conversation().await.is_none());
    }

    #[tokio::test]
    async fn test_resume_restarts_autosave() {
        let (persistence, _kv, _remote) = persistence();
        let data = ConversationData::with_id("c1", "artisan-1", "en");
        persistence
            .save_now(&data, &ConversationState::default())
            .await
            .unwrap();

        let resumed = persistence.resume_conversation("c1").await.unwrap().unwrap();
        assert_eq!(resumed.conversation_id(), "c1");
        assert_eq!(persistence.active_conversation().await.as_deref(), Some("c1"));

        persistence.shutdown().await;
        assert!(persistence.active_conversation().await.is_none());
    }

    #[tokio::test]
    async fn test_delete_stops_autosave_and_removes_everywhere() {
        let (persistence, kv, remote) = persistence();
        let data = ConversationData::with_id("c1", "artisan-1", "en");
        persistence
            .save_now(&data, &ConversationState::default())
            .await
            .unwrap();
        persistence.start_persistence("c1").await;

        persistence.delete_conversation("c1").await.unwrap();

        assert!(persistence.active_conversation().await.is_none());
        assert!(!kv.contains("conversation_backup_c1").await.unwrap());
        assert!(remote.document("c1").await.unwrap().deleted);
        assert!(persistence.load_available_backups().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_available_backups_only_for_own_user() {
        let (persistence, _kv, _remote) = persistence();
        let mine = ConversationData::with_id("mine", "artisan-1", "en");
        let theirs = ConversationData::with_id("theirs", "artisan-2", "en");
        persistence
            .save_now(&mine, &ConversationState::default())
            .await
            .unwrap();
        persistence
            .save_now(&theirs, &ConversationState::default())
            .await
            .unwrap();

        let backups = persistence.load_available_backups().await.unwrap();
        assert_eq!(backups.len(), 1);
        assert_eq!(backups[0].conversation_id(), "mine");
    }
}
