//! Sync Coordinator
//!
//! Information Hiding:
//! - Local/remote dual write and fallback reads hidden behind save/load
//! - Pending-update queue and revision table owned here, never exposed mutably
//! - Deletes that could not reach the remote store kept as tombstones until flushed
//! - Per-conversation locking keeps saves for one id from interleaving

use super::Connectivity;
use crate::core::backup::{self, ConversationBackup};
use crate::core::conversation::{ConversationData, ConversationState};
use crate::error::PersistenceResult;
use crate::remote::RemoteStore;
use crate::storage::{LocalBackupStore, LocalSaveOutcome};
use futures::future::join_all;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;

pub const DEFAULT_REMOTE_LIST_LIMIT: usize = 50;

pub const OFFLINE_MESSAGE: &str =
    "Your conversation is saved locally and will sync when you're back online";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteSaveOutcome {
    Synced,
    /// Held in the pending queue until the next reconnect
    Queued { reason: String },
}

/// Result of one save through the coordinator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveReport {
    pub conversation_id: String,
    pub revision: u64,
    pub local: LocalSaveOutcome,
    pub remote: RemoteSaveOutcome,
}

impl SaveReport {
    pub fn is_synced(&self) -> bool {
        self.remote == RemoteSaveOutcome::Synced
    }

    /// False when neither store kept the snapshot; only the in-memory queue has it
    pub fn is_durable(&self) -> bool {
        self.local.is_stored() || self.is_synced()
    }

    /// Message for the user when the save is degraded, `None` when fully synced
    pub fn status_message(&self) -> Option<&'static str> {
        match (self.is_synced(), self.is_durable()) {
            (true, _) => None,
            (false, true) => Some(OFFLINE_MESSAGE),
            (false, false) => Some(
                "Your conversation could not be saved on this device or online; keep this screen open until you're back online",
            ),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub synced: Vec<String>,
    /// Remote copies removed for conversations deleted while unreachable
    pub deleted: Vec<String>,
    pub failed: Vec<String>,
}

impl FlushReport {
    pub fn is_empty(&self) -> bool {
        self.synced.is_empty() && self.deleted.is_empty() && self.failed.is_empty()
    }
}

/// Reconciles the local and remote stores and owns the pending-update queue
pub struct SyncCoordinator {
    local: Arc<LocalBackupStore>,
    remote: Arc<dyn RemoteStore>,
    online: AtomicBool,
    pending: RwLock<HashMap<String, ConversationBackup>>,
    tombstones: RwLock<HashSet<String>>,
    revisions: Mutex<HashMap<String, u64>>,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    remote_list_limit: usize,
}

impl SyncCoordinator {
    pub fn new(local: Arc<LocalBackupStore>, remote: Arc<dyn RemoteStore>) -> Self {
        Self {
            local,
            remote,
            online: AtomicBool::new(true),
            pending: RwLock::new(HashMap::new()),
            tombstones: RwLock::new(HashSet::new()),
            revisions: Mutex::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
            remote_list_limit: DEFAULT_REMOTE_LIST_LIMIT,
        }
    }

    pub fn with_connectivity(self, connectivity: Connectivity) -> Self {
        self.online
            .store(connectivity == Connectivity::Online, Ordering::SeqCst);
        self
    }

    pub fn with_remote_list_limit(mut self, limit: usize) -> Self {
        self.remote_list_limit = limit.max(1);
        self
    }

    pub fn local(&self) -> &Arc<LocalBackupStore> {
        &self.local
    }

    pub fn remote(&self) -> &Arc<dyn RemoteStore> {
        &self.remote
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    pub fn connectivity(&self) -> Connectivity {
        if self.is_online() {
            Connectivity::Online
        } else {
            Connectivity::Offline
        }
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.read().await.len()
    }

    pub async fn pending_ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.pending.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Deleted conversations whose remote copy is still waiting to be removed
    pub async fn pending_deletes(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.tombstones.read().await.iter().cloned().collect();
        ids.sort();
        ids
    }

    /// Snapshot and persist a conversation
    ///
    /// Always writes locally first. The remote write is attempted when online
    /// or when `force` is set; failures and offline saves land in the
    /// pending queue, replacing any older entry for the same id.
    pub async fn save(
        &self,
        data: ConversationData,
        state: ConversationState,
        force: bool,
    ) -> PersistenceResult<SaveReport> {
        let conversation_id = data.id.clone();
        let lock = self.conversation_lock(&conversation_id).await;
        let _guard = lock.lock().await;

        // Saving again after a delete brings the conversation back
        if self.tombstones.write().await.remove(&conversation_id) {
            tracing::info!(
                "[SyncCoordinator] '{}' saved again after delete, dropping its tombstone",
                conversation_id
            );
        }

        let revision = self.next_revision(&conversation_id).await;
        let backup = ConversationBackup::new(data, state, revision);

        let local = match self.local.save(&backup).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(
                    "[SyncCoordinator] Local save of '{}' failed: {}",
                    conversation_id,
                    e
                );
                LocalSaveOutcome::Dropped
            }
        };

        let remote = if self.is_online() || force {
            match self.remote.save(&backup).await {
                Ok(()) => {
                    self.pending.write().await.remove(&conversation_id);
                    RemoteSaveOutcome::Synced
                }
                Err(e) => {
                    tracing::warn!(
                        "[SyncCoordinator] Remote save of '{}' failed, queuing: {}",
                        conversation_id,
                        e
                    );
                    let reason = e.to_string();
                    self.enqueue(backup).await;
                    RemoteSaveOutcome::Queued { reason }
                }
            }
        } else {
            tracing::debug!(
                "[SyncCoordinator] Offline, queuing revision {} of '{}'",
                revision,
                conversation_id
            );
            self.enqueue(backup).await;
            RemoteSaveOutcome::Queued {
                reason: "offline".to_string(),
            }
        };

        let report = SaveReport {
            conversation_id,
            revision,
            local,
            remote,
        };
        if !report.is_durable() {
            tracing::error!(
                "[SyncCoordinator] Revision {} of '{}' is only held in memory",
                report.revision,
                report.conversation_id
            );
        }
        Ok(report)
    }

    /// Load the newest available backup; local copy when offline or the remote fails
    pub async fn load(&self, conversation_id: &str) -> PersistenceResult<Option<ConversationBackup>> {
        let local = match self.local.load(conversation_id).await {
            Ok(local) => local,
            Err(e) => {
                tracing::warn!(
                    "[SyncCoordinator] Local load of '{}' failed: {}",
                    conversation_id,
                    e
                );
                None
            }
        };

        let deleted = self.tombstones.read().await.contains(conversation_id);
        let chosen = if self.is_online() && !deleted {
            match self.remote.load(conversation_id).await {
                Ok(Some(remote)) => match local {
                    Some(local) if local.supersedes(&remote) => Some(local),
                    _ => Some(remote),
                },
                Ok(None) => local,
                Err(e) => {
                    tracing::warn!(
                        "[SyncCoordinator] Remote load of '{}' failed, using local copy: {}",
                        conversation_id,
                        e
                    );
                    local
                }
            }
        } else {
            local
        };

        if let Some(backup) = &chosen {
            self.observe_revision(conversation_id, backup.revision).await;
        }
        Ok(chosen)
    }

    /// Local and remote backups for a user merged by id, newest first
    pub async fn list_all(&self, user_id: &str) -> PersistenceResult<Vec<ConversationBackup>> {
        let mut merged: HashMap<String, ConversationBackup> = HashMap::new();

        match self.local.list_all().await {
            Ok(backups) => {
                for backup in backups
                    .into_iter()
                    .filter(|b| b.conversation_data.user_id == user_id)
                {
                    merged.insert(backup.conversation_id().to_string(), backup);
                }
            }
            Err(e) => tracing::warn!("[SyncCoordinator] Listing local backups failed: {}", e),
        }

        if self.is_online() {
            match self.remote.list_all(user_id, self.remote_list_limit).await {
                Ok(backups) => {
                    let tombstones = self.tombstones.read().await;
                    for remote in backups
                        .into_iter()
                        .filter(|b| !tombstones.contains(b.conversation_id()))
                    {
                        let keep_local = merged
                            .get(remote.conversation_id())
                            .is_some_and(|local| local.supersedes(&remote));
                        if !keep_local {
                            merged.insert(remote.conversation_id().to_string(), remote);
                        }
                    }
                }
                Err(e) => tracing::warn!(
                    "[SyncCoordinator] Listing remote backups failed, showing local only: {}",
                    e
                ),
            }
        }

        let mut backups: Vec<_> = merged.into_values().collect();
        backup::sort_newest_first(&mut backups);
        Ok(backups)
    }

    /// Remove a conversation everywhere; only local failures are returned
    ///
    /// The remote copy is deleted right away when online. Offline, or when
    /// the remote call fails, a tombstone hides the id from loads and
    /// listings until the next flush removes the remote copy.
    pub async fn delete(&self, conversation_id: &str) -> PersistenceResult<()> {
        let lock = self.conversation_lock(conversation_id).await;
        let guard = lock.lock().await;

        self.local.delete(conversation_id).await?;
        self.pending.write().await.remove(conversation_id);
        self.revisions.lock().await.remove(conversation_id);

        let remote_deleted = if self.is_online() {
            match self.remote.delete(conversation_id).await {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!(
                        "[SyncCoordinator] Remote delete of '{}' failed, keeping a tombstone: {}",
                        conversation_id,
                        e
                    );
                    false
                }
            }
        } else {
            tracing::debug!(
                "[SyncCoordinator] Offline, remote delete of '{}' deferred",
                conversation_id
            );
            false
        };

        if remote_deleted {
            self.tombstones.write().await.remove(conversation_id);
        } else {
            self.tombstones
                .write()
                .await
                .insert(conversation_id.to_string());
        }

        self.release_lock(conversation_id, &lock).await;
        drop(guard);

        tracing::info!("[SyncCoordinator] Deleted conversation '{}'", conversation_id);
        Ok(())
    }

    /// Apply a connectivity change; going online flushes the pending queue
    pub async fn set_connectivity(&self, connectivity: Connectivity) -> Option<FlushReport> {
        let now_online = connectivity == Connectivity::Online;
        let was_online = self.online.swap(now_online, Ordering::SeqCst);

        if now_online == was_online {
            return None;
        }

        if now_online {
            tracing::info!("[SyncCoordinator] Back online, flushing pending updates");
            Some(self.flush_pending().await)
        } else {
            tracing::info!("[SyncCoordinator] Offline, remote writes will be queued");
            None
        }
    }

    /// Retry every queued remote write and deferred delete once; failures stay queued
    pub async fn flush_pending(&self) -> FlushReport {
        let ids: Vec<String> = self.pending.read().await.keys().cloned().collect();
        let attempts = ids.into_iter().map(|id| async move {
            let synced = self.flush_one(&id).await;
            (id, synced)
        });

        let mut report = FlushReport::default();
        for (id, synced) in join_all(attempts).await {
            match synced {
                Some(true) => report.synced.push(id),
                Some(false) => report.failed.push(id),
                None => {}
            }
        }

        let deleted: Vec<String> = self.tombstones.read().await.iter().cloned().collect();
        let deletes = deleted.into_iter().map(|id| async move {
            let removed = self.flush_tombstone(&id).await;
            (id, removed)
        });
        for (id, removed) in join_all(deletes).await {
            match removed {
                Some(true) => report.deleted.push(id),
                Some(false) => report.failed.push(id),
                None => {}
            }
        }

        report.synced.sort();
        report.deleted.sort();
        report.failed.sort();

        tracing::info!(
            "[SyncCoordinator] Flush complete: {} synced, {} deleted, {} still pending",
            report.synced.len(),
            report.deleted.len(),
            report.failed.len()
        );
        report
    }

    /// Push every local backup owned by `user_id` to the remote store, regardless of the queue
    pub async fn push_local_backups(&self, user_id: &str) -> PersistenceResult<FlushReport> {
        let mut report = FlushReport::default();

        for backup in self
            .local
            .list_all()
            .await?
            .into_iter()
            .filter(|b| b.conversation_data.user_id == user_id)
        {
            let id = backup.conversation_id().to_string();
            match self.remote.save(&backup).await {
                Ok(()) => {
                    self.pending.write().await.remove(&id);
                    report.synced.push(id);
                }
                Err(e) => {
                    tracing::warn!("[SyncCoordinator] Pushing '{}' failed: {}", id, e);
                    report.failed.push(id);
                }
            }
        }
        Ok(report)
    }

    /// Merge a backup written by another process into the local store
    ///
    /// The incoming snapshot replaces the local one only if it supersedes
    /// it. Returns whether it was applied.
    pub async fn reconcile(&self, incoming: ConversationBackup) -> PersistenceResult<bool> {
        let conversation_id = incoming.conversation_id().to_string();
        let lock = self.conversation_lock(&conversation_id).await;
        let _guard = lock.lock().await;

        let current = self.local.load(&conversation_id).await?;
        if current.is_some_and(|current| !incoming.supersedes(&current)) {
            tracing::debug!(
                "[SyncCoordinator] Ignoring stale external revision {} of '{}'",
                incoming.revision,
                conversation_id
            );
            return Ok(false);
        }

        let outcome = self.local.save(&incoming).await?;
        if !outcome.is_stored() {
            tracing::warn!(
                "[SyncCoordinator] External revision {} of '{}' could not be stored locally",
                incoming.revision,
                conversation_id
            );
            return Ok(false);
        }
        self.observe_revision(&conversation_id, incoming.revision).await;

        let mut pending = self.pending.write().await;
        if pending
            .get(&conversation_id)
            .is_some_and(|queued| incoming.supersedes(queued))
        {
            pending.remove(&conversation_id);
        }

        tracing::info!(
            "[SyncCoordinator] Applied external revision {} of '{}'",
            incoming.revision,
            conversation_id
        );
        Ok(true)
    }

    /// Follow a runtime connectivity signal until its sender is dropped
    pub fn spawn_connectivity_listener(
        self: &Arc<Self>,
        mut signal: watch::Receiver<Connectivity>,
    ) -> JoinHandle<()> {
        let coordinator = Arc::clone(self);
        tokio::spawn(async move {
            tracing::info!("[SyncCoordinator] Connectivity listener started");

            let initial = *signal.borrow_and_update();
            coordinator.set_connectivity(initial).await;

            while signal.changed().await.is_ok() {
                let connectivity = *signal.borrow_and_update();
                if let Some(report) = coordinator.set_connectivity(connectivity).await {
                    if !report.failed.is_empty() {
                        tracing::warn!(
                            "[SyncCoordinator] {} conversations still waiting to sync",
                            report.failed.len()
                        );
                    }
                }
            }

            tracing::info!("[SyncCoordinator] Connectivity signal closed, listener stopping");
        })
    }

    /// `None` if the entry was already gone, otherwise whether the retry succeeded
    async fn flush_one(&self, conversation_id: &str) -> Option<bool> {
        let lock = self.conversation_lock(conversation_id).await;
        let _guard = lock.lock().await;

        let queued = self.pending.read().await.get(conversation_id).cloned()?;
        match self.remote.save(&queued).await {
            Ok(()) => {
                self.pending.write().await.remove(conversation_id);
                tracing::debug!(
                    "[SyncCoordinator] Synced queued revision {} of '{}'",
                    queued.revision,
                    conversation_id
                );
                Some(true)
            }
            Err(e) => {
                tracing::warn!(
                    "[SyncCoordinator] Retry of '{}' failed, keeping it queued: {}",
                    conversation_id,
                    e
                );
                Some(false)
            }
        }
    }

    /// `None` if the tombstone was already gone, otherwise whether the remote delete succeeded
    async fn flush_tombstone(&self, conversation_id: &str) -> Option<bool> {
        let lock = self.conversation_lock(conversation_id).await;
        let _guard = lock.lock().await;

        if !self.tombstones.read().await.contains(conversation_id) {
            return None;
        }
        match self.remote.delete(conversation_id).await {
            Ok(()) => {
                self.tombstones.write().await.remove(conversation_id);
                tracing::debug!(
                    "[SyncCoordinator] Removed remote copy of deleted '{}'",
                    conversation_id
                );
                Some(true)
            }
            Err(e) => {
                tracing::warn!(
                    "[SyncCoordinator] Deferred delete of '{}' failed again: {}",
                    conversation_id,
                    e
                );
                Some(false)
            }
        }
    }

    async fn enqueue(&self, backup: ConversationBackup) {
        let mut pending = self.pending.write().await;
        pending.insert(backup.conversation_id().to_string(), backup);
    }

    async fn conversation_lock(&self, conversation_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        Arc::clone(
            locks
                .entry(conversation_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }

    /// Drop the lock entry for an id unless another task is waiting on it
    async fn release_lock(&self, conversation_id: &str, lock: &Arc<Mutex<()>>) {
        let mut locks = self.locks.lock().await;
        // One reference in the map, one held by the caller
        let unshared = locks
            .get(conversation_id)
            .is_some_and(|held| Arc::ptr_eq(held, lock) && Arc::strong_count(lock) == 2);
        if unshared {
            locks.remove(conversation_id);
        }
    }

    async fn next_revision(&self, conversation_id: &str) -> u64 {
        let known = self.revisions.lock().await.get(conversation_id).copied();
        let current = match known {
            Some(revision) => revision,
            None => self.stored_revision(conversation_id).await,
        };

        let next = current + 1;
        self.revisions
            .lock()
            .await
            .insert(conversation_id.to_string(), next);
        next
    }

    /// Highest revision already persisted locally or queued for this id
    async fn stored_revision(&self, conversation_id: &str) -> u64 {
        let local = match self.local.load(conversation_id).await {
            Ok(backup) => backup.map(|b| b.revision).unwrap_or(0),
            Err(_) => 0,
        };
        let queued = self
            .pending
            .read()
            .await
            .get(conversation_id)
            .map(|b| b.revision)
            .unwrap_or(0);
        local.max(queued)
    }

    async fn observe_revision(&self, conversation_id: &str, revision: u64) {
        let mut revisions = self.revisions.lock().await;
        let entry = revisions.entry(conversation_id.to_string()).or_insert(0);
        *entry = (*entry).max(revision);
    }
}
