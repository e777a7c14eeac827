//! Local Backup Store
//!
//! Information Hiding:
//! - Key naming scheme hidden behind conversation ids
//! - Retention and quota-recovery eviction hidden from callers
//! - Corrupt entries reported as absent, never as errors
//! - Write order tracked in memory to rank snapshots saved within one millisecond

use super::KeyValueStore;
use crate::core::backup::{self, ConversationBackup};
use crate::error::PersistenceResult;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

pub const DEFAULT_KEY_PREFIX: &str = "conversation_backup_";
pub const DEFAULT_MAX_BACKUPS: usize = 10;

/// What happened to a local write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalSaveOutcome {
    Stored,
    /// Stored after evicting entries to recover from a full quota
    StoredAfterEviction,
    /// Quota still exhausted after eviction; the snapshot was not kept locally
    Dropped,
}

impl LocalSaveOutcome {
    pub fn is_stored(&self) -> bool {
        !matches!(self, LocalSaveOutcome::Dropped)
    }
}

/// Capacity-bounded backup store over a local key-value space
pub struct LocalBackupStore {
    kv: Arc<dyn KeyValueStore>,
    key_prefix: String,
    max_backups: usize,
    /// Conversation id -> sequence number of its last write through this store.
    /// Entries written by an earlier process have none and rank oldest on ties.
    write_order: Mutex<WriteOrder>,
}

#[derive(Default)]
struct WriteOrder {
    next: u64,
    by_id: HashMap<String, u64>,
}

impl LocalBackupStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self {
            kv,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            max_backups: DEFAULT_MAX_BACKUPS,
            write_order: Mutex::new(WriteOrder::default()),
        }
    }

    pub fn with_max_backups(mut self, max_backups: usize) -> Self {
        self.max_backups = max_backups.max(1);
        self
    }

    pub fn with_key_prefix(mut self, key_prefix: impl Into<String>) -> Self {
        self.key_prefix = key_prefix.into();
        self
    }

    pub fn max_backups(&self) -> usize {
        self.max_backups
    }

    pub fn key_for(&self, conversation_id: &str) -> String {
        format!("{}{}", self.key_prefix, conversation_id)
    }

    /// Store a backup, evicting old entries to stay within the retention cap
    ///
    /// A full quota triggers aggressive eviction and a single retry. If that
    /// retry fails too the snapshot is dropped and `Dropped` is returned;
    /// other storage errors propagate.
    pub async fn save(&self, backup: &ConversationBackup) -> PersistenceResult<LocalSaveOutcome> {
        let conversation_id = backup.conversation_id();
        let key = self.key_for(conversation_id);
        let json = backup::serialize(backup)?;

        match self.kv.set(&key, &json).await {
            Ok(()) => {
                self.record_write(conversation_id).await;
                if let Err(e) = self.evict_beyond(self.max_backups, conversation_id).await {
                    tracing::warn!(
                        "[LocalBackupStore] Retention eviction after saving '{}' failed: {}",
                        conversation_id,
                        e
                    );
                }
                tracing::debug!(
                    "[LocalBackupStore] Saved revision {} of '{}'",
                    backup.revision,
                    conversation_id
                );
                Ok(LocalSaveOutcome::Stored)
            }
            Err(e) if e.is_quota_exceeded() => {
                tracing::warn!(
                    "[LocalBackupStore] Quota exceeded saving '{}', evicting aggressively: {}",
                    conversation_id,
                    e
                );
                let reduced_cap = (self.max_backups / 2).max(1);
                self.evict_beyond(reduced_cap, conversation_id).await?;

                match self.kv.set(&key, &json).await {
                    Ok(()) => {
                        self.record_write(conversation_id).await;
                        tracing::info!(
                            "[LocalBackupStore] Saved '{}' after reducing local backups to {}",
                            conversation_id,
                            reduced_cap
                        );
                        Ok(LocalSaveOutcome::StoredAfterEviction)
                    }
                    Err(retry_err) => {
                        tracing::error!(
                            "[LocalBackupStore] Dropping local save of '{}' after eviction: {}",
                            conversation_id,
                            retry_err
                        );
                        Ok(LocalSaveOutcome::Dropped)
                    }
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Load a backup; corrupt entries are logged and treated as absent
    pub async fn load(&self, conversation_id: &str) -> PersistenceResult<Option<ConversationBackup>> {
        let key = self.key_for(conversation_id);
        let Some(raw) = self.kv.get(&key).await? else {
            return Ok(None);
        };

        match backup::deserialize(&raw) {
            Ok(backup) => Ok(Some(backup)),
            Err(e) => {
                tracing::warn!(
                    "[LocalBackupStore] Ignoring corrupt backup under '{}': {}",
                    key,
                    e
                );
                Ok(None)
            }
        }
    }

    /// All readable backups, newest first
    pub async fn list_all(&self) -> PersistenceResult<Vec<ConversationBackup>> {
        let mut backups = Vec::new();

        for key in self.kv.keys().await? {
            let Some(conversation_id) = key.strip_prefix(&self.key_prefix) else {
                continue;
            };
            if let Some(backup) = self.load(conversation_id).await? {
                backups.push(backup);
            }
        }

        self.sort_newest_first(&mut backups).await;
        tracing::debug!("[LocalBackupStore] Listed {} backups", backups.len());
        Ok(backups)
    }

    pub async fn delete(&self, conversation_id: &str) -> PersistenceResult<()> {
        self.kv.remove(&self.key_for(conversation_id)).await?;
        self.write_order.lock().await.by_id.remove(conversation_id);
        tracing::debug!("[LocalBackupStore] Deleted '{}'", conversation_id);
        Ok(())
    }

    async fn record_write(&self, conversation_id: &str) {
        let mut order = self.write_order.lock().await;
        order.next += 1;
        let seq = order.next;
        order.by_id.insert(conversation_id.to_string(), seq);
    }

    /// Newest snapshot timestamp first; equal timestamps rank by later write
    async fn sort_newest_first(&self, backups: &mut [ConversationBackup]) {
        let order = self.write_order.lock().await;
        let seq = |b: &ConversationBackup| order.by_id.get(b.conversation_id()).copied().unwrap_or(0);

        backups.sort_by(|a, b| {
            b.timestamp
                .cmp(&a.timestamp)
                .then_with(|| seq(b).cmp(&seq(a)))
                .then_with(|| b.revision.cmp(&a.revision))
                .then_with(|| a.conversation_id().cmp(b.conversation_id()))
        });
    }

    /// Keep at most `cap` backups; `keep_id` always survives and counts toward the cap
    async fn evict_beyond(&self, cap: usize, keep_id: &str) -> PersistenceResult<usize> {
        let others: Vec<_> = self
            .list_all()
            .await?
            .into_iter()
            .filter(|b| b.conversation_id() != keep_id)
            .collect();

        let room = cap.saturating_sub(1);
        if others.len() <= room {
            return Ok(0);
        }

        // list_all is newest first, so everything past `room` is oldest
        let mut evicted = 0;
        for stale in &others[room..] {
            self.delete(stale.conversation_id()).await?;
            evicted += 1;
            tracing::info!(
                "[LocalBackupStore] Evicted backup '{}' from {}",
                stale.conversation_id(),
                crate::core::timestamp::format(&stale.timestamp)
            );
        }
        Ok(evicted)
    }
}
