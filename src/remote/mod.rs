//! Remote Document Store Abstraction
//!
//! Information Hiding:
//! - Transport (HTTP, in-memory) hidden behind trait
//! - Remote documents keep business data only; UI state never leaves the device
//! - Deletion is a soft delete so the audit trail survives

use crate::core::backup::{ConversationBackup, BACKUP_FORMAT_VERSION};
use crate::core::conversation::{ConversationData, ConversationState};
use crate::core::timestamp;
use crate::error::PersistenceResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod http;
pub mod memory;

pub use http::HttpDocumentStore;
pub use memory::InMemoryRemoteStore;

/// Authoritative multi-device store for conversation backups
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Upsert the conversation document
    /// Any transport or service failure is `RemoteUnavailable`
    async fn save(&self, backup: &ConversationBackup) -> PersistenceResult<()>;

    /// Fetch a conversation; `None` if missing or soft-deleted
    async fn load(&self, conversation_id: &str) -> PersistenceResult<Option<ConversationBackup>>;

    /// Conversations owned by `user_id`, newest first, at most `limit`
    async fn list_all(&self, user_id: &str, limit: usize)
        -> PersistenceResult<Vec<ConversationBackup>>;

    /// Mark the conversation deleted; missing documents are not an error
    async fn delete(&self, conversation_id: &str) -> PersistenceResult<()>;
}

/// Shape of a conversation document in the remote collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteDocument {
    #[serde(flatten)]
    pub conversation: ConversationData,
    #[serde(default)]
    pub revision: u64,
    #[serde(with = "timestamp")]
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default, with = "timestamp::option", skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl RemoteDocument {
    pub fn from_backup(backup: &ConversationBackup) -> Self {
        Self {
            conversation: backup.conversation_data.clone(),
            revision: backup.revision,
            updated_at: backup.timestamp,
            deleted: false,
            deleted_at: None,
        }
    }

    /// Rebuild a backup; UI flags are not stored remotely and start from defaults
    pub fn into_backup(self) -> ConversationBackup {
        ConversationBackup {
            conversation_data: self.conversation,
            conversation_state: ConversationState::default(),
            timestamp: self.updated_at,
            version: BACKUP_FORMAT_VERSION.to_string(),
            revision: self.revision,
        }
    }

    pub fn mark_deleted(&mut self) {
        if !self.deleted {
            self.deleted = true;
            self.deleted_at = Some(timestamp::now());
        }
    }
}

/// Visible documents for an owner, newest first, truncated to `limit`
pub(crate) fn select_for_owner(
    documents: impl IntoIterator<Item = RemoteDocument>,
    user_id: &str,
    limit: usize,
) -> Vec<ConversationBackup> {
    let mut backups: Vec<_> = documents
        .into_iter()
        .filter(|doc| !doc.deleted && doc.conversation.user_id == user_id)
        .map(RemoteDocument::into_backup)
        .collect();
    crate::core::backup::sort_newest_first(&mut backups);
    backups.truncate(limit);
    backups
}
