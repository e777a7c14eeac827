//! Conversation Backup Snapshot
//!
//! Information Hiding:
//! - JSON layout and date encoding hidden behind serialize/deserialize
//! - Conflict ordering between two snapshots decided here, not by the stores

use super::conversation::{ConversationData, ConversationState};
use super::timestamp;
use crate::error::{PersistenceError, PersistenceResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

pub const BACKUP_FORMAT_VERSION: &str = "1.0";

/// Immutable snapshot of one conversation at a point in time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationBackup {
    pub conversation_data: ConversationData,
    pub conversation_state: ConversationState,
    #[serde(with = "timestamp")]
    pub timestamp: DateTime<Utc>,
    pub version: String,
    /// Per-conversation save counter; older payloads without it sort first
    #[serde(default)]
    pub revision: u64,
}

impl ConversationBackup {
    pub fn new(
        conversation_data: ConversationData,
        conversation_state: ConversationState,
        revision: u64,
    ) -> Self {
        Self {
            conversation_data,
            conversation_state,
            timestamp: timestamp::now(),
            version: BACKUP_FORMAT_VERSION.to_string(),
            revision,
        }
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_data.id
    }

    /// Ordering used to resolve two snapshots of the same conversation:
    /// revision first, wall-clock timestamp as the tie-breaker
    pub fn recency(&self, other: &ConversationBackup) -> Ordering {
        self.revision
            .cmp(&other.revision)
            .then_with(|| self.timestamp.cmp(&other.timestamp))
    }

    /// True when this snapshot should replace `other`
    pub fn supersedes(&self, other: &ConversationBackup) -> bool {
        self.recency(other) == Ordering::Greater
    }
}

pub fn serialize(backup: &ConversationBackup) -> PersistenceResult<String> {
    serde_json::to_string(backup).map_err(|e| PersistenceError::MalformedBackup(e.to_string()))
}

pub fn deserialize(raw: &str) -> PersistenceResult<ConversationBackup> {
    serde_json::from_str(raw).map_err(|e| PersistenceError::MalformedBackup(e.to_string()))
}

/// Sort newest snapshot first
pub fn sort_newest_first(backups: &mut [ConversationBackup]) {
    backups.sort_by(|a, b| {
        b.timestamp
            .cmp(&a.timestamp)
            .then_with(|| b.revision.cmp(&a.revision))
            .then_with(|| a.conversation_id().cmp(b.conversation_id()))
    });
}
