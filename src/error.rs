//! Persistence Errors
//!
//! Information Hiding:
//! - Backend-specific failures (io, http, json) folded into a small taxonomy
//! - Callers branch on the kind of failure, not on where it came from

use crate::core::conversation::ConversationStatus;
use thiserror::Error;

pub type PersistenceResult<T> = Result<T, PersistenceError>;

#[derive(Debug, Error)]
pub enum PersistenceError {
    /// A stored or fetched backup could not be decoded
    #[error("malformed backup: {0}")]
    MalformedBackup(String),

    /// The local key-value space has no room left for the write
    #[error("local storage quota exceeded writing '{key}' ({required} bytes needed, {available} available)")]
    QuotaExceeded {
        key: String,
        required: usize,
        available: usize,
    },

    /// Any failure talking to the remote document store
    #[error("remote store unavailable: {0}")]
    RemoteUnavailable(String),

    #[error("conversation is incomplete, missing: {}", .missing.join(", "))]
    IncompleteConversation { missing: Vec<&'static str> },

    #[error("invalid status transition from {from} to {to}")]
    InvalidTransition {
        from: ConversationStatus,
        to: ConversationStatus,
    },

    #[error("conversation '{0}' is finalized and can no longer change")]
    ConversationFinalized(String),

    #[error("turn timestamp {turn} is earlier than the previous turn at {previous}")]
    NonMonotonicTimestamp { previous: String, turn: String },

    #[error("invalid storage key '{0}'")]
    InvalidKey(String),

    #[error("storage io error: {0}")]
    Io(#[from] std::io::Error),
}

impl PersistenceError {
    pub fn is_quota_exceeded(&self) -> bool {
        matches!(self, PersistenceError::QuotaExceeded { .. })
    }

    pub fn is_remote_unavailable(&self) -> bool {
        matches!(self, PersistenceError::RemoteUnavailable(_))
    }
}

impl From<reqwest::Error> for PersistenceError {
    fn from(err: reqwest::Error) -> Self {
        PersistenceError::RemoteUnavailable(err.to_string())
    }
}
