//! Kalakar conversation persistence
//!
//! Keeps artisan conversations safe while they are being recorded: every
//! snapshot is written to a local key-value store and to a remote document
//! store, queued while offline, replayed on reconnect, and auto-saved on a
//! timer. `ConversationPersistence` is the entry point.

pub mod config;
pub mod core;
pub mod error;
pub mod remote;
pub mod storage;
pub mod sync;
pub mod utils;

pub mod api;
pub mod cli;

pub use crate::api::ConversationPersistence;
pub use crate::config::Settings;
pub use crate::error::{PersistenceError, PersistenceResult};

pub use crate::core::{
    ConversationBackup, ConversationData, ConversationState, ConversationStatus,
    ConversationTurn, ProductInfo, TurnRole,
};
pub use crate::sync::{Connectivity, FlushReport, RemoteSaveOutcome, SaveReport};
