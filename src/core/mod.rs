//! Core conversation types and the backup snapshot format

pub mod backup;
pub mod conversation;
pub mod timestamp;

pub use backup::{ConversationBackup, BACKUP_FORMAT_VERSION};
pub use conversation::{
    ConversationData, ConversationState, ConversationStatus, ConversationTurn, Pricing,
    ProductInfo, TurnRole,
};
