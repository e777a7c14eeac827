//! Synchronization between the local and remote stores

pub mod autosave;
pub mod coordinator;

pub use autosave::{AutoSaveScheduler, DEFAULT_AUTOSAVE_INTERVAL};
pub use coordinator::{FlushReport, RemoteSaveOutcome, SaveReport, SyncCoordinator};

/// Network reachability as reported by the runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Connectivity {
    Online,
    Offline,
}
