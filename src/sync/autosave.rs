//! Auto-Save Scheduler
//!
//! Information Hiding:
//! - Timer task and its stop channel hidden behind start/stop
//! - The scheduler never builds snapshots; it saves whatever was registered last

use super::coordinator::SyncCoordinator;
use crate::core::conversation::{ConversationData, ConversationState};
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Duration, Instant, MissedTickBehavior};

pub const DEFAULT_AUTOSAVE_INTERVAL: Duration = Duration::from_millis(5000);

#[derive(Debug, Clone)]
struct RegisteredSnapshot {
    data: ConversationData,
    state: ConversationState,
}

struct ActiveTimer {
    conversation_id: String,
    stop: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

/// Periodically persists the most recently registered conversation snapshot
pub struct AutoSaveScheduler {
    coordinator: Arc<SyncCoordinator>,
    latest: Arc<RwLock<Option<RegisteredSnapshot>>>,
    active: Mutex<Option<ActiveTimer>>,
}

impl AutoSaveScheduler {
    pub fn new(coordinator: Arc<SyncCoordinator>) -> Self {
        Self {
            coordinator,
            latest: Arc::new(RwLock::new(None)),
            active: Mutex::new(None),
        }
    }

    /// Record the snapshot the next tick should persist
    pub async fn register(&self, data: ConversationData, state: ConversationState) {
        *self.latest.write().await = Some(RegisteredSnapshot { data, state });
    }

    /// Start ticking for a conversation, replacing any running timer
    pub async fn start(&self, conversation_id: impl Into<String>, interval: Duration) {
        let conversation_id = conversation_id.into();
        let mut active = self.active.lock().await;

        if let Some(previous) = active.take() {
            Self::shutdown_timer(previous).await;
        }

        let (stop_tx, stop_rx) = oneshot::channel();
        let handle = tokio::spawn(autosave_loop(
            conversation_id.clone(),
            interval,
            Arc::clone(&self.coordinator),
            Arc::clone(&self.latest),
            stop_rx,
        ));

        tracing::info!(
            "[AutoSaveScheduler] Auto-saving '{}' every {:?}",
            conversation_id,
            interval
        );
        *active = Some(ActiveTimer {
            conversation_id,
            stop: stop_tx,
            handle,
        });
    }

    /// Cancel future ticks; a save already in progress still completes
    pub async fn stop(&self) {
        if let Some(timer) = self.active.lock().await.take() {
            Self::shutdown_timer(timer).await;
        }
    }

    pub async fn active_conversation(&self) -> Option<String> {
        self.active
            .lock()
            .await
            .as_ref()
            .map(|timer| timer.conversation_id.clone())
    }

    async fn shutdown_timer(timer: ActiveTimer) {
        let _ = timer.stop.send(());
        if let Err(e) = timer.handle.await {
            tracing::error!(
                "[AutoSaveScheduler] Timer for '{}' ended abnormally: {}",
                timer.conversation_id,
                e
            );
        }
        tracing::info!(
            "[AutoSaveScheduler] Stopped auto-save for '{}'",
            timer.conversation_id
        );
    }
}

async fn autosave_loop(
    conversation_id: String,
    period: Duration,
    coordinator: Arc<SyncCoordinator>,
    latest: Arc<RwLock<Option<RegisteredSnapshot>>>,
    mut stop: oneshot::Receiver<()>,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = &mut stop => break,
            _ = ticker.tick() => {
                let snapshot = latest.read().await.clone();
                match snapshot {
                    Some(snapshot) if snapshot.data.id == conversation_id => {
                        // Runs to completion even if stop arrives meanwhile
                        match coordinator.save(snapshot.data, snapshot.state, false).await {
                            Ok(report) => tracing::debug!(
                                "[AutoSaveScheduler] Saved revision {} of '{}' (synced: {})",
                                report.revision,
                                conversation_id,
                                report.is_synced()
                            ),
                            Err(e) => tracing::warn!(
                                "[AutoSaveScheduler] Auto-save of '{}' failed: {}",
                                conversation_id,
                                e
                            ),
                        }
                    }
                    _ => tracing::trace!(
                        "[AutoSaveScheduler] Nothing registered for '{}' yet",
                        conversation_id
                    ),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::InMemoryRemoteStore;
    use crate::storage::{InMemoryKeyValueStore, LocalBackupStore};

    fn scheduler() -> (AutoSaveScheduler, InMemoryRemoteStore) {
        let remote = InMemoryRemoteStore::new();
        let local = Arc::new(LocalBackupStore::new(Arc::new(InMemoryKeyValueStore::new())));
        let coordinator = Arc::new(SyncCoordinator::new(local, Arc::new(remote.clone())));
        (AutoSaveScheduler::new(coordinator), remote)
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_save_registered_snapshot() {
        let (scheduler, remote) = scheduler();
        scheduler
            .register(
                ConversationData::with_id("c1", "artisan-1", "en"),
                ConversationState::default(),
            )
            .await;
        scheduler.start("c1", Duration::from_millis(100)).await;

        tokio::time::sleep(Duration::from_millis(350)).await;
        scheduler.stop().await;

        assert_eq!(remote.save_calls(), 3);
        assert_eq!(remote.document("c1").await.unwrap().revision, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_halts_ticks_and_is_idempotent() {
        let (scheduler, remote) = scheduler();
        scheduler
            .register(
                ConversationData::with_id("c1", "artisan-1", "en"),
                ConversationState::default(),
            )
            .await;
        scheduler.start("c1", Duration::from_millis(100)).await;
        tokio::time::sleep(Duration::from_millis(150)).await;

        scheduler.stop().await;
        scheduler.stop().await;
        let saved = remote.save_calls();

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(remote.save_calls(), saved);
        assert!(scheduler.active_conversation().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ignores_snapshot_of_other_conversation() {
        let (scheduler, remote) = scheduler();
        scheduler
            .register(
                ConversationData::with_id("other", "artisan-1", "en"),
                ConversationState::default(),
            )
            .await;
        scheduler.start("c1", Duration::from_millis(100)).await;

        tokio::time::sleep(Duration::from_millis(250)).await;
        scheduler.stop().await;
        assert_eq!(remote.save_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_switches_conversation() {
        let (scheduler, _remote) = scheduler();
        scheduler.start("c1", Duration::from_millis(100)).await;
        assert_eq!(scheduler.active_conversation().await.as_deref(), Some("c1"));

        scheduler.start("c2", Duration::from_millis(100)).await;
        assert_eq!(scheduler.active_conversation().await.as_deref(), Some("c2"));
        scheduler.stop().await;
    }
}
