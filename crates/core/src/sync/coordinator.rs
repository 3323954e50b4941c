//! Process-wide sync orchestration: connectivity reactions, periodic
//! background cycles, pending-change polling and status fan-out.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

use super::engine::{SyncEngine, SyncSummary};
use crate::config::SyncConfig;
use crate::errors::{Result, SyncError};

/// Lifecycle phase of the sync subsystem.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    #[default]
    Idle,
    Syncing,
    Error,
    Synced,
}

/// Snapshot fanned out to every status subscriber.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncStatusSnapshot {
    pub is_connected: bool,
    pub phase: SyncPhase,
    /// Server checkpoint of the last successful cycle (epoch millis).
    pub last_synced_at: Option<i64>,
    pub pending_changes: u64,
    pub last_error: Option<String>,
}

/// Owns the background sync tasks and the status channel.
///
/// All consumers observe the same [`watch`] channel; intermediate snapshots
/// may be skipped under load but the latest state is always delivered.
pub struct SyncCoordinator {
    engine: Arc<SyncEngine>,
    config: SyncConfig,
    status_tx: watch::Sender<SyncStatusSnapshot>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    settle_task: Mutex<Option<JoinHandle<()>>>,
}

fn jittered(base: Duration, jitter: Duration) -> Duration {
    if jitter.is_zero() {
        return base;
    }
    let extra = rand::thread_rng().gen_range(0..=jitter.as_millis() as u64);
    base + Duration::from_millis(extra)
}

impl SyncCoordinator {
    pub fn new(engine: Arc<SyncEngine>, config: SyncConfig) -> Arc<Self> {
        let (status_tx, _) = watch::channel(SyncStatusSnapshot::default());
        Arc::new(Self {
            engine,
            config,
            status_tx,
            tasks: Mutex::new(Vec::new()),
            settle_task: Mutex::new(None),
        })
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncStatusSnapshot> {
        self.status_tx.subscribe()
    }

    pub fn status(&self) -> SyncStatusSnapshot {
        self.status_tx.borrow().clone()
    }

    fn update(&self, apply: impl FnOnce(&mut SyncStatusSnapshot)) {
        self.status_tx.send_modify(apply);
    }

    /// Record a connectivity change. A transition to connected schedules an
    /// auto-sync after the settle delay, so a flapping link fires at most
    /// one cycle per settled reconnect. The scheduled sync only runs when
    /// there is something pending to move.
    pub async fn notify_connectivity(self: &Arc<Self>, connected: bool) {
        let was_connected = self.status().is_connected;
        self.update(|s| s.is_connected = connected);

        let mut slot = self.settle_task.lock().await;
        if let Some(task) = slot.take() {
            task.abort();
        }
        if connected && !was_connected && self.config.auto_sync {
            debug!("[SyncCoordinator] Reconnected, scheduling sync after settle delay");
            let this = Arc::clone(self);
            *slot = Some(tokio::spawn(async move {
                tokio::time::sleep(this.config.reconnect_settle_delay).await;
                if !this.status().is_connected {
                    return;
                }
                this.refresh_pending().await;
                if this.status().pending_changes > 0 {
                    this.sync_silently().await;
                }
            }));
        }
    }

    /// Run a sync cycle now.
    ///
    /// Fails fast when disconnected and returns `Ok(None)` when a cycle is
    /// already being coordinated, so UI triggers are cheap to spam.
    pub async fn synchronize(self: &Arc<Self>) -> Result<Option<SyncSummary>> {
        if !self.status().is_connected {
            self.update(|s| {
                s.phase = SyncPhase::Error;
                s.last_error = Some(SyncError::NoConnection.to_string());
            });
            return Err(SyncError::NoConnection);
        }
        if self.status().phase == SyncPhase::Syncing {
            return Ok(None);
        }

        self.update(|s| s.phase = SyncPhase::Syncing);
        match self.engine.sync().await {
            Ok(summary) => {
                self.update(|s| {
                    s.phase = SyncPhase::Synced;
                    s.last_synced_at = Some(summary.timestamp);
                    s.last_error = None;
                });
                self.refresh_pending().await;
                Ok(Some(summary))
            }
            Err(e) => {
                self.update(|s| {
                    s.phase = SyncPhase::Error;
                    s.last_error = Some(e.to_string());
                });
                Err(e)
            }
        }
    }

    /// Background-trigger variant: outcomes are logged, never propagated.
    pub async fn sync_silently(self: &Arc<Self>) {
        match self.synchronize().await {
            Ok(Some(summary)) => info!(
                "[SyncCoordinator] Background sync done ({} pulled, {} pushed)",
                summary.pulled_records, summary.pushed_records
            ),
            Ok(None) => {}
            Err(e) => warn!("[SyncCoordinator] Background sync failed: {}", e),
        }
    }

    /// Recount dirty records and publish the result. Counting failures keep
    /// the previous value.
    pub async fn refresh_pending(&self) {
        match self.engine.count_pending_changes().await {
            Ok(count) => self.update(|s| s.pending_changes = count),
            Err(e) => warn!("[SyncCoordinator] Pending recount failed: {}", e),
        }
    }

    /// Clear a surfaced error, e.g. after the user dismissed it. The phase
    /// settles to `Synced` when nothing is pending, otherwise `Idle`.
    pub fn reset_sync_error(&self) {
        self.update(|s| {
            if s.phase == SyncPhase::Error {
                s.phase = if s.pending_changes == 0 {
                    SyncPhase::Synced
                } else {
                    SyncPhase::Idle
                };
            }
            s.last_error = None;
        });
    }

    /// Start the periodic background sync and pending-poll tasks. Idempotent.
    pub async fn start(self: &Arc<Self>) {
        let mut tasks = self.tasks.lock().await;
        if !tasks.is_empty() {
            return;
        }
        info!("[SyncCoordinator] Starting background tasks");

        let this = Arc::clone(self);
        tasks.push(tokio::spawn(async move {
            loop {
                let delay = jittered(this.config.background_sync_interval, this.config.interval_jitter);
                tokio::time::sleep(delay).await;
                if !(this.config.auto_sync && this.status().is_connected) {
                    continue;
                }
                this.refresh_pending().await;
                if this.status().pending_changes > 0 {
                    this.sync_silently().await;
                }
            }
        }));

        let this = Arc::clone(self);
        tasks.push(tokio::spawn(async move {
            loop {
                let delay = jittered(this.config.pending_poll_interval, this.config.interval_jitter);
                tokio::time::sleep(delay).await;
                this.refresh_pending().await;
            }
        }));
    }

    /// Stop every background task. Idempotent; a running cycle is not
    /// interrupted, only the triggers are.
    pub async fn stop(&self) {
        let mut tasks = self.tasks.lock().await;
        if tasks.is_empty() {
            return;
        }
        info!("[SyncCoordinator] Stopping background tasks");
        for task in tasks.drain(..) {
            task.abort();
        }
        if let Some(task) = self.settle_task.lock().await.take() {
            task.abort();
        }
    }
}

impl Drop for SyncCoordinator {
    fn drop(&mut self) {
        // Background tasks hold an Arc to self, so they are already gone by
        // the time this runs; abort is for the settle task spawned last.
        if let Ok(mut tasks) = self.tasks.try_lock() {
            for task in tasks.drain(..) {
                task.abort();
            }
        }
    }
}
