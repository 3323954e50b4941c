//! The bidirectional sync cycle: pull, materialize, apply, upload, push.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use log::{info, warn};
use serde_json::json;
use tokio::sync::{oneshot, Mutex};

use crate::assets::{AssetPipeline, TransferReport};
use crate::config::SyncConfig;
use crate::errors::{Result, SyncError};
use crate::models::{Changeset, ImageRecord, GALLERY_SYNC_TABLES, IMAGES_TABLE};
use crate::remote::RemoteChangeProtocol;
use crate::replica::LocalReplica;
use crate::session::{AuthSession, ConnectivityProbe, SessionProvider};

/// Outcome of one completed sync cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncSummary {
    /// Server checkpoint this cycle synchronized to.
    pub timestamp: i64,
    pub pulled_records: usize,
    pub pushed_records: usize,
    pub downloads: TransferReport,
    pub uploads: TransferReport,
    /// Whole-cycle attempts spent, including the successful one.
    pub attempts: u32,
    pub duration_ms: u64,
}

#[derive(Default)]
struct EngineState {
    in_flight: bool,
    waiters: VecDeque<oneshot::Sender<Result<SyncSummary>>>,
}

/// Runs sync cycles against the local replica and the remote protocol.
///
/// At most one cycle runs at a time. Callers arriving while a cycle is in
/// flight park on a bounded FIFO queue and receive that cycle's outcome
/// instead of starting their own.
pub struct SyncEngine {
    replica: Arc<dyn LocalReplica>,
    protocol: Arc<dyn RemoteChangeProtocol>,
    pipeline: Arc<AssetPipeline>,
    sessions: Arc<dyn SessionProvider>,
    connectivity: Arc<dyn ConnectivityProbe>,
    config: SyncConfig,
    state: Mutex<EngineState>,
}

impl SyncEngine {
    pub fn new(
        replica: Arc<dyn LocalReplica>,
        protocol: Arc<dyn RemoteChangeProtocol>,
        pipeline: Arc<AssetPipeline>,
        sessions: Arc<dyn SessionProvider>,
        connectivity: Arc<dyn ConnectivityProbe>,
        config: SyncConfig,
    ) -> Self {
        Self {
            replica,
            protocol,
            pipeline,
            sessions,
            connectivity,
            config,
            state: Mutex::new(EngineState::default()),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Run a sync cycle, or wait for the in-flight one.
    ///
    /// Returns [`SyncError::Busy`] when the waiter queue is full.
    pub async fn sync(&self) -> Result<SyncSummary> {
        let waiter = {
            let mut state = self.state.lock().await;
            if state.in_flight {
                if state.waiters.len() >= self.config.sync_queue_capacity {
                    return Err(SyncError::Busy);
                }
                let (tx, rx) = oneshot::channel();
                state.waiters.push_back(tx);
                Some(rx)
            } else {
                state.in_flight = true;
                None
            }
        };

        if let Some(rx) = waiter {
            return match rx.await {
                Ok(outcome) => outcome,
                Err(_) => Err(SyncError::storage("Sync cycle dropped before completing")),
            };
        }

        let outcome = self.run_with_retry().await;

        let waiters = {
            let mut state = self.state.lock().await;
            state.in_flight = false;
            std::mem::take(&mut state.waiters)
        };
        for waiter in waiters {
            let _ = waiter.send(outcome.clone());
        }
        outcome
    }

    /// Sum of dirty records and pending tombstones across all synced tables.
    /// A table that fails to count is logged and contributes zero.
    pub async fn count_pending_changes(&self) -> Result<u64> {
        let mut total = 0;
        for table in GALLERY_SYNC_TABLES {
            match self.replica.count_pending(table).await {
                Ok(count) => total += count,
                Err(e) => warn!("[GallerySync] Pending count failed for {}: {}", table, e),
            }
        }
        Ok(total)
    }

    async fn run_with_retry(&self) -> Result<SyncSummary> {
        if !self.connectivity.is_connected().await {
            return Err(SyncError::NoConnection);
        }
        let session = self
            .sessions
            .current_session()
            .await
            .ok_or(SyncError::NotAuthenticated)?;

        let started = Instant::now();
        let mut attempt: u32 = 1;
        loop {
            match self.run_cycle(&session).await {
                Ok(mut summary) => {
                    summary.attempts = attempt;
                    summary.duration_ms = started.elapsed().as_millis() as u64;
                    info!(
                        "[GallerySync] Cycle complete: pulled {}, pushed {}, {} downloads, {} uploads, {} ms",
                        summary.pulled_records,
                        summary.pushed_records,
                        summary.downloads.total(),
                        summary.uploads.total(),
                        summary.duration_ms
                    );
                    return Ok(summary);
                }
                Err(e) if e.is_retryable() && attempt < self.config.max_sync_attempts => {
                    let delay = self.config.retry_base_delay * attempt;
                    warn!(
                        "[GallerySync] Attempt {} failed, retrying in {:?}: {}",
                        attempt, delay, e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    warn!("[GallerySync] Cycle failed after {} attempt(s): {}", attempt, e);
                    return Err(e);
                }
            }
        }
    }

    async fn run_cycle(&self, session: &AuthSession) -> Result<SyncSummary> {
        let last_pulled = self.replica.last_pulled_at().await?;
        let mut pulled = self.protocol.pull(session, last_pulled).await?;
        let pulled_records = pulled.changes.record_count();

        // Incoming image files land on disk before the changeset does, so
        // applied records can already carry their local file.
        let downloads = self.materialize_pulled_images(&mut pulled.changes).await;

        self.replica.apply_remote_changes(&pulled.changes).await?;

        let dirty = self.replica.collect_dirty().await?;
        let upload_ids = Self::upload_candidates(&dirty);
        let uploads = if upload_ids.is_empty() {
            TransferReport::default()
        } else {
            self.pipeline.upload_batch(&upload_ids).await
        };

        // Re-collect so pushed image records carry the storage paths the
        // uploads just persisted; images whose upload failed stay behind
        // for the next cycle.
        let mut outgoing = self.replica.collect_dirty().await?;
        for (id, _) in &uploads.failed {
            outgoing.remove_upsert(IMAGES_TABLE, id);
        }

        let pushed_records = outgoing.record_count();
        if pushed_records > 0 {
            self.protocol
                .push(session, &outgoing, pulled.timestamp)
                .await?;
            self.replica.mark_changeset_synced(&outgoing).await?;
        }
        self.replica.set_last_pulled_at(pulled.timestamp).await?;

        Ok(SyncSummary {
            timestamp: pulled.timestamp,
            pulled_records,
            pushed_records,
            downloads,
            uploads,
            attempts: 0,
            duration_ms: 0,
        })
    }

    fn upload_candidates(dirty: &Changeset) -> Vec<String> {
        dirty
            .table(IMAGES_TABLE)
            .map(|table| {
                table
                    .upserts()
                    .filter_map(|record| match ImageRecord::from_record(record) {
                        Ok(image) if image.needs_upload() => Some(image.id),
                        Ok(_) => None,
                        Err(e) => {
                            warn!("[GallerySync] Skipping malformed image record: {}", e);
                            None
                        }
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Download originals for pulled image records that exist only remotely.
    /// Successful downloads are written back into the changeset so the rows
    /// land with their local file recorded; failures leave the record
    /// untouched and are reported.
    async fn materialize_pulled_images(&self, changes: &mut Changeset) -> TransferReport {
        let candidates: Vec<ImageRecord> = changes
            .table(IMAGES_TABLE)
            .map(|table| {
                table
                    .upserts()
                    .filter_map(|record| ImageRecord::from_record(record).ok())
                    .filter(ImageRecord::needs_download)
                    .collect()
            })
            .unwrap_or_default();
        if candidates.is_empty() {
            return TransferReport::default();
        }

        let report = self.pipeline.download_batch(&candidates).await;

        if let Some(table) = changes.tables.get_mut(IMAGES_TABLE) {
            for record in table.upserts_mut() {
                if !report.succeeded.contains(&record.id) {
                    continue;
                }
                if let Some(storage_path) = record.str_field("storage_path") {
                    let local = self.pipeline.local_image_path(storage_path);
                    record.set_field("local_uri", json!(local.to_string_lossy()));
                }
            }
        }
        report
    }
}
