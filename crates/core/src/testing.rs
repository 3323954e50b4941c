//! In-memory collaborators for exercising the engine, pipeline and
//! coordinator without a database or network.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use crate::errors::{Result, SyncError};
use crate::models::{
    Changeset, Fields, PulledChanges, Record, GALLERY_SYNC_TABLES, IMAGES_TABLE,
    IMAGE_RELATION_TABLES,
};
use crate::remote::{RemoteBlobStore, RemoteChangeProtocol};
use crate::replica::{CascadeReport, LocalReplica};
use crate::session::{AuthSession, ConnectivityProbe, SessionProvider};

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Minimal valid JPEG for pipeline tests.
pub fn sample_jpeg(width: u32, height: u32) -> Vec<u8> {
    use image::codecs::jpeg::JpegEncoder;
    use image::{DynamicImage, ImageBuffer, Rgb};

    let buffer = ImageBuffer::from_fn(width, height, |x, y| {
        Rgb([(x % 256) as u8, (y % 256) as u8, 96])
    });
    let mut bytes = Vec::new();
    let encoder = JpegEncoder::new_with_quality(std::io::Cursor::new(&mut bytes), 90);
    DynamicImage::ImageRgb8(buffer)
        .write_with_encoder(encoder)
        .unwrap();
    bytes
}

#[derive(Default)]
struct ReplicaState {
    tables: HashMap<String, BTreeMap<String, Record>>,
    tombstones: Vec<(String, String)>,
    last_pulled_at: i64,
}

fn marker_of(record: &Record) -> &str {
    record.str_field("sync_status").unwrap_or("synced")
}

/// HashMap-backed [`LocalReplica`] with the same change-tracking rules as
/// the SQLite implementation.
#[derive(Default)]
pub struct InMemoryReplica {
    state: Mutex<ReplicaState>,
}

impl InMemoryReplica {
    pub fn rows(&self, table: &str) -> Vec<Record> {
        let state = self.state.lock().unwrap();
        state
            .tables
            .get(table)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn tombstones(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().tombstones.clone()
    }

    fn insert(state: &mut ReplicaState, table: &str, mut fields: Fields, marker: &str) -> Record {
        let id = fields
            .remove("id")
            .and_then(|v| v.as_str().map(String::from))
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let now = now_millis();
        fields.insert("sync_status".into(), json!(marker));
        fields.entry("created_at").or_insert(json!(now));
        fields.insert("updated_at".into(), json!(now));
        let record = Record::new(id.clone(), fields);
        state
            .tables
            .entry(table.to_string())
            .or_default()
            .insert(id, record.clone());
        record
    }

    fn remove_row(state: &mut ReplicaState, table: &str, id: &str) -> Option<Record> {
        let removed = state.tables.get_mut(table).and_then(|rows| rows.remove(id));
        if let Some(record) = &removed {
            if marker_of(record) != "created" {
                state.tombstones.push((table.to_string(), id.to_string()));
            }
        }
        removed
    }
}

#[async_trait]
impl LocalReplica for InMemoryReplica {
    async fn find(&self, table: &str, id: &str) -> Result<Option<Record>> {
        let state = self.state.lock().unwrap();
        Ok(state.tables.get(table).and_then(|rows| rows.get(id)).cloned())
    }

    async fn create(&self, table: &str, fields: Fields) -> Result<Record> {
        let mut state = self.state.lock().unwrap();
        Ok(Self::insert(&mut state, table, fields, "created"))
    }

    async fn update(&self, table: &str, id: &str, fields: Fields) -> Result<Record> {
        let mut state = self.state.lock().unwrap();
        let record = state
            .tables
            .get_mut(table)
            .and_then(|rows| rows.get_mut(id))
            .ok_or_else(|| SyncError::storage(format!("No record {} in {}", id, table)))?;
        for (key, value) in fields {
            if key != "id" {
                record.fields.insert(key, value);
            }
        }
        if marker_of(record) == "synced" {
            record.set_field("sync_status", json!("updated"));
        }
        record.set_field("updated_at", json!(now_millis()));
        Ok(record.clone())
    }

    async fn delete(&self, table: &str, id: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        Self::remove_row(&mut state, table, id);
        Ok(())
    }

    async fn query_by_field(&self, table: &str, field: &str, value: &str) -> Result<Vec<Record>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .tables
            .get(table)
            .map(|rows| {
                rows.values()
                    .filter(|r| r.str_field(field) == Some(value))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn count_pending(&self, table: &str) -> Result<u64> {
        let state = self.state.lock().unwrap();
        let dirty = state
            .tables
            .get(table)
            .map(|rows| rows.values().filter(|r| marker_of(r) != "synced").count())
            .unwrap_or(0);
        let tombstones = state.tombstones.iter().filter(|(t, _)| t == table).count();
        Ok((dirty + tombstones) as u64)
    }

    async fn collect_dirty(&self) -> Result<Changeset> {
        let state = self.state.lock().unwrap();
        let mut changes = Changeset::default();
        for table in GALLERY_SYNC_TABLES {
            let entry = changes.table_mut(table);
            if let Some(rows) = state.tables.get(table) {
                for record in rows.values() {
                    match marker_of(record) {
                        "created" => entry.created.push(record.clone()),
                        "updated" => entry.updated.push(record.clone()),
                        _ => {}
                    }
                }
            }
            entry.deleted = state
                .tombstones
                .iter()
                .filter(|(t, _)| t == table)
                .map(|(_, id)| id.clone())
                .collect();
        }
        Ok(changes)
    }

    async fn apply_remote_changes(&self, changes: &Changeset) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        for (table, table_changes) in &changes.tables {
            for record in table_changes.upserts() {
                let mut fields = record.fields.clone();
                fields.insert("id".into(), json!(record.id));
                Self::insert(&mut state, table, fields, "synced");
            }
            for id in &table_changes.deleted {
                state
                    .tables
                    .get_mut(table)
                    .and_then(|rows| rows.remove(id));
                state
                    .tombstones
                    .retain(|(t, tid)| !(t == table && tid == id));
            }
        }
        Ok(())
    }

    async fn mark_changeset_synced(&self, changes: &Changeset) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        for (table, table_changes) in &changes.tables {
            for record in table_changes.upserts() {
                if let Some(row) = state
                    .tables
                    .get_mut(table)
                    .and_then(|rows| rows.get_mut(&record.id))
                {
                    row.set_field("sync_status", json!("synced"));
                }
            }
            for id in &table_changes.deleted {
                state
                    .tombstones
                    .retain(|(t, tid)| !(t == table && tid == id));
            }
        }
        Ok(())
    }

    async fn create_image_with_relations(
        &self,
        image: Fields,
        relations: Vec<(String, Fields)>,
    ) -> Result<Record> {
        let mut state = self.state.lock().unwrap();
        let record = Self::insert(&mut state, IMAGES_TABLE, image, "created");
        for (table, fields) in relations {
            Self::insert(&mut state, &table, fields, "created");
        }
        Ok(record)
    }

    async fn delete_image_and_relations(&self, image_id: &str) -> Result<CascadeReport> {
        let mut state = self.state.lock().unwrap();
        let mut report = CascadeReport::default();
        for table in IMAGE_RELATION_TABLES {
            let ids: Vec<String> = state
                .tables
                .get(table)
                .map(|rows| {
                    rows.values()
                        .filter(|r| r.str_field("image_id") == Some(image_id))
                        .map(|r| r.id.clone())
                        .collect()
                })
                .unwrap_or_default();
            for id in &ids {
                Self::remove_row(&mut state, table, id);
            }
            if !ids.is_empty() {
                report.removed.insert(table.to_string(), ids.len());
            }
        }
        report.image_removed = Self::remove_row(&mut state, IMAGES_TABLE, image_id).is_some();
        Ok(report)
    }

    async fn last_pulled_at(&self) -> Result<i64> {
        Ok(self.state.lock().unwrap().last_pulled_at)
    }

    async fn set_last_pulled_at(&self, timestamp: i64) -> Result<()> {
        self.state.lock().unwrap().last_pulled_at = timestamp;
        Ok(())
    }
}

#[derive(Default)]
struct BlobState {
    urls: HashMap<String, Vec<u8>>,
    objects: HashMap<String, Vec<u8>>,
    failing_urls: HashSet<String>,
    failing_upload_paths: HashSet<String>,
    download_count: usize,
}

/// Map-backed [`RemoteBlobStore`]. Objects staged by path are reachable
/// through their public URL, mirroring a real object store.
#[derive(Default)]
pub struct MemoryBlobStore {
    state: Mutex<BlobState>,
}

impl MemoryBlobStore {
    const PUBLIC_PREFIX: &'static str = "https://blobs.test/";

    pub fn stage_url(&self, url: &str, bytes: Vec<u8>) {
        self.state.lock().unwrap().urls.insert(url.into(), bytes);
    }

    pub fn stage_object(&self, path: &str, bytes: Vec<u8>) {
        self.state.lock().unwrap().objects.insert(path.into(), bytes);
    }

    pub fn fail_url(&self, url: &str) {
        self.state.lock().unwrap().failing_urls.insert(url.into());
    }

    pub fn fail_uploads_to(&self, path: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_upload_paths
            .insert(path.into());
    }

    pub fn download_count(&self) -> usize {
        self.state.lock().unwrap().download_count
    }

    pub fn object(&self, path: &str) -> Option<Vec<u8>> {
        self.state.lock().unwrap().objects.get(path).cloned()
    }

    pub fn uploaded_paths(&self) -> Vec<String> {
        self.state.lock().unwrap().objects.keys().cloned().collect()
    }
}

#[async_trait]
impl RemoteBlobStore for MemoryBlobStore {
    async fn upload(
        &self,
        _session: &AuthSession,
        path: &str,
        bytes: Vec<u8>,
        _content_type: &str,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.failing_upload_paths.contains(path) {
            return Err(SyncError::transfer(format!("Upload to {} refused", path)));
        }
        state.objects.insert(path.to_string(), bytes);
        Ok(())
    }

    fn public_url(&self, path: &str) -> String {
        format!("{}{}", Self::PUBLIC_PREFIX, path)
    }

    async fn download(&self, url: &str, local_path: &Path) -> Result<()> {
        let bytes = {
            let mut state = self.state.lock().unwrap();
            state.download_count += 1;
            if state.failing_urls.contains(url) {
                return Err(SyncError::transfer(format!("Download of {} refused", url)));
            }
            state.urls.get(url).cloned().or_else(|| {
                url.strip_prefix(Self::PUBLIC_PREFIX)
                    .and_then(|path| state.objects.get(path).cloned())
            })
        };
        let bytes =
            bytes.ok_or_else(|| SyncError::transfer(format!("No staged payload for {}", url)))?;
        tokio::fs::write(local_path, bytes)
            .await
            .map_err(|e| SyncError::transfer(format!("Failed to write download: {}", e)))
    }
}

#[derive(Default)]
struct ProtocolState {
    pulls: VecDeque<Result<PulledChanges>>,
    push_failures: VecDeque<SyncError>,
    pull_calls: Vec<i64>,
    push_calls: Vec<(Changeset, i64)>,
}

/// Scripted [`RemoteChangeProtocol`] that records every call.
#[derive(Default)]
pub struct ScriptedProtocol {
    state: Mutex<ProtocolState>,
    pull_delay: Option<Duration>,
}

impl ScriptedProtocol {
    pub fn with_pull_delay(delay: Duration) -> Self {
        Self {
            pull_delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn stage_pull(&self, result: Result<PulledChanges>) {
        self.state.lock().unwrap().pulls.push_back(result);
    }

    pub fn stage_empty_pull(&self, timestamp: i64) {
        self.stage_pull(Ok(PulledChanges {
            changes: Changeset::default(),
            timestamp,
        }));
    }

    pub fn fail_next_push(&self, error: SyncError) {
        self.state.lock().unwrap().push_failures.push_back(error);
    }

    pub fn pull_calls(&self) -> Vec<i64> {
        self.state.lock().unwrap().pull_calls.clone()
    }

    pub fn push_calls(&self) -> Vec<(Changeset, i64)> {
        self.state.lock().unwrap().push_calls.clone()
    }
}

#[async_trait]
impl RemoteChangeProtocol for ScriptedProtocol {
    async fn pull(&self, _session: &AuthSession, last_pulled_at: i64) -> Result<PulledChanges> {
        if let Some(delay) = self.pull_delay {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.state.lock().unwrap();
        state.pull_calls.push(last_pulled_at);
        state.pulls.pop_front().unwrap_or_else(|| {
            Ok(PulledChanges {
                changes: Changeset::default(),
                timestamp: now_millis(),
            })
        })
    }

    async fn push(
        &self,
        _session: &AuthSession,
        changes: &Changeset,
        last_pulled_at: i64,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.push_calls.push((changes.clone(), last_pulled_at));
        match state.push_failures.pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

/// Fixed-session [`SessionProvider`].
pub struct StaticSession {
    session: Option<AuthSession>,
}

impl StaticSession {
    pub fn signed_in(user_id: &str) -> Self {
        Self {
            session: Some(AuthSession {
                user_id: user_id.to_string(),
                access_token: "test-token".to_string(),
            }),
        }
    }

    pub fn signed_out() -> Self {
        Self { session: None }
    }
}

#[async_trait]
impl SessionProvider for StaticSession {
    async fn current_session(&self) -> Option<AuthSession> {
        self.session.clone()
    }
}

/// Switchable [`ConnectivityProbe`].
pub struct FakeConnectivity {
    connected: AtomicBool,
}

impl FakeConnectivity {
    pub fn new(connected: bool) -> Self {
        Self {
            connected: AtomicBool::new(connected),
        }
    }

    pub fn set(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }
}

#[async_trait]
impl ConnectivityProbe for FakeConnectivity {
    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
