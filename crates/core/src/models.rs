//! Synced gallery record model and delta changesets.
//!
//! The sync engine treats every record as a bag of fields plus a sync marker;
//! only the image table gets a typed view because the asset pipeline needs
//! structured access to its storage fields.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};

use crate::errors::{Result, SyncError};

/// Canonical list of local tables that participate in delta sync.
pub const GALLERY_SYNC_TABLES: [&str; 9] = [
    "galleries",
    "gallery_categories",
    "gallery_images",
    "gallery_image_categories",
    "gallery_tags",
    "gallery_image_tags",
    "gallery_notes",
    "gallery_favorites",
    "gallery_image_projects",
];

/// The image table, central to the asset transfer pipeline.
pub const IMAGES_TABLE: &str = "gallery_images";

/// Join tables that reference an image by `image_id` and must be cascaded
/// when the image is deleted.
pub const IMAGE_RELATION_TABLES: [&str; 5] = [
    "gallery_image_categories",
    "gallery_image_tags",
    "gallery_notes",
    "gallery_favorites",
    "gallery_image_projects",
];

/// Per-record sync marker. A record not yet acknowledged by the remote is
/// never `Synced`; deletions are tracked as tombstones, not as a marker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Created,
    Updated,
    #[default]
    Synced,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Synced => "synced",
        }
    }
}

/// Loose field map carried by every record.
pub type Fields = serde_json::Map<String, serde_json::Value>;

/// A generic synced record: stable id plus opaque domain fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    #[serde(flatten)]
    pub fields: Fields,
}

impl Record {
    pub fn new(id: impl Into<String>, fields: Fields) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }

    pub fn field(&self, name: &str) -> Option<&serde_json::Value> {
        self.fields.get(name)
    }

    pub fn str_field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(|v| v.as_str())
    }

    pub fn set_field(&mut self, name: &str, value: serde_json::Value) {
        self.fields.insert(name.to_string(), value);
    }

    /// Sync marker for this record; absent or null reads as `Synced`.
    pub fn sync_status(&self) -> SyncStatus {
        self.str_field("sync_status")
            .and_then(|raw| serde_json::from_value(serde_json::Value::String(raw.to_string())).ok())
            .unwrap_or_default()
    }

    /// Flat JSON object including the id, as sent over the wire.
    pub fn into_value(self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Created/updated/deleted partitions for one table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableChanges {
    #[serde(default)]
    pub created: Vec<Record>,
    #[serde(default)]
    pub updated: Vec<Record>,
    #[serde(default)]
    pub deleted: Vec<String>,
}

impl TableChanges {
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }

    pub fn record_count(&self) -> usize {
        self.created.len() + self.updated.len() + self.deleted.len()
    }

    /// All upserted records (created then updated).
    pub fn upserts(&self) -> impl Iterator<Item = &Record> {
        self.created.iter().chain(self.updated.iter())
    }

    pub fn upserts_mut(&mut self) -> impl Iterator<Item = &mut Record> {
        self.created.iter_mut().chain(self.updated.iter_mut())
    }
}

/// A full delta changeset, partitioned by table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Changeset {
    pub tables: BTreeMap<String, TableChanges>,
}

impl Changeset {
    pub fn table(&self, name: &str) -> Option<&TableChanges> {
        self.tables.get(name)
    }

    pub fn table_mut(&mut self, name: &str) -> &mut TableChanges {
        self.tables.entry(name.to_string()).or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.values().all(TableChanges::is_empty)
    }

    pub fn record_count(&self) -> usize {
        self.tables.values().map(TableChanges::record_count).sum()
    }

    /// Drop one upserted record from a table, e.g. to exclude an image whose
    /// upload failed from the current push pass.
    pub fn remove_upsert(&mut self, table: &str, id: &str) {
        if let Some(changes) = self.tables.get_mut(table) {
            changes.created.retain(|r| r.id != id);
            changes.updated.retain(|r| r.id != id);
        }
    }
}

/// Pull RPC result: remote deltas plus the new server checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PulledChanges {
    pub changes: Changeset,
    pub timestamp: i64,
}

/// Provenance of an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Camera,
    Library,
    Pinterest,
    Instagram,
    Url,
    #[serde(other)]
    Other,
}

/// Structured metadata sidecar stored in the image `metadata` column.
///
/// Unknown keys are preserved in `extra` so records written by newer clients
/// round-trip without loss.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ImageMetadata {
    pub width: u32,
    pub height: u32,
    pub size_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub captured_at: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ImageMetadata {
    pub fn parse(raw: &str) -> Result<Self> {
        serde_json::from_str(raw)
            .map_err(|e| SyncError::storage(format!("Invalid image metadata: {}", e)))
    }

    pub fn encode(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

fn de_status_or_default<'de, D>(deserializer: D) -> std::result::Result<SyncStatus, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<SyncStatus>::deserialize(deserializer)?.unwrap_or_default())
}

// SQLite has no boolean affinity; accept 0/1 as well as true/false.
fn de_flag<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<serde_json::Value>::deserialize(deserializer)? {
        Some(serde_json::Value::Bool(v)) => Ok(v),
        Some(serde_json::Value::Number(n)) => Ok(n.as_i64().unwrap_or(0) != 0),
        Some(serde_json::Value::Null) | None => Ok(false),
        Some(other) => Err(serde::de::Error::custom(format!(
            "expected boolean flag, got {}",
            other
        ))),
    }
}

/// Typed view of a `gallery_images` record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageRecord {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub storage_path: Option<String>,
    pub local_uri: Option<String>,
    pub thumbnail_path: Option<String>,
    pub source_type: Option<SourceType>,
    pub source_url: Option<String>,
    pub source_author: Option<String>,
    #[serde(deserialize_with = "de_flag")]
    pub is_public: bool,
    pub view_count: i64,
    pub user_id: String,
    pub metadata: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    #[serde(deserialize_with = "de_status_or_default")]
    pub sync_status: SyncStatus,
}

impl ImageRecord {
    pub fn from_record(record: &Record) -> Result<Self> {
        serde_json::from_value(record.clone().into_value())
            .map_err(|e| SyncError::storage(format!("Invalid image record {}: {}", record.id, e)))
    }

    pub fn metadata(&self) -> Option<ImageMetadata> {
        self.metadata
            .as_deref()
            .and_then(|raw| ImageMetadata::parse(raw).ok())
    }

    /// An image that is only remote: it has been uploaded but never
    /// materialized on this device.
    pub fn needs_download(&self) -> bool {
        self.storage_path.is_some() && self.local_uri.is_none()
    }

    /// A dirty image carrying a local original that must be uploaded before
    /// its record can be pushed.
    pub fn needs_upload(&self) -> bool {
        self.local_uri.is_some()
            && (self.storage_path.is_none() || self.sync_status != SyncStatus::Synced)
    }
}
