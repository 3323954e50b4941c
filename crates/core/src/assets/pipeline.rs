//! Ingestion, upload/download and cascade deletion of gallery images.
//!
//! Every ingested image is resized, re-encoded and written to the asset
//! store before its record is created, so the record never references a
//! file that does not exist. Remote transfers run in bounded batches and
//! report per-item outcomes instead of failing the batch.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use log::{info, warn};
use serde_json::json;
use uuid::Uuid;

use super::encode::{shrink_to_edge, EncodedImage};
use super::store::AssetStore;
use super::{CaptureSource, DevicePicker};
use crate::config::MediaConfig;
use crate::errors::{Result, SyncError};
use crate::models::{Fields, ImageMetadata, ImageRecord, Record, SourceType, IMAGES_TABLE};
use crate::remote::RemoteBlobStore;
use crate::replica::{CascadeReport, LocalReplica};
use crate::session::SessionProvider;

/// Provenance attached to an ingested image.
#[derive(Debug, Clone)]
pub struct Attribution {
    pub source_type: SourceType,
    pub source_url: Option<String>,
    pub source_author: Option<String>,
}

impl Attribution {
    pub fn from_source(source_type: SourceType) -> Self {
        Self {
            source_type,
            source_url: None,
            source_author: None,
        }
    }
}

/// Caller-supplied fields for a new image and its association rows.
#[derive(Debug, Clone, Default)]
pub struct IngestOptions {
    pub name: String,
    pub description: Option<String>,
    pub category_ids: Vec<String>,
    pub tag_ids: Vec<String>,
    pub favorite: bool,
    pub attribution: Option<Attribution>,
}

impl IngestOptions {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

/// Remote object paths persisted after a successful upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedAssets {
    pub storage_path: String,
    pub thumbnail_path: String,
}

/// Per-item outcome of a batched transfer. A failed item never aborts the
/// rest of the batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferReport {
    pub succeeded: Vec<String>,
    pub failed: Vec<(String, String)>,
}

impl TransferReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn total(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }
}

fn remote_image_path(user_id: &str, file_name: &str) -> String {
    format!("user_{}/gallery/images/{}", user_id, file_name)
}

fn remote_thumbnail_path(user_id: &str, file_name: &str) -> String {
    format!("user_{}/gallery/thumbnails/{}", user_id, file_name)
}

fn base_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .unwrap_or("jpg")
        .to_ascii_lowercase()
}

fn content_type_for(extension: &str) -> &'static str {
    match extension {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        "gif" => "image/gif",
        _ => "application/octet-stream",
    }
}

/// Moves image bytes between the device, the local replica and remote blob
/// storage. Sync markers are owned by the replica; the pipeline only ever
/// patches storage fields and never flips a record to `synced` itself.
pub struct AssetPipeline {
    store: AssetStore,
    replica: Arc<dyn LocalReplica>,
    blobs: Arc<dyn RemoteBlobStore>,
    sessions: Arc<dyn SessionProvider>,
    media: MediaConfig,
    batch_size: usize,
}

impl AssetPipeline {
    pub fn new(
        store: AssetStore,
        replica: Arc<dyn LocalReplica>,
        blobs: Arc<dyn RemoteBlobStore>,
        sessions: Arc<dyn SessionProvider>,
        media: MediaConfig,
        batch_size: usize,
    ) -> Self {
        Self {
            store,
            replica,
            blobs,
            sessions,
            media,
            batch_size: batch_size.max(1),
        }
    }

    /// Capture or pick an image on-device and ingest it. `None` when the
    /// user cancels the picker.
    pub async fn acquire_from_device(
        &self,
        picker: &dyn DevicePicker,
        source: CaptureSource,
        mut options: IngestOptions,
    ) -> Result<Option<Record>> {
        let picked = match picker.pick(source).await? {
            Some(picked) => picked,
            None => return Ok(None),
        };
        if options.attribution.is_none() {
            let source_type = match source {
                CaptureSource::Camera => SourceType::Camera,
                CaptureSource::Library => SourceType::Library,
            };
            options.attribution = Some(Attribution::from_source(source_type));
        }
        let record = self
            .ingest(picked.bytes, picked.captured_at, options)
            .await?;
        Ok(Some(record))
    }

    /// Fetch an external URL and ingest the bytes as a new image.
    pub async fn import_from_url(&self, url: &str, mut options: IngestOptions) -> Result<Record> {
        let staging = std::env::temp_dir().join(format!("gallery-import-{}", Uuid::new_v4()));
        self.blobs.download(url, &staging).await?;
        let bytes = self.store.read(&staging).await;
        let _ = AssetStore::remove_if_exists(&staging).await;
        let bytes = bytes?;

        if options.attribution.is_none() {
            options.attribution = Some(Attribution {
                source_type: SourceType::Url,
                source_url: Some(url.to_string()),
                source_author: None,
            });
        }
        self.ingest(bytes, None, options).await
    }

    /// Resize, thumbnail and persist raw image bytes, then create the image
    /// record plus its association rows in one transaction. The new record
    /// carries the `created` marker until a sync cycle pushes it.
    pub async fn ingest(
        &self,
        bytes: Vec<u8>,
        captured_at: Option<DateTime<Utc>>,
        options: IngestOptions,
    ) -> Result<Record> {
        let id = Uuid::new_v4().to_string();
        let (original, thumbnail) = self.encode_pair(bytes).await?;

        // Re-encoding normalizes every source format to JPEG.
        let image_name = AssetStore::image_file_name(&id, "jpg");
        let thumb_name = AssetStore::thumbnail_file_name(&id, "jpg");
        let local_uri = self.store.write_image(&image_name, &original.bytes).await?;
        let thumb_path = self
            .store
            .write_thumbnail(&thumb_name, &thumbnail.bytes)
            .await?;

        let metadata = ImageMetadata {
            width: original.width,
            height: original.height,
            size_bytes: original.bytes.len() as u64,
            captured_at: captured_at.map(|t| t.to_rfc3339()),
            extra: Default::default(),
        };

        let mut image = Fields::new();
        image.insert("id".into(), json!(id));
        image.insert("name".into(), json!(options.name));
        if let Some(description) = &options.description {
            image.insert("description".into(), json!(description));
        }
        image.insert("local_uri".into(), json!(local_uri.to_string_lossy()));
        image.insert("thumbnail_path".into(), json!(thumb_path.to_string_lossy()));
        image.insert("metadata".into(), json!(metadata.encode()));
        if let Some(attribution) = &options.attribution {
            image.insert("source_type".into(), json!(attribution.source_type));
            if let Some(url) = &attribution.source_url {
                image.insert("source_url".into(), json!(url));
            }
            if let Some(author) = &attribution.source_author {
                image.insert("source_author".into(), json!(author));
            }
        }
        if let Some(session) = self.sessions.current_session().await {
            image.insert("user_id".into(), json!(session.user_id));
        }

        let mut relations = Vec::new();
        for category_id in &options.category_ids {
            let mut row = Fields::new();
            row.insert("image_id".into(), json!(id));
            row.insert("category_id".into(), json!(category_id));
            relations.push(("gallery_image_categories".to_string(), row));
        }
        for tag_id in &options.tag_ids {
            let mut row = Fields::new();
            row.insert("image_id".into(), json!(id));
            row.insert("tag_id".into(), json!(tag_id));
            relations.push(("gallery_image_tags".to_string(), row));
        }
        if options.favorite {
            let mut row = Fields::new();
            row.insert("image_id".into(), json!(id));
            relations.push(("gallery_favorites".to_string(), row));
        }

        let record = self
            .replica
            .create_image_with_relations(image, relations)
            .await?;
        info!(
            "[AssetPipeline] Ingested image {} ({}x{}, {} relation rows)",
            record.id,
            original.width,
            original.height,
            options.category_ids.len() + options.tag_ids.len() + usize::from(options.favorite)
        );
        Ok(record)
    }

    async fn encode_pair(&self, bytes: Vec<u8>) -> Result<(EncodedImage, EncodedImage)> {
        let media = self.media.clone();
        tokio::task::spawn_blocking(move || {
            let original = shrink_to_edge(&bytes, media.max_image_edge, media.image_quality)?;
            let thumbnail =
                shrink_to_edge(&original.bytes, media.thumbnail_edge, media.thumbnail_quality)?;
            Ok((original, thumbnail))
        })
        .await
        .map_err(|e| SyncError::transfer(format!("Image encoding task failed: {}", e)))?
    }

    /// Upload an image's original and thumbnail to remote storage and persist
    /// the resulting object paths on the record. The record keeps its dirty
    /// marker; only a push acknowledgement marks it `synced`.
    pub async fn upload_to_remote(&self, image_id: &str) -> Result<UploadedAssets> {
        let session = self
            .sessions
            .current_session()
            .await
            .ok_or(SyncError::NotAuthenticated)?;
        let record = self
            .replica
            .find(IMAGES_TABLE, image_id)
            .await?
            .ok_or_else(|| SyncError::transfer(format!("Unknown image {}", image_id)))?;
        let image = ImageRecord::from_record(&record)?;
        let local_uri = image
            .local_uri
            .as_deref()
            .ok_or_else(|| SyncError::transfer(format!("Image {} has no local file", image_id)))?;

        let local_path = Path::new(local_uri).to_path_buf();
        let extension = extension_of(&local_path);
        let bytes = self.store.read(&local_path).await?;

        let thumb_name = AssetStore::thumbnail_file_name(image_id, &extension);
        let local_thumb = self.store.thumbnail_path(&thumb_name);
        let thumb_bytes = if AssetStore::exists(&local_thumb).await {
            self.store.read(&local_thumb).await?
        } else {
            let media = self.media.clone();
            let source = bytes.clone();
            let encoded = tokio::task::spawn_blocking(move || {
                shrink_to_edge(&source, media.thumbnail_edge, media.thumbnail_quality)
            })
            .await
            .map_err(|e| SyncError::transfer(format!("Thumbnail task failed: {}", e)))??;
            self.store.write_thumbnail(&thumb_name, &encoded.bytes).await?;
            encoded.bytes
        };

        let image_name = AssetStore::image_file_name(image_id, &extension);
        let storage_path = remote_image_path(&session.user_id, &image_name);
        let thumbnail_path = remote_thumbnail_path(&session.user_id, &thumb_name);

        self.blobs
            .upload(&session, &storage_path, bytes, content_type_for(&extension))
            .await?;
        self.blobs
            .upload(&session, &thumbnail_path, thumb_bytes, "image/jpeg")
            .await?;

        let mut patch = Fields::new();
        patch.insert("storage_path".into(), json!(storage_path));
        patch.insert("thumbnail_path".into(), json!(thumbnail_path));
        self.replica.update(IMAGES_TABLE, image_id, patch).await?;

        info!("[AssetPipeline] Uploaded image {} to {}", image_id, storage_path);
        Ok(UploadedAssets {
            storage_path,
            thumbnail_path,
        })
    }

    /// Local landing path for an image stored at the given remote object
    /// path.
    pub fn local_image_path(&self, storage_path: &str) -> PathBuf {
        self.store.image_path(base_name(storage_path))
    }

    /// Materialize a remote image on this device. Idempotent: an existing
    /// local file short-circuits without touching the network.
    pub async fn download_from_remote(&self, image: &ImageRecord) -> Result<PathBuf> {
        let storage_path = image.storage_path.as_deref().ok_or_else(|| {
            SyncError::transfer(format!("Image {} has never been uploaded", image.id))
        })?;
        let file_name = base_name(storage_path);
        let target = self.store.image_path(file_name);

        if !AssetStore::exists(&target).await {
            let url = self.blobs.public_url(storage_path);
            self.blobs.download(&url, &target).await?;
            info!("[AssetPipeline] Downloaded image {} to {}", image.id, target.display());
        }
        self.ensure_thumbnail(image, &target).await;

        if image.local_uri.is_none()
            && self.replica.find(IMAGES_TABLE, &image.id).await?.is_some()
        {
            let mut patch = Fields::new();
            patch.insert("local_uri".into(), json!(target.to_string_lossy()));
            self.replica.update(IMAGES_TABLE, &image.id, patch).await?;
        }
        Ok(target)
    }

    /// Best effort: fetch the remote thumbnail, falling back to deriving one
    /// from the original when the fetch fails or no remote thumbnail exists.
    async fn ensure_thumbnail(&self, image: &ImageRecord, original: &Path) {
        let extension = extension_of(original);
        let thumb_name = AssetStore::thumbnail_file_name(&image.id, &extension);
        let local_thumb = self.store.thumbnail_path(&thumb_name);
        if AssetStore::exists(&local_thumb).await {
            return;
        }

        if let Some(remote) = image.thumbnail_path.as_deref() {
            if !Path::new(remote).is_absolute() {
                let url = self.blobs.public_url(remote);
                match self.blobs.download(&url, &local_thumb).await {
                    Ok(()) => return,
                    Err(e) => warn!(
                        "[AssetPipeline] Thumbnail fetch failed for {}, deriving locally: {}",
                        image.id, e
                    ),
                }
            }
        }

        let bytes = match self.store.read(original).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("[AssetPipeline] Cannot derive thumbnail for {}: {}", image.id, e);
                return;
            }
        };
        let media = self.media.clone();
        match tokio::task::spawn_blocking(move || {
            shrink_to_edge(&bytes, media.thumbnail_edge, media.thumbnail_quality)
        })
        .await
        {
            Ok(Ok(encoded)) => {
                if let Err(e) = self.store.write_thumbnail(&thumb_name, &encoded.bytes).await {
                    warn!("[AssetPipeline] Failed to store derived thumbnail: {}", e);
                }
            }
            Ok(Err(e)) => {
                warn!("[AssetPipeline] Thumbnail derivation failed for {}: {}", image.id, e)
            }
            Err(e) => warn!("[AssetPipeline] Thumbnail task failed for {}: {}", image.id, e),
        }
    }

    /// Remove an image: relation rows and the record via the replica cascade,
    /// then the local files. Missing files are not errors.
    pub async fn delete_local_and_relations(&self, image_id: &str) -> Result<CascadeReport> {
        let record = self.replica.find(IMAGES_TABLE, image_id).await?;
        let image = match &record {
            Some(record) => Some(ImageRecord::from_record(record)?),
            None => None,
        };

        let report = self.replica.delete_image_and_relations(image_id).await?;

        if let Some(image) = image {
            if let Some(local_uri) = &image.local_uri {
                let local_path = Path::new(local_uri).to_path_buf();
                let extension = extension_of(&local_path);
                AssetStore::remove_if_exists(&local_path).await?;
                let thumb = self
                    .store
                    .thumbnail_path(&AssetStore::thumbnail_file_name(image_id, &extension));
                AssetStore::remove_if_exists(&thumb).await?;
            }
        }
        info!(
            "[AssetPipeline] Deleted image {} and {} relation rows",
            image_id,
            report.total_relations()
        );
        Ok(report)
    }

    /// Upload a set of images with bounded concurrency. Per-item failures
    /// are reported, never propagated.
    pub async fn upload_batch(&self, image_ids: &[String]) -> TransferReport {
        let mut report = TransferReport::default();
        let mut outcomes = futures::stream::iter(image_ids.iter().cloned().map(|id| async move {
            let outcome = self.upload_to_remote(&id).await;
            (id, outcome)
        }))
        .buffer_unordered(self.batch_size);

        while let Some((id, outcome)) = outcomes.next().await {
            match outcome {
                Ok(_) => report.succeeded.push(id),
                Err(e) => {
                    warn!("[AssetPipeline] Upload failed for {}: {}", id, e);
                    report.failed.push((id, e.to_string()));
                }
            }
        }
        report
    }

    /// Download a set of images with bounded concurrency.
    pub async fn download_batch(&self, images: &[ImageRecord]) -> TransferReport {
        let mut report = TransferReport::default();
        let mut outcomes = futures::stream::iter(images.iter().cloned().map(|image| async move {
            let outcome = self.download_from_remote(&image).await;
            (image.id, outcome)
        }))
        .buffer_unordered(self.batch_size);

        while let Some((id, outcome)) = outcomes.next().await {
            match outcome {
                Ok(_) => report.succeeded.push(id),
                Err(e) => {
                    warn!("[AssetPipeline] Download failed for {}: {}", id, e);
                    report.failed.push((id, e.to_string()));
                }
            }
        }
        report
    }
}
