//! Offline-first gallery synchronization core.
//!
//! This crate holds the domain model for synced gallery records, the
//! bidirectional delta-sync engine, the asset transfer pipeline (local files,
//! resize/thumbnail derivation, preview cache) and the process-wide sync
//! status coordinator. Storage and transport live behind traits so the
//! engine can be exercised against in-memory collaborators.

pub mod assets;
pub mod config;
pub mod errors;
pub mod models;
pub mod remote;
pub mod replica;
pub mod session;
pub mod sync;

#[cfg(test)]
pub(crate) mod testing;

pub use assets::{
    AssetPipeline, AssetStore, Attribution, CacheStats, CaptureSource, DevicePicker, ImageCache,
    IngestOptions, PickedImage, TransferReport, UploadedAssets,
};
pub use config::{CacheConfig, MediaConfig, SyncConfig};
pub use errors::{ErrorCategory, Result, SyncError};
pub use models::{
    Changeset, Fields, ImageMetadata, ImageRecord, PulledChanges, Record, SourceType, SyncStatus,
    TableChanges, GALLERY_SYNC_TABLES, IMAGES_TABLE, IMAGE_RELATION_TABLES,
};
pub use remote::{RemoteBlobStore, RemoteChangeProtocol};
pub use replica::{CascadeReport, LocalReplica};
pub use session::{AuthSession, ConnectivityProbe, SessionProvider};
pub use sync::{SyncCoordinator, SyncEngine, SyncPhase, SyncStatusSnapshot, SyncSummary};
