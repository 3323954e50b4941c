//! Asset transfer pipeline: local files, ingestion, transfers, preview cache.

mod cache;
mod encode;
mod pipeline;
mod store;

pub use cache::{CacheStats, ImageCache};
pub use encode::{shrink_to_edge, EncodedImage};
pub use pipeline::{
    Attribution, AssetPipeline, IngestOptions, TransferReport, UploadedAssets,
};
pub use store::AssetStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::errors::Result;

/// Where a device capture comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureSource {
    Camera,
    Library,
}

/// Raw image handed over by the OS capture/pick capability.
#[derive(Debug, Clone)]
pub struct PickedImage {
    pub bytes: Vec<u8>,
    pub extension: String,
    pub captured_at: Option<DateTime<Utc>>,
}

/// OS camera/library capture, injected by the application shell.
#[async_trait]
pub trait DevicePicker: Send + Sync {
    /// Returns `None` when the user cancels the picker.
    async fn pick(&self, source: CaptureSource) -> Result<Option<PickedImage>>;
}
