//! Local file storage for owned originals and derived thumbnails.

use std::path::{Path, PathBuf};

use crate::errors::{Result, SyncError};

fn io_err(context: &str, err: std::io::Error) -> SyncError {
    SyncError::storage(format!("{}: {}", context, err))
}

/// Two-root file store (`images/`, `thumbnails/`) addressed by id-derived
/// filenames. Image records reference entries by absolute path; the store
/// itself keeps no index.
#[derive(Debug, Clone)]
pub struct AssetStore {
    images_dir: PathBuf,
    thumbnails_dir: PathBuf,
}

impl AssetStore {
    /// Open the store under `root`, creating `gallery/images` and
    /// `gallery/thumbnails` when missing.
    pub async fn open(root: &Path) -> Result<Self> {
        let images_dir = root.join("gallery").join("images");
        let thumbnails_dir = root.join("gallery").join("thumbnails");
        tokio::fs::create_dir_all(&images_dir)
            .await
            .map_err(|e| io_err("Failed to create image directory", e))?;
        tokio::fs::create_dir_all(&thumbnails_dir)
            .await
            .map_err(|e| io_err("Failed to create thumbnail directory", e))?;
        Ok(Self {
            images_dir,
            thumbnails_dir,
        })
    }

    pub fn image_file_name(id: &str, extension: &str) -> String {
        format!("{}.{}", id, extension)
    }

    pub fn thumbnail_file_name(id: &str, extension: &str) -> String {
        format!("{}_thumb.{}", id, extension)
    }

    pub fn image_path(&self, file_name: &str) -> PathBuf {
        self.images_dir.join(file_name)
    }

    pub fn thumbnail_path(&self, file_name: &str) -> PathBuf {
        self.thumbnails_dir.join(file_name)
    }

    pub async fn write_image(&self, file_name: &str, bytes: &[u8]) -> Result<PathBuf> {
        let path = self.image_path(file_name);
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| io_err("Failed to write image", e))?;
        Ok(path)
    }

    pub async fn write_thumbnail(&self, file_name: &str, bytes: &[u8]) -> Result<PathBuf> {
        let path = self.thumbnail_path(file_name);
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| io_err("Failed to write thumbnail", e))?;
        Ok(path)
    }

    pub async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        tokio::fs::read(path)
            .await
            .map_err(|e| io_err("Failed to read asset", e))
    }

    pub async fn exists(path: &Path) -> bool {
        tokio::fs::try_exists(path).await.unwrap_or(false)
    }

    /// Remove a file if present; missing files are not an error.
    pub async fn remove_if_exists(path: &Path) -> Result<bool> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(io_err("Failed to delete asset", e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_creates_both_roots_and_round_trips_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = AssetStore::open(dir.path()).await.unwrap();

        let original = store
            .write_image(&AssetStore::image_file_name("img-1", "jpg"), b"orig")
            .await
            .unwrap();
        let thumb = store
            .write_thumbnail(&AssetStore::thumbnail_file_name("img-1", "jpg"), b"thumb")
            .await
            .unwrap();

        assert!(original.ends_with("gallery/images/img-1.jpg"));
        assert!(thumb.ends_with("gallery/thumbnails/img-1_thumb.jpg"));
        assert_eq!(store.read(&original).await.unwrap(), b"orig");
        assert!(AssetStore::exists(&thumb).await);
    }

    #[tokio::test]
    async fn remove_if_exists_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = AssetStore::open(dir.path()).await.unwrap();
        let path = store.write_image("a.jpg", b"x").await.unwrap();

        assert!(AssetStore::remove_if_exists(&path).await.unwrap());
        assert!(!AssetStore::remove_if_exists(&path).await.unwrap());
    }
}
