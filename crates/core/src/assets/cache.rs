//! Bounded on-device cache for remotely-fetched preview assets.
//!
//! Distinct from the asset store: entries here are not owned by any record
//! and may be evicted at any time. The index (sizes, access times, total
//! usage) is persisted next to the files and reloaded on open.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::pipeline::TransferReport;
use crate::config::CacheConfig;
use crate::errors::{Result, SyncError};
use crate::remote::RemoteBlobStore;

const CACHE_INDEX_FILE: &str = "cache-info.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CacheEntry {
    url: String,
    size: u64,
    created_at: i64,
    last_accessed: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct CacheIndex {
    size: u64,
    last_cleaned: i64,
    entries: HashMap<String, CacheEntry>,
}

/// Cache usage counters for diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub size: u64,
    pub entry_count: usize,
    pub max_size: u64,
    pub utilization: f64,
    pub last_cleaned: i64,
}

/// LRU-evicting preview cache. Explicitly constructed and injected; callers
/// hold a reference instead of importing shared process state.
pub struct ImageCache {
    dir: PathBuf,
    index_path: PathBuf,
    config: CacheConfig,
    blobs: Arc<dyn RemoteBlobStore>,
    state: tokio::sync::Mutex<CacheIndex>,
}

impl ImageCache {
    /// Open the cache under `dir`, creating it and reloading the persisted
    /// index. Runs the opportunistic cleanup when the last one is older than
    /// the configured interval.
    pub async fn open(
        dir: PathBuf,
        config: CacheConfig,
        blobs: Arc<dyn RemoteBlobStore>,
    ) -> Result<Self> {
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| SyncError::storage(format!("Failed to create cache directory: {}", e)))?;

        let index_path = dir.join(CACHE_INDEX_FILE);
        let index = match tokio::fs::read(&index_path).await {
            Ok(raw) => serde_json::from_slice(&raw).unwrap_or_else(|e| {
                warn!("[ImageCache] Discarding unreadable cache index: {}", e);
                CacheIndex::default()
            }),
            Err(_) => CacheIndex::default(),
        };

        let cache = Self {
            dir,
            index_path,
            config,
            blobs,
            state: tokio::sync::Mutex::new(index),
        };

        let clean_due = {
            let state = cache.state.lock().await;
            Utc::now().timestamp_millis() - state.last_cleaned
                > cache.config.clean_interval.as_millis() as i64
        };
        if clean_due {
            cache.clean().await;
        }

        Ok(cache)
    }

    /// Content key for a source URL: hex SHA-256.
    pub fn content_key(url: &str) -> String {
        let digest = Sha256::digest(url.as_bytes());
        digest.iter().map(|b| format!("{:02x}", b)).collect()
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(key)
    }

    async fn persist_index(&self, index: &CacheIndex) {
        match serde_json::to_vec(index) {
            Ok(raw) => {
                if let Err(e) = tokio::fs::write(&self.index_path, raw).await {
                    warn!("[ImageCache] Failed to persist cache index: {}", e);
                }
            }
            Err(e) => warn!("[ImageCache] Failed to encode cache index: {}", e),
        }
    }

    /// Path of a cached entry, touching its access time. `None` on miss.
    pub async fn cached_path(&self, url: &str) -> Option<PathBuf> {
        let key = Self::content_key(url);
        let path = self.entry_path(&key);
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return None;
        }

        let mut state = self.state.lock().await;
        if let Some(entry) = state.entries.get_mut(&key) {
            entry.last_accessed = Utc::now().timestamp_millis();
            let snapshot = state.clone();
            drop(state);
            self.persist_index(&snapshot).await;
        }
        Some(path)
    }

    /// Fetch a URL into the cache, short-circuiting on a hit. Triggers
    /// eviction when the insert pushes usage past the ceiling.
    pub async fn fetch(&self, url: &str) -> Result<PathBuf> {
        if let Some(path) = self.cached_path(url).await {
            return Ok(path);
        }

        let key = Self::content_key(url);
        let path = self.entry_path(&key);
        self.blobs.download(url, &path).await?;

        let size = tokio::fs::metadata(&path)
            .await
            .map_err(|e| SyncError::storage(format!("Failed to stat cached file: {}", e)))?
            .len();

        let now = Utc::now().timestamp_millis();
        let mut state = self.state.lock().await;
        state.entries.insert(
            key,
            CacheEntry {
                url: url.to_string(),
                size,
                created_at: now,
                last_accessed: now,
            },
        );
        state.size = state.size.saturating_add(size);
        if state.size > self.config.max_size_bytes {
            self.evict_locked(&mut state).await;
        }
        let snapshot = state.clone();
        drop(state);
        self.persist_index(&snapshot).await;

        Ok(path)
    }

    /// Warm the cache for a set of URLs; individual failures are collected,
    /// not propagated.
    pub async fn prefetch(&self, urls: &[String]) -> TransferReport {
        let mut report = TransferReport::default();
        let results = futures::future::join_all(urls.iter().map(|url| async move {
            (url.clone(), self.fetch(url).await)
        }))
        .await;
        for (url, outcome) in results {
            match outcome {
                Ok(_) => report.succeeded.push(url),
                Err(e) => report.failed.push((url, e.to_string())),
            }
        }
        report
    }

    /// Drop one entry; returns whether it was present.
    pub async fn remove(&self, url: &str) -> Result<bool> {
        let key = Self::content_key(url);
        let path = self.entry_path(&key);

        let mut state = self.state.lock().await;
        let removed = state.entries.remove(&key);
        if let Some(entry) = &removed {
            state.size = state.size.saturating_sub(entry.size);
        }
        let snapshot = state.clone();
        drop(state);

        if removed.is_some() {
            let _ = tokio::fs::remove_file(&path).await;
            self.persist_index(&snapshot).await;
            return Ok(true);
        }
        Ok(false)
    }

    /// LRU cleanup: evicts down to the low-water mark when over the ceiling.
    /// Always stamps `last_cleaned` so the daily check at open settles.
    pub async fn clean(&self) {
        let mut state = self.state.lock().await;
        if state.size > self.config.max_size_bytes {
            self.evict_locked(&mut state).await;
        } else {
            state.last_cleaned = Utc::now().timestamp_millis();
        }
        let snapshot = state.clone();
        drop(state);
        self.persist_index(&snapshot).await;
    }

    async fn evict_locked(&self, state: &mut CacheIndex) {
        let low_water = self.config.low_water_bytes();
        let mut by_recency: Vec<(String, i64, u64)> = state
            .entries
            .iter()
            .map(|(key, entry)| (key.clone(), entry.last_accessed, entry.size))
            .collect();
        by_recency.sort_by_key(|(_, last_accessed, _)| *last_accessed);

        let mut freed = 0u64;
        let mut removed = 0usize;
        for (key, _, size) in by_recency {
            if state.size <= low_water {
                break;
            }
            let path = self.entry_path(&key);
            if let Err(e) = tokio::fs::remove_file(&path).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("[ImageCache] Failed to evict {}: {}", path.display(), e);
                    continue;
                }
            }
            state.entries.remove(&key);
            state.size = state.size.saturating_sub(size);
            freed += size;
            removed += 1;
        }
        state.last_cleaned = Utc::now().timestamp_millis();
        debug!(
            "[ImageCache] Evicted {} entries, freed {} bytes, usage now {}",
            removed, freed, state.size
        );
    }

    /// Remove every entry and reset the index.
    pub async fn clear(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        for key in state.entries.keys() {
            let _ = tokio::fs::remove_file(self.entry_path(key)).await;
        }
        state.entries.clear();
        state.size = 0;
        state.last_cleaned = Utc::now().timestamp_millis();
        let snapshot = state.clone();
        drop(state);
        self.persist_index(&snapshot).await;
        Ok(())
    }

    pub async fn stats(&self) -> CacheStats {
        let state = self.state.lock().await;
        CacheStats {
            size: state.size,
            entry_count: state.entries.len(),
            max_size: self.config.max_size_bytes,
            utilization: state.size as f64 / self.config.max_size_bytes as f64,
            last_cleaned: state.last_cleaned,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryBlobStore;
    use std::time::Duration;

    fn small_cache(max_size_bytes: u64) -> CacheConfig {
        CacheConfig {
            max_size_bytes,
            ..CacheConfig::default()
        }
    }

    async fn cache_with_payloads(
        dir: &std::path::Path,
        max_size: u64,
        payloads: &[(&str, usize)],
    ) -> (ImageCache, Arc<MemoryBlobStore>) {
        let blobs = Arc::new(MemoryBlobStore::default());
        for (url, size) in payloads {
            blobs.stage_url(url, vec![7u8; *size]);
        }
        let cache = ImageCache::open(dir.to_path_buf(), small_cache(max_size), blobs.clone())
            .await
            .unwrap();
        (cache, blobs)
    }

    #[tokio::test]
    async fn fetch_is_idempotent_per_url() {
        let dir = tempfile::tempdir().unwrap();
        let (cache, blobs) =
            cache_with_payloads(dir.path(), 1024, &[("https://img/a", 10)]).await;

        let first = cache.fetch("https://img/a").await.unwrap();
        let second = cache.fetch("https://img/a").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(blobs.download_count(), 1);
    }

    #[tokio::test]
    async fn exceeding_ceiling_evicts_lru_down_to_low_water() {
        let dir = tempfile::tempdir().unwrap();
        // Ceiling 100, low water 80. Four 30-byte entries: inserting the
        // fourth reaches 120 and must evict the two least recently used.
        let (cache, _blobs) = cache_with_payloads(
            dir.path(),
            100,
            &[
                ("https://img/a", 30),
                ("https://img/b", 30),
                ("https://img/c", 30),
                ("https://img/d", 30),
            ],
        )
        .await;

        let path_a = cache.fetch("https://img/a").await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let path_b = cache.fetch("https://img/b").await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let path_c = cache.fetch("https://img/c").await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        // Touch `a` so `b` becomes the oldest.
        cache.cached_path("https://img/a").await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let path_d = cache.fetch("https://img/d").await.unwrap();

        let stats = cache.stats().await;
        assert!(stats.size <= 80, "usage {} above low water", stats.size);
        assert_eq!(stats.entry_count, 2);
        // Strict LRU: b then c evicted; a survived because of the touch.
        assert!(!tokio::fs::try_exists(&path_b).await.unwrap());
        assert!(!tokio::fs::try_exists(&path_c).await.unwrap());
        assert!(tokio::fs::try_exists(&path_a).await.unwrap());
        assert!(tokio::fs::try_exists(&path_d).await.unwrap());
    }

    #[tokio::test]
    async fn under_ceiling_clean_stamps_the_index_once() {
        let dir = tempfile::tempdir().unwrap();
        let blobs = Arc::new(MemoryBlobStore::default());

        // Fresh index: the open-time check fires and must record the sweep
        // even though there is nothing to evict.
        let cache = ImageCache::open(dir.path().to_path_buf(), small_cache(1024), blobs.clone())
            .await
            .unwrap();
        let stamped = cache.stats().await.last_cleaned;
        assert!(stamped > 0);

        // Reopening within the interval finds the stamp and stays quiet.
        let reopened = ImageCache::open(dir.path().to_path_buf(), small_cache(1024), blobs)
            .await
            .unwrap();
        assert_eq!(reopened.stats().await.last_cleaned, stamped);
    }

    #[tokio::test]
    async fn index_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let blobs = Arc::new(MemoryBlobStore::default());
        blobs.stage_url("https://img/a", vec![1u8; 40]);

        {
            let cache = ImageCache::open(dir.path().to_path_buf(), small_cache(1024), blobs.clone())
                .await
                .unwrap();
            cache.fetch("https://img/a").await.unwrap();
        }

        let reopened = ImageCache::open(dir.path().to_path_buf(), small_cache(1024), blobs.clone())
            .await
            .unwrap();
        let stats = reopened.stats().await;
        assert_eq!(stats.size, 40);
        assert_eq!(stats.entry_count, 1);
        // Hit without another download.
        reopened.cached_path("https://img/a").await.unwrap();
        assert_eq!(blobs.download_count(), 1);
    }

    #[tokio::test]
    async fn prefetch_reports_per_url_outcomes() {
        let dir = tempfile::tempdir().unwrap();
        let (cache, blobs) =
            cache_with_payloads(dir.path(), 1024, &[("https://img/a", 5)]).await;
        blobs.fail_url("https://img/broken");

        let report = cache
            .prefetch(&[
                "https://img/a".to_string(),
                "https://img/broken".to_string(),
            ])
            .await;
        assert_eq!(report.succeeded, vec!["https://img/a".to_string()]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "https://img/broken");
    }
}
