//! Tunables for the sync engine, media ingestion and the preview cache.

use std::time::Duration;

/// Sync engine and coordinator configuration.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Concurrency bound for batched asset transfers within one cycle.
    pub transfer_batch_size: usize,
    /// Whole-cycle attempts for retryable remote protocol failures.
    pub max_sync_attempts: u32,
    /// Linear backoff base; attempt N sleeps `N * retry_base_delay`.
    pub retry_base_delay: Duration,
    /// Maximum callers parked behind an in-flight cycle.
    pub sync_queue_capacity: usize,
    /// Delay between a reconnect notification and the auto-sync it schedules,
    /// so flaky reconnects don't fire a cycle per flap.
    pub reconnect_settle_delay: Duration,
    /// Cadence of the background sync check while connected.
    pub background_sync_interval: Duration,
    /// Cadence of the pending-change recount.
    pub pending_poll_interval: Duration,
    /// Upper bound of random jitter added to periodic intervals.
    pub interval_jitter: Duration,
    /// Whether connectivity changes and timers may trigger sync on their own.
    pub auto_sync: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            transfer_batch_size: 20,
            max_sync_attempts: 3,
            retry_base_delay: Duration::from_secs(2),
            sync_queue_capacity: 32,
            reconnect_settle_delay: Duration::from_secs(2),
            background_sync_interval: Duration::from_secs(5 * 60),
            pending_poll_interval: Duration::from_secs(60),
            interval_jitter: Duration::from_secs(5),
            auto_sync: true,
        }
    }
}

/// Ingestion and thumbnail derivation parameters.
#[derive(Debug, Clone)]
pub struct MediaConfig {
    /// Stored originals are resized so the longest edge stays at or below this.
    pub max_image_edge: u32,
    /// JPEG quality for stored originals (0-100).
    pub image_quality: u8,
    /// Longest edge of derived thumbnails.
    pub thumbnail_edge: u32,
    /// JPEG quality for thumbnails.
    pub thumbnail_quality: u8,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            max_image_edge: 1200,
            image_quality: 80,
            thumbnail_edge: 300,
            thumbnail_quality: 70,
        }
    }
}

/// Preview cache sizing and cleanup cadence.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Ceiling for the total byte size of cached previews.
    pub max_size_bytes: u64,
    /// Eviction stops once usage falls to this fraction of the ceiling.
    pub low_water_fraction: f64,
    /// Opportunistic cleanup runs at most this often, checked on init.
    pub clean_interval: Duration,
}

impl CacheConfig {
    pub fn low_water_bytes(&self) -> u64 {
        (self.max_size_bytes as f64 * self.low_water_fraction) as u64
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size_bytes: 200 * 1024 * 1024,
            low_water_fraction: 0.8,
            clean_interval: Duration::from_secs(24 * 60 * 60),
        }
    }
}
