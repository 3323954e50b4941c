//! Local replica contract: a change-tracked, transactional document store.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::Result;
use crate::models::{Changeset, Fields, Record};

/// Rows removed by an application-level cascade delete.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CascadeReport {
    /// Relation rows removed, keyed by join table.
    pub removed: BTreeMap<String, usize>,
    /// Whether the image row itself was found and removed.
    pub image_removed: bool,
}

impl CascadeReport {
    pub fn total_relations(&self) -> usize {
        self.removed.values().sum()
    }
}

/// The embedded record store the sync engine reconciles against.
///
/// Implementations own change tracking: `create` marks records `created`,
/// `update` flips `synced` records to `updated` (a still-unpushed `created`
/// record stays `created`), and `delete` records a tombstone for any record
/// the remote has already seen. Every multi-record operation is atomic.
#[async_trait]
pub trait LocalReplica: Send + Sync {
    async fn find(&self, table: &str, id: &str) -> Result<Option<Record>>;

    /// Insert a record. Uses the `id` field when present, otherwise assigns
    /// one. Stamps timestamps and the `created` marker.
    async fn create(&self, table: &str, fields: Fields) -> Result<Record>;

    /// Patch fields on an existing record, stamping `updated_at` and the
    /// change marker.
    async fn update(&self, table: &str, id: &str, fields: Fields) -> Result<Record>;

    /// Delete one record, recording a tombstone if the remote knew it.
    async fn delete(&self, table: &str, id: &str) -> Result<()>;

    async fn query_by_field(&self, table: &str, field: &str, value: &str) -> Result<Vec<Record>>;

    /// Records in `table` whose marker is not `synced`, plus pending
    /// tombstones for that table.
    async fn count_pending(&self, table: &str) -> Result<u64>;

    /// Dirty records across every synced table, partitioned into
    /// created/updated by marker and deleted from tombstones.
    async fn collect_dirty(&self) -> Result<Changeset>;

    /// Apply a pulled changeset in one transaction. Remote records land with
    /// the `synced` marker; remote deletions drop local rows and any matching
    /// tombstone (last-writer-wins by the remote's sequencing).
    async fn apply_remote_changes(&self, changes: &Changeset) -> Result<()>;

    /// After a push acknowledgement: flip every pushed record to `synced`
    /// and clear acknowledged tombstones, in one transaction.
    async fn mark_changeset_synced(&self, changes: &Changeset) -> Result<()>;

    /// Create one image record plus its association rows atomically.
    async fn create_image_with_relations(
        &self,
        image: Fields,
        relations: Vec<(String, Fields)>,
    ) -> Result<Record>;

    /// Application-level cascade: remove every relation row referencing the
    /// image across all join tables, then the image row, in one transaction.
    /// The replica does not cascade on its own.
    async fn delete_image_and_relations(&self, image_id: &str) -> Result<CascadeReport>;

    /// Checkpoint of the last successful pull (epoch millis, 0 on first run).
    async fn last_pulled_at(&self) -> Result<i64>;

    async fn set_last_pulled_at(&self, timestamp: i64) -> Result<()>;
}
