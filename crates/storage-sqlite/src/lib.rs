//! SQLite-backed local replica for the gallery sync engine.
//!
//! Stores all synced gallery tables with per-row change markers, tombstones
//! for pushed-then-deleted records and the pull checkpoint, behind the
//! `LocalReplica` trait from `atelier-core`.

mod replica;
mod schema;

pub use replica::SqliteReplica;
pub use schema::BOOTSTRAP_SQL;
