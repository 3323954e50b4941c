//! Bidirectional delta sync: the engine that runs cycles and the
//! coordinator that schedules them and fans out status.

mod coordinator;
mod engine;

pub use coordinator::{SyncCoordinator, SyncPhase, SyncStatusSnapshot};
pub use engine::{SyncEngine, SyncSummary};
