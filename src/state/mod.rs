//! Durable phase-state services.
//!
//! Three layers, built on each other:
//! - [`persistence`] — current state blob per (workflow, phase)
//! - [`versioning`] — append-only version chain with checksums
//! - [`recovery`] — checkpoints, recovery tracking, rollback
//!
//! Stores are process-local directories; cross-process contention is not
//! supported.

pub mod persistence;
pub mod recovery;
pub mod versioning;

pub use persistence::{StateBlob, StatePersistence, StoreStatistics};
pub use recovery::{
    Checkpoint, CheckpointMetadata, CheckpointOptions, RecoveryOption, RecoveryPlan,
    RecoveryRecord, RecoveryStatistics, RollbackRecord, StateRecovery,
};
pub use versioning::{CreateVersionOptions, ListOptions, StateVersioning, Version, VersionDiff};

/// Make a workflow or phase name safe for use in a file name.
pub(crate) fn sanitize_key(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .collect()
}
