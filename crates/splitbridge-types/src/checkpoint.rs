use serde::{Deserialize, Serialize};

/// Identifier of a checkpoint, as assigned by the host engine.
///
/// Checkpoint identifiers increase over the lifetime of a job, but the
/// bridge does not rely on them being contiguous.
pub type CheckpointId = u64;

/// Checkpoint progress of a single reader instance.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointStatus {
    /// Most recent checkpoint for which the reader produced a snapshot.
    pub last_snapshot: Option<CheckpointId>,

    /// Most recent checkpoint that the engine reported as complete.
    pub last_completed: Option<CheckpointId>,

    /// Number of splits captured by the most recent snapshot.
    pub snapshot_splits: usize,
}
