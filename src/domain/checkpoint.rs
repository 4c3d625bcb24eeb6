// ============================================================
// Layer 3 — Checkpoint Metadata
// ============================================================
// A checkpoint is an immutable, versioned snapshot of one
// shard's parameters. This struct is the metadata half; the
// parameter blob travels separately as bytes so the domain
// layer stays free of Burn types.
//
// Version lifecycle for one shard:
//   v1      ← Trainer (is_unlearned = false)
//   v2, v3… ← Unlearning Engine (is_unlearned = true,
//             forgotten_indices only ever grows)
//   vN+1    ← retrain without the forgotten records
//             (is_unlearned = false, forgotten set carried over)
//
// Old versions stay readable for audit; only the registry's
// "current" pointer moves.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::shard::ShardId;

/// Checkpoint version number — starts at 1
pub type Version = u32;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMeta {
    pub shard_id: ShardId,
    pub version: Version,
    pub created_at: DateTime<Utc>,

    /// Epochs of ordinary training behind this snapshot
    pub training_epochs: usize,

    /// True once any unlearning pass has produced this lineage
    pub is_unlearned: bool,

    /// Cumulative set of global record indices removed from the shard
    pub forgotten_indices: BTreeSet<usize>,

    /// Version this checkpoint was derived from (None for v1 / retrains)
    pub parent_version: Option<Version>,
}

/// Everything the caller decides about a new checkpoint; the
/// registry fills in `version` and `created_at`.
#[derive(Debug, Clone, Default)]
pub struct CheckpointDraft {
    pub training_epochs: usize,
    pub is_unlearned: bool,
    pub forgotten_indices: BTreeSet<usize>,
    pub parent_version: Option<Version>,
}

impl CheckpointDraft {
    /// Metadata for a freshly trained shard
    pub fn trained(training_epochs: usize) -> Self {
        Self { training_epochs, ..Self::default() }
    }

    /// Metadata for a shard trained from scratch on its records minus
    /// `forgotten_indices`, which stay recorded as forgotten.
    pub fn trained_without(training_epochs: usize, forgotten_indices: BTreeSet<usize>) -> Self {
        Self { training_epochs, forgotten_indices, ..Self::default() }
    }

    pub fn into_meta(self, shard_id: ShardId, version: Version) -> CheckpointMeta {
        CheckpointMeta {
            shard_id,
            version,
            created_at: Utc::now(),
            training_epochs: self.training_epochs,
            is_unlearned: self.is_unlearned,
            forgotten_indices: self.forgotten_indices,
            parent_version: self.parent_version,
        }
    }
}
