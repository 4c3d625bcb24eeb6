// ============================================================
// Layer 3 — Engine Error Taxonomy
// ============================================================
// Four families of failure, each with a different recovery
// story for the caller:
//
//   Validation → bad input, rejected before any state change
//   State      → shard not trained / busy; caller may resubmit
//   Numeric    → non-finite loss; pass rolled back
//   Storage    → write/read failure; current pointer untouched
//
// Layers 3–6 return EngineResult<T>. The application and CLI
// layers wrap these in anyhow with extra context.

use thiserror::Error;

use crate::domain::checkpoint::Version;
use crate::domain::shard::ShardId;

/// Coarse error family, used for logging and exit decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    State,
    Numeric,
    Storage,
}

#[derive(Error, Debug)]
pub enum EngineError {
    /// Malformed input not covered by a more specific variant.
    #[error("validation error: {0}")]
    Validation(String),

    /// Shard id outside `0..num_shards`.
    #[error("unknown shard {shard} (registry has {num_shards} shards)")]
    UnknownShard { shard: ShardId, num_shards: usize },

    #[error("forget set for shard {0} is empty")]
    EmptyForgetSet(ShardId),

    /// Forget indices that do not belong to the target shard.
    #[error("indices {indices:?} are not assigned to shard {shard}")]
    InvalidIndex { shard: ShardId, indices: Vec<usize> },

    #[error("confidence threshold must be in (0, 1), got {0}")]
    InvalidThreshold(f64),

    #[error("shard {0} has no checkpoint; train it first")]
    ShardNotTrained(ShardId),

    #[error("checkpoint {version} of shard {shard} not found")]
    NotFound { shard: ShardId, version: Version },

    #[error("no shard has a checkpoint yet; nothing to aggregate")]
    NoTrainedShards,

    #[error("shard {0} is busy with another unlearning pass")]
    ShardBusy(ShardId),

    #[error("non-finite loss at epoch {epoch} on shard {shard}; pass rolled back")]
    NonFiniteLoss { shard: ShardId, epoch: usize },

    #[error("unlearning pass on shard {shard} cancelled after epoch {epoch}; rolled back")]
    Cancelled { shard: ShardId, epoch: usize },

    /// Tensor data could not be read back from the backend.
    #[error("tensor readback failed: {0}")]
    Tensor(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_)
            | Self::UnknownShard { .. }
            | Self::EmptyForgetSet(_)
            | Self::InvalidIndex { .. }
            | Self::InvalidThreshold(_) => ErrorKind::Validation,
            Self::ShardNotTrained(_)
            | Self::NotFound { .. }
            | Self::NoTrainedShards
            | Self::ShardBusy(_)
            | Self::Cancelled { .. } => ErrorKind::State,
            Self::NonFiniteLoss { .. } | Self::Tensor(_) => ErrorKind::Numeric,
            Self::Storage(_) => ErrorKind::Storage,
        }
    }
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        Self::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        Self::Storage(format!("serialisation: {e}"))
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
