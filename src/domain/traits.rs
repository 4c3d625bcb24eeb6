// ============================================================
// Layer 3 — Core Traits (Abstractions)
// ============================================================
// Programming against these traits lets the registry and the
// use cases swap implementations without changing:
//
//   DatasetSource    → JsonDatasetLoader, SyntheticDataset
//   CheckpointStore  → FileCheckpointStore, MemoryCheckpointStore
//
// The in-memory store is the test double; the file store is
// what the CLI uses.
//
// Reference: Rust Book §10 (Traits: Defining Shared Behaviour)

use crate::domain::checkpoint::{CheckpointMeta, Version};
use crate::domain::error::EngineResult;
use crate::domain::record::Dataset;
use crate::domain::request::VerificationResult;
use crate::domain::shard::ShardId;

// ─── DatasetSource ────────────────────────────────────────────────────────────
/// Anything that can produce the immutable training dataset.
pub trait DatasetSource {
    fn load(&self) -> EngineResult<Dataset>;

    /// Short reference persisted in the registry manifest so later
    /// commands can reload the same data
    fn reference(&self) -> String;
}

// ─── CheckpointStore ──────────────────────────────────────────────────────────
/// Durable storage for checkpoint metadata and parameter blobs,
/// addressed by `(shard_id, version)`.
///
/// Contract:
///   - `write_checkpoint` never overwrites an existing version
///   - `set_current_version` is the only way the current pointer moves,
///     and it is called only after the write has been confirmed
pub trait CheckpointStore: Send + Sync {
    fn write_manifest(&self, manifest: &[u8]) -> EngineResult<()>;

    fn read_manifest(&self) -> EngineResult<Option<Vec<u8>>>;

    fn write_checkpoint(&self, meta: &CheckpointMeta, params: &[u8]) -> EngineResult<()>;

    fn read_meta(&self, shard: ShardId, version: Version) -> EngineResult<Option<CheckpointMeta>>;

    fn read_params(&self, shard: ShardId, version: Version) -> EngineResult<Option<Vec<u8>>>;

    /// All stored versions of a shard, ascending
    fn versions(&self, shard: ShardId) -> EngineResult<Vec<Version>>;

    fn current_version(&self, shard: ShardId) -> EngineResult<Option<Version>>;

    fn set_current_version(&self, shard: ShardId, version: Version) -> EngineResult<()>;

    fn append_verification(&self, result: &VerificationResult) -> EngineResult<()>;

    fn verifications(&self, shard: ShardId) -> EngineResult<Vec<VerificationResult>>;
}
