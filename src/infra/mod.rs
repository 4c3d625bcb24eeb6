// ============================================================
// Layer 6 — Infrastructure Layer
// ============================================================
// Everything stateful that the engines share:
//
//   checkpoint.rs  — byte-level checkpoint stores
//                    FileCheckpointStore (on disk, atomic
//                    renames) and MemoryCheckpointStore (tests,
//                    failure injection)
//
//   registry.rs    — the shard registry: partition, manifest,
//                    versioned checkpoints, current pointers,
//                    verification log
//
//   concurrency.rs — per-shard FIFO unlearning locks and the
//                    cooperative cancel token
//
//   config.rs      — EngineConfig (JSON, defaults, validation)
//
//   metrics.rs     — per-epoch CSV logging
//
// Reference: Rust Book §7 (Modules)
//            Burn Book §5 (Checkpointing)

/// Checkpoint stores (file and in-memory)
pub mod checkpoint;

/// Shard registry over a checkpoint store
pub mod registry;

/// Per-shard locks and cancellation
pub mod concurrency;

/// Engine configuration
pub mod config;

/// Epoch metrics CSV logger
pub mod metrics;
