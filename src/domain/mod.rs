// ============================================================
// Layer 3 — Domain Layer
// ============================================================
// Pure Rust structs, enums and traits that define what the
// unlearning engine talks about.
//
// Rules for this layer:
//   - NO Burn framework types allowed here
//   - NO file I/O (the storage trait is declared here, the
//     implementations live in Layer 6)
//   - Only plain data, the error taxonomy, and abstractions
//
// Think of this layer as the vocabulary shared by the trainer,
// the unlearning engine and the verifier.
//
// Reference: Rust Book §5 (Structs), §10 (Traits)

/// Records and the immutable dataset
pub mod record;

/// Shard identifiers and the deterministic row → shard assignment
pub mod shard;

/// Versioned checkpoint metadata
pub mod checkpoint;

/// Unlearning / verification requests and their results
pub mod request;

/// Error taxonomy shared by every engine layer
pub mod error;

/// Core abstractions (traits) that other layers implement
pub mod traits;
