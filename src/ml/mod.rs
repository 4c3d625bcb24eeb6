// ============================================================
// Layer 5 — ML Layer (Burn)
// ============================================================
// All Burn training and inference code lives here. The other
// layers see only EngineResult values and plain domain types.
//
//   model.rs       — ShardModel capability trait + ShardNet
//                    (logistic regression / MLP)
//
//   objective.rs   — the three named unlearning loss terms and
//                    their signed combination
//
//   trainer.rs     — per-shard training, parallel train_all,
//                    retrain without forgotten records
//
//   unlearner.rs   — the unlearning pass state machine
//
//   verifier.rs    — membership-inference probe and the
//                    verification engine
//
//   aggregator.rs  — majority vote / mean ensemble over shards
//
// Reference: Burn Book §3 (Building Blocks)
//            Burn Book §5 (Training)
//            Bourtoule et al. (2021) Machine Unlearning

/// Model capability trait and the shard network
pub mod model;

/// Unlearning loss terms
pub mod objective;

/// Shard training loop
pub mod trainer;

/// Unlearning engine
pub mod unlearner;

/// Membership-inference verification
pub mod verifier;

/// Ensemble prediction across shards
pub mod aggregator;

#[cfg(test)]
pub(crate) mod testing;

/// CPU backend used by the binary: NdArray with autodiff
pub type EngineBackend = burn::backend::Autodiff<burn::backend::NdArray>;

/// The shard network on the engine backend
pub type EngineModel = model::ShardNet<EngineBackend>;
