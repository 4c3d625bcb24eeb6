// ============================================================
// Layer 2 — Application / Use Cases
// ============================================================
// Orchestrates the other layers for each engine operation.
//
// Rules for this layer:
//   - No ML math or model code here
//   - No printing here (that's Layer 1)
//   - Errors leave as anyhow::Error with context; the original
//     EngineError stays reachable through downcast_ref
//
//   context.rs          — EngineContext: config, store, registry,
//                         shared locks and unlearning engine
//   train_use_case.rs   — train / retrain
//   unlearn_use_case.rs — unlearn (inline or as a background job)
//   verify_use_case.rs  — verify / compare
//   audit_use_case.rs   — checkpoint metadata, history, predict
//   jobs.rs             — JobRunner / JobHandle
//
// Reference: Clean Architecture pattern
//            Rust Book §7 (Module System)

pub mod context;

pub mod train_use_case;

pub mod unlearn_use_case;

pub mod verify_use_case;

pub mod audit_use_case;

pub mod jobs;

#[cfg(test)]
pub(crate) mod testing;
