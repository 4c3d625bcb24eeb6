// ============================================================
// Layer 4 — Data Pipeline
// ============================================================
// Everything between "a dataset exists somewhere" and
// "a tensor batch is on the device":
//
//   JSON file / synthetic generator
//       │
//       ▼
//   Dataset (Layer 3, immutable, indexed)
//       │
//       ▼
//   ShardAssignment → per-shard index lists
//       │
//       ▼
//   sample_without_replacement (retain sampling)
//       │
//       ▼
//   RecordBatcher → RecordBatch tensors
//
// Reference: Burn Book §4 (Datasets and Dataloaders)

/// Loads an ingested dataset from a JSON file
pub mod loader;

/// Seeded Gaussian-blob dataset generator
pub mod synthetic;

/// Stacks records into tensor batches
pub mod batcher;

/// Random sampling of retain records
pub mod splitter;

use crate::domain::error::{EngineError, EngineResult};
use crate::domain::traits::DatasetSource;

/// Resolve a dataset reference (a JSON path or a synthetic reference)
/// into a loader.
pub fn source_from_reference(reference: &str) -> EngineResult<Box<dyn DatasetSource>> {
    if reference.starts_with("synthetic:") {
        return synthetic::SyntheticDataset::from_reference(reference)
            .map(|s| Box::new(s) as Box<dyn DatasetSource>)
            .ok_or_else(|| {
                EngineError::Validation(format!(
                    "bad synthetic reference '{reference}', expected synthetic:<n>:<dim>:<classes>:<seed>"
                ))
            });
    }
    Ok(Box::new(loader::JsonDatasetLoader::new(reference)))
}
