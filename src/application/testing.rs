// Fixture for use-case tests: a file-backed context in a fresh
// temporary directory.

use tempfile::{tempdir, TempDir};

use crate::application::context::EngineContext;
use crate::application::train_use_case::{TrainRequest, TrainUseCase};
use crate::infra::config::EngineConfig;
use crate::ml::model::Architecture;

pub fn context() -> (TempDir, EngineContext) {
    let dir = tempdir().unwrap();
    let mut config = EngineConfig::default();
    config.storage_dir = dir.path().display().to_string();
    config.training.learning_rate = 0.05;
    config.training.batch_size = 8;
    let ctx = EngineContext::open(config).unwrap();
    (dir, ctx)
}

/// Context with a trained 100-record / 4-shard synthetic registry.
pub fn trained_context(epochs: usize) -> (TempDir, EngineContext) {
    let (dir, ctx) = context();
    TrainUseCase::new(&ctx)
        .execute(&TrainRequest {
            dataset_ref:  "synthetic:100:4:2:11".to_string(),
            num_shards:   4,
            architecture: Architecture::Logistic,
            epochs,
        })
        .unwrap();
    (dir, ctx)
}
