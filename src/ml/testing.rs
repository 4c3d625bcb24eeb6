// Shared fixtures for the engine tests: a small CPU backend, a
// logistic shard model, and registries over the in-memory store.

use std::sync::Arc;

use burn::backend::{Autodiff, NdArray};
use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::domain::record::{Dataset, Record};
use crate::infra::checkpoint::MemoryCheckpointStore;
use crate::infra::concurrency::ShardLocks;
use crate::infra::config::{TrainSettings, UnlearnSettings};
use crate::infra::registry::{RegistryManifest, ShardRegistry};
use crate::ml::model::{Architecture, ShardNet, ShardNetConfig};
use crate::ml::trainer::ShardTrainer;
use crate::ml::unlearner::UnlearningEngine;

pub type TestBackend = Autodiff<NdArray>;
pub type TestNet = ShardNet<TestBackend>;

/// Two well-separated classes in four dimensions: label `i % 2`,
/// centred on +2 / -2 with uniform jitter of ±0.5.
pub fn blobs(n: usize) -> Dataset {
    let mut rng = StdRng::seed_from_u64(7);
    let records = (0..n)
        .map(|i| {
            let label  = i % 2;
            let centre = if label == 0 { 2.0 } else { -2.0 };
            let features = (0..4).map(|_| centre + rng.gen_range(-0.5..0.5)).collect();
            Record::new(features, label)
        })
        .collect();
    Dataset::new(records).unwrap()
}

/// Registry with a manifest for `dataset` split into `shards`, nothing trained.
pub fn fresh_registry(
    dataset: &Dataset,
    shards:  usize,
) -> (Arc<MemoryCheckpointStore>, Arc<ShardRegistry>, ShardNetConfig) {
    let store    = Arc::new(MemoryCheckpointStore::new());
    let registry = Arc::new(ShardRegistry::new(store.clone()));
    let cfg      = Architecture::Logistic.config(dataset.feature_dim(), dataset.num_classes());

    let assignment = registry.assign(dataset, shards).unwrap();
    let manifest   = RegistryManifest::new(assignment, dataset, &cfg, "synthetic:test").unwrap();
    registry.write_manifest(&manifest).unwrap();
    (store, registry, cfg)
}

pub fn trainer(registry: &Arc<ShardRegistry>) -> ShardTrainer<TestBackend> {
    trainer_with_locks(registry, Arc::new(ShardLocks::new()))
}

pub fn trainer_with_locks(registry: &Arc<ShardRegistry>, locks: Arc<ShardLocks>) -> ShardTrainer<TestBackend> {
    let settings = TrainSettings { learning_rate: 0.05, batch_size: 8, seed: 1 };
    ShardTrainer::new(registry.clone(), locks, Default::default(), settings, 1000)
}

/// Registry with every shard trained once (v1).
pub fn trained_registry(
    dataset: &Dataset,
    shards:  usize,
    epochs:  usize,
) -> (Arc<MemoryCheckpointStore>, Arc<ShardRegistry>, ShardNetConfig) {
    let (store, registry, cfg) = fresh_registry(dataset, shards);
    trainer(&registry).train_all::<TestNet>(dataset, &cfg, epochs).unwrap();
    (store, registry, cfg)
}

pub fn unlearner(registry: &Arc<ShardRegistry>, settings: UnlearnSettings) -> UnlearningEngine<TestBackend> {
    UnlearningEngine::new(registry.clone(), Arc::new(ShardLocks::new()), settings, 1000, Default::default())
}
