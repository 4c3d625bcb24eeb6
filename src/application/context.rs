// ============================================================
// Layer 2 — Engine Context
// ============================================================
// Wires the engine together once per process:
//
//   EngineConfig ──► checkpoint store ──► ShardRegistry
//                                           │
//        ShardLocks (shared) ───────────────┤
//                                           ▼
//        trainer / unlearner / verifier / aggregator
//
// The unlearning engine is built once and shared, so its per-
// shard locks and pass states are seen by every job submitted
// through this context. Trainers share the same locks.

use std::sync::Arc;

use anyhow::{Context, Result};
use burn::prelude::Backend;

use crate::data::source_from_reference;
use crate::domain::record::Dataset;
use crate::domain::traits::CheckpointStore;
use crate::infra::checkpoint::FileCheckpointStore;
use crate::infra::concurrency::ShardLocks;
use crate::infra::config::EngineConfig;
use crate::infra::metrics::MetricsLogger;
use crate::infra::registry::{RegistryManifest, ShardRegistry};
use crate::ml::aggregator::ShardAggregator;
use crate::ml::model::ShardNetConfig;
use crate::ml::trainer::ShardTrainer;
use crate::ml::unlearner::UnlearningEngine;
use crate::ml::verifier::VerificationEngine;
use crate::ml::EngineBackend;

pub type Device = <EngineBackend as Backend>::Device;

pub struct EngineContext {
    pub config:    EngineConfig,
    pub registry:  Arc<ShardRegistry>,
    pub locks:     Arc<ShardLocks>,
    pub unlearner: Arc<UnlearningEngine<EngineBackend>>,
    pub device:    Device,
}

impl EngineContext {
    /// Context over the on-disk store at `config.storage_dir`.
    pub fn open(config: EngineConfig) -> Result<Self> {
        config.validate().context("invalid engine configuration")?;
        let store = FileCheckpointStore::open(&config.storage_dir)
            .with_context(|| format!("cannot open checkpoint store '{}'", config.storage_dir))?;
        Ok(Self::with_store(config, Arc::new(store)))
    }

    /// Context over any store (tests use the in-memory one).
    pub fn with_store(config: EngineConfig, store: Arc<dyn CheckpointStore>) -> Self {
        let device    = Device::default();
        let registry  = Arc::new(ShardRegistry::new(store));
        let locks     = Arc::new(ShardLocks::new());
        let unlearner = Arc::new(UnlearningEngine::new(
            registry.clone(),
            locks.clone(),
            config.unlearning.clone(),
            config.max_epochs,
            device.clone(),
        ));
        Self { config, registry, locks, unlearner, device }
    }

    pub fn trainer(&self) -> ShardTrainer<EngineBackend> {
        ShardTrainer::new(
            self.registry.clone(),
            self.locks.clone(),
            self.device.clone(),
            self.config.training.clone(),
            self.config.max_epochs,
        )
    }

    pub fn verifier(&self) -> VerificationEngine<EngineBackend> {
        VerificationEngine::new(
            self.registry.clone(),
            self.locks.clone(),
            self.config.verification.clone(),
            self.device.clone(),
        )
    }

    pub fn aggregator(&self) -> ShardAggregator<EngineBackend> {
        ShardAggregator::new(self.registry.clone(), self.device.clone(), self.config.aggregation)
    }

    pub fn metrics(&self) -> Result<MetricsLogger> {
        MetricsLogger::new(&self.config.storage_dir).context("cannot open metrics log")
    }

    pub fn manifest(&self) -> Result<RegistryManifest> {
        self.registry
            .manifest()?
            .context("registry is empty; run `train` first")
    }

    pub fn model_config(&self) -> Result<ShardNetConfig> {
        Ok(self.manifest()?.model_config()?)
    }

    /// Reload the dataset the shards were trained on.
    pub fn load_dataset(&self) -> Result<Dataset> {
        let manifest = self.manifest()?;
        let dataset = source_from_reference(&manifest.dataset_ref)?
            .load()
            .with_context(|| format!("cannot reload dataset '{}'", manifest.dataset_ref))?;
        manifest.check_dataset(&dataset)?;
        Ok(dataset)
    }
}
