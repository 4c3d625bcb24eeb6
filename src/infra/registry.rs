// ============================================================
// Layer 6 — Shard Registry
// ============================================================
// The single source of truth for "which shard owns which row"
// and "which checkpoint is current for each shard".
//
// The registry is an explicit object with an injected storage
// backend, never a process-wide global, so tests run against
// MemoryCheckpointStore and the CLI against the file store.
//
// put_checkpoint protocol:
//   1. allocate version = max(stored versions) + 1
//   2. encode parameters with Burn's BinBytesRecorder
//   3. write blob + metadata (store refuses to overwrite)
//   4. move the current pointer
//   A failure at 2 or 3 leaves the pointer where it was.
//
// Version allocation and the pointer move happen under one
// mutex, so two writers can never claim the same version.
//
// Reference: Burn Book §5 (Records and Checkpointing)

use std::{collections::BTreeSet, sync::Arc};

use burn::{
    prelude::*,
    record::{BinBytesRecorder, FullPrecisionSettings, Recorder},
    tensor::backend::AutodiffBackend,
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::domain::checkpoint::{CheckpointDraft, CheckpointMeta, Version};
use crate::domain::error::{EngineError, EngineResult};
use crate::domain::record::Dataset;
use crate::domain::request::VerificationResult;
use crate::domain::shard::{ShardAssignment, ShardId};
use crate::domain::traits::CheckpointStore;
use crate::ml::model::ShardModel;

/// Registry-wide facts written once at training time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryManifest {
    pub assignment:  ShardAssignment,
    pub feature_dim: usize,
    pub num_classes: usize,

    /// Serialised model config (the architecture of every shard)
    pub model_spec:  serde_json::Value,

    pub dataset_ref: String,
    pub created_at:  DateTime<Utc>,
}

impl RegistryManifest {
    pub fn new<C: Serialize>(
        assignment:  ShardAssignment,
        dataset:     &Dataset,
        model_spec:  &C,
        dataset_ref: impl Into<String>,
    ) -> EngineResult<Self> {
        Ok(Self {
            assignment,
            feature_dim: dataset.feature_dim(),
            num_classes: dataset.num_classes(),
            model_spec:  serde_json::to_value(model_spec)?,
            dataset_ref: dataset_ref.into(),
            created_at:  Utc::now(),
        })
    }

    pub fn model_config<C: DeserializeOwned>(&self) -> EngineResult<C> {
        serde_json::from_value(self.model_spec.clone()).map_err(|e| {
            EngineError::Storage(format!("manifest model spec does not match architecture: {e}"))
        })
    }

    /// Reject a dataset that is not the one the shards were built from.
    pub fn check_dataset(&self, dataset: &Dataset) -> EngineResult<()> {
        if dataset.len() != self.assignment.num_records()
            || dataset.feature_dim() != self.feature_dim
        {
            return Err(EngineError::Validation(format!(
                "dataset has {} records x {} features, registry expects {} x {}",
                dataset.len(),
                dataset.feature_dim(),
                self.assignment.num_records(),
                self.feature_dim
            )));
        }
        Ok(())
    }
}

/// A decoded checkpoint: metadata plus a live model.
#[derive(Debug, Clone)]
pub struct LoadedCheckpoint<M> {
    pub meta:  CheckpointMeta,
    pub model: M,
}

pub struct ShardRegistry {
    store:      Arc<dyn CheckpointStore>,
    write_lock: Mutex<()>,
}

impl ShardRegistry {
    pub fn new(store: Arc<dyn CheckpointStore>) -> Self {
        Self { store, write_lock: Mutex::new(()) }
    }

    /// Deterministic partition of the dataset's rows into shards.
    pub fn assign(&self, dataset: &Dataset, num_shards: usize) -> EngineResult<ShardAssignment> {
        ShardAssignment::partition(dataset.len(), num_shards)
    }

    pub fn write_manifest(&self, manifest: &RegistryManifest) -> EngineResult<()> {
        self.store.write_manifest(&serde_json::to_vec_pretty(manifest)?)
    }

    pub fn manifest(&self) -> EngineResult<Option<RegistryManifest>> {
        self.store
            .read_manifest()?
            .map(|bytes| serde_json::from_slice(&bytes).map_err(EngineError::from))
            .transpose()
    }

    /// Manifest, treating its absence as "shard never trained".
    pub fn require_manifest(&self, shard: ShardId) -> EngineResult<RegistryManifest> {
        self.manifest()?.ok_or(EngineError::ShardNotTrained(shard))
    }

    pub fn current_version(&self, shard: ShardId) -> EngineResult<Option<Version>> {
        self.store.current_version(shard)
    }

    pub fn meta(&self, shard: ShardId, version: Version) -> EngineResult<CheckpointMeta> {
        self.store
            .read_meta(shard, version)?
            .ok_or(EngineError::NotFound { shard, version })
    }

    pub fn current_meta(&self, shard: ShardId) -> EngineResult<CheckpointMeta> {
        let version = self
            .store
            .current_version(shard)?
            .ok_or(EngineError::ShardNotTrained(shard))?;
        self.meta(shard, version)
    }

    /// Every stored version of a shard, oldest first (audit trail)
    pub fn history(&self, shard: ShardId) -> EngineResult<Vec<CheckpointMeta>> {
        self.store
            .versions(shard)?
            .into_iter()
            .map(|v| self.meta(shard, v))
            .collect()
    }

    /// Every record any stored version of `shard` has forgotten.
    pub fn forgotten_union(&self, shard: ShardId) -> EngineResult<BTreeSet<usize>> {
        Ok(self
            .history(shard)?
            .into_iter()
            .flat_map(|meta| meta.forgotten_indices)
            .collect())
    }

    /// Raw parameter blob, for audits that explicitly ask for it
    pub fn params_blob(&self, shard: ShardId, version: Version) -> EngineResult<Vec<u8>> {
        self.store
            .read_params(shard, version)?
            .ok_or(EngineError::NotFound { shard, version })
    }

    /// Store `model` as the next version of `shard` and make it current.
    pub fn put_checkpoint<B, M>(
        &self,
        shard: ShardId,
        model: &M,
        draft: CheckpointDraft,
    ) -> EngineResult<CheckpointMeta>
    where
        B: AutodiffBackend,
        M: ShardModel<B>,
    {
        let params = encode_model::<B, M>(model)?;

        let _guard = self.write_lock.lock();
        let version = self.store.versions(shard)?.last().copied().unwrap_or(0) + 1;
        let meta = draft.into_meta(shard, version);

        self.store.write_checkpoint(&meta, &params)?;
        self.store.set_current_version(shard, version)?;

        tracing::info!(
            "Registered checkpoint shard={} v{} (unlearned={}, forgotten={})",
            shard, version, meta.is_unlearned, meta.forgotten_indices.len()
        );
        Ok(meta)
    }

    /// Decode a specific version of a shard.
    pub fn load_checkpoint<B, M>(
        &self,
        shard:   ShardId,
        version: Version,
        config:  &M::Config,
        device:  &B::Device,
    ) -> EngineResult<LoadedCheckpoint<M>>
    where
        B: AutodiffBackend,
        M: ShardModel<B>,
    {
        let meta   = self.meta(shard, version)?;
        let params = self.params_blob(shard, version)?;
        let model  = decode_model::<B, M>(params, config, device)?;
        Ok(LoadedCheckpoint { meta, model })
    }

    /// Decode the current checkpoint; `ShardNotTrained` if none.
    pub fn get_current_checkpoint<B, M>(
        &self,
        shard:  ShardId,
        config: &M::Config,
        device: &B::Device,
    ) -> EngineResult<LoadedCheckpoint<M>>
    where
        B: AutodiffBackend,
        M: ShardModel<B>,
    {
        let version = self
            .store
            .current_version(shard)?
            .ok_or(EngineError::ShardNotTrained(shard))?;
        self.load_checkpoint::<B, M>(shard, version, config, device)
    }

    pub fn record_verification(&self, result: &VerificationResult) -> EngineResult<()> {
        self.store.append_verification(result)
    }

    pub fn verifications(&self, shard: ShardId) -> EngineResult<Vec<VerificationResult>> {
        self.store.verifications(shard)
    }
}

fn encode_model<B, M>(model: &M) -> EngineResult<Vec<u8>>
where
    B: AutodiffBackend,
    M: ShardModel<B>,
{
    let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
    Recorder::<B>::record(&recorder, model.clone().into_record(), ())
        .map_err(|e| EngineError::Storage(format!("cannot encode parameters: {e:?}")))
}

fn decode_model<B, M>(params: Vec<u8>, config: &M::Config, device: &B::Device) -> EngineResult<M>
where
    B: AutodiffBackend,
    M: ShardModel<B>,
{
    let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
    let record: M::Record = Recorder::<B>::load(&recorder, params, device)
        .map_err(|e| EngineError::Storage(format!("cannot decode parameters: {e:?}")))?;
    Ok(M::init(config, device).load_record(record))
}
