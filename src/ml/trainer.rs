// ============================================================
// Layer 5 — Shard Trainer
// ============================================================
// Ordinary supervised training of one shard's model on exactly
// the records the partition assigns to it, then registration of
// the result as that shard's next checkpoint.
//
// Key points:
//   - Adam (ε = 1e-8), shuffled minibatches, seeded per shard so
//     the same dataset + settings reproduce the same model
//   - a NaN/∞ batch loss aborts the shard before anything is
//     written, so the registry never sees a broken model
//   - `train_all` trains every shard on its own thread; shards
//     share nothing but the registry. Empty shards are skipped
//     and stay untrained
//   - training holds the shard's gate in ShardLocks, so it never
//     interleaves with an unlearning pass on the same shard
//   - a record a shard has forgotten is never trained on again:
//     `train_shard` and `retrain` both leave out the union of every
//     version's forgotten set and carry it into the new checkpoint
//
// Reference: Burn Book §5, Kingma & Ba (2015) Adam
//            Bourtoule et al. (2021) Machine Unlearning (SISA)

use std::sync::Arc;

use burn::{optim::AdamConfig, tensor::backend::AutodiffBackend};
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use serde::Serialize;

use crate::data::batcher::RecordBatcher;
use crate::domain::checkpoint::{CheckpointDraft, CheckpointMeta};
use crate::domain::error::{EngineError, EngineResult};
use crate::domain::record::Dataset;
use crate::domain::request::TrainEpoch;
use crate::domain::shard::ShardId;
use crate::infra::concurrency::ShardLocks;
use crate::infra::config::TrainSettings;
use crate::infra::registry::ShardRegistry;
use crate::ml::model::{apply_gradient_update, argmax, class_probabilities, scalar, ShardModel};

/// What one shard's training produced.
#[derive(Debug, Clone, Serialize)]
pub struct TrainReport {
    pub meta:    CheckpointMeta,
    pub history: Vec<TrainEpoch>,
}

pub struct ShardTrainer<B: AutodiffBackend> {
    registry:   Arc<ShardRegistry>,
    locks:      Arc<ShardLocks>,
    device:     B::Device,
    settings:   TrainSettings,
    max_epochs: usize,
}

impl<B: AutodiffBackend> ShardTrainer<B> {
    pub fn new(
        registry:   Arc<ShardRegistry>,
        locks:      Arc<ShardLocks>,
        device:     B::Device,
        settings:   TrainSettings,
        max_epochs: usize,
    ) -> Self {
        Self { registry, locks, device, settings, max_epochs }
    }

    /// Train one shard on its assigned records and register the model.
    pub fn train_shard<M>(
        &self,
        dataset: &Dataset,
        shard:   ShardId,
        config:  &M::Config,
        epochs:  usize,
    ) -> EngineResult<TrainReport>
    where
        M: ShardModel<B>,
    {
        let _guard = self.locks.acquire(shard);
        self.train_locked::<M>(dataset, shard, config, epochs, false)
    }

    /// Train every non-empty shard in parallel; the first failure is returned.
    pub fn train_all<M>(
        &self,
        dataset: &Dataset,
        config:  &M::Config,
        epochs:  usize,
    ) -> EngineResult<Vec<TrainReport>>
    where
        M: ShardModel<B>,
        M::Config: Sync,
    {
        let manifest = self.registry.manifest()?.ok_or_else(|| {
            EngineError::Validation("registry has no manifest; assign shards first".to_string())
        })?;
        let shards: Vec<ShardId> = manifest
            .assignment
            .shard_sizes()
            .into_iter()
            .enumerate()
            .filter(|&(_, size)| size > 0)
            .map(|(shard, _)| shard)
            .collect();
        let empty = manifest.assignment.num_shards() - shards.len();
        if empty > 0 {
            tracing::warn!("{} shards own no records and stay untrained", empty);
        }
        tracing::info!("Training {} shards for {} epochs", shards.len(), epochs);

        std::thread::scope(|scope| {
            let handles: Vec<_> = shards
                .into_iter()
                .map(|shard| scope.spawn(move || self.train_shard::<M>(dataset, shard, config, epochs)))
                .collect();

            handles
                .into_iter()
                .map(|h| {
                    h.join().map_err(|_| {
                        EngineError::Storage("shard training thread panicked".to_string())
                    })?
                })
                .collect()
        })
    }

    /// Rebuild a trained shard from scratch without its forgotten records.
    ///
    /// The new checkpoint is an ordinary trained one (not unlearned,
    /// no parent) that still lists every record the shard forgot.
    pub fn retrain<M>(
        &self,
        dataset: &Dataset,
        shard:   ShardId,
        config:  &M::Config,
        epochs:  usize,
    ) -> EngineResult<TrainReport>
    where
        M: ShardModel<B>,
    {
        let _guard = self.locks.acquire(shard);
        self.train_locked::<M>(dataset, shard, config, epochs, true)
    }

    fn train_locked<M>(
        &self,
        dataset: &Dataset,
        shard:   ShardId,
        config:  &M::Config,
        epochs:  usize,
        require_trained: bool,
    ) -> EngineResult<TrainReport>
    where
        M: ShardModel<B>,
    {
        let manifest = self.registry.require_manifest(shard)?;
        manifest.check_dataset(dataset)?;
        manifest.assignment.range(shard)?;
        if require_trained && self.registry.current_version(shard)?.is_none() {
            return Err(EngineError::ShardNotTrained(shard));
        }

        let forgotten = self.registry.forgotten_union(shard)?;
        let indices: Vec<usize> = manifest
            .assignment
            .indices(shard)?
            .into_iter()
            .filter(|i| !forgotten.contains(i))
            .collect();
        if indices.is_empty() {
            return Err(EngineError::Validation(format!(
                "shard {shard} has no records left to train on"
            )));
        }

        if !forgotten.is_empty() {
            tracing::info!(
                "Training shard {} on {} records ({} forgotten records excluded)",
                shard, indices.len(), forgotten.len()
            );
        }
        let draft = CheckpointDraft::trained_without(epochs, forgotten);
        self.fit::<M>(dataset, shard, indices, config, epochs, draft)
    }

    fn fit<M>(
        &self,
        dataset:     &Dataset,
        shard:       ShardId,
        mut indices: Vec<usize>,
        config:      &M::Config,
        epochs:      usize,
        draft:       CheckpointDraft,
    ) -> EngineResult<TrainReport>
    where
        M: ShardModel<B>,
    {
        if epochs == 0 || epochs > self.max_epochs {
            return Err(EngineError::Validation(format!(
                "epochs must be in 1..={}, got {epochs}",
                self.max_epochs
            )));
        }

        let batcher   = RecordBatcher::<B>::new(self.device.clone());
        let mut model = M::init(config, &self.device);

        // m = β1*m + (1-β1)*g        (mean)
        // v = β2*v + (1-β2)*g²       (variance)
        // θ = θ - lr * m / (√v + ε)  (update)
        let mut optim = AdamConfig::new().with_epsilon(1e-8).init::<B, M>();
        let mut rng   = StdRng::seed_from_u64(self.settings.seed.wrapping_add(shard as u64));
        let batch_size = self.settings.batch_size.max(1);

        let mut history = Vec::with_capacity(epochs);

        for epoch in 1..=epochs {
            indices.shuffle(&mut rng);

            let mut loss_sum = 0.0f64;
            let mut batches  = 0usize;
            let mut correct  = 0usize;
            let mut seen     = 0usize;

            for chunk in indices.chunks(batch_size) {
                let records = dataset.select(chunk)?;
                let Some(batch) = batcher.batch(&records) else { continue };

                // Accuracy is measured before the step, on the same batch
                let probs = class_probabilities(model.forward(batch.features.clone()))?;
                correct += probs
                    .iter()
                    .zip(&batch.label_ids)
                    .filter(|(row, &label)| argmax(row) == label)
                    .count();
                seen += batch.len();

                let loss = model.compute_loss(&batch);
                let loss_val = scalar(loss.clone());
                if !loss_val.is_finite() {
                    tracing::warn!("Shard {} epoch {}: non-finite loss, aborting", shard, epoch);
                    return Err(EngineError::NonFiniteLoss { shard, epoch });
                }
                loss_sum += loss_val;
                batches  += 1;

                model = apply_gradient_update(model, &mut optim, loss, self.settings.learning_rate);
            }

            let record = TrainEpoch {
                epoch,
                loss:     if batches > 0 { loss_sum / batches as f64 } else { f64::NAN },
                accuracy: if seen > 0 { correct as f64 / seen as f64 } else { 0.0 },
            };
            tracing::debug!(
                "Shard {} epoch {:>3}/{} | loss={:.4} | acc={:.1}%",
                shard, epoch, epochs, record.loss, record.accuracy * 100.0
            );
            history.push(record);
        }

        let meta = self.registry.put_checkpoint::<B, M>(shard, &model, draft)?;
        tracing::info!(
            "Shard {} trained on {} records → v{}",
            shard, indices.len(), meta.version
        );
        Ok(TrainReport { meta, history })
    }
}
