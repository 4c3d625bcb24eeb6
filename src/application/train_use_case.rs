// ============================================================
// Layer 2 — TrainUseCase
// ============================================================
// The `train` and `retrain` operations:
//
//   train:
//     Step 0: Refuse if any shard has forgotten records; a fresh
//             partition could hand them to another shard, so
//             those shards are rebuilt with `retrain` instead
//     Step 1: Resolve and load the dataset      (Layer 4 - data)
//     Step 2: Partition it into shards          (Layer 6 - registry)
//     Step 3: Persist the manifest              (Layer 6 - registry)
//     Step 4: Train every shard in parallel     (Layer 5 - ml)
//     Step 5: Append epoch metrics              (Layer 6 - metrics)
//
//   retrain:
//     reload the manifest's dataset and rebuild one shard
//     without its forgotten records
//
// Reference: Bourtoule et al. (2021) Machine Unlearning (SISA)

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::application::context::EngineContext;
use crate::data::source_from_reference;
use crate::domain::checkpoint::Version;
use crate::domain::error::EngineError;
use crate::domain::shard::ShardId;
use crate::infra::registry::RegistryManifest;
use crate::ml::model::Architecture;
use crate::ml::trainer::TrainReport;
use crate::ml::EngineModel;

// ─── Request / Response ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainRequest {
    /// JSON dataset path or `synthetic:<n>:<dim>:<classes>:<seed>`
    pub dataset_ref:  String,
    pub num_shards:   usize,
    pub architecture: Architecture,
    pub epochs:       usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ShardCheckpointRef {
    pub shard_id: ShardId,
    pub version:  Version,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrainResponse {
    pub shard_checkpoints: Vec<ShardCheckpointRef>,

    /// Final-epoch loss and accuracy per shard
    pub final_loss:     Vec<f64>,
    pub final_accuracy: Vec<f64>,
}

impl TrainResponse {
    fn from_reports(mut reports: Vec<TrainReport>) -> Self {
        reports.sort_by_key(|r| r.meta.shard_id);
        let last = |r: &TrainReport| r.history.last().copied();
        Self {
            shard_checkpoints: reports
                .iter()
                .map(|r| ShardCheckpointRef { shard_id: r.meta.shard_id, version: r.meta.version })
                .collect(),
            final_loss:     reports.iter().map(|r| last(r).map_or(f64::NAN, |e| e.loss)).collect(),
            final_accuracy: reports.iter().map(|r| last(r).map_or(0.0, |e| e.accuracy)).collect(),
        }
    }
}

// ─── TrainUseCase ─────────────────────────────────────────────────────────────

pub struct TrainUseCase<'a> {
    ctx: &'a EngineContext,
}

impl<'a> TrainUseCase<'a> {
    pub fn new(ctx: &'a EngineContext) -> Self {
        Self { ctx }
    }

    /// Partition the dataset, train every shard, register v1 (or the
    /// next version if the shards were trained before).
    pub fn execute(&self, request: &TrainRequest) -> Result<TrainResponse> {
        let registry = &self.ctx.registry;

        // ── Step 0: Forgotten records stay forgotten ─────────────────────────
        if let Some(previous) = registry.manifest()? {
            for shard in 0..previous.assignment.num_shards() {
                let forgotten = registry.forgotten_union(shard)?;
                if !forgotten.is_empty() {
                    return Err(EngineError::Validation(format!(
                        "shard {shard} has forgotten {} records; use `retrain` per shard instead of a full train",
                        forgotten.len()
                    ))
                    .into());
                }
            }
        }

        // ── Step 1: Load dataset ──────────────────────────────────────────────
        let source  = source_from_reference(&request.dataset_ref)?;
        let dataset = source
            .load()
            .with_context(|| format!("cannot load dataset '{}'", request.dataset_ref))?;

        // ── Step 2: Partition ─────────────────────────────────────────────────
        let assignment = registry.assign(&dataset, request.num_shards)?;
        tracing::info!(
            "Partitioned {} records into {} shards: sizes {:?}",
            dataset.len(), request.num_shards, assignment.shard_sizes()
        );

        // ── Step 3: Manifest ──────────────────────────────────────────────────
        let model_cfg = request
            .architecture
            .config(dataset.feature_dim(), dataset.num_classes());
        let manifest = RegistryManifest::new(assignment, &dataset, &model_cfg, source.reference())?;
        registry.write_manifest(&manifest).context("cannot write registry manifest")?;

        // ── Step 4: Train shards ──────────────────────────────────────────────
        let reports = self
            .ctx
            .trainer()
            .train_all::<EngineModel>(&dataset, &model_cfg, request.epochs)
            .context("shard training failed")?;

        // ── Step 5: Metrics ───────────────────────────────────────────────────
        let metrics = self.ctx.metrics()?;
        for r in &reports {
            metrics.log_training(r.meta.shard_id, r.meta.version, &r.history)?;
        }

        tracing::info!("Training complete: {} shards registered", reports.len());
        Ok(TrainResponse::from_reports(reports))
    }

    /// Retrain one shard from scratch without its forgotten records.
    pub fn retrain(&self, shard: ShardId, epochs: usize) -> Result<TrainReport> {
        let dataset   = self.ctx.load_dataset()?;
        let model_cfg = self.ctx.model_config()?;
        let report = self
            .ctx
            .trainer()
            .retrain::<EngineModel>(&dataset, shard, &model_cfg, epochs)
            .with_context(|| format!("retraining shard {shard} failed"))?;

        self.ctx
            .metrics()?
            .log_training(shard, report.meta.version, &report.history)?;
        Ok(report)
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::testing::{context, trained_context};
    use crate::application::unlearn_use_case::UnlearnUseCase;
    use crate::domain::request::UnlearningRequest;
    use crate::infra::concurrency::CancelToken;

    #[test]
    fn test_train_registers_every_shard() {
        let (_dir, ctx) = context();
        let response = TrainUseCase::new(&ctx)
            .execute(&TrainRequest {
                dataset_ref:  "synthetic:100:4:2:3".to_string(),
                num_shards:   4,
                architecture: Architecture::Logistic,
                epochs:       3,
            })
            .unwrap();

        assert_eq!(response.shard_checkpoints.len(), 4);
        assert!(response.shard_checkpoints.iter().all(|c| c.version == 1));
        assert_eq!(ctx.manifest().unwrap().dataset_ref, "synthetic:100:4:2:3");
        assert_eq!(ctx.manifest().unwrap().assignment.range(0).unwrap(), 0..25);

        // 4 shards × 3 epochs + header
        let csv = std::fs::read_to_string(ctx.metrics().unwrap().csv_path()).unwrap();
        assert_eq!(csv.lines().count(), 13);
    }

    #[test]
    fn test_bad_dataset_reference_fails() {
        let (_dir, ctx) = context();
        let err = TrainUseCase::new(&ctx)
            .execute(&TrainRequest {
                dataset_ref:  "/no/such/dataset.json".to_string(),
                num_shards:   2,
                architecture: Architecture::Logistic,
                epochs:       1,
            })
            .unwrap_err();
        assert!(err.to_string().contains("cannot load dataset"));
    }

    #[test]
    fn test_retrain_without_train_fails() {
        let (_dir, ctx) = context();
        assert!(TrainUseCase::new(&ctx).retrain(0, 1).is_err());
    }

    #[test]
    fn test_forgotten_records_survive_retrain() {
        let (_dir, ctx) = trained_context(2);
        let unlearn = UnlearnUseCase::new(&ctx);
        let cancel  = CancelToken::new();
        let forget  = |indices: Vec<usize>| UnlearningRequest {
            shard_id: 0, forget_indices: indices, alpha: 10.0, beta: 0.1, epochs: 3,
        };

        unlearn.execute(&forget(vec![0, 3]), &cancel).unwrap();
        let report = TrainUseCase::new(&ctx).retrain(0, 2).unwrap();
        assert_eq!(report.meta.forgotten_indices, [0, 3].into_iter().collect());

        unlearn.execute(&forget(vec![5]), &cancel).unwrap();
        assert_eq!(
            ctx.registry.current_meta(0).unwrap().forgotten_indices,
            [0, 3, 5].into_iter().collect()
        );

        // Already forgotten before the retrain: no second ascent
        let again = unlearn.execute(&forget(vec![0]), &cancel).unwrap();
        assert!(again.processed_indices.is_empty());
        assert!(again.history.is_empty());
    }

    #[test]
    fn test_full_train_refused_after_unlearning() {
        let (_dir, ctx) = trained_context(1);
        UnlearnUseCase::new(&ctx)
            .execute(
                &UnlearningRequest { shard_id: 1, forget_indices: vec![30], alpha: 10.0, beta: 0.1, epochs: 2 },
                &CancelToken::new(),
            )
            .unwrap();

        let err = TrainUseCase::new(&ctx)
            .execute(&TrainRequest {
                dataset_ref:  "synthetic:100:4:2:11".to_string(),
                num_shards:   2,
                architecture: Architecture::Logistic,
                epochs:       1,
            })
            .unwrap_err();
        assert!(matches!(err.downcast_ref::<EngineError>(), Some(EngineError::Validation(_))));
        assert_eq!(ctx.manifest().unwrap().assignment.num_shards(), 4);
        assert_eq!(ctx.registry.current_version(1).unwrap(), Some(2));
    }

    #[test]
    fn test_more_shards_than_records_leaves_empty_shards_untrained() {
        let (_dir, ctx) = context();
        let response = TrainUseCase::new(&ctx)
            .execute(&TrainRequest {
                dataset_ref:  "synthetic:3:2:2:5".to_string(),
                num_shards:   4,
                architecture: Architecture::Logistic,
                epochs:       1,
            })
            .unwrap();

        let trained: Vec<usize> = response.shard_checkpoints.iter().map(|c| c.shard_id).collect();
        assert_eq!(trained, vec![0, 1, 2]);
        assert_eq!(ctx.manifest().unwrap().assignment.shard_sizes(), vec![1, 1, 1, 0]);
        assert_eq!(ctx.registry.current_version(3).unwrap(), None);
    }
}
