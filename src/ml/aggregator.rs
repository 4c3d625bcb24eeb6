// ============================================================
// Layer 5 — Shard Aggregator
// ============================================================
// Combines the current model of every shard into one prediction.
//
//   Vote   each shard votes its argmax label; most votes wins,
//          a tie goes to the label backed by the lowest shard id
//   Mean   class probabilities averaged over shards, argmax
//
// A shard without a checkpoint abstains instead of failing the
// query; only when every shard abstains is there no answer.
//
// Read-only: checkpoints are decoded into fresh models and never
// written back.

use std::{collections::BTreeMap, sync::Arc};

use burn::{prelude::*, tensor::backend::AutodiffBackend};
use serde::{Deserialize, Serialize};

use crate::domain::checkpoint::Version;
use crate::domain::error::{EngineError, EngineResult};
use crate::domain::shard::ShardId;
use crate::infra::registry::ShardRegistry;
use crate::ml::model::{argmax, class_probabilities, ShardModel};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationMethod {
    #[default]
    Vote,
    Mean,
}

/// One shard's opinion on one query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShardVote {
    pub shard_id:      ShardId,
    pub version:       Version,
    pub label:         usize,
    pub probabilities: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    pub label:     usize,
    pub method:    AggregationMethod,
    pub votes:     Vec<ShardVote>,
    pub abstained: Vec<ShardId>,
}

/// Most frequent label; ties go to the label whose first voter has
/// the lowest shard id. None for no votes.
pub fn majority_vote(votes: &[(ShardId, usize)]) -> Option<usize> {
    // label → (count, lowest shard voting for it)
    let mut tally: BTreeMap<usize, (usize, ShardId)> = BTreeMap::new();
    for &(shard, label) in votes {
        let entry = tally.entry(label).or_insert((0, shard));
        entry.0 += 1;
        entry.1 = entry.1.min(shard);
    }
    tally
        .into_iter()
        .max_by(|(_, (ca, sa)), (_, (cb, sb))| ca.cmp(cb).then(sb.cmp(sa)))
        .map(|(label, _)| label)
}

/// Argmax of the element-wise mean of the probability vectors.
pub fn mean_probabilities(rows: &[&[f32]]) -> Option<usize> {
    let width = rows.iter().map(|r| r.len()).max()?;
    let mut mean = vec![0.0f32; width];
    for row in rows {
        for (m, p) in mean.iter_mut().zip(row.iter()) {
            *m += p / rows.len() as f32;
        }
    }
    Some(argmax(&mean))
}

pub struct ShardAggregator<B: AutodiffBackend> {
    registry: Arc<ShardRegistry>,
    device:   B::Device,
    method:   AggregationMethod,
}

impl<B: AutodiffBackend> ShardAggregator<B> {
    pub fn new(registry: Arc<ShardRegistry>, device: B::Device, method: AggregationMethod) -> Self {
        Self { registry, device, method }
    }

    pub fn predict<M>(&self, features: &[f32]) -> EngineResult<Prediction>
    where
        M: ShardModel<B>,
    {
        let mut out = self.predict_many::<M>(&[features.to_vec()])?;
        out.pop().ok_or(EngineError::NoTrainedShards)
    }

    /// Predict several queries, decoding each shard's checkpoint once.
    pub fn predict_many<M>(&self, queries: &[Vec<f32>]) -> EngineResult<Vec<Prediction>>
    where
        M: ShardModel<B>,
    {
        let manifest = self.registry.manifest()?.ok_or(EngineError::NoTrainedShards)?;
        if let Some(bad) = queries.iter().find(|q| q.len() != manifest.feature_dim) {
            return Err(EngineError::Validation(format!(
                "query has {} features, models expect {}",
                bad.len(),
                manifest.feature_dim
            )));
        }
        let config: M::Config = manifest.model_config()?;

        let flat: Vec<f32> = queries.iter().flatten().copied().collect();
        let features = Tensor::<B, 1>::from_floats(flat.as_slice(), &self.device)
            .reshape([queries.len(), manifest.feature_dim]);

        // per shard: (shard, version, probability rows)
        let mut opinions = Vec::new();
        let mut abstained = Vec::new();
        for shard in 0..manifest.assignment.num_shards() {
            match self.registry.get_current_checkpoint::<B, M>(shard, &config, &self.device) {
                Ok(ckpt) => {
                    let probs = class_probabilities(ckpt.model.forward(features.clone()))?;
                    opinions.push((shard, ckpt.meta.version, probs));
                }
                Err(EngineError::ShardNotTrained(_)) => {
                    tracing::warn!("Shard {} has no checkpoint; abstaining", shard);
                    abstained.push(shard);
                }
                Err(e) => return Err(e),
            }
        }
        if opinions.is_empty() {
            return Err(EngineError::NoTrainedShards);
        }

        (0..queries.len())
            .map(|q| {
                let votes: Vec<ShardVote> = opinions
                    .iter()
                    .map(|(shard, version, probs)| ShardVote {
                        shard_id:      *shard,
                        version:       *version,
                        label:         argmax(&probs[q]),
                        probabilities: probs[q].clone(),
                    })
                    .collect();

                let label = match self.method {
                    AggregationMethod::Vote => {
                        let pairs: Vec<(ShardId, usize)> =
                            votes.iter().map(|v| (v.shard_id, v.label)).collect();
                        majority_vote(&pairs)
                    }
                    AggregationMethod::Mean => {
                        let rows: Vec<&[f32]> = votes.iter().map(|v| v.probabilities.as_slice()).collect();
                        mean_probabilities(&rows)
                    }
                }
                .ok_or(EngineError::NoTrainedShards)?;

                Ok(Prediction { label, method: self.method, votes, abstained: abstained.clone() })
            })
            .collect()
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::testing::{blobs, fresh_registry, trained_registry, trainer, TestBackend, TestNet};

    #[test]
    fn test_majority_vote_counts() {
        assert_eq!(majority_vote(&[(0, 1), (1, 2), (2, 2)]), Some(2));
        assert_eq!(majority_vote(&[]), None);
    }

    #[test]
    fn test_tie_goes_to_lowest_shard() {
        // labels 3 and 1 tie; shard 0 backs 3
        assert_eq!(majority_vote(&[(1, 1), (0, 3), (2, 1), (3, 3)]), Some(3));
        assert_eq!(majority_vote(&[(2, 0), (1, 5)]), Some(5));
    }

    #[test]
    fn test_mean_probabilities() {
        let a = [0.9f32, 0.1];
        let b = [0.2f32, 0.8];
        let c = [0.3f32, 0.7];
        assert_eq!(mean_probabilities(&[&a[..], &b[..], &c[..]]), Some(1));
        assert_eq!(mean_probabilities(&[]), None);
    }

    #[test]
    fn test_untrained_shards_abstain() {
        let ds = blobs(40);
        let (_, registry, cfg) = fresh_registry(&ds, 4);
        trainer(&registry).train_shard::<TestNet>(&ds, 2, &cfg, 20).unwrap();

        let agg = ShardAggregator::<TestBackend>::new(registry.clone(), Default::default(), AggregationMethod::Vote);
        let p = agg.predict::<TestNet>(&ds.records()[0].features).unwrap();
        assert_eq!(p.votes.len(), 1);
        assert_eq!(p.votes[0].shard_id, 2);
        assert_eq!(p.abstained, vec![0, 1, 3]);
    }

    #[test]
    fn test_no_trained_shards() {
        let ds = blobs(20);
        let (_, registry, _) = fresh_registry(&ds, 2);
        let agg = ShardAggregator::<TestBackend>::new(registry, Default::default(), AggregationMethod::Vote);
        let err = agg.predict::<TestNet>(&ds.records()[0].features).unwrap_err();
        assert!(matches!(err, EngineError::NoTrainedShards));
    }

    #[test]
    fn test_ensemble_predicts_blob_labels() {
        let ds = blobs(80);
        let (_, registry, _) = trained_registry(&ds, 4, 20);
        let queries: Vec<Vec<f32>> = ds.records().iter().take(10).map(|r| r.features.clone()).collect();

        for method in [AggregationMethod::Vote, AggregationMethod::Mean] {
            let agg = ShardAggregator::<TestBackend>::new(registry.clone(), Default::default(), method);
            let predictions = agg.predict_many::<TestNet>(&queries).unwrap();
            let correct = predictions
                .iter()
                .zip(ds.records())
                .filter(|(p, r)| p.label == r.label)
                .count();
            assert!(correct >= 9, "{method:?}: {correct}/10");
            assert!(predictions.iter().all(|p| p.votes.len() == 4 && p.abstained.is_empty()));
        }
    }

    #[test]
    fn test_wrong_feature_width_rejected() {
        let ds = blobs(20);
        let (_, registry, _) = trained_registry(&ds, 2, 1);
        let agg = ShardAggregator::<TestBackend>::new(registry, Default::default(), AggregationMethod::Mean);
        assert!(matches!(agg.predict::<TestNet>(&[1.0, 2.0]), Err(EngineError::Validation(_))));
    }
}
