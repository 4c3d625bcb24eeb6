// ============================================================
// Layer 5 — Verification Engine (Membership-Inference Probe)
// ============================================================
// Estimates how much a shard's model still "remembers" a set of
// records. For every probe record:
//
//   confidence_i = softmax(model(x_i))[y_i]
//
// and the score is the mean over the probe set. A model that
// never saw a record, or has had it erased, should be less sure
// of its label than it would be of a memorised one, so
//
//   is_erased = score < threshold        (strict)
//
// This is a heuristic signal, not a formal guarantee.
//
// Verification is read-only: it decodes a stored checkpoint into
// a fresh model, runs one forward pass and never writes back
// (apart from appending the result to the verification log).
// Identical inputs on an unchanged checkpoint give bit-identical
// scores.
//
// While an unlearning pass holds the shard, `verify` reads the
// last committed checkpoint and marks the result
// `pending_unlearning`.
//
// Reference: Shokri et al. (2017) Membership Inference Attacks

use std::sync::Arc;

use burn::tensor::backend::AutodiffBackend;
use chrono::Utc;

use crate::data::batcher::{RecordBatch, RecordBatcher};
use crate::domain::checkpoint::Version;
use crate::domain::error::{EngineError, EngineResult};
use crate::domain::record::Dataset;
use crate::domain::request::{
    is_erased, ProbeComparison, ProbeMethod, ProbeStats,
    VerificationRequest, VerificationResult,
};
use crate::domain::shard::ShardId;
use crate::infra::concurrency::ShardLocks;
use crate::infra::config::VerifySettings;
use crate::infra::registry::ShardRegistry;
use crate::ml::model::{argmax, class_probabilities, ShardModel};

// ─── MembershipProbe ──────────────────────────────────────────────────────────

/// Score and statistics of one probe run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbeOutcome {
    pub confidence_score: f64,
    pub stats:            ProbeStats,
}

/// Mean true-label confidence probe.
pub struct MembershipProbe {
    threshold: f64,
}

impl MembershipProbe {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    pub fn run<B, M>(&self, model: &M, batch: &RecordBatch<B>) -> EngineResult<ProbeOutcome>
    where
        B: AutodiffBackend,
        M: ShardModel<B>,
    {
        let probs = class_probabilities(model.forward(batch.features.clone()))?;

        // A label the model has no output for counts as zero confidence
        let confidences: Vec<f64> = probs
            .iter()
            .zip(&batch.label_ids)
            .map(|(row, &label)| row.get(label).copied().unwrap_or(0.0) as f64)
            .collect();
        let correct = probs
            .iter()
            .zip(&batch.label_ids)
            .filter(|(row, &label)| argmax(row) == label)
            .count();

        Ok(self.summarise(&confidences, correct))
    }

    fn summarise(&self, confidences: &[f64], correct: usize) -> ProbeOutcome {
        let n    = confidences.len().max(1) as f64;
        let mean = confidences.iter().sum::<f64>() / n;
        let var  = confidences.iter().map(|c| (c - mean).powi(2)).sum::<f64>() / n;
        let predicted_members = confidences.iter().filter(|&&c| c > self.threshold).count();

        ProbeOutcome {
            confidence_score: mean,
            stats: ProbeStats {
                max_confidence:   confidences.iter().copied().fold(f64::NEG_INFINITY, f64::max),
                min_confidence:   confidences.iter().copied().fold(f64::INFINITY, f64::min),
                std_confidence:   var.sqrt(),
                accuracy:         correct as f64 / n,
                num_samples:      confidences.len(),
                predicted_members,
                membership_ratio: predicted_members as f64 / n,
            },
        }
    }
}

// ─── VerificationEngine ───────────────────────────────────────────────────────

pub struct VerificationEngine<B: AutodiffBackend> {
    registry: Arc<ShardRegistry>,
    locks:    Arc<ShardLocks>,
    settings: VerifySettings,
    device:   B::Device,
}

impl<B: AutodiffBackend> VerificationEngine<B> {
    pub fn new(
        registry: Arc<ShardRegistry>,
        locks:    Arc<ShardLocks>,
        settings: VerifySettings,
        device:   B::Device,
    ) -> Self {
        Self { registry, locks, settings, device }
    }

    /// Probe the shard's current (last committed) checkpoint.
    pub fn verify<M>(&self, dataset: &Dataset, request: &VerificationRequest) -> EngineResult<VerificationResult>
    where
        M: ShardModel<B>,
    {
        let shard = request.shard_id;
        self.check(dataset, request)?;

        // Sampled before the pointer is read: a pass that commits in
        // between only makes the label conservative
        let pending = self.locks.is_busy(shard);
        let version = self
            .registry
            .current_version(shard)?
            .ok_or(EngineError::ShardNotTrained(shard))?;
        if pending {
            tracing::info!("Shard {} has an unlearning pass in flight; probing committed v{}", shard, version);
        }

        self.probe::<M>(dataset, request, version, pending)
    }

    /// Probe a specific stored version (audit of older checkpoints).
    pub fn verify_version<M>(
        &self,
        dataset: &Dataset,
        request: &VerificationRequest,
        version: Version,
    ) -> EngineResult<VerificationResult>
    where
        M: ShardModel<B>,
    {
        self.check(dataset, request)?;
        self.probe::<M>(dataset, request, version, false)
    }

    /// Probe two versions with the same records and report the drop.
    pub fn compare<M>(
        &self,
        dataset: &Dataset,
        request: &VerificationRequest,
        before:  Version,
        after:   Version,
    ) -> EngineResult<ProbeComparison>
    where
        M: ShardModel<B>,
    {
        let before = self.verify_version::<M>(dataset, request, before)?;
        let after  = self.verify_version::<M>(dataset, request, after)?;
        let comparison = ProbeComparison::new(before, after);
        tracing::info!(
            "Shard {} v{} → v{}: confidence drop {:.4}, accuracy drop {:.4}",
            request.shard_id,
            comparison.before.checkpoint_version,
            comparison.after.checkpoint_version,
            comparison.confidence_drop,
            comparison.accuracy_drop
        );
        Ok(comparison)
    }

    /// Request shape, threshold, shard id and probe indices
    fn check(&self, dataset: &Dataset, request: &VerificationRequest) -> EngineResult<()> {
        request.validate(self.settings.max_probe_size)?;
        let manifest = self.registry.require_manifest(request.shard_id)?;
        manifest.check_dataset(dataset)?;
        manifest.assignment.range(request.shard_id)?;
        Ok(())
    }

    fn probe<M>(
        &self,
        dataset: &Dataset,
        request: &VerificationRequest,
        version: Version,
        pending: bool,
    ) -> EngineResult<VerificationResult>
    where
        M: ShardModel<B>,
    {
        let shard = request.shard_id;

        let manifest = self.registry.require_manifest(shard)?;
        let config: M::Config = manifest.model_config()?;
        let checkpoint = self
            .registry
            .load_checkpoint::<B, M>(shard, version, &config, &self.device)?;

        let records = dataset.select(&request.probe_indices)?;
        let batch = RecordBatcher::<B>::new(self.device.clone())
            .batch(&records)
            .ok_or_else(|| EngineError::Validation("probe set is empty".to_string()))?;

        let outcome = MembershipProbe::new(request.confidence_threshold).run(&checkpoint.model, &batch)?;

        let result = VerificationResult {
            shard_id:           shard,
            checkpoint_version: version,
            confidence_score:   outcome.confidence_score,
            threshold:          request.confidence_threshold,
            is_erased:          is_erased(outcome.confidence_score, request.confidence_threshold),
            method:             ProbeMethod::MembershipInferenceConfidence,
            stats:              outcome.stats,
            pending_unlearning: pending,
            created_at:         Utc::now(),
        };
        self.registry.record_verification(&result)?;

        tracing::info!(
            "Verified shard {} v{}: score={:.4} threshold={} erased={}",
            shard, version, result.confidence_score, result.threshold, result.is_erased
        );
        Ok(result)
    }
}
