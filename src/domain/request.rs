// ============================================================
// Layer 3 — Requests and Results
// ============================================================
// The inputs and outputs of the two mutating/inspecting engine
// operations:
//
//   UnlearningRequest   → Unlearning Engine → UnlearnOutcome
//   VerificationRequest → Verification Engine → VerificationResult
//
// `validate()` on each request performs the shape checks that
// need no registry state (empty sets, weights, bounds). Checks
// against the shard assignment happen in the engine's Loading
// state.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::checkpoint::Version;
use crate::domain::error::{EngineError, EngineResult};
use crate::domain::shard::ShardId;

// ─── Training ─────────────────────────────────────────────────────────────────

/// Loss and accuracy of one training epoch on one shard
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrainEpoch {
    pub epoch: usize,
    pub loss: f64,
    pub accuracy: f64,
}

// ─── Unlearning ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnlearningRequest {
    pub shard_id: ShardId,

    /// Global record indices to forget; must all belong to `shard_id`
    pub forget_indices: Vec<usize>,

    /// Weight of the forget term
    pub alpha: f64,

    /// Weight of the retain term
    pub beta: f64,

    /// Optimisation epochs; bounded by the engine's `max_epochs`
    pub epochs: usize,
}

impl UnlearningRequest {
    pub fn validate(&self, max_epochs: usize) -> EngineResult<()> {
        if self.forget_indices.is_empty() {
            return Err(EngineError::EmptyForgetSet(self.shard_id));
        }
        for (name, w) in [("alpha", self.alpha), ("beta", self.beta)] {
            if !w.is_finite() || w < 0.0 {
                return Err(EngineError::Validation(format!(
                    "{name} must be finite and >= 0, got {w}"
                )));
            }
        }
        if self.epochs == 0 || self.epochs > max_epochs {
            return Err(EngineError::Validation(format!(
                "epochs must be in 1..={max_epochs}, got {}",
                self.epochs
            )));
        }
        Ok(())
    }

    /// Forget indices with duplicates removed, ascending
    pub fn unique_indices(&self) -> BTreeSet<usize> {
        self.forget_indices.iter().copied().collect()
    }
}

/// Loss numbers for one optimisation epoch.
///
/// `total` is the signed combination actually minimised, so for
/// gradient ascent it goes down while `forget` goes up.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpochLosses {
    pub epoch: usize,
    pub forget: f64,
    pub retain: f64,
    pub drift: f64,
    pub total: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnlearnOutcome {
    pub shard_id: ShardId,
    pub new_version: Version,

    /// Indices newly forgotten by this pass (already-forgotten ones excluded)
    pub processed_indices: Vec<usize>,

    pub history: Vec<EpochLosses>,
}

// ─── Verification ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationRequest {
    pub shard_id: ShardId,

    /// Records to probe; meaningful only if they overlap the forgotten set,
    /// which is the caller's responsibility
    pub probe_indices: Vec<usize>,

    pub confidence_threshold: f64,
}

impl VerificationRequest {
    pub fn validate(&self, max_probe_size: usize) -> EngineResult<()> {
        validate_threshold(self.confidence_threshold)?;
        if self.probe_indices.is_empty() {
            return Err(EngineError::Validation("probe set is empty".to_string()));
        }
        if self.probe_indices.len() > max_probe_size {
            return Err(EngineError::Validation(format!(
                "probe set has {} records, limit is {max_probe_size}",
                self.probe_indices.len()
            )));
        }
        Ok(())
    }
}

/// Threshold must lie strictly inside (0, 1).
pub fn validate_threshold(threshold: f64) -> EngineResult<()> {
    if threshold > 0.0 && threshold < 1.0 {
        Ok(())
    } else {
        Err(EngineError::InvalidThreshold(threshold))
    }
}

/// Which probe produced a verification result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeMethod {
    /// Mean softmax probability of the true label over the probe set
    MembershipInferenceConfidence,
}

impl std::fmt::Display for ProbeMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MembershipInferenceConfidence => write!(f, "membership_inference_confidence"),
        }
    }
}

/// Secondary statistics of one probe run
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProbeStats {
    pub max_confidence: f64,
    pub min_confidence: f64,
    pub std_confidence: f64,

    /// Top-1 accuracy on the probe records
    pub accuracy: f64,

    pub num_samples: usize,

    /// Records whose true-label confidence exceeds the threshold
    pub predicted_members: usize,

    pub membership_ratio: f64,
}

/// Immutable outcome of one verification call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub shard_id: ShardId,
    pub checkpoint_version: Version,
    pub confidence_score: f64,
    pub threshold: f64,
    pub is_erased: bool,
    pub method: ProbeMethod,
    pub stats: ProbeStats,

    /// Set when an unlearning pass was in flight on the shard: the
    /// result describes the last committed (pre-pass) checkpoint
    pub pending_unlearning: bool,

    pub created_at: DateTime<Utc>,
}

/// Erasure judgment: strictly below the threshold.
pub fn is_erased(confidence_score: f64, threshold: f64) -> bool {
    confidence_score < threshold
}

/// Before/after comparison of two probe runs on the same records
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeComparison {
    pub before: VerificationResult,
    pub after: VerificationResult,
    pub confidence_drop: f64,
    pub accuracy_drop: f64,
    pub membership_drop: f64,
}

impl ProbeComparison {
    pub fn new(before: VerificationResult, after: VerificationResult) -> Self {
        Self {
            confidence_drop: before.confidence_score - after.confidence_score,
            accuracy_drop: before.stats.accuracy - after.stats.accuracy,
            membership_drop: before.stats.membership_ratio - after.stats.membership_ratio,
            before,
            after,
        }
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    fn request(indices: Vec<usize>) -> UnlearningRequest {
        UnlearningRequest { shard_id: 0, forget_indices: indices, alpha: 10.0, beta: 0.1, epochs: 50 }
    }

    #[test]
    fn test_empty_forget_set_rejected() {
        assert!(matches!(request(vec![]).validate(100), Err(EngineError::EmptyForgetSet(0))));
    }

    #[test]
    fn test_epoch_bound_enforced() {
        assert!(request(vec![1]).validate(50).is_ok());
        assert!(request(vec![1]).validate(49).is_err());
        let mut r = request(vec![1]);
        r.alpha = f64::NAN;
        assert!(r.validate(100).is_err());
    }

    #[test]
    fn test_threshold_bounds_are_exclusive() {
        assert!(validate_threshold(0.6).is_ok());
        assert!(validate_threshold(0.0).is_err());
        assert!(validate_threshold(1.0).is_err());
    }

    #[test]
    fn test_threshold_equality_is_not_erased() {
        assert!(!is_erased(0.6, 0.6));
        assert!(is_erased(0.59, 0.6));
    }

    #[test]
    fn test_probe_size_bound() {
        let req = VerificationRequest {
            shard_id: 0,
            probe_indices: (0..10).collect(),
            confidence_threshold: 0.5,
        };
        assert!(req.validate(10).is_ok());
        assert!(req.validate(9).is_err());
    }
}
