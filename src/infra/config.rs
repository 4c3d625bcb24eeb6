// ============================================================
// Layer 6 — Engine Configuration
// ============================================================
// All tunables of the engine in one serialisable struct.
// Loaded from a JSON file (missing file → defaults); the CLI
// overrides individual fields with flags.
//
// Default unlearning weights follow the production settings:
//   alpha = 10.0   forget weight
//   beta  = 0.1    retain weight
//   gamma = 0.01   drift (EWC) weight
//   lr    = 0.01   SGD learning rate, momentum 0.9
//
// The default verification threshold (0.6) is only a CLI
// convenience; the policy threshold is always the caller's.

use std::{fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::domain::error::{EngineError, EngineResult};
use crate::domain::request::validate_threshold;
use crate::ml::aggregator::AggregationMethod;
use crate::ml::objective::ForgetObjective;

/// What a second unlearning request on a busy shard does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BusyPolicy {
    /// Wait in arrival order
    #[default]
    Queue,

    /// Fail immediately with ShardBusy
    Reject,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainSettings {
    pub learning_rate: f64,
    pub batch_size:    usize,
    pub seed:          u64,
}

impl Default for TrainSettings {
    fn default() -> Self {
        Self { learning_rate: 0.01, batch_size: 32, seed: 42 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UnlearnSettings {
    /// Defaults used when a request omits them (CLI only)
    pub alpha: f64,
    pub beta:  f64,

    pub gamma:              f64,
    pub learning_rate:      f64,
    pub batch_size:         usize,
    pub retain_sample_size: usize,
    pub use_fisher:         bool,

    /// Retain batches averaged into the Fisher estimate
    pub fisher_batches:     usize,

    pub forget_objective:   ForgetObjective,
    pub busy_policy:        BusyPolicy,
    pub seed:               u64,
}

impl Default for UnlearnSettings {
    fn default() -> Self {
        Self {
            alpha:              10.0,
            beta:               0.1,
            gamma:              0.01,
            learning_rate:      0.01,
            batch_size:         32,
            retain_sample_size: 32,
            use_fisher:         true,
            fisher_batches:     4,
            forget_objective:   ForgetObjective::GradientAscent,
            busy_policy:        BusyPolicy::Queue,
            seed:               42,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifySettings {
    pub max_probe_size:       usize,
    pub confidence_threshold: f64,
}

impl Default for VerifySettings {
    fn default() -> Self {
        Self { max_probe_size: 4096, confidence_threshold: 0.6 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Root of the checkpoint store
    pub storage_dir: String,

    /// Hard bound on training and unlearning epochs
    pub max_epochs: usize,

    pub training:    TrainSettings,
    pub unlearning:  UnlearnSettings,
    pub verification: VerifySettings,
    pub aggregation: AggregationMethod,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            storage_dir:  "storage".to_string(),
            max_epochs:   1000,
            training:     TrainSettings::default(),
            unlearning:   UnlearnSettings::default(),
            verification: VerifySettings::default(),
            aggregation:  AggregationMethod::Vote,
        }
    }
}

impl EngineConfig {
    /// Validate configuration parameters.
    pub fn validate(&self) -> EngineResult<()> {
        if self.max_epochs == 0 {
            return Err(EngineError::Validation("max_epochs must be > 0".to_string()));
        }
        if !(self.training.learning_rate > 0.0) || !(self.unlearning.learning_rate > 0.0) {
            return Err(EngineError::Validation(
                "learning rates must be > 0".to_string(),
            ));
        }
        if self.training.batch_size == 0 || self.unlearning.batch_size == 0 {
            return Err(EngineError::Validation("batch sizes must be > 0".to_string()));
        }
        let u = &self.unlearning;
        for (name, w) in [("alpha", u.alpha), ("beta", u.beta), ("gamma", u.gamma)] {
            if !w.is_finite() || w < 0.0 {
                return Err(EngineError::Validation(format!(
                    "{name} must be finite and >= 0, got {w}"
                )));
            }
        }
        if self.verification.max_probe_size == 0 {
            return Err(EngineError::Validation("max_probe_size must be > 0".to_string()));
        }
        validate_threshold(self.verification.confidence_threshold)
    }

    /// Load from JSON string.
    pub fn from_json(json: &str) -> EngineResult<Self> {
        let cfg: Self = serde_json::from_str(json)
            .map_err(|e| EngineError::Validation(format!("config JSON parse error: {e}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load from a file, falling back to defaults when it does not exist.
    pub fn load(path: impl AsRef<Path>) -> EngineResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::debug!("No config at '{}', using defaults", path.display());
            return Ok(Self::default());
        }
        let json = fs::read_to_string(path).map_err(|e| {
            EngineError::Storage(format!("cannot read config '{}': {e}", path.display()))
        })?;
        Self::from_json(&json)
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let cfg = EngineConfig::from_json(
            r#"{"storage_dir":"/tmp/x","unlearning":{"gamma":0.5,"forget_objective":"uniform_kl"}}"#,
        )
        .unwrap();
        assert_eq!(cfg.storage_dir, "/tmp/x");
        assert_eq!(cfg.unlearning.gamma, 0.5);
        assert_eq!(cfg.unlearning.alpha, 10.0);
        assert_eq!(cfg.unlearning.forget_objective, ForgetObjective::UniformKl);
        assert_eq!(cfg.verification.max_probe_size, 4096);
    }

    #[test]
    fn test_invalid_threshold_rejected() {
        let mut cfg = EngineConfig::default();
        cfg.verification.confidence_threshold = 1.0;
        assert!(matches!(cfg.validate(), Err(EngineError::InvalidThreshold(_))));
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let cfg = EngineConfig::load("/nonexistent/engine.json").unwrap();
        assert_eq!(cfg, EngineConfig::default());
    }
}
