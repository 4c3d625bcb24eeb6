// ============================================================
// Layer 2 — AuditUseCase
// ============================================================
// Read-only views for auditors and the certificate issuer:
//
//   checkpoint(shard, version)  metadata of one stored version,
//                               parameters only when asked for
//   history(shard)              every version + every logged
//                               verification of the shard
//   predict(features)           ensemble prediction over the
//                               current checkpoints

use anyhow::{Context, Result};
use serde::Serialize;

use crate::application::context::EngineContext;
use crate::domain::checkpoint::{CheckpointMeta, Version};
use crate::domain::request::VerificationResult;
use crate::domain::shard::ShardId;
use crate::ml::aggregator::Prediction;
use crate::ml::EngineModel;

#[derive(Debug, Clone, Serialize)]
pub struct CheckpointView {
    pub meta:       CheckpointMeta,
    pub is_current: bool,

    /// Encoded parameter blob, present only on explicit request
    #[serde(skip)]
    pub params:     Option<Vec<u8>>,
    pub params_len: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ShardHistory {
    pub shard_id:        ShardId,
    pub current_version: Option<Version>,
    pub checkpoints:     Vec<CheckpointMeta>,
    pub verifications:   Vec<VerificationResult>,
}

pub struct AuditUseCase<'a> {
    ctx: &'a EngineContext,
}

impl<'a> AuditUseCase<'a> {
    pub fn new(ctx: &'a EngineContext) -> Self {
        Self { ctx }
    }

    /// Metadata of `version` (current when None).
    pub fn checkpoint(&self, shard: ShardId, version: Option<Version>, with_params: bool) -> Result<CheckpointView> {
        let registry = &self.ctx.registry;
        let current  = registry.current_version(shard)?;
        let meta = match version {
            Some(v) => registry.meta(shard, v)?,
            None    => registry.current_meta(shard)?,
        };
        let params = if with_params {
            Some(registry.params_blob(shard, meta.version)?)
        } else {
            None
        };

        Ok(CheckpointView {
            is_current: current == Some(meta.version),
            params_len: params.as_ref().map(Vec::len),
            params,
            meta,
        })
    }

    pub fn history(&self, shard: ShardId) -> Result<ShardHistory> {
        let registry = &self.ctx.registry;
        let manifest = self.ctx.manifest()?;
        manifest.assignment.range(shard)?;

        Ok(ShardHistory {
            shard_id:        shard,
            current_version: registry.current_version(shard)?,
            checkpoints:     registry.history(shard)?,
            verifications:   registry.verifications(shard)?,
        })
    }

    pub fn predict(&self, features: &[f32]) -> Result<Prediction> {
        self.ctx
            .aggregator()
            .predict::<EngineModel>(features)
            .context("ensemble prediction failed")
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::testing::{context, trained_context};
    use crate::domain::error::EngineError;

    #[test]
    fn test_checkpoint_metadata_without_params() {
        let (_dir, ctx) = trained_context(1);
        let view = AuditUseCase::new(&ctx).checkpoint(0, None, false).unwrap();
        assert_eq!(view.meta.version, 1);
        assert!(view.is_current);
        assert!(view.params.is_none());

        let json = serde_json::to_value(&view).unwrap();
        assert!(json.get("params").is_none());
        assert!(json["params_len"].is_null());
    }

    #[test]
    fn test_checkpoint_params_on_request() {
        let (_dir, ctx) = trained_context(1);
        let view = AuditUseCase::new(&ctx).checkpoint(0, Some(1), true).unwrap();
        let len = view.params.as_ref().map(Vec::len).unwrap();
        assert!(len > 0);
        assert_eq!(view.params_len, Some(len));
    }

    #[test]
    fn test_missing_version_is_not_found() {
        let (_dir, ctx) = trained_context(1);
        let err = AuditUseCase::new(&ctx).checkpoint(0, Some(9), false).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<EngineError>(),
            Some(EngineError::NotFound { shard: 0, version: 9 })
        ));
    }

    #[test]
    fn test_history_lists_versions() {
        let (_dir, ctx) = trained_context(1);
        let history = AuditUseCase::new(&ctx).history(3).unwrap();
        assert_eq!(history.current_version, Some(1));
        assert_eq!(history.checkpoints.len(), 1);
        assert!(history.verifications.is_empty());
        assert!(AuditUseCase::new(&ctx).history(4).is_err());
    }

    #[test]
    fn test_predict_needs_training() {
        let (_dir, ctx) = context();
        assert!(AuditUseCase::new(&ctx).predict(&[0.0; 4]).is_err());

        let (_dir, ctx) = trained_context(5);
        let p = AuditUseCase::new(&ctx).predict(&[0.0; 4]).unwrap();
        assert_eq!(p.votes.len(), 4);
    }
}
