// ============================================================
// Layer 2 — VerifyUseCase
// ============================================================
// The `verify` and `compare` operations. Both reload the
// manifest's dataset, probe stored checkpoints through the
// verification engine and return results that have already been
// appended to the shard's verification log.

use anyhow::{Context, Result};

use crate::application::context::EngineContext;
use crate::domain::checkpoint::Version;
use crate::domain::request::{ProbeComparison, VerificationRequest, VerificationResult};
use crate::ml::EngineModel;

pub struct VerifyUseCase<'a> {
    ctx: &'a EngineContext,
}

impl<'a> VerifyUseCase<'a> {
    pub fn new(ctx: &'a EngineContext) -> Self {
        Self { ctx }
    }

    /// Probe the current checkpoint, or `version` when given.
    pub fn execute(&self, request: &VerificationRequest, version: Option<Version>) -> Result<VerificationResult> {
        let dataset  = self.ctx.load_dataset()?;
        let verifier = self.ctx.verifier();
        let result = match version {
            Some(v) => verifier.verify_version::<EngineModel>(&dataset, request, v),
            None    => verifier.verify::<EngineModel>(&dataset, request),
        };
        result.with_context(|| format!("verification of shard {} failed", request.shard_id))
    }

    pub fn compare(&self, request: &VerificationRequest, before: Version, after: Version) -> Result<ProbeComparison> {
        let dataset = self.ctx.load_dataset()?;
        self.ctx
            .verifier()
            .compare::<EngineModel>(&dataset, request, before, after)
            .with_context(|| {
                format!("comparing v{before} and v{after} of shard {} failed", request.shard_id)
            })
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::testing::trained_context;
    use crate::application::unlearn_use_case::UnlearnUseCase;
    use crate::domain::request::UnlearningRequest;
    use crate::infra::concurrency::CancelToken;

    #[test]
    fn test_verify_after_unlearning_against_both_versions() {
        let (_dir, ctx) = trained_context(20);
        UnlearnUseCase::new(&ctx)
            .execute(
                &UnlearningRequest { shard_id: 0, forget_indices: vec![0, 1, 2], alpha: 10.0, beta: 0.1, epochs: 50 },
                &CancelToken::new(),
            )
            .unwrap();

        let request = VerificationRequest { shard_id: 0, probe_indices: vec![0, 1, 2], confidence_threshold: 0.6 };
        let use_case = VerifyUseCase::new(&ctx);

        let current = use_case.execute(&request, None).unwrap();
        let original = use_case.execute(&request, Some(1)).unwrap();
        assert_eq!(current.checkpoint_version, 2);
        assert!(current.confidence_score < original.confidence_score);

        let cmp = use_case.compare(&request, 1, 2).unwrap();
        assert_eq!(cmp.before.confidence_score, original.confidence_score);
        assert_eq!(cmp.after.confidence_score, current.confidence_score);

        // Persisted in the file store: 2 verifies + 2 from compare
        assert_eq!(ctx.registry.verifications(0).unwrap().len(), 4);
    }
}
