// ============================================================
// Layer 5 — Unlearning Engine
// ============================================================
// Removes the influence of specific records from one shard's
// current checkpoint by constrained fine-tuning, then commits
// the result as the shard's next version.
//
// Pass lifecycle:
//
//   Idle ──► Loading ──► Optimizing{1..E} ──► Committing ──► Done
//               │              │                  │
//               └──────────────┴──────────────────┴──► Failed
//
//   Loading     fetch current checkpoint, split the requested
//               indices into new / already forgotten
//   Optimizing  one state per epoch; the cancel token is polled
//               only before an epoch starts
//   Committing  write version N+1 (pointer moves only after the
//               write is confirmed)
//
// Loading goes straight to Committing when every requested index
// is already forgotten: a new version is written with unchanged
// parameters and no ascent is run a second time.
//
// Each optimisation step minimises
//
//   w_f·L_forget(forget batch) + β·CE(retain sample) + γ·drift
//
// with SGD (momentum 0.9). The drift penalty is anchored at the
// pre-pass parameters and optionally weighted by a Fisher
// diagonal estimated on the retain set (EWC).
//
// Rollback: every failure (cancel, non-finite loss, storage)
// drops the in-memory model. Nothing is written, so the current
// pointer still names the pre-pass checkpoint.
//
// Reference: Golatkar et al. (2020) Eternal Sunshine of the Spotless Net
//            Kirkpatrick et al. (2017) Elastic Weight Consolidation

use std::{
    collections::{BTreeSet, HashMap},
    ops::Range,
    sync::Arc,
};

use burn::{
    optim::{momentum::MomentumConfig, SgdConfig},
    prelude::*,
    tensor::backend::AutodiffBackend,
};
use parking_lot::Mutex;
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use serde::Serialize;

use crate::data::{batcher::RecordBatcher, splitter::sample_without_replacement};
use crate::domain::checkpoint::CheckpointDraft;
use crate::domain::error::{EngineError, EngineResult};
use crate::domain::record::Dataset;
use crate::domain::request::{EpochLosses, UnlearnOutcome, UnlearningRequest};
use crate::domain::shard::ShardId;
use crate::infra::concurrency::{CancelToken, ShardGuard, ShardLocks, ShardTicket};
use crate::infra::config::{BusyPolicy, UnlearnSettings};
use crate::infra::registry::ShardRegistry;
use crate::ml::model::{apply_gradient_update, scalar, ShardModel};
use crate::ml::objective::{
    drift_term, forget_term, frozen_parameters, retain_term, LossTerms, ObjectiveWeights,
};

// ─── Pass state machine ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum UnlearnState {
    Idle,
    Loading,
    Optimizing { epoch: usize },
    Committing,
    Done,
    Failed,
}

impl UnlearnState {
    pub fn can_transition_to(self, next: UnlearnState) -> bool {
        use UnlearnState::*;
        match (self, next) {
            (Idle, Loading) => true,
            (Loading, Optimizing { epoch: 1 }) => true,
            (Loading, Committing) | (Loading, Failed) => true,
            (Optimizing { epoch: a }, Optimizing { epoch: b }) => b == a + 1,
            (Optimizing { .. }, Committing) | (Optimizing { .. }, Failed) => true,
            (Committing, Done) | (Committing, Failed) => true,
            _ => false,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

/// Walks one pass through the state machine and publishes each
/// state to the engine's per-shard table.
struct PassTracker<'a> {
    shard: ShardId,
    state: UnlearnState,
    table: &'a Mutex<HashMap<ShardId, UnlearnState>>,
}

impl<'a> PassTracker<'a> {
    fn start(table: &'a Mutex<HashMap<ShardId, UnlearnState>>, shard: ShardId) -> Self {
        table.lock().insert(shard, UnlearnState::Idle);
        Self { shard, state: UnlearnState::Idle, table }
    }

    fn advance(&mut self, next: UnlearnState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal unlearning transition {:?} → {:?}",
            self.state, next
        );
        tracing::debug!("Shard {} unlearning: {:?} → {:?}", self.shard, self.state, next);
        self.state = next;
        self.table.lock().insert(self.shard, next);
    }

    fn fail(&mut self, error: &EngineError) {
        tracing::warn!(
            "Shard {} unlearning failed in {:?}: {}; current checkpoint unchanged",
            self.shard, self.state, error
        );
        self.advance(UnlearnState::Failed);
    }
}

// ─── Engine ───────────────────────────────────────────────────────────────────

pub struct UnlearningEngine<B: AutodiffBackend> {
    registry:   Arc<ShardRegistry>,
    locks:      Arc<ShardLocks>,
    settings:   UnlearnSettings,
    max_epochs: usize,
    device:     B::Device,
    states:     Mutex<HashMap<ShardId, UnlearnState>>,
}

impl<B: AutodiffBackend> UnlearningEngine<B> {
    pub fn new(
        registry:   Arc<ShardRegistry>,
        locks:      Arc<ShardLocks>,
        settings:   UnlearnSettings,
        max_epochs: usize,
        device:     B::Device,
    ) -> Self {
        Self { registry, locks, settings, max_epochs, device, states: Mutex::new(HashMap::new()) }
    }

    /// Latest pass state of a shard (`Idle` if it never ran one).
    pub fn state(&self, shard: ShardId) -> UnlearnState {
        self.states.lock().get(&shard).copied().unwrap_or(UnlearnState::Idle)
    }

    /// Run one unlearning pass and commit the next checkpoint version.
    pub fn unlearn<M>(
        &self,
        dataset: &Dataset,
        request: &UnlearningRequest,
        cancel:  &CancelToken,
    ) -> EngineResult<UnlearnOutcome>
    where
        M: ShardModel<B>,
    {
        self.unlearn_in_turn::<M>(dataset, request, cancel, None)
    }

    /// Like `unlearn`, but waits on a queue place taken earlier with
    /// `ShardLocks::enqueue`, so passes run in the order their tickets
    /// were handed out rather than the order their threads arrive.
    pub fn unlearn_queued<M>(
        &self,
        dataset: &Dataset,
        request: &UnlearningRequest,
        cancel:  &CancelToken,
        ticket:  ShardTicket,
    ) -> EngineResult<UnlearnOutcome>
    where
        M: ShardModel<B>,
    {
        if ticket.shard() != request.shard_id {
            return Err(EngineError::Validation(format!(
                "queue ticket is for shard {}, request targets shard {}",
                ticket.shard(), request.shard_id
            )));
        }
        self.unlearn_in_turn::<M>(dataset, request, cancel, Some(ticket))
    }

    fn unlearn_in_turn<M>(
        &self,
        dataset: &Dataset,
        request: &UnlearningRequest,
        cancel:  &CancelToken,
        ticket:  Option<ShardTicket>,
    ) -> EngineResult<UnlearnOutcome>
    where
        M: ShardModel<B>,
    {
        let shard = request.shard_id;

        // Validation: nothing below touches the registry's state.
        // An early return drops the ticket, which gives up its turn.
        request.validate(self.max_epochs)?;
        let manifest = self.registry.require_manifest(shard)?;
        manifest.check_dataset(dataset)?;
        let range = manifest.assignment.range(shard)?;
        let outside: Vec<usize> = request
            .unique_indices()
            .into_iter()
            .filter(|i| !range.contains(i))
            .collect();
        if !outside.is_empty() {
            return Err(EngineError::InvalidIndex { shard, indices: outside });
        }
        let config: M::Config = manifest.model_config()?;

        let _guard = match ticket {
            Some(ticket) => ticket.wait(),
            None         => self.lock(shard)?,
        };
        let mut pass = PassTracker::start(&self.states, shard);
        let result = self.run_pass::<M>(&mut pass, dataset, &config, request, range, cancel);
        if let Err(e) = &result {
            pass.fail(e);
        }
        result
    }

    fn lock(&self, shard: ShardId) -> EngineResult<ShardGuard> {
        match self.settings.busy_policy {
            BusyPolicy::Queue  => Ok(self.locks.acquire(shard)),
            BusyPolicy::Reject => self.locks.try_acquire(shard),
        }
    }

    fn run_pass<M>(
        &self,
        pass:    &mut PassTracker<'_>,
        dataset: &Dataset,
        config:  &M::Config,
        request: &UnlearningRequest,
        range:   Range<usize>,
        cancel:  &CancelToken,
    ) -> EngineResult<UnlearnOutcome>
    where
        M: ShardModel<B>,
    {
        let shard = request.shard_id;

        // ── Loading ──────────────────────────────────────────────────────────
        pass.advance(UnlearnState::Loading);
        let current = self
            .registry
            .get_current_checkpoint::<B, M>(shard, config, &self.device)?;
        let parent = current.meta;

        let requested = request.unique_indices();
        let new_indices: Vec<usize> = requested
            .difference(&parent.forgotten_indices)
            .copied()
            .collect();
        let forgotten: BTreeSet<usize> = parent
            .forgotten_indices
            .union(&requested)
            .copied()
            .collect();

        tracing::info!(
            "Shard {} v{}: unlearning {} new indices ({} already forgotten)",
            shard, parent.version, new_indices.len(), requested.len() - new_indices.len()
        );

        // ── Optimizing ───────────────────────────────────────────────────────
        let (model, history) = if new_indices.is_empty() {
            (current.model, Vec::new())
        } else {
            let retain_pool: Vec<usize> = range.filter(|i| !forgotten.contains(i)).collect();
            self.optimise::<M>(pass, dataset, current.model, &new_indices, &retain_pool, request, cancel)?
        };

        // ── Committing ───────────────────────────────────────────────────────
        pass.advance(UnlearnState::Committing);
        let draft = CheckpointDraft {
            training_epochs:   parent.training_epochs,
            is_unlearned:      true,
            forgotten_indices: forgotten,
            parent_version:    Some(parent.version),
        };
        let meta = self.registry.put_checkpoint::<B, M>(shard, &model, draft)?;

        pass.advance(UnlearnState::Done);
        tracing::info!(
            "Shard {} unlearned: v{} → v{} ({} records forgotten in total)",
            shard, parent.version, meta.version, meta.forgotten_indices.len()
        );

        Ok(UnlearnOutcome {
            shard_id:          shard,
            new_version:       meta.version,
            processed_indices: new_indices,
            history,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn optimise<M>(
        &self,
        pass:        &mut PassTracker<'_>,
        dataset:     &Dataset,
        mut model:   M,
        new_indices: &[usize],
        retain_pool: &[usize],
        request:     &UnlearningRequest,
        cancel:      &CancelToken,
    ) -> EngineResult<(M, Vec<EpochLosses>)>
    where
        M: ShardModel<B>,
    {
        let shard      = request.shard_id;
        let batcher    = RecordBatcher::<B>::new(self.device.clone());
        let batch_size = self.settings.batch_size.max(1);
        let objective  = self.settings.forget_objective;
        let mut rng    = StdRng::seed_from_u64(self.settings.seed.wrapping_add(shard as u64));

        // θ* and F are fixed for the whole pass
        let reference  = frozen_parameters(&model);
        let importance = if self.settings.use_fisher && self.settings.gamma > 0.0 {
            self.fisher_diagonal(&model, dataset, retain_pool, &batcher, &mut rng)?
        } else {
            None
        };

        let weights = ObjectiveWeights {
            alpha: request.alpha,
            beta:  request.beta,
            gamma: self.settings.gamma,
        }
        .signed(objective);

        // v = μ·v + g;  θ = θ − lr·v
        let momentum  = MomentumConfig::new().with_momentum(0.9).with_dampening(0.0);
        let mut optim = SgdConfig::new().with_momentum(Some(momentum)).init::<B, M>();

        let mut forget  = new_indices.to_vec();
        let mut history = Vec::with_capacity(request.epochs);

        for epoch in 1..=request.epochs {
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled { shard, epoch: epoch - 1 });
            }
            pass.advance(UnlearnState::Optimizing { epoch });
            forget.shuffle(&mut rng);

            let mut sums  = [0.0f64; 4];
            let mut steps = 0usize;

            for chunk in forget.chunks(batch_size) {
                let Some(forget_batch) = batcher.batch(&dataset.select(chunk)?) else { continue };
                let retain_ids   = sample_without_replacement(retain_pool, self.settings.retain_sample_size, &mut rng);
                let retain_batch = batcher.batch(&dataset.select(&retain_ids)?);

                let terms = LossTerms {
                    forget: forget_term(&model, &forget_batch, objective),
                    retain: retain_batch.as_ref().map(|b| retain_term(&model, b)),
                    drift:  drift_term(&model, &reference, importance.as_deref()),
                };
                let total = terms.combine(weights);

                let values = [
                    scalar(terms.forget.clone()),
                    terms.retain.clone().map(scalar).unwrap_or(0.0),
                    scalar(terms.drift.clone()),
                    scalar(total.clone()),
                ];
                if values.iter().any(|v| !v.is_finite()) {
                    return Err(EngineError::NonFiniteLoss { shard, epoch });
                }
                for (sum, v) in sums.iter_mut().zip(values) {
                    *sum += v;
                }
                steps += 1;

                model = apply_gradient_update(model, &mut optim, total, self.settings.learning_rate);
            }

            let n = steps.max(1) as f64;
            let losses = EpochLosses {
                epoch,
                forget: sums[0] / n,
                retain: sums[1] / n,
                drift:  sums[2] / n,
                total:  sums[3] / n,
            };
            tracing::debug!(
                "Shard {} unlearn epoch {:>3}/{} | forget={:.4} | retain={:.4} | drift={:.6} | total={:.4}",
                shard, epoch, request.epochs, losses.forget, losses.retain, losses.drift, losses.total
            );
            history.push(losses);
        }

        // The last step's update is never seen by a loss; check it directly
        let finite = model
            .parameters()
            .into_iter()
            .all(|p| scalar(p.detach().sum()).is_finite());
        if !finite {
            return Err(EngineError::NonFiniteLoss { shard, epoch: request.epochs });
        }

        Ok((model, history))
    }

    /// Diagonal Fisher information of the retain loss at the current
    /// parameters, normalised to mean 1. None when the retain set is
    /// empty or the gradients vanish (plain L2 drift is used then).
    fn fisher_diagonal<M>(
        &self,
        model:       &M,
        dataset:     &Dataset,
        retain_pool: &[usize],
        batcher:     &RecordBatcher<B>,
        rng:         &mut StdRng,
    ) -> EngineResult<Option<Vec<Tensor<B, 1>>>>
    where
        M: ShardModel<B>,
    {
        let mut acc: Option<Vec<Tensor<B::InnerBackend, 1>>> = None;

        for _ in 0..self.settings.fisher_batches.max(1) {
            let ids = sample_without_replacement(retain_pool, self.settings.batch_size.max(1), rng);
            let Some(batch) = batcher.batch(&dataset.select(&ids)?) else { break };

            let grads   = model.compute_loss(&batch).backward();
            let squared = model
                .parameter_gradients(&grads)
                .into_iter()
                .map(|g| g.powf_scalar(2.0));

            acc = Some(match acc {
                None       => squared.collect(),
                Some(prev) => prev.into_iter().zip(squared).map(|(a, b)| a + b).collect(),
            });
        }

        let Some(sum) = acc else { return Ok(None) };

        let total: f64   = sum.iter().map(|t| scalar(t.clone().sum())).sum();
        let count: usize = sum.iter().map(|t| t.dims()[0]).sum();
        if !total.is_finite() || total <= 0.0 {
            return Ok(None);
        }

        // The 1/batches factor cancels in the normalisation
        let scale = count as f64 / total;
        Ok(Some(
            sum.into_iter()
                .map(|t| Tensor::from_inner(t.mul_scalar(scale)))
                .collect(),
        ))
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::model::class_probabilities;
    use crate::ml::objective::ForgetObjective;
    use crate::ml::testing::{blobs, fresh_registry, trained_registry, unlearner, TestBackend, TestNet};

    fn request(shard: ShardId, indices: Vec<usize>, epochs: usize) -> UnlearningRequest {
        UnlearningRequest { shard_id: shard, forget_indices: indices, alpha: 10.0, beta: 0.1, epochs }
    }

    /// Mean softmax probability of the true label under a stored version.
    fn mean_confidence(
        registry: &ShardRegistry,
        cfg:      &crate::ml::model::ShardNetConfig,
        dataset:  &Dataset,
        version:  u32,
        indices:  &[usize],
    ) -> f64 {
        let ckpt = registry
            .load_checkpoint::<TestBackend, TestNet>(0, version, cfg, &Default::default())
            .unwrap();
        let batch = RecordBatcher::<TestBackend>::new(Default::default())
            .batch(&dataset.select(indices).unwrap())
            .unwrap();
        let probs = class_probabilities(ckpt.model.forward(batch.features)).unwrap();
        probs
            .iter()
            .zip(&batch.label_ids)
            .map(|(row, &label)| row[label] as f64)
            .sum::<f64>()
            / indices.len() as f64
    }

    #[test]
    fn test_state_transitions() {
        use UnlearnState::*;
        assert!(Idle.can_transition_to(Loading));
        assert!(Loading.can_transition_to(Optimizing { epoch: 1 }));
        assert!(Loading.can_transition_to(Committing));
        assert!(Optimizing { epoch: 3 }.can_transition_to(Optimizing { epoch: 4 }));
        assert!(Optimizing { epoch: 3 }.can_transition_to(Failed));
        assert!(Committing.can_transition_to(Failed));
        assert!(!Idle.can_transition_to(Committing));
        assert!(!Optimizing { epoch: 3 }.can_transition_to(Optimizing { epoch: 3 }));
        assert!(!Done.can_transition_to(Loading));
        assert!(Failed.is_terminal() && Done.is_terminal() && !Committing.is_terminal());
    }

    #[test]
    fn test_forgetting_three_records_reduces_their_confidence() {
        let ds = blobs(100);
        let (_, registry, cfg) = trained_registry(&ds, 4, 30);
        assert_eq!(registry.current_version(0).unwrap(), Some(1));

        let engine  = unlearner(&registry, UnlearnSettings::default());
        let outcome = engine
            .unlearn::<TestNet>(&ds, &request(0, vec![0, 1, 2], 50), &CancelToken::new())
            .unwrap();

        assert_eq!(outcome.new_version, 2);
        assert_eq!(outcome.processed_indices, vec![0, 1, 2]);
        assert_eq!(outcome.history.len(), 50);
        assert_eq!(engine.state(0), UnlearnState::Done);

        let meta = registry.current_meta(0).unwrap();
        assert_eq!(meta.version, 2);
        assert!(meta.is_unlearned);
        assert_eq!(meta.parent_version, Some(1));
        assert_eq!(meta.forgotten_indices, [0, 1, 2].into_iter().collect());

        let before = mean_confidence(&registry, &cfg, &ds, 1, &[0, 1, 2]);
        let after  = mean_confidence(&registry, &cfg, &ds, 2, &[0, 1, 2]);
        assert!(after < before, "confidence {before} → {after}");

        // Other shards are untouched
        for shard in 1..4 {
            assert_eq!(registry.current_version(shard).unwrap(), Some(1));
        }
    }

    #[test]
    fn test_uniform_kl_objective_also_reduces_confidence() {
        let ds = blobs(40);
        let (_, registry, cfg) = trained_registry(&ds, 2, 30);
        let settings = UnlearnSettings { forget_objective: ForgetObjective::UniformKl, ..Default::default() };
        unlearner(&registry, settings)
            .unlearn::<TestNet>(&ds, &request(0, vec![0, 1], 30), &CancelToken::new())
            .unwrap();

        let before = mean_confidence(&registry, &cfg, &ds, 1, &[0, 1]);
        let after  = mean_confidence(&registry, &cfg, &ds, 2, &[0, 1]);
        assert!(after < before, "confidence {before} → {after}");
    }

    #[test]
    fn test_index_from_other_shard_rejected_without_change() {
        let ds = blobs(100);
        let (_, registry, _) = trained_registry(&ds, 4, 2);
        let engine = unlearner(&registry, UnlearnSettings::default());

        let err = engine
            .unlearn::<TestNet>(&ds, &request(0, vec![50], 5), &CancelToken::new())
            .unwrap_err();
        match err {
            EngineError::InvalidIndex { shard, indices } => {
                assert_eq!(shard, 0);
                assert_eq!(indices, vec![50]);
            }
            other => panic!("expected InvalidIndex, got {other:?}"),
        }
        assert_eq!(registry.current_version(0).unwrap(), Some(1));
        assert_eq!(registry.history(0).unwrap().len(), 1);
    }

    #[test]
    fn test_forgotten_set_is_cumulative_and_idempotent() {
        let ds = blobs(40);
        let (_, registry, _) = trained_registry(&ds, 2, 2);
        let engine = unlearner(&registry, UnlearnSettings::default());
        let cancel = CancelToken::new();

        engine.unlearn::<TestNet>(&ds, &request(0, vec![0, 1], 2), &cancel).unwrap();

        // Same indices again, duplicated and reordered: new version, nothing processed
        let again = engine.unlearn::<TestNet>(&ds, &request(0, vec![1, 0, 1], 2), &cancel).unwrap();
        assert_eq!(again.new_version, 3);
        assert!(again.processed_indices.is_empty());
        assert!(again.history.is_empty());
        assert_eq!(registry.current_meta(0).unwrap().forgotten_indices, [0, 1].into_iter().collect());

        // Mixed request: only the new index is processed
        let mixed = engine.unlearn::<TestNet>(&ds, &request(0, vec![1, 5], 2), &cancel).unwrap();
        assert_eq!(mixed.new_version, 4);
        assert_eq!(mixed.processed_indices, vec![5]);
        assert_eq!(
            registry.current_meta(0).unwrap().forgotten_indices,
            [0, 1, 5].into_iter().collect()
        );
    }

    #[test]
    fn test_untrained_shard_rejected() {
        let ds = blobs(20);
        let (_, registry, _) = fresh_registry(&ds, 2);
        let err = unlearner(&registry, UnlearnSettings::default())
            .unlearn::<TestNet>(&ds, &request(1, vec![12], 3), &CancelToken::new())
            .unwrap_err();
        assert!(matches!(err, EngineError::ShardNotTrained(1)));
    }

    #[test]
    fn test_empty_forget_set_rejected() {
        let ds = blobs(20);
        let (_, registry, _) = trained_registry(&ds, 2, 1);
        let err = unlearner(&registry, UnlearnSettings::default())
            .unlearn::<TestNet>(&ds, &request(0, vec![], 3), &CancelToken::new())
            .unwrap_err();
        assert!(matches!(err, EngineError::EmptyForgetSet(0)));
    }

    #[test]
    fn test_cancelled_pass_rolls_back() {
        let ds = blobs(20);
        let (_, registry, _) = trained_registry(&ds, 2, 1);
        let engine = unlearner(&registry, UnlearnSettings::default());
        let cancel = CancelToken::new();
        cancel.cancel();

        let err = engine.unlearn::<TestNet>(&ds, &request(0, vec![3], 10), &cancel).unwrap_err();
        assert!(matches!(err, EngineError::Cancelled { shard: 0, epoch: 0 }));
        assert_eq!(engine.state(0), UnlearnState::Failed);
        assert_eq!(registry.current_version(0).unwrap(), Some(1));
    }

    #[test]
    fn test_non_finite_loss_aborts() {
        let ds = blobs(20);
        let (_, registry, _) = trained_registry(&ds, 2, 1);
        let mut req = request(0, vec![2], 5);
        req.alpha = f64::MAX;

        let err = unlearner(&registry, UnlearnSettings::default())
            .unlearn::<TestNet>(&ds, &req, &CancelToken::new())
            .unwrap_err();
        assert!(matches!(err, EngineError::NonFiniteLoss { shard: 0, .. }));
        assert_eq!(registry.current_version(0).unwrap(), Some(1));
    }

    #[test]
    fn test_storage_failure_keeps_pointer() {
        let ds = blobs(20);
        let (store, registry, _) = trained_registry(&ds, 2, 1);
        store.fail_writes(true);

        let engine = unlearner(&registry, UnlearnSettings::default());
        let err = engine
            .unlearn::<TestNet>(&ds, &request(0, vec![4], 2), &CancelToken::new())
            .unwrap_err();
        assert!(matches!(err, EngineError::Storage(_)));
        assert_eq!(engine.state(0), UnlearnState::Failed);

        store.fail_writes(false);
        assert_eq!(registry.current_version(0).unwrap(), Some(1));
    }

    #[test]
    fn test_reject_policy_reports_busy_shard() {
        let ds = blobs(20);
        let (_, registry, _) = trained_registry(&ds, 2, 1);
        let locks = Arc::new(ShardLocks::new());
        let settings = UnlearnSettings { busy_policy: BusyPolicy::Reject, ..Default::default() };
        let engine = UnlearningEngine::<TestBackend>::new(
            registry.clone(), locks.clone(), settings, 1000, Default::default(),
        );

        let held = locks.acquire(0);
        let err = engine
            .unlearn::<TestNet>(&ds, &request(0, vec![1], 1), &CancelToken::new())
            .unwrap_err();
        assert!(matches!(err, EngineError::ShardBusy(0)));

        // Other shards are independent
        assert!(engine.unlearn::<TestNet>(&ds, &request(1, vec![11], 1), &CancelToken::new()).is_ok());
        drop(held);
        assert!(engine.unlearn::<TestNet>(&ds, &request(0, vec![1], 1), &CancelToken::new()).is_ok());
    }

    #[test]
    fn test_queued_ticket_must_match_shard_and_is_released_on_error() {
        let ds = blobs(20);
        let (_, registry, _) = trained_registry(&ds, 2, 1);
        let locks  = Arc::new(ShardLocks::new());
        let engine = UnlearningEngine::<TestBackend>::new(
            registry.clone(), locks.clone(), UnlearnSettings::default(), 1000, Default::default(),
        );

        let err = engine
            .unlearn_queued::<TestNet>(&ds, &request(0, vec![1], 1), &CancelToken::new(), locks.enqueue(1))
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
        assert!(!locks.is_busy(1));

        // A rejected request gives its place in the queue back
        let err = engine
            .unlearn_queued::<TestNet>(&ds, &request(0, vec![15], 1), &CancelToken::new(), locks.enqueue(0))
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidIndex { .. }));
        assert!(!locks.is_busy(0));

        let outcome = engine
            .unlearn_queued::<TestNet>(&ds, &request(0, vec![1], 1), &CancelToken::new(), locks.enqueue(0))
            .unwrap();
        assert_eq!(outcome.new_version, 2);
        assert!(!locks.is_busy(0));
    }

    #[test]
    fn test_epoch_bound_enforced() {
        let ds = blobs(20);
        let (_, registry, _) = trained_registry(&ds, 2, 1);
        let err = unlearner(&registry, UnlearnSettings::default())
            .unlearn::<TestNet>(&ds, &request(0, vec![1], 5000), &CancelToken::new())
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }
}
