// ============================================================
// Layer 5 — Unlearning Objective
// ============================================================
// The unlearning loss is three named terms combined with
// explicit signed weights:
//
//   L = w_f · L_forget + w_r · L_retain + w_d · L_drift
//
//   L_forget  measured on the forget batch
//   L_retain  cross-entropy on a retain sample
//   L_drift   Σ F_i (θ_i − θ*_i)²  (θ* = pre-unlearning params,
//             F = Fisher diagonal or all-ones)
//
// Signs by forget objective:
//
//   GradientAscent  L_forget = CE(forget)      w_f = −α
//                   (minimising −α·CE climbs the forget loss)
//   UniformKl       L_forget = KL(U ‖ p(·|x))  w_f = +α
//                   (pulls forget predictions toward uniform)
//
//   w_r = +β, w_d = +γ in both cases.
//
// Each term is a separate function so it can be inspected and
// tested on its own.
//
// Reference: Kirkpatrick et al. (2017) Elastic Weight Consolidation

use burn::{
    prelude::*,
    tensor::{activation, backend::AutodiffBackend},
};
use serde::{Deserialize, Serialize};

use crate::data::batcher::RecordBatch;
use crate::ml::model::ShardModel;

/// How the forget term pushes the model away from the forget set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForgetObjective {
    /// Ascend the cross-entropy on forget records
    #[default]
    GradientAscent,

    /// Descend KL(uniform ‖ prediction) on forget records
    UniformKl,
}

/// Unsigned term weights as supplied by the caller / config.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObjectiveWeights {
    pub alpha: f64,
    pub beta:  f64,
    pub gamma: f64,
}

/// Weights with their optimisation sign applied.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignedWeights {
    pub forget: f64,
    pub retain: f64,
    pub drift:  f64,
}

impl ObjectiveWeights {
    pub fn signed(&self, objective: ForgetObjective) -> SignedWeights {
        let forget = match objective {
            ForgetObjective::GradientAscent => -self.alpha,
            ForgetObjective::UniformKl      => self.alpha,
        };
        SignedWeights { forget, retain: self.beta, drift: self.gamma }
    }
}

/// The three loss components of one optimisation step.
pub struct LossTerms<B: Backend> {
    pub forget: Tensor<B, 1>,

    /// None when the shard has no retain records left
    pub retain: Option<Tensor<B, 1>>,

    pub drift: Tensor<B, 1>,
}

impl<B: Backend> LossTerms<B> {
    /// Signed sum that the optimiser minimises.
    pub fn combine(&self, w: SignedWeights) -> Tensor<B, 1> {
        let mut total = self.forget.clone().mul_scalar(w.forget)
            + self.drift.clone().mul_scalar(w.drift);
        if let Some(retain) = &self.retain {
            total = total + retain.clone().mul_scalar(w.retain);
        }
        total
    }
}

/// Forget-set loss, unsigned.
pub fn forget_term<B, M>(model: &M, batch: &RecordBatch<B>, objective: ForgetObjective) -> Tensor<B, 1>
where
    B: AutodiffBackend,
    M: ShardModel<B>,
{
    match objective {
        ForgetObjective::GradientAscent => model.compute_loss(batch),
        ForgetObjective::UniformKl => {
            let logits = model.forward(batch.features.clone());
            uniform_kl(logits)
        }
    }
}

/// KL(U ‖ softmax(logits)) averaged over the batch:
///   Σ_c (1/C)(log(1/C) − log p_c) = −log C − mean_c log p_c
pub fn uniform_kl<B: Backend>(logits: Tensor<B, 2>) -> Tensor<B, 1> {
    let [_, num_classes] = logits.dims();
    let log_p = activation::log_softmax(logits, 1);
    log_p
        .mean_dim(1)
        .mean()
        .neg()
        .sub_scalar((num_classes as f64).ln())
}

/// Ordinary (descending) loss on retain records.
pub fn retain_term<B, M>(model: &M, batch: &RecordBatch<B>) -> Tensor<B, 1>
where
    B: AutodiffBackend,
    M: ShardModel<B>,
{
    model.compute_loss(batch)
}

/// Σ importance · (θ − θ*)² over every parameter.
///
/// `reference` must be detached tensors in `parameters()` order;
/// `importance` (same order) defaults to all-ones, which is plain L2 drift.
pub fn drift_term<B, M>(
    model:      &M,
    reference:  &[Tensor<B, 1>],
    importance: Option<&[Tensor<B, 1>]>,
) -> Tensor<B, 1>
where
    B: AutodiffBackend,
    M: ShardModel<B>,
{
    let params = model.parameters();
    let device = params
        .first()
        .map(|p| p.device())
        .unwrap_or_default();

    params
        .into_iter()
        .zip(reference)
        .enumerate()
        .fold(Tensor::zeros([1], &device), |acc, (i, (p, r))| {
            let sq = (p - r.clone()).powf_scalar(2.0);
            let weighted = match importance {
                Some(f) => sq * f[i].clone(),
                None    => sq,
            };
            acc + weighted.sum()
        })
}

/// Parameters of `model`, cut from the autodiff graph.
pub fn frozen_parameters<B, M>(model: &M) -> Vec<Tensor<B, 1>>
where
    B: AutodiffBackend,
    M: ShardModel<B>,
{
    model.parameters().into_iter().map(|p| p.detach()).collect()
}
