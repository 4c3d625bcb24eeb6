// ============================================================
// Layer 5 — Model Capability Interface and Architectures
// ============================================================
// The trainer, the unlearning engine, the membership probe and
// the aggregator never name a concrete network. They depend on
// the ShardModel trait:
//
//   forward             features [N, D] → logits [N, C]
//   compute_loss        cross-entropy on a RecordBatch
//   parameters          every trainable tensor, flattened
//   parameter_gradients gradients of those tensors after backward
//
// The "apply gradient update" capability comes from Burn itself:
// any AutodiffModule can be stepped by a Burn Optimizer (see
// `apply_gradient_update` below), so it does not need a
// per-architecture method.
//
// ShardNet covers both architecture variants the engine ships:
//   hidden_dims = []          → multinomial logistic regression
//   hidden_dims = [64, 32]    → MLP with ReLU between layers
//
// Reference: Burn Book §3 (Building Blocks)

use burn::{
    module::AutodiffModule,
    nn::{loss::CrossEntropyLossConfig, Linear, LinearConfig},
    optim::{GradientsParams, Optimizer},
    prelude::*,
    tensor::{activation, backend::AutodiffBackend},
};
use serde::{Deserialize, Serialize};

use crate::data::batcher::RecordBatch;
use crate::domain::error::{EngineError, EngineResult};

// ─── ShardModel ───────────────────────────────────────────────────────────────
/// What the engine needs from a per-shard model.
pub trait ShardModel<B: AutodiffBackend>: AutodiffModule<B> {
    /// Architecture description, persisted in the registry manifest
    type Config: burn::config::Config;

    fn init(config: &Self::Config, device: &B::Device) -> Self;

    /// features: [batch, feature_dim] → logits: [batch, num_classes]
    fn forward(&self, features: Tensor<B, 2>) -> Tensor<B, 2>;

    fn num_classes(&self) -> usize;

    /// Mean cross-entropy of the batch under this model
    fn compute_loss(&self, batch: &RecordBatch<B>) -> Tensor<B, 1> {
        let logits = self.forward(batch.features.clone());
        CrossEntropyLossConfig::new()
            .init(&logits.device())
            .forward(logits, batch.labels.clone())
    }

    /// All trainable tensors flattened to rank 1, in a fixed order.
    /// Still attached to the autodiff graph.
    fn parameters(&self) -> Vec<Tensor<B, 1>>;

    /// Gradients of `parameters()` (same order and shapes); zeros
    /// for any parameter the loss did not touch.
    fn parameter_gradients(&self, grads: &B::Gradients) -> Vec<Tensor<B::InnerBackend, 1>>;
}

/// Backward pass + one optimiser step, for any ShardModel.
pub fn apply_gradient_update<B, M, O>(
    model: M,
    optim: &mut O,
    loss:  Tensor<B, 1>,
    lr:    f64,
) -> M
where
    B: AutodiffBackend,
    M: ShardModel<B>,
    O: Optimizer<M, B>,
{
    let grads = loss.backward();
    let grads = GradientsParams::from_grads(grads, &model);
    optim.step(lr, model, grads)
}

// ─── Host readback ────────────────────────────────────────────────────────────

/// Row-wise softmax of `logits`, copied to the host: one Vec per record.
pub fn class_probabilities<B: Backend>(logits: Tensor<B, 2>) -> EngineResult<Vec<Vec<f32>>> {
    let [_, num_classes] = logits.dims();
    let flat = activation::softmax(logits.detach(), 1)
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| EngineError::Tensor(format!("{e:?}")))?;
    Ok(flat.chunks(num_classes.max(1)).map(<[f32]>::to_vec).collect())
}

/// Index of the largest entry; the first one wins ties.
pub fn argmax(row: &[f32]) -> usize {
    row.iter()
        .enumerate()
        .fold((0, f32::NEG_INFINITY), |best, (i, &p)| if p > best.1 { (i, p) } else { best })
        .0
}

/// Single-element tensor → f64
pub fn scalar<B: Backend>(t: Tensor<B, 1>) -> f64 {
    t.into_scalar().elem::<f64>()
}

// ─── Architecture selection ───────────────────────────────────────────────────

/// User-facing architecture choice, mapped onto a ShardNetConfig.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Architecture {
    Logistic,
    Mlp { hidden_dims: Vec<usize> },
}

impl Architecture {
    pub fn config(&self, input_dim: usize, num_classes: usize) -> ShardNetConfig {
        match self {
            Self::Logistic => ShardNetConfig::new(input_dim, Vec::new(), num_classes),
            Self::Mlp { hidden_dims } => {
                ShardNetConfig::new(input_dim, hidden_dims.clone(), num_classes)
            }
        }
    }
}

// ─── ShardNet ─────────────────────────────────────────────────────────────────

// NOTE: #[derive(Config)] already generates Clone and Serialize/Deserialize.
#[derive(Config, Debug)]
pub struct ShardNetConfig {
    pub input_dim:   usize,
    pub hidden_dims: Vec<usize>,
    pub num_classes: usize,
}

impl ShardNetConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> ShardNet<B> {
        // Layer widths: input → hidden... → classes
        let mut widths = vec![self.input_dim];
        widths.extend(self.hidden_dims.iter().copied());
        widths.push(self.num_classes);

        let layers = widths
            .windows(2)
            .map(|w| LinearConfig::new(w[0], w[1]).init(device))
            .collect();

        ShardNet { layers, num_classes: self.num_classes }
    }
}

#[derive(Module, Debug)]
pub struct ShardNet<B: Backend> {
    pub layers:      Vec<Linear<B>>,
    pub num_classes: usize,
}

impl<B: Backend> ShardNet<B> {
    /// ReLU between layers, raw logits out of the last one.
    pub fn logits(&self, features: Tensor<B, 2>) -> Tensor<B, 2> {
        let last = self.layers.len().saturating_sub(1);
        let mut x = features;
        for (i, layer) in self.layers.iter().enumerate() {
            x = layer.forward(x);
            if i < last {
                x = activation::relu(x);
            }
        }
        x
    }
}

impl<B: AutodiffBackend> ShardModel<B> for ShardNet<B> {
    type Config = ShardNetConfig;

    fn init(config: &Self::Config, device: &B::Device) -> Self {
        config.init(device)
    }

    fn forward(&self, features: Tensor<B, 2>) -> Tensor<B, 2> {
        self.logits(features)
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }

    fn parameters(&self) -> Vec<Tensor<B, 1>> {
        let mut params = Vec::with_capacity(self.layers.len() * 2);
        for layer in &self.layers {
            params.push(layer.weight.val().flatten::<1>(0, 1));
            if let Some(bias) = &layer.bias {
                params.push(bias.val());
            }
        }
        params
    }

    fn parameter_gradients(&self, grads: &B::Gradients) -> Vec<Tensor<B::InnerBackend, 1>> {
        let mut out = Vec::with_capacity(self.layers.len() * 2);
        for layer in &self.layers {
            let w = layer.weight.val();
            let g = w.grad(grads).unwrap_or_else(|| w.inner().zeros_like());
            out.push(g.flatten::<1>(0, 1));
            if let Some(bias) = &layer.bias {
                let b = bias.val();
                out.push(b.grad(grads).unwrap_or_else(|| b.inner().zeros_like()));
            }
        }
        out
    }
}
