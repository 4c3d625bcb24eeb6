// ============================================================
// Layer 1 — CLI Commands and Arguments
// ============================================================
// One subcommand per engine operation. Flags left unset fall
// back to the values in the engine configuration file.
//
// Reference: Rust Book §12 (Building a CLI Program)

use clap::{Args, Subcommand, ValueEnum};

use crate::application::train_use_case::TrainRequest;
use crate::ml::model::Architecture;

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Partition a dataset into shards and train one model per shard
    Train(TrainArgs),

    /// Forget records of one shard and commit the next checkpoint version
    Unlearn(UnlearnArgs),

    /// Run the membership-inference probe against a shard checkpoint
    Verify(VerifyArgs),

    /// Probe two versions of a shard with the same records
    Compare(CompareArgs),

    /// Show checkpoint metadata for audit
    Checkpoint(CheckpointArgs),

    /// List every version and logged verification of a shard
    History(ShardArg),

    /// Ensemble prediction over the current shard checkpoints
    Predict(PredictArgs),

    /// Retrain one shard from scratch without its forgotten records
    Retrain(RetrainArgs),
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum ArchKind {
    Logistic,
    Mlp,
}

#[derive(Args, Debug)]
pub struct TrainArgs {
    /// JSON dataset file or `synthetic:<n>:<dim>:<classes>:<seed>`
    #[arg(long)]
    pub dataset: String,

    #[arg(long, default_value_t = 4)]
    pub num_shards: usize,

    #[arg(long, value_enum, default_value_t = ArchKind::Logistic)]
    pub arch: ArchKind,

    /// Hidden layer widths for `--arch mlp`, comma separated
    #[arg(long, value_delimiter = ',', default_value = "64,32")]
    pub hidden: Vec<usize>,

    #[arg(long, default_value_t = 20)]
    pub epochs: usize,
}

impl From<TrainArgs> for TrainRequest {
    fn from(a: TrainArgs) -> Self {
        let architecture = match a.arch {
            ArchKind::Logistic => Architecture::Logistic,
            ArchKind::Mlp      => Architecture::Mlp { hidden_dims: a.hidden },
        };
        TrainRequest {
            dataset_ref: a.dataset,
            num_shards:  a.num_shards,
            architecture,
            epochs:      a.epochs,
        }
    }
}

#[derive(Args, Debug)]
pub struct UnlearnArgs {
    #[arg(long)]
    pub shard: usize,

    /// Global record indices to forget, comma separated
    #[arg(long, value_delimiter = ',', required = true)]
    pub indices: Vec<usize>,

    /// Forget-term weight (config default when omitted)
    #[arg(long)]
    pub alpha: Option<f64>,

    /// Retain-term weight (config default when omitted)
    #[arg(long)]
    pub beta: Option<f64>,

    #[arg(long, default_value_t = 50)]
    pub epochs: usize,
}

#[derive(Args, Debug)]
pub struct ProbeArgs {
    #[arg(long)]
    pub shard: usize,

    /// Records to probe, comma separated
    #[arg(long, value_delimiter = ',', required = true)]
    pub probes: Vec<usize>,

    /// Erasure threshold in (0, 1) (config default when omitted)
    #[arg(long)]
    pub threshold: Option<f64>,
}

#[derive(Args, Debug)]
pub struct VerifyArgs {
    #[command(flatten)]
    pub probe: ProbeArgs,

    /// Probe this version instead of the current one
    #[arg(long)]
    pub version: Option<u32>,
}

#[derive(Args, Debug)]
pub struct CompareArgs {
    #[command(flatten)]
    pub probe: ProbeArgs,

    #[arg(long)]
    pub before: u32,

    #[arg(long)]
    pub after: u32,
}

#[derive(Args, Debug)]
pub struct CheckpointArgs {
    #[arg(long)]
    pub shard: usize,

    /// Defaults to the current version
    #[arg(long)]
    pub version: Option<u32>,

    /// Also write the raw parameter blob to this file
    #[arg(long)]
    pub params_out: Option<String>,
}

#[derive(Args, Debug)]
pub struct ShardArg {
    #[arg(long)]
    pub shard: usize,
}

#[derive(Args, Debug)]
pub struct PredictArgs {
    /// Feature vector, comma separated
    #[arg(long, value_delimiter = ',', allow_negative_numbers = true, required = true)]
    pub features: Vec<f32>,
}

#[derive(Args, Debug)]
pub struct RetrainArgs {
    #[arg(long)]
    pub shard: usize,

    #[arg(long, default_value_t = 20)]
    pub epochs: usize,
}
