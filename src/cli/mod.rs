// ============================================================
// Layer 1 — CLI / Presentation Layer
// ============================================================
// Parses arguments with clap, builds the EngineContext from the
// configuration file and routes each subcommand to its use case.
// Every command prints its result as JSON on stdout; logs go to
// stderr through tracing.
//
// Reference: Rust Book §7 (Modules), §12 (CLI programs)

pub mod commands;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;

use commands::{
    CheckpointArgs, Commands, CompareArgs, PredictArgs, ProbeArgs, RetrainArgs, ShardArg,
    TrainArgs, UnlearnArgs, VerifyArgs,
};

use crate::application::{
    audit_use_case::AuditUseCase,
    context::EngineContext,
    jobs::JobRunner,
    train_use_case::TrainUseCase,
    unlearn_use_case::UnlearnUseCase,
    verify_use_case::VerifyUseCase,
};
use crate::domain::request::{UnlearningRequest, VerificationRequest};
use crate::infra::config::EngineConfig;

#[derive(Parser, Debug)]
#[command(
    name = "shard-unlearn",
    version,
    about = "Sharded training, machine unlearning and erasure verification."
)]
pub struct Cli {
    /// Engine configuration file (defaults apply when it does not exist)
    #[arg(long, global = true, default_value = "shard_unlearn.json")]
    pub config: String,

    /// Override the checkpoint store directory
    #[arg(long, global = true)]
    pub storage_dir: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    pub fn run(self) -> Result<()> {
        let mut config = EngineConfig::load(&self.config)
            .with_context(|| format!("cannot load config '{}'", self.config))?;
        if let Some(dir) = self.storage_dir {
            config.storage_dir = dir;
        }
        let ctx = EngineContext::open(config)?;

        match self.command {
            Commands::Train(args)      => run_train(&ctx, args),
            Commands::Unlearn(args)    => run_unlearn(&ctx, args),
            Commands::Verify(args)     => run_verify(&ctx, args),
            Commands::Compare(args)    => run_compare(&ctx, args),
            Commands::Checkpoint(args) => run_checkpoint(&ctx, args),
            Commands::History(args)    => run_history(&ctx, args),
            Commands::Predict(args)    => run_predict(&ctx, args),
            Commands::Retrain(args)    => run_retrain(&ctx, args),
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn run_train(ctx: &EngineContext, args: TrainArgs) -> Result<()> {
    tracing::info!("Training on '{}' with {} shards", args.dataset, args.num_shards);
    let response = TrainUseCase::new(ctx).execute(&args.into())?;
    print_json(&response)
}

fn run_unlearn(ctx: &EngineContext, args: UnlearnArgs) -> Result<()> {
    let defaults = &ctx.config.unlearning;
    let request = UnlearningRequest {
        shard_id:       args.shard,
        forget_indices: args.indices,
        alpha:          args.alpha.unwrap_or(defaults.alpha),
        beta:           args.beta.unwrap_or(defaults.beta),
        epochs:         args.epochs,
    };

    // Submitted as a job so the pass runs under the same handle
    // and cancel token an orchestrator would use
    let runner = JobRunner::new();
    let handle = UnlearnUseCase::new(ctx).submit(&runner, request)?;
    let outcome = handle.wait()?;
    print_json(&outcome)
}

fn probe_request(ctx: &EngineContext, probe: ProbeArgs) -> VerificationRequest {
    VerificationRequest {
        shard_id:             probe.shard,
        probe_indices:        probe.probes,
        confidence_threshold: probe
            .threshold
            .unwrap_or(ctx.config.verification.confidence_threshold),
    }
}

fn run_verify(ctx: &EngineContext, args: VerifyArgs) -> Result<()> {
    let request = probe_request(ctx, args.probe);
    let result = VerifyUseCase::new(ctx).execute(&request, args.version)?;
    print_json(&result)
}

fn run_compare(ctx: &EngineContext, args: CompareArgs) -> Result<()> {
    let request = probe_request(ctx, args.probe);
    let comparison = VerifyUseCase::new(ctx).compare(&request, args.before, args.after)?;
    print_json(&comparison)
}

fn run_checkpoint(ctx: &EngineContext, args: CheckpointArgs) -> Result<()> {
    let with_params = args.params_out.is_some();
    let view = AuditUseCase::new(ctx).checkpoint(args.shard, args.version, with_params)?;
    if let (Some(path), Some(params)) = (&args.params_out, &view.params) {
        std::fs::write(path, params).with_context(|| format!("cannot write '{path}'"))?;
        tracing::info!("Wrote {} parameter bytes to '{}'", params.len(), path);
    }
    print_json(&view)
}

fn run_history(ctx: &EngineContext, args: ShardArg) -> Result<()> {
    print_json(&AuditUseCase::new(ctx).history(args.shard)?)
}

fn run_predict(ctx: &EngineContext, args: PredictArgs) -> Result<()> {
    print_json(&AuditUseCase::new(ctx).predict(&args.features)?)
}

fn run_retrain(ctx: &EngineContext, args: RetrainArgs) -> Result<()> {
    let report = TrainUseCase::new(ctx).retrain(args.shard, args.epochs)?;
    print_json(&report)
}
