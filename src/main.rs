use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use sirene_resolve::llm::{GeminiLlm, LlmClient, PacedClient, SubmissionGate};
use sirene_resolve::{
    CheckpointStore, PipelineConfig, RegistryPaths, export_results, pipeline::CancelToken,
    read_supplier_records, run_pipeline,
};

#[derive(Debug, Parser)]
#[command(
    name = "sirene-resolve",
    version,
    disable_help_subcommand = true,
    about = "Resolve supplier records to authoritative SIRENE establishments"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Process an input file against the registry and export the results.
    Run(RunArgs),
    /// Re-export the result set from an existing checkpoint.
    Export(ExportArgs),
}

#[derive(Debug, Parser)]
struct RunArgs {
    #[arg(long, value_name = "PATH", help = "Supplier file (.csv, .tsv, or .jsonl)")]
    input: PathBuf,
    #[arg(
        long,
        value_name = "PATH",
        help = "Full establishment columnar file (raw SIRENE columns)"
    )]
    establishments: PathBuf,
    #[arg(
        long = "partitions-root",
        value_name = "PATH",
        help = "Root of per-department partitions (dept=NN directories)"
    )]
    partitions_root: PathBuf,
    #[arg(
        long = "name-index",
        value_name = "PATH",
        help = "Directory of the legal-entity name index"
    )]
    name_index: PathBuf,
    #[arg(
        long,
        value_name = "PATH",
        default_value = "resolution_state.bin",
        help = "Checkpoint store path (falls back to the temp directory if unwritable)"
    )]
    checkpoint: PathBuf,
    #[arg(
        long,
        value_name = "PATH",
        default_value = "results_enriched.csv",
        help = "Export file written after the run"
    )]
    output: PathBuf,
    #[arg(
        long,
        default_value_t = 0,
        help = "Worker threads (0 = logical core count)"
    )]
    workers: usize,
    #[arg(
        long = "batch-size",
        default_value_t = 100,
        value_parser = parse_positive_usize,
        help = "Upserts between checkpoint commits"
    )]
    batch_size: usize,
    #[arg(long, help = "Cap on new records, applied after skipping completed ones")]
    limit: Option<usize>,
    #[arg(long = "retry-errors", help = "Re-run rows whose previous outcome was an error")]
    retry_errors: bool,
    #[arg(
        long = "heuristic-only",
        help = "Skip the LLM adapter and always use the heuristic normalizer"
    )]
    heuristic_only: bool,
    #[arg(
        long = "llm-min-interval-ms",
        default_value_t = 0,
        help = "Minimum spacing between LLM submissions, spread across workers"
    )]
    llm_min_interval_ms: u64,
    #[arg(
        long = "llm-timeout-secs",
        default_value_t = sirene_resolve::constants::llm::DEFAULT_TIMEOUT_SECS,
        help = "Client-level timeout for LLM adapter calls"
    )]
    llm_timeout_secs: u64,
}

#[derive(Debug, Parser)]
struct ExportArgs {
    #[arg(long, value_name = "PATH", help = "Checkpoint store to read")]
    checkpoint: PathBuf,
    #[arg(long, value_name = "PATH", help = "Export file to write")]
    output: PathBuf,
}

fn parse_positive_usize(value: &str) -> Result<usize, String> {
    match value.parse::<usize>() {
        Ok(parsed) if parsed > 0 => Ok(parsed),
        _ => Err(format!("'{value}' must be a positive integer")),
    }
}

fn main() -> ExitCode {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let outcome = match cli.command {
        Command::Run(args) => run(args),
        Command::Export(args) => export(args),
    };
    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "run aborted");
            ExitCode::FAILURE
        }
    }
}

fn run(args: RunArgs) -> Result<(), sirene_resolve::ResolveError> {
    let paths = RegistryPaths {
        establishments: args.establishments.clone(),
        partitions_root: args.partitions_root.clone(),
        name_index: args.name_index.clone(),
    };
    paths.validate()?;

    let records = read_supplier_records(&args.input)?;
    info!(records = records.len(), input = %args.input.display(), "input loaded");

    let mut store = CheckpointStore::open_or_fallback(&args.checkpoint)?;
    let config = PipelineConfig {
        workers: args.workers,
        batch_size: args.batch_size,
        limit: args.limit,
        retry_errors: args.retry_errors,
        checkpoint_path: store.path().to_path_buf(),
        model_backed_normalization: !args.heuristic_only,
        llm_min_interval: Duration::from_millis(args.llm_min_interval_ms),
        llm_timeout: Duration::from_secs(args.llm_timeout_secs),
        ..PipelineConfig::default()
    };

    let model_backed = config.model_backed_normalization;
    let timeout = config.llm_timeout;
    if model_backed && std::env::var(sirene_resolve::constants::llm::ENV_API_KEY).is_err() {
        info!("no adapter credential found, using the heuristic normalizer");
    }
    let factory = move |gate: SubmissionGate| -> Option<Box<dyn LlmClient>> {
        if !model_backed {
            return None;
        }
        match GeminiLlm::from_env(timeout) {
            Ok(Some(client)) => Some(Box::new(PacedClient::new(Box::new(client), gate))),
            Ok(None) => None,
            Err(_) => None,
        }
    };

    let cancel = CancelToken::new();
    let summary = run_pipeline(&config, &paths, records, &mut store, &cancel, &factory)?;
    info!(
        processed = summary.processed,
        skipped = summary.skipped,
        cancelled = summary.cancelled,
        "run complete"
    );

    let exported = export_results(&store, &args.output)?;
    info!(rows = exported, output = %args.output.display(), "export written");
    Ok(())
}

fn export(args: ExportArgs) -> Result<(), sirene_resolve::ResolveError> {
    let store = CheckpointStore::open(&args.checkpoint)?;
    let exported = export_results(&store, &args.output)?;
    info!(rows = exported, output = %args.output.display(), "export written");
    Ok(())
}
