use clap::Parser;
use membench_runner::{
    config::{BenchConfig, ConfigErrors, Namespace},
    executors::LocalExecutor,
    runner::QueryRunner,
    wrapper::ProcessWrapper,
};
use std::{path::PathBuf, process::ExitCode};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG: &str = "membench.yaml";

#[derive(Parser, Debug)]
#[command(author, version, about = "Runs the query battery of one benchmark and records latency and peak memory")]
struct Args {
    /// Name of the benchmark run, partitions database, result and stats paths
    #[arg(long)]
    benchmark: Namespace,

    /// YAML config, membench.yaml in the working directory is used if present
    #[arg(long)]
    config: Option<PathBuf>,

    /// Engine executable, overrides the config
    #[arg(long)]
    engine: Option<PathBuf>,

    /// Number of queries in the battery
    #[arg(long)]
    queries: Option<u32>,

    /// Give up on a query after this many failed attempts, retries forever if unset
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Pause between two attempts in milliseconds
    #[arg(long)]
    backoff_ms: Option<u64>,

    /// Kill an attempt after this many milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn load_config(args: &Args) -> Result<BenchConfig, ConfigErrors> {
    let mut config = match &args.config {
        Some(path) => BenchConfig::from_file(path)?,
        None => {
            let path = PathBuf::from(DEFAULT_CONFIG);
            if path.is_file() {
                info!("Using config from {DEFAULT_CONFIG}");
                BenchConfig::from_file(&path)?
            } else {
                BenchConfig::default()
            }
        }
    };

    if let Some(engine) = &args.engine {
        config.engine = engine.clone();
    }
    if let Some(queries) = args.queries {
        config.queries = queries;
    }
    if let Some(max_attempts) = args.max_attempts {
        config.retry.max_attempts = Some(max_attempts);
    }
    if let Some(backoff_ms) = args.backoff_ms {
        config.retry.backoff_ms = backoff_ms;
    }
    if let Some(timeout_ms) = args.timeout_ms {
        config.retry.timeout_ms = Some(timeout_ms);
    }

    if config.preflight_checks() {
        return Err(ConfigErrors::Preflight);
    }

    Ok(config)
}

fn main() -> ExitCode {
    init_logging();
    let args = Args::parse();

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(error) => {
            error!("Failed to load configuration: {error}");
            return ExitCode::FAILURE;
        }
    };

    if config.retry.max_attempts.is_none() {
        warn!("Retries are unbounded, a query that keeps failing blocks the run");
    }

    let namespace = &args.benchmark;
    let mut runner = QueryRunner::new(
        &config,
        namespace,
        LocalExecutor::new(config.retry.timeout()),
        ProcessWrapper::load(&config.profiler),
    );

    let results = match runner.run_queries() {
        Ok(results) => results,
        Err(error) => {
            error!("Benchmark {namespace} failed: {error}");
            return ExitCode::FAILURE;
        }
    };

    match results.write(&config.stats_dir(namespace)) {
        Ok(path) => {
            info!("Results saved to {}", path.to_string_lossy());
            ExitCode::SUCCESS
        }
        Err(error) => {
            error!("Failed to save results: {error}");
            ExitCode::FAILURE
        }
    }
}
