//! `train` binary: build the graph hierarchy and compare graph-convolution
//! models on a dataset.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin train -- --config experiment.json --data mnist.json
//! cargo run --bin train -- --dry-run --output results/perf.json
//! ```

use std::path::PathBuf;

use clap::Parser;
use graphconv_train::config::ExperimentConfig;
use graphconv_train::dataset::{synthetic_communities, DatasetFile, GraphSource, Splits, SyntheticConfig};
use graphconv_train::experiment::{default_roster, Experiment};
use graphconv_train::TrainResult;
use tracing::{error, info};

/// Command-line arguments for the training binary.
#[derive(Parser, Debug)]
#[command(
    name = "train",
    version,
    about = "Spectral graph-convolution training pipeline",
    long_about = None
)]
struct Args {
    /// Path to the JSON experiment configuration.
    ///
    /// If not provided, the default graph settings and model roster are used.
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// JSON dataset with train/val/test splits and a graph source.
    #[arg(short, long, value_name = "FILE")]
    data: Option<PathBuf>,

    /// Use the synthetic community dataset instead of `--data`.
    #[arg(long, default_value_t = false)]
    dry_run: bool,

    /// Number of synthetic samples when `--dry-run` is active.
    #[arg(long, default_value_t = 500)]
    dry_run_samples: usize,

    /// Write the comparison as JSON to this file.
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() {
    let args = Args::parse();

    let log_level_filter = args
        .log_level
        .parse::<tracing_subscriber::filter::LevelFilter>()
        .unwrap_or(tracing_subscriber::filter::LevelFilter::INFO);

    tracing_subscriber::fmt()
        .with_max_level(log_level_filter)
        .with_target(false)
        .with_thread_ids(false)
        .init();

    info!("graphconv training pipeline v{}", graphconv_train::VERSION);

    if let Err(e) = run(&args) {
        error!("{e}");
        std::process::exit(1);
    }
}

fn run(args: &Args) -> TrainResult<()> {
    let (source, splits) = load_data(args)?;

    let config = match args.config.as_deref() {
        Some(path) => {
            info!("Loading configuration from {}", path.display());
            ExperimentConfig::from_json(path)?
        }
        None => {
            info!("No configuration file provided, using the default roster");
            ExperimentConfig { models: default_roster(splits.n_classes().max(2), 5), ..ExperimentConfig::default() }
        }
    };

    info!("  graph edges       : {}", config.graph.number_edges);
    info!("  noise level       : {}", config.graph.noise_level);
    info!("  grid corners      : {}", config.graph.corners);
    info!("  coarsening levels : {}", config.coarsening_levels);
    info!("  normalized L      : {}", config.normalized_laplacian);
    info!("  models            : {}", config.models.len());

    let experiment = Experiment::new(config)?;
    let perf = experiment.run(&source, &splits)?;
    println!("{perf}");

    if let Some(path) = args.output.as_deref() {
        perf.to_json(path)?;
        info!("Results written to {}", path.display());
    }
    Ok(())
}

fn load_data(args: &Args) -> TrainResult<(GraphSource, Splits)> {
    if args.dry_run {
        info!("DRY RUN: synthetic community dataset ({} samples)", args.dry_run_samples);
        return synthetic_communities(args.dry_run_samples, &SyntheticConfig::default());
    }
    match args.data.as_deref() {
        Some(path) => {
            info!("Loading dataset from {}", path.display());
            DatasetFile::load(path)
        }
        None => Err(graphconv_train::ConfigError::invalid_value(
            "data",
            "pass --data FILE or --dry-run",
        )
        .into()),
    }
}
