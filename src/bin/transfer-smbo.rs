//! Command-line driver: repeated SMBO runs on one task of a data directory.

use std::io::Write;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, ValueEnum};
use tracing::info;
use transfer_smbo::experiment::{Experiment, ExperimentConfig, SurrogateKind};

#[derive(Parser, Debug)]
#[command(
    name = "transfer-smbo",
    about = "Sequential model-based optimization with transfer from related tasks"
)]
struct Cli {
    /// Directory holding one dataset file per task.
    #[arg(long)]
    data_dir: PathBuf,

    /// File name of the target task inside the data directory.
    #[arg(long)]
    dataset: String,

    /// Number of SMBO steps per repetition.
    #[arg(long)]
    tries: usize,

    /// Surrogate model.
    #[arg(long, value_enum)]
    surrogate: SurrogateArg,

    /// Similarity bandwidth of the transfer surrogates.
    #[arg(long)]
    bandwidth: f64,

    /// Number of leading attributes that encode hyperparameters.
    #[arg(long)]
    hp_range: usize,

    /// Number of leading hyperparameter attributes that are indicators.
    #[arg(long)]
    hp_indicator_range: usize,

    /// Random seed, or `r` to seed from system entropy.
    #[arg(long, default_value = "0")]
    seed: Seed,

    /// Number of independent searches to average.
    #[arg(long, default_value_t = 1)]
    repeats: usize,

    /// Train the related-task models on a sparse subgrid only.
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    sparse_grid: bool,

    /// Output format of the per-step report.
    #[arg(long, value_enum, default_value = "csv")]
    format: Format,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum SurrogateArg {
    /// Two-stage transfer with metafeature similarities.
    TstM,
    /// Two-stage transfer with pairwise-comparison similarities.
    TstR,
    /// Plain Gaussian Process.
    Gp,
}

impl From<SurrogateArg> for SurrogateKind {
    fn from(value: SurrogateArg) -> SurrogateKind {
        match value {
            SurrogateArg::TstM => SurrogateKind::MetafeatureTransfer,
            SurrogateArg::TstR => SurrogateKind::RankTransfer,
            SurrogateArg::Gp => SurrogateKind::Gp,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Format {
    Csv,
    Json,
}

/// A fixed seed or `r` for a random one.
#[derive(Clone, Copy, Debug)]
struct Seed(Option<u64>);

impl FromStr for Seed {
    type Err = core::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "r" {
            Ok(Self(None))
        } else {
            s.parse().map(|seed| Self(Some(seed)))
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let config = ExperimentConfig::builder()
        .tries(cli.tries)
        .repeats(cli.repeats)
        .seed(cli.seed.0)
        .sparse_grid(cli.sparse_grid)
        .surrogate(cli.surrogate.into())
        .bandwidth(cli.bandwidth)
        .hyperparameter_dims(cli.hp_range)
        .indicator_dims(cli.hp_indicator_range)
        .build();

    info!(dir = %cli.data_dir.display(), "loading data sets");
    let experiment = Experiment::from_dir(config, &cli.data_dir, &cli.dataset)
        .with_context(|| format!("cannot set up experiment for '{}'", cli.dataset))?;
    let report = experiment.run().context("search failed")?;

    info!("printing results");
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    match cli.format {
        Format::Csv => report.to_csv(&mut out)?,
        Format::Json => {
            report.to_json(&mut out)?;
            writeln!(out)?;
        }
    }
    Ok(())
}
