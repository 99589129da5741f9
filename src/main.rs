use anyhow::Result;
use clap::Parser;
use sswe_trainer::{Config, Pipeline};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Train sentiment-specific word embeddings on a csv twitter sentiment dataset.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// JSON file holding the training parameters
    params: PathBuf,

    /// Seed for every random draw, overrides the parameter file
    #[arg(long)]
    seed: Option<u64>,

    /// Export path of the embedding csv, overrides the parameter file
    #[arg(long)]
    export_path: Option<PathBuf>,
}

fn main() -> Result<()> {

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    info!("building parameters...");
    let mut params = Config::new(&args.params)?.get_params();
    if args.seed.is_some() {
        params.train.seed = args.seed;
    }
    if args.export_path.is_some() {
        params.export_path = args.export_path;
    }

    let output = Pipeline::run(&params)?;
    info!(
        steps = output.summary.steps,
        mean_loss = output.summary.mean_loss,
        vocab_size = output.vocab_size,
        "finished training"
    );
    Ok(())
}
