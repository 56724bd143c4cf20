use std::panic;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::bench::run_benchmark;
use crate::core::config::{Settings, timeout_from_secs};
use crate::native::executor::ProcessSampler;

mod bench;
mod constants;
mod core;
mod native;

/// Benchmarks SAT solvers on CNF instances, optionally after symmetry breaking.
#[derive(Debug, Parser)]
#[command(name = "satbench", version)]
struct Args {
    /// JSON configuration file
    config: PathBuf,
    /// Where to write the CSV results
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Number of parallel workers
    #[arg(short, long)]
    workers: Option<usize>,
    /// Per-task time budget in seconds
    #[arg(short, long)]
    timeout: Option<f64>,
}

#[tokio::main]
#[tracing::instrument]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
    set_panic_hook();

    let args = Args::parse();
    let mut settings = Settings::load(&args.config)?;
    if let Some(output) = args.output {
        settings.output = output;
    }
    if let Some(workers) = args.workers {
        settings.max_workers = workers;
    }
    if let Some(timeout) = args.timeout {
        settings.timeout = timeout_from_secs(timeout)?;
    }

    tracing::info!("Loaded {}", args.config.display());
    let results = run_benchmark(&settings, Arc::new(ProcessSampler::new())).await?;
    tracing::info!(
        "{} results written to {}",
        results.len(),
        settings.output.display()
    );

    Ok(())
}

fn set_panic_hook() {
    panic::set_hook(Box::new(|panic_info| {
        tracing::error!(
            message = "panic occurred",
            panic = %panic_info
        );
    }));
}
