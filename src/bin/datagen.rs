//! A data generation utility for creating synthetic training sets.
//!
//! Writes a planted linear regression problem or a clustered classification problem as a
//! CSV file that the `sharpness` binary can read back with `--data`.

use anyhow::{Context, Result, anyhow};
use clap::{Parser, ValueEnum};
use hessian_lanczos::data::Dataset;
use hessian_lanczos::utils::data_loader::write_csv_dataset;
use rand::{SeedableRng, rngs::StdRng};
use std::path::PathBuf;

/// The kind of problem to generate.
#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
enum Task {
    /// `y = W·x + noise` with real-valued targets.
    Regression,
    /// Jittered samples around one random centre per class.
    Classification,
}

/// Command-line interface for the dataset generator.
#[derive(Parser, Debug)]
#[clap(
    name = "datagen",
    about = "Writes a synthetic regression or classification dataset as CSV."
)]
struct DataGenArgs {
    #[clap(long, value_enum, default_value_t = Task::Classification)]
    task: Task,
    /// Number of samples.
    #[clap(long, default_value_t = 1000)]
    samples: usize,
    /// Width of each input.
    #[clap(long, default_value_t = 10)]
    input_dim: usize,
    /// Number of targets (regression) or classes (classification).
    #[clap(long, default_value_t = 3)]
    outputs: usize,
    /// Noise amplitude (regression) or cluster half-width (classification).
    #[clap(long, default_value_t = 0.3)]
    noise: f64,
    /// Seed of the random generator.
    #[clap(long, default_value_t = 0)]
    seed: u64,
    /// The destination CSV file.
    #[clap(long)]
    output: PathBuf,
}

fn main() -> Result<()> {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .try_init()
        .map_err(|e| anyhow!("Failed to initialize logger: {}", e))?;

    let args = DataGenArgs::parse();
    log::info!("Generating dataset with parameters: {:?}", &args);

    if let Some(parent) = args.output.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create output directory: {:?}", parent))?;
        }
    }

    let mut rng = StdRng::seed_from_u64(args.seed);
    let dataset = match args.task {
        Task::Regression => Dataset::<f64>::synthetic_regression(
            args.samples,
            args.input_dim,
            args.outputs,
            args.noise,
            &mut rng,
        ),
        Task::Classification => Dataset::<f64>::synthetic_classification(
            args.samples,
            args.input_dim,
            args.outputs,
            args.noise,
            &mut rng,
        ),
    }
    .context("Failed to generate the dataset")?;

    write_csv_dataset(&args.output, &dataset)
        .with_context(|| format!("Failed to write dataset to {:?}", &args.output))?;

    log::info!(
        "Wrote {} samples with {} input columns to {:?}",
        dataset.len(),
        dataset.input_dim(),
        &args.output
    );
    Ok(())
}
