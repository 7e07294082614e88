//! Sharpness tracking during training.
//!
//! Trains a model from the registry with minibatch SGD (momentum and weight decay) or Adam
//! and, after every epoch, records the train and test metrics together with the top
//! eigenvalues of the loss Hessian. Each epoch's row is written and flushed as soon as the
//! epoch finishes, so a run that fails part-way keeps the epochs it completed.

use anyhow::{Context, Result, anyhow, ensure};
use clap::{Parser, ValueEnum};
use hessian_lanczos::{
    EigenOptions, Which, hessian_eigenvalues,
    autodiff::Float,
    data::Dataset,
    hvp::{CurvatureSource, compute_dataset_gradient, compute_gradient},
    loss::{Criterion, LossKind, evaluate},
    model::{Model, ModelKind},
    utils::data_loader::{TargetSpec, load_csv_dataset},
};
use rand::{SeedableRng, rngs::StdRng};
use serde::Serialize;
use std::{
    fs::File,
    io,
    path::{Path, PathBuf},
    time::Instant,
};

/// Which data the Hessian is taken over.
#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
enum SharpnessSource {
    /// The mean loss over the whole training set.
    Dataset,
    /// The mean loss over the last minibatch of the epoch.
    LastBatch,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
enum Selection {
    /// Largest algebraic eigenvalues.
    La,
    /// Largest magnitude eigenvalues.
    Lm,
}

/// Synthetic problem used when no `--data` file is given.
#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
enum Task {
    Regression,
    Classification,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
enum Precision {
    F32,
    F64,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
enum OptimizerKind {
    /// SGD with heavy-ball momentum.
    Sgd,
    /// Adam with bias correction.
    Adam,
}

/// Command-line arguments for the sharpness tracker.
#[derive(Parser, Debug)]
#[clap(
    name = "sharpness",
    about = "Trains a model and records the top Hessian eigenvalues after every epoch."
)]
struct SharpnessArgs {
    /// CSV dataset with a header row; the trailing column(s) hold the targets.
    #[clap(long, value_name = "PATH")]
    data: Option<PathBuf>,
    /// Number of trailing target columns (regression) or of classes (classification).
    #[clap(long, default_value_t = 3)]
    outputs: usize,
    /// Problem type, for both `--data` files and synthetic data.
    #[clap(long, value_enum, default_value_t = Task::Classification)]
    task: Task,
    /// Synthetic data: number of samples.
    #[clap(long, default_value_t = 512)]
    samples: usize,
    /// Synthetic data: input width.
    #[clap(long, default_value_t = 8)]
    input_dim: usize,
    /// Synthetic data: noise amplitude or cluster half-width.
    #[clap(long, default_value_t = 0.3)]
    noise: f64,
    /// Fraction of the samples held out for testing.
    #[clap(long, default_value_t = 0.2)]
    test_fraction: f64,

    /// Model key: linear, tanh-mlp or relu-mlp.
    #[clap(long, default_value_t = ModelKind::TanhMlp)]
    model: ModelKind,
    /// Hidden layer widths, comma separated.
    #[clap(long, value_delimiter = ',', default_value = "16")]
    hidden: Vec<usize>,
    /// Loss key: squared-error or cross-entropy.
    #[clap(long, default_value_t = LossKind::CrossEntropy)]
    loss: LossKind,
    /// Label smoothing of the cross-entropy loss.
    #[clap(long, default_value_t = 0.1)]
    label_smoothing: f64,
    /// Floating-point precision of the model.
    #[clap(long, value_enum, default_value_t = Precision::F64)]
    precision: Precision,

    #[clap(long, value_enum, default_value_t = OptimizerKind::Sgd)]
    optimizer: OptimizerKind,
    #[clap(long, default_value_t = 10)]
    epochs: usize,
    #[clap(long, default_value_t = 0.05)]
    lr: f64,
    /// Momentum of SGD; ignored by Adam.
    #[clap(long, default_value_t = 0.9)]
    momentum: f64,
    /// L2 penalty added to the gradient.
    #[clap(long, default_value_t = 5e-4)]
    weight_decay: f64,
    #[clap(long, default_value_t = 32)]
    batch_size: usize,

    /// Number of Hessian eigenvalues to estimate.
    #[clap(long, default_value_t = 1)]
    neigs: usize,
    #[clap(long, value_enum, default_value_t = SharpnessSource::Dataset)]
    sharpness_source: SharpnessSource,
    #[clap(long, value_enum, default_value_t = Selection::La)]
    which: Selection,
    /// Chunk size used when the Hessian is taken over the whole dataset.
    #[clap(long, default_value_t = 256)]
    physical_batch_size: usize,
    /// Relative residual tolerance of the eigen-estimator (0 for machine precision).
    #[clap(long, default_value_t = 1e-8)]
    tol: f64,

    #[clap(long, default_value_t = 0)]
    seed: u64,
    /// Path to the output CSV file where per-epoch results will be written.
    #[clap(long, value_name = "PATH")]
    output: PathBuf,
}

/// One row of the results file.
#[derive(Debug, Serialize)]
struct EpochRecord {
    epoch: usize,
    train_loss: f64,
    train_acc: Option<f64>,
    test_loss: Option<f64>,
    test_acc: Option<f64>,
    grad_norm: f64,
    param_norm: f64,
    sharpness: f64,
    /// All estimated eigenvalues, `;` separated.
    eigenvalues: String,
    hvp_count: usize,
    eigen_time_s: f64,
}

/// Parameter update rule with its per-parameter state.
#[derive(Debug)]
enum Optimizer<F: Float> {
    Sgd {
        lr: F,
        momentum: F,
        weight_decay: F,
        velocity: Vec<F>,
    },
    Adam {
        lr: F,
        beta1: F,
        beta2: F,
        eps: F,
        weight_decay: F,
        m: Vec<F>,
        v: Vec<F>,
        t: i32,
    },
}

impl<F: Float> Optimizer<F> {
    fn new(kind: OptimizerKind, args: &SharpnessArgs, num_params: usize) -> Self {
        match kind {
            OptimizerKind::Sgd => Optimizer::Sgd {
                lr: F::lit(args.lr),
                momentum: F::lit(args.momentum),
                weight_decay: F::lit(args.weight_decay),
                velocity: vec![F::zero(); num_params],
            },
            OptimizerKind::Adam => Optimizer::Adam {
                lr: F::lit(args.lr),
                beta1: F::lit(0.9),
                beta2: F::lit(0.999),
                eps: F::lit(1e-8),
                weight_decay: F::lit(args.weight_decay),
                m: vec![F::zero(); num_params],
                v: vec![F::zero(); num_params],
                t: 0,
            },
        }
    }

    /// Updates `theta` in place from the minibatch gradient.
    fn step(&mut self, theta: &mut [F], gradient: &[F]) {
        debug_assert_eq!(theta.len(), gradient.len());
        match self {
            Optimizer::Sgd {
                lr,
                momentum,
                weight_decay,
                velocity,
            } => {
                for ((t, vel), &g) in theta.iter_mut().zip(velocity.iter_mut()).zip(gradient) {
                    *vel = *momentum * *vel + g + *weight_decay * *t;
                    *t = *t - *lr * *vel;
                }
            }
            Optimizer::Adam {
                lr,
                beta1,
                beta2,
                eps,
                weight_decay,
                m,
                v,
                t: step,
            } => {
                *step += 1;
                let bc1 = F::one() - beta1.powi(*step);
                let bc2 = F::one() - beta2.powi(*step);
                for (((t, m), v), &g) in theta.iter_mut().zip(m.iter_mut()).zip(v.iter_mut()).zip(gradient) {
                    let g = g + *weight_decay * *t;
                    *m = *beta1 * *m + (F::one() - *beta1) * g;
                    *v = *beta2 * *v + (F::one() - *beta2) * g * g;
                    let m_hat = *m / bc1;
                    let v_hat = *v / bc2;
                    *t = *t - *lr * m_hat / (v_hat.sqrt() + *eps);
                }
            }
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .try_init()
        .map_err(|e| anyhow!("Failed to initialize logger: {}", e))?;

    let args = SharpnessArgs::parse();
    log::info!("Starting sharpness run with parameters: {:?}", &args);
    validate(&args)?;

    // Opened before training so that a bad path fails immediately.
    let mut writer = open_output(&args.output)?;
    match args.precision {
        Precision::F32 => run::<f32, _>(&args, &mut writer)?,
        Precision::F64 => run::<f64, _>(&args, &mut writer)?,
    }
    log::info!("Results successfully written to {:?}", &args.output);
    Ok(())
}

fn validate(args: &SharpnessArgs) -> Result<()> {
    ensure!(args.batch_size > 0, "--batch-size must be positive");
    ensure!(
        (0.0..1.0).contains(&args.test_fraction),
        "--test-fraction must lie in [0, 1)"
    );
    Ok(())
}

/// Creates the output directory if needed and opens (truncating) the results file.
fn open_output(path: &Path) -> Result<csv::Writer<File>> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create output directory: {:?}", parent))?;
        }
    }
    csv::Writer::from_path(path).with_context(|| format!("Failed to create output file: {:?}", path))
}

fn load_dataset<F: Float>(args: &SharpnessArgs, rng: &mut StdRng) -> Result<Dataset<F>> {
    match &args.data {
        Some(path) => {
            let spec = match args.task {
                Task::Regression => TargetSpec::Values { dim: args.outputs },
                Task::Classification => TargetSpec::Classes {
                    num_classes: args.outputs,
                },
            };
            load_csv_dataset(path, spec).with_context(|| format!("Failed to load dataset from {:?}", path))
        }
        None => {
            let dataset = match args.task {
                Task::Regression => Dataset::synthetic_regression(
                    args.samples,
                    args.input_dim,
                    args.outputs,
                    args.noise,
                    rng,
                ),
                Task::Classification => Dataset::synthetic_classification(
                    args.samples,
                    args.input_dim,
                    args.outputs,
                    args.noise,
                    rng,
                ),
            };
            dataset.context("Failed to generate the synthetic dataset")
        }
    }
}

/// Trains for `args.epochs` epochs, writing and flushing one record per epoch.
fn run<F: Float, W: io::Write>(args: &SharpnessArgs, writer: &mut csv::Writer<W>) -> Result<()> {
    let mut rng = StdRng::seed_from_u64(args.seed);

    let dataset = load_dataset::<F>(args, &mut rng)?.shuffled(&mut rng);
    let test_len = (dataset.len() as f64 * args.test_fraction).round() as usize;
    let (test, train) = dataset.split_at(test_len)?;
    ensure!(!train.is_empty(), "the training split is empty");
    log::info!("{} training and {} test samples", train.len(), test.len());

    let mut model = args
        .model
        .build::<F, _>(train.input_dim(), &args.hidden, train.output_dim(), &mut rng)?;
    let criterion: Criterion = args.loss.build(args.label_smoothing)?;
    log::info!("model: {:?}, loss: {:?}", &model, &criterion);

    let options = EigenOptions {
        tol: args.tol,
        which: match args.which {
            Selection::La => Which::LargestAlgebraic,
            Selection::Lm => Which::LargestMagnitude,
        },
        seed: Some(args.seed),
        ..EigenOptions::default()
    };

    let mut optimizer = Optimizer::<F>::new(args.optimizer, args, model.parameters().len());
    let mut best_test_acc: Option<f64> = None;

    for epoch in 1..=args.epochs {
        let shuffled = train.shuffled(&mut rng);
        for batch in shuffled.batches(args.batch_size) {
            let (_, gradient) = compute_gradient(&model, &criterion, &batch)?;
            let mut theta = model.parameters().flatten();
            optimizer.step(&mut theta, &gradient);
            model.parameters_mut().assign_flat(&theta)?;
        }

        let source = match args.sharpness_source {
            SharpnessSource::Dataset => CurvatureSource::Dataset {
                dataset: &train,
                physical_batch_size: args.physical_batch_size,
            },
            SharpnessSource::LastBatch => CurvatureSource::Batch(
                shuffled
                    .batches(args.batch_size)
                    .last()
                    .ok_or_else(|| anyhow!("the training split produced no batches"))?,
            ),
        };
        let started = Instant::now();
        let spectrum = hessian_eigenvalues(&model, &criterion, source, args.neigs, &options)
            .with_context(|| format!("Hessian eigenvalue estimation failed at epoch {epoch}"))?;
        let eigen_time_s = started.elapsed().as_secs_f64();

        let train_eval = evaluate(&model, &criterion, &train)?;
        let test_eval = if test.is_empty() {
            None
        } else {
            Some(evaluate(&model, &criterion, &test)?)
        };
        let (_, gradient) = compute_dataset_gradient(&model, &criterion, &train, args.physical_batch_size)?;
        let grad_norm = gradient
            .iter()
            .map(|g| g.as_f64() * g.as_f64())
            .sum::<f64>()
            .sqrt();

        let record = EpochRecord {
            epoch,
            train_loss: train_eval.loss,
            train_acc: train_eval.accuracy,
            test_loss: test_eval.map(|e| e.loss),
            test_acc: test_eval.and_then(|e| e.accuracy),
            grad_norm,
            param_norm: model.parameters().norm_l2(),
            sharpness: spectrum.values[0],
            eigenvalues: spectrum
                .values
                .iter()
                .map(|v| format!("{v:.6e}"))
                .collect::<Vec<_>>()
                .join(";"),
            hvp_count: spectrum.matvecs,
            eigen_time_s,
        };
        log::info!(
            "epoch {epoch}: train loss {:.4}, test loss {}, sharpness {:.4}, grad norm {:.3e}",
            record.train_loss,
            record
                .test_loss
                .map_or_else(|| "n/a".to_string(), |l| format!("{l:.4}")),
            record.sharpness,
            record.grad_norm
        );
        if let Some(acc) = record.test_acc {
            best_test_acc = Some(best_test_acc.map_or(acc, |best| best.max(acc)));
        }

        writer.serialize(&record)?;
        writer.flush()?;
    }

    if let Some(best) = best_test_acc {
        log::info!("Best test accuracy: {best:.2}%");
    }
    Ok(())
}
