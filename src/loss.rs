//! Scalar loss functions and the loss registry.

use std::fmt;
use std::str::FromStr;

use crate::autodiff::{Float, Var};
use crate::data::{Dataset, Target, Targets};
use crate::error::{SpectrumError, dimension_mismatch, input_error};
use crate::model::Model;

/// An unreduced per-sample loss.
///
/// Batch and dataset reductions (mean over a batch, sum divided by the sample count over
/// a dataset) are applied by the callers in [`crate::hvp`].
pub trait Loss<F: Float>: fmt::Debug + Sync {
    fn sample_loss(&self, output: &[Var<F>], target: Target<'_, F>) -> Result<Var<F>, SpectrumError>;

    /// Checks that this loss accepts the kind and width of the given targets.
    fn check_targets(&self, targets: &Targets<F>, output_dim: usize) -> Result<(), SpectrumError>;
}

/// `0.5 · ‖o − y‖²`.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SquaredError;

impl<F: Float> Loss<F> for SquaredError {
    fn sample_loss(&self, output: &[Var<F>], target: Target<'_, F>) -> Result<Var<F>, SpectrumError> {
        let Target::Values(y) = target else {
            return Err(input_error("squared error needs real-valued targets"));
        };
        if y.len() != output.len() {
            return Err(dimension_mismatch(output.len(), y.len()));
        }
        let sum: Var<F> = output.iter().zip(y).map(|(&o, &t)| (o - t).square()).sum();
        Ok(sum * F::lit(0.5))
    }

    fn check_targets(&self, targets: &Targets<F>, output_dim: usize) -> Result<(), SpectrumError> {
        match targets {
            Targets::Values { dim, .. } if *dim == output_dim => Ok(()),
            Targets::Values { dim, .. } => Err(dimension_mismatch(output_dim, *dim)),
            Targets::Classes { .. } => Err(input_error("squared error needs real-valued targets")),
        }
    }
}

/// Softmax cross-entropy with label smoothing.
///
/// With smoothing `s` over `C` classes the target distribution puts `1 − s + s/C` on the
/// label and `s/C` elsewhere, which gives `lse(o) − (1 − s)·o_y − s·mean(o)`.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct CrossEntropy {
    pub smoothing: f64,
}

impl CrossEntropy {
    pub fn new(smoothing: f64) -> Result<Self, SpectrumError> {
        if !(0.0..1.0).contains(&smoothing) {
            return Err(input_error(format!(
                "label smoothing must lie in [0, 1), got {smoothing}"
            )));
        }
        Ok(CrossEntropy { smoothing })
    }
}

/// `log Σ exp(o_c)`, shifted by the largest primal value.
fn log_sum_exp<F: Float>(output: &[Var<F>]) -> Var<F> {
    let shift = output
        .iter()
        .map(|o| o.value())
        .fold(F::neg_infinity(), F::max);
    let sum: Var<F> = output.iter().map(|&o| (o - shift).exp()).sum();
    sum.ln() + shift
}

impl<F: Float> Loss<F> for CrossEntropy {
    fn sample_loss(&self, output: &[Var<F>], target: Target<'_, F>) -> Result<Var<F>, SpectrumError> {
        let Target::Class(label) = target else {
            return Err(input_error("cross-entropy needs class-label targets"));
        };
        if label >= output.len() {
            return Err(input_error(format!(
                "label {label} out of range for {} logits",
                output.len()
            )));
        }
        let lse = log_sum_exp(output);
        let s = F::lit(self.smoothing);
        let nll = lse - output[label] * (F::one() - s);
        if self.smoothing == 0.0 {
            return Ok(nll);
        }
        let mean: Var<F> = output.iter().copied().sum::<Var<F>>() / F::lit(output.len() as f64);
        Ok(nll - mean * s)
    }

    fn check_targets(&self, targets: &Targets<F>, output_dim: usize) -> Result<(), SpectrumError> {
        match targets {
            Targets::Classes { num_classes, .. } if *num_classes <= output_dim => Ok(()),
            Targets::Classes { num_classes, .. } => Err(input_error(format!(
                "{num_classes} classes do not fit in {output_dim} logits"
            ))),
            Targets::Values { .. } => Err(input_error("cross-entropy needs class-label targets")),
        }
    }
}

/// The closed set of loss configuration keys.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LossKind {
    SquaredError,
    CrossEntropy,
}

impl LossKind {
    pub const KEYS: [&'static str; 2] = ["squared-error", "cross-entropy"];

    pub fn key(self) -> &'static str {
        match self {
            LossKind::SquaredError => "squared-error",
            LossKind::CrossEntropy => "cross-entropy",
        }
    }

    /// Constructs the loss registered under this key. `smoothing` only applies to
    /// cross-entropy.
    pub fn build(self, smoothing: f64) -> Result<Criterion, SpectrumError> {
        match self {
            LossKind::SquaredError => Ok(Criterion::SquaredError(SquaredError)),
            LossKind::CrossEntropy => Ok(Criterion::CrossEntropy(CrossEntropy::new(smoothing)?)),
        }
    }
}

impl fmt::Display for LossKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for LossKind {
    type Err = SpectrumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "squared-error" => Ok(LossKind::SquaredError),
            "cross-entropy" => Ok(LossKind::CrossEntropy),
            other => Err(input_error(format!(
                "unknown loss '{other}'; expected one of: {}",
                Self::KEYS.join(", ")
            ))),
        }
    }
}

/// A loss resolved from the registry.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Criterion {
    SquaredError(SquaredError),
    CrossEntropy(CrossEntropy),
}

impl<F: Float> Loss<F> for Criterion {
    fn sample_loss(&self, output: &[Var<F>], target: Target<'_, F>) -> Result<Var<F>, SpectrumError> {
        match self {
            Criterion::SquaredError(l) => l.sample_loss(output, target),
            Criterion::CrossEntropy(l) => l.sample_loss(output, target),
        }
    }

    fn check_targets(&self, targets: &Targets<F>, output_dim: usize) -> Result<(), SpectrumError> {
        match self {
            Criterion::SquaredError(l) => Loss::<F>::check_targets(l, targets, output_dim),
            Criterion::CrossEntropy(l) => Loss::<F>::check_targets(l, targets, output_dim),
        }
    }
}

/// Mean loss and, for classification data, top-1 accuracy in percent.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Evaluation {
    pub loss: f64,
    pub accuracy: Option<f64>,
}

/// Evaluates `model` on every sample of `dataset` without recording.
pub fn evaluate<F, M, L>(model: &M, loss: &L, dataset: &Dataset<F>) -> Result<Evaluation, SpectrumError>
where
    F: Float,
    M: Model<F> + ?Sized,
    L: Loss<F> + ?Sized,
{
    if dataset.is_empty() {
        return Err(input_error("cannot evaluate on an empty dataset"));
    }
    loss.check_targets(dataset.targets(), model.output_dim())?;

    let mut total = 0.0;
    let mut correct = 0usize;
    for (input, target) in dataset.full().samples() {
        let prediction = model.predict(input);
        let output: Vec<Var<F>> = prediction.iter().copied().map(Var::constant).collect();
        total += loss.sample_loss(&output, target)?.value().as_f64();
        if let Target::Class(label) = target {
            if argmax(&prediction) == Some(label) {
                correct += 1;
            }
        }
    }

    let n = dataset.len() as f64;
    let accuracy = match dataset.targets() {
        Targets::Classes { .. } => Some(100.0 * correct as f64 / n),
        Targets::Values { .. } => None,
    };
    Ok(Evaluation {
        loss: total / n,
        accuracy,
    })
}

fn argmax<F: Float>(values: &[F]) -> Option<usize> {
    values
        .iter()
        .enumerate()
        .fold(None, |best: Option<(usize, F)>, (i, &v)| match best {
            Some((_, b)) if b >= v => best,
            _ => Some((i, v)),
        })
        .map(|(i, _)| i)
}
