//! Exact Hessian-vector products of a model's loss with respect to its parameters.
//!
//! Every product here is computed forward-over-reverse: the forward pass is recorded with
//! each parameter entered as the dual number `θ_i + v_i·ε`, and one adjoint sweep then
//! produces `∇L + (H·v)·ε` per parameter. The result is the same exact second derivative
//! that differentiating `∇L · v` a second time would give, but it needs only one tape and
//! never materialises `H`. Model parameters are read, never written.

use std::fmt;
use std::sync::Mutex;

use faer::dyn_stack::{MemStack, StackReq};
use faer::matrix_free::LinOp;
use faer::{MatMut, MatRef, Par};
use log::trace;

use crate::autodiff::{Dual, Float, Var, record};
use crate::data::{Batch, Dataset, Target};
use crate::error::{SpectrumError, dimension_mismatch, input_error};
use crate::loss::Loss;
use crate::model::Model;

/// Loss value, gradient and Hessian-vector product from one recorded pass.
struct Pass<F: Float> {
    loss: F,
    gradient: Vec<F>,
    hvp: Vec<F>,
}

/// Records `scale · Σ loss(model(x), y)` over `samples` with parameter tangents `direction`
/// and runs the adjoint sweep.
fn differentiate<'d, F, M, L, I>(
    model: &M,
    loss: &L,
    samples: I,
    scale: F,
    direction: &[F],
) -> Result<Pass<F>, SpectrumError>
where
    F: Float,
    M: Model<F> + ?Sized,
    L: Loss<F> + ?Sized,
    I: Iterator<Item = (&'d [F], Target<'d, F>)>,
{
    let theta = model.parameters().flatten();
    debug_assert_eq!(theta.len(), direction.len());

    let (tape, recorded) = record::<F, _, _>(|| -> Result<_, SpectrumError> {
        let params: Vec<Var<F>> = theta
            .iter()
            .zip(direction)
            .map(|(&t, &v)| Var::variable(Dual::new(t, v)))
            .collect();
        let mut total = Var::constant(F::zero());
        for (input, target) in samples {
            let output = model.forward(&params, input);
            total += loss.sample_loss(&output, target)?;
        }
        Ok((params, total * scale))
    });
    let (params, objective) = recorded?;

    let mut pass = Pass {
        loss: objective.value(),
        gradient: vec![F::zero(); theta.len()],
        hvp: vec![F::zero(); theta.len()],
    };
    // A loss that does not depend on any parameter has zero derivatives.
    if objective.is_constant() {
        return Ok(pass);
    }
    let adjoints = tape.reverse(objective.index());
    for (i, param) in params.iter().enumerate() {
        let adjoint = adjoints[param.index() as usize];
        pass.gradient[i] = adjoint.re;
        pass.hvp[i] = adjoint.eps;
    }
    trace!(
        "recorded pass over {} tape slots for {} parameters",
        tape.num_variables(),
        theta.len()
    );
    Ok(pass)
}

fn check_compatible<F, M, L>(model: &M, loss: &L, dataset: &Dataset<F>) -> Result<(), SpectrumError>
where
    F: Float,
    M: Model<F> + ?Sized,
    L: Loss<F> + ?Sized,
{
    if dataset.is_empty() {
        return Err(input_error("the dataset is empty"));
    }
    if dataset.input_dim() != model.input_dim() {
        return Err(input_error(format!(
            "the model expects inputs of width {} but the data has width {}",
            model.input_dim(),
            dataset.input_dim()
        )));
    }
    loss.check_targets(dataset.targets(), model.output_dim())
}

fn check_direction<F: Float, M: Model<F> + ?Sized>(model: &M, direction: &[F]) -> Result<(), SpectrumError> {
    let p = model.parameters().len();
    if direction.len() != p {
        return Err(dimension_mismatch(p, direction.len()));
    }
    Ok(())
}

fn check_batch<F, M, L>(model: &M, loss: &L, batch: &Batch<'_, F>) -> Result<(), SpectrumError>
where
    F: Float,
    M: Model<F> + ?Sized,
    L: Loss<F> + ?Sized,
{
    if batch.is_empty() {
        return Err(input_error("the batch is empty"));
    }
    check_compatible(model, loss, batch.dataset())
}

fn check_physical_batch_size(physical_batch_size: usize) -> Result<(), SpectrumError> {
    if physical_batch_size == 0 {
        return Err(input_error("the physical batch size must be positive"));
    }
    Ok(())
}

/// Hessian-vector product of the batch-mean loss along `direction`.
///
/// # Errors
/// `DimensionMismatch` if `direction` does not have one entry per parameter; an input
/// error for an empty batch or data the model or loss cannot consume.
pub fn compute_hvp<F, M, L>(
    model: &M,
    loss: &L,
    batch: &Batch<'_, F>,
    direction: &[F],
) -> Result<Vec<F>, SpectrumError>
where
    F: Float,
    M: Model<F> + ?Sized,
    L: Loss<F> + ?Sized,
{
    check_direction(model, direction)?;
    check_batch(model, loss, batch)?;
    let scale = F::one() / F::lit(batch.len() as f64);
    Ok(differentiate(model, loss, batch.samples(), scale, direction)?.hvp)
}

/// Hessian-vector product of the dataset-mean loss along `direction`.
///
/// The dataset is walked in order in chunks of `physical_batch_size`. Each chunk's summed
/// loss is divided by the total sample count before differentiation and the per-chunk
/// products are added up, so the result does not depend on the chunk size.
pub fn compute_dataset_hvp<F, M, L>(
    model: &M,
    loss: &L,
    dataset: &Dataset<F>,
    direction: &[F],
    physical_batch_size: usize,
) -> Result<Vec<F>, SpectrumError>
where
    F: Float,
    M: Model<F> + ?Sized,
    L: Loss<F> + ?Sized,
{
    check_direction(model, direction)?;
    check_physical_batch_size(physical_batch_size)?;
    check_compatible(model, loss, dataset)?;

    let scale = F::one() / F::lit(dataset.len() as f64);
    let mut hvp = vec![F::zero(); direction.len()];
    for batch in dataset.batches(physical_batch_size) {
        let pass = differentiate(model, loss, batch.samples(), scale, direction)?;
        for (acc, h) in hvp.iter_mut().zip(pass.hvp) {
            *acc = *acc + h;
        }
    }
    Ok(hvp)
}

/// Batch-mean loss and its gradient.
pub fn compute_gradient<F, M, L>(model: &M, loss: &L, batch: &Batch<'_, F>) -> Result<(F, Vec<F>), SpectrumError>
where
    F: Float,
    M: Model<F> + ?Sized,
    L: Loss<F> + ?Sized,
{
    check_batch(model, loss, batch)?;
    let zeros = vec![F::zero(); model.parameters().len()];
    let scale = F::one() / F::lit(batch.len() as f64);
    let pass = differentiate(model, loss, batch.samples(), scale, &zeros)?;
    Ok((pass.loss, pass.gradient))
}

/// Dataset-mean loss and its gradient, accumulated over chunks of `physical_batch_size`.
pub fn compute_dataset_gradient<F, M, L>(
    model: &M,
    loss: &L,
    dataset: &Dataset<F>,
    physical_batch_size: usize,
) -> Result<(F, Vec<F>), SpectrumError>
where
    F: Float,
    M: Model<F> + ?Sized,
    L: Loss<F> + ?Sized,
{
    check_physical_batch_size(physical_batch_size)?;
    check_compatible(model, loss, dataset)?;

    let p = model.parameters().len();
    let zeros = vec![F::zero(); p];
    let scale = F::one() / F::lit(dataset.len() as f64);
    let mut total = F::zero();
    let mut gradient = vec![F::zero(); p];
    for batch in dataset.batches(physical_batch_size) {
        let pass = differentiate(model, loss, batch.samples(), scale, &zeros)?;
        total = total + pass.loss;
        for (acc, g) in gradient.iter_mut().zip(pass.gradient) {
            *acc = *acc + g;
        }
    }
    Ok((total, gradient))
}

/// The data a Hessian is taken over.
#[derive(Clone, Debug)]
pub enum CurvatureSource<'a, F: Float> {
    /// Mean loss over a single batch.
    Batch(Batch<'a, F>),
    /// Mean loss over a whole dataset, evaluated in chunks.
    Dataset {
        dataset: &'a Dataset<F>,
        physical_batch_size: usize,
    },
}

/// The Hessian of a model's loss as an implicit symmetric operator.
///
/// Solvers drive it through [`LinOp<f64>`]; each applied column is converted to the
/// model's precision, multiplied, and converted back. `apply` cannot return an error, so
/// a failing product zero-fills its output and parks the error until [`Self::take_error`]
/// is called.
pub struct HvpOperator<'a, F, M, L>
where
    F: Float,
    M: Model<F> + ?Sized,
    L: Loss<F> + ?Sized,
{
    model: &'a M,
    loss: &'a L,
    source: CurvatureSource<'a, F>,
    dim: usize,
    error: Mutex<Option<SpectrumError>>,
}

impl<'a, F, M, L> HvpOperator<'a, F, M, L>
where
    F: Float,
    M: Model<F> + ?Sized,
    L: Loss<F> + ?Sized,
{
    /// Validates the source against the model and loss up front, so that a well-formed
    /// operator can only fail on a malformed vector.
    pub fn new(model: &'a M, loss: &'a L, source: CurvatureSource<'a, F>) -> Result<Self, SpectrumError> {
        match &source {
            CurvatureSource::Batch(batch) => check_batch(model, loss, batch)?,
            CurvatureSource::Dataset {
                dataset,
                physical_batch_size,
            } => {
                check_physical_batch_size(*physical_batch_size)?;
                check_compatible(model, loss, dataset)?;
            }
        }
        Ok(HvpOperator {
            model,
            loss,
            source,
            dim: model.parameters().len(),
            error: Mutex::new(None),
        })
    }

    /// Number of parameters, the side length of the Hessian.
    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn apply_vec(&self, direction: &[F]) -> Result<Vec<F>, SpectrumError> {
        match &self.source {
            CurvatureSource::Batch(batch) => compute_hvp(self.model, self.loss, batch, direction),
            CurvatureSource::Dataset {
                dataset,
                physical_batch_size,
            } => compute_dataset_hvp(self.model, self.loss, dataset, direction, *physical_batch_size),
        }
    }

    /// Returns the first error raised inside [`LinOp::apply`], if any.
    pub fn take_error(&self) -> Option<SpectrumError> {
        match self.error.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }

    fn record_error(&self, err: SpectrumError) {
        let mut slot = match self.error.lock() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        };
        if slot.is_none() {
            *slot = Some(err);
        }
    }
}

impl<F, M, L> fmt::Debug for HvpOperator<'_, F, M, L>
where
    F: Float,
    M: Model<F> + ?Sized,
    L: Loss<F> + ?Sized,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let source = match &self.source {
            CurvatureSource::Batch(batch) => format!("batch of {}", batch.len()),
            CurvatureSource::Dataset {
                dataset,
                physical_batch_size,
            } => format!("dataset of {} in chunks of {}", dataset.len(), physical_batch_size),
        };
        f.debug_struct("HvpOperator")
            .field("dim", &self.dim)
            .field("model", &self.model)
            .field("loss", &self.loss)
            .field("source", &source)
            .finish()
    }
}

impl<F, M, L> LinOp<f64> for HvpOperator<'_, F, M, L>
where
    F: Float,
    M: Model<F> + ?Sized,
    L: Loss<F> + ?Sized,
{
    fn apply_scratch(&self, _rhs_ncols: usize, _par: Par) -> StackReq {
        StackReq::empty()
    }

    fn nrows(&self) -> usize {
        self.dim
    }

    fn ncols(&self) -> usize {
        self.dim
    }

    fn apply(&self, mut out: MatMut<'_, f64>, rhs: MatRef<'_, f64>, _par: Par, _stack: &mut MemStack) {
        for j in 0..rhs.ncols() {
            let direction: Vec<F> = (0..rhs.nrows()).map(|i| F::lit(rhs[(i, j)])).collect();
            match self.apply_vec(&direction) {
                Ok(product) => {
                    for (i, value) in product.into_iter().enumerate() {
                        out[(i, j)] = value.as_f64();
                    }
                }
                Err(err) => {
                    for i in 0..out.nrows() {
                        out[(i, j)] = 0.0;
                    }
                    self.record_error(err);
                }
            }
        }
    }

    fn conj_apply(&self, out: MatMut<'_, f64>, rhs: MatRef<'_, f64>, par: Par, stack: &mut MemStack) {
        // Real symmetric.
        self.apply(out, rhs, par, stack);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Targets;
    use crate::loss::SquaredError;
    use crate::model::{Activation, Mlp};

    fn line_fit() -> (Mlp<f64>, Dataset<f64>) {
        let mut mlp = Mlp::zeros(&[1, 1], Activation::Identity).unwrap();
        mlp.parameters_mut().assign_flat(&[0.5, -0.25]).unwrap();
        let dataset = Dataset::new(
            vec![1.0, 2.0, 3.0],
            1,
            Targets::Values {
                data: vec![1.0, 0.0, 2.0],
                dim: 1,
            },
        )
        .unwrap();
        (mlp, dataset)
    }

    #[test]
    fn linear_least_squares_hessian() {
        // L = mean 0.5 (w x + b - y)^2, H = mean [[x^2, x], [x, 1]] = [[14/3, 2], [2, 1]]
        let (mlp, dataset) = line_fit();
        let full = dataset.full();
        let e0 = compute_hvp(&mlp, &SquaredError, &full, &[1.0, 0.0]).unwrap();
        let e1 = compute_hvp(&mlp, &SquaredError, &full, &[0.0, 1.0]).unwrap();
        assert!((e0[0] - 14.0 / 3.0).abs() < 1e-12);
        assert!((e0[1] - 2.0).abs() < 1e-12);
        assert!((e1[0] - 2.0).abs() < 1e-12);
        assert!((e1[1] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn gradient_matches_closed_form() {
        let (mlp, dataset) = line_fit();
        let (loss, grad) = compute_gradient(&mlp, &SquaredError, &dataset.full()).unwrap();
        let residuals: Vec<f64> = [(1.0, 1.0), (2.0, 0.0), (3.0, 2.0)]
            .iter()
            .map(|(x, y)| 0.5 * x - 0.25 - y)
            .collect();
        let expected_loss = residuals.iter().map(|r| 0.5 * r * r).sum::<f64>() / 3.0;
        let gw = residuals.iter().zip([1.0, 2.0, 3.0]).map(|(r, x)| r * x).sum::<f64>() / 3.0;
        let gb = residuals.iter().sum::<f64>() / 3.0;
        assert!((loss - expected_loss).abs() < 1e-12);
        assert!((grad[0] - gw).abs() < 1e-12);
        assert!((grad[1] - gb).abs() < 1e-12);

        let (dloss, dgrad) = compute_dataset_gradient(&mlp, &SquaredError, &dataset, 2).unwrap();
        assert!((dloss - loss).abs() < 1e-12);
        assert!((dgrad[0] - gw).abs() < 1e-12);
    }

    #[test]
    fn wrong_direction_length_is_rejected() {
        let (mlp, dataset) = line_fit();
        let err = compute_hvp(&mlp, &SquaredError, &dataset.full(), &[1.0]).unwrap_err();
        assert_eq!(err, dimension_mismatch(2, 1));
        let err = compute_dataset_hvp(&mlp, &SquaredError, &dataset, &[1.0, 0.0, 0.0], 1).unwrap_err();
        assert_eq!(err, dimension_mismatch(2, 3));
        assert!(compute_dataset_hvp(&mlp, &SquaredError, &dataset, &[1.0, 0.0], 0).is_err());
    }

    #[test]
    fn operator_parks_errors_from_apply() {
        let (mlp, dataset) = line_fit();
        let op = HvpOperator::new(&mlp, &SquaredError, CurvatureSource::Batch(dataset.full())).unwrap();
        assert_eq!(op.dim(), 2);
        assert!(op.take_error().is_none());

        op.record_error(dimension_mismatch(2, 3));
        op.record_error(input_error("second"));
        assert_eq!(op.take_error(), Some(dimension_mismatch(2, 3)));
        assert!(op.take_error().is_none());
    }
}
