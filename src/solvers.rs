//! This module provides the high-level API: top-k eigenpairs of an implicit symmetric
//! operator, and the Hessian spectrum of a model's loss built on top of it.

use crate::{
    algorithms::{EigenOptions, EigenSpectrum, lanczos::thick_restart_lanczos},
    autodiff::Float,
    error::SpectrumError,
    hvp::{CurvatureSource, HvpOperator},
    loss::Loss,
    model::Model,
    operator::FnOperator,
};
use faer::{
    Par,
    dyn_stack::{MemBuffer, MemStack},
    matrix_free::LinOp,
};
use log::info;

/// Computes the `k` largest eigenpairs of the symmetric operator defined by `matvec`.
///
/// # Arguments
/// * `matvec`: Computes `A x` for a vector `x` of length `dimension`.
/// * `dimension`: Side length of `A`.
/// * `k`: Number of eigenpairs, `1 <= k < dimension`.
/// * `options`: Estimator settings; see [`EigenOptions`].
///
/// # Returns
/// The eigenvalues in non-increasing order and the matching unit eigenvectors as the
/// columns of a `dimension × k` matrix.
pub fn estimate_top_eigen<Op>(
    matvec: Op,
    dimension: usize,
    k: usize,
    options: &EigenOptions,
) -> Result<EigenSpectrum, SpectrumError>
where
    Op: Fn(&[f64]) -> Vec<f64> + Sync,
{
    estimate_top_eigen_op(&FnOperator::new(dimension, matvec), k, options)
}

/// Computes the `k` wanted eigenpairs of any symmetric [`LinOp`].
///
/// Allocates the scratch space the operator asks for and runs the estimator
/// sequentially.
pub fn estimate_top_eigen_op<O>(
    operator: &O,
    k: usize,
    options: &EigenOptions,
) -> Result<EigenSpectrum, SpectrumError>
where
    O: LinOp<f64>,
{
    let mut mem = MemBuffer::new(operator.apply_scratch(1, Par::Seq));
    let stack = MemStack::new(&mut mem);
    thick_restart_lanczos(operator, k, options, stack)
}

/// Top-`k` eigenpairs of the Hessian of `loss` over `source` with respect to the
/// parameters of `model`.
///
/// Model parameters are not modified. Any failure of an individual Hessian-vector
/// product is reported in preference to the estimator's own outcome.
pub fn hessian_eigenvalues<F, M, L>(
    model: &M,
    loss: &L,
    source: CurvatureSource<'_, F>,
    k: usize,
    options: &EigenOptions,
) -> Result<EigenSpectrum, SpectrumError>
where
    F: Float,
    M: Model<F> + ?Sized,
    L: Loss<F> + ?Sized,
{
    let operator = HvpOperator::new(model, loss, source)?;
    let result = estimate_top_eigen_op(&operator, k, options);
    if let Some(err) = operator.take_error() {
        return Err(err);
    }
    let spectrum = result?;
    info!(
        "hessian top-{k}: {:?} ({} products, {} restarts)",
        spectrum.values, spectrum.matvecs, spectrum.restarts
    );
    Ok(spectrum)
}

/// Largest Hessian eigenvalue of `loss` over `source`.
pub fn sharpness<F, M, L>(
    model: &M,
    loss: &L,
    source: CurvatureSource<'_, F>,
    options: &EigenOptions,
) -> Result<f64, SpectrumError>
where
    F: Float,
    M: Model<F> + ?Sized,
    L: Loss<F> + ?Sized,
{
    let spectrum = hessian_eigenvalues(model, loss, source, 1, options)?;
    Ok(spectrum.values[0])
}
