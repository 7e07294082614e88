//! Krylov-subspace eigen-estimators for symmetric implicit operators.
//!
//! This module holds the configuration and result types shared by the estimators; the
//! iteration itself lives in [`lanczos`].

use faer::Mat;

pub mod lanczos;

/// Which end of the spectrum to estimate.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Which {
    /// The `k` algebraically largest eigenvalues.
    #[default]
    LargestAlgebraic,
    /// The `k` eigenvalues of largest absolute value.
    LargestMagnitude,
}

/// Tuning knobs of the thick-restart Lanczos estimator.
#[derive(Clone, Debug, PartialEq)]
pub struct EigenOptions {
    /// Krylov subspace size. `None` picks `min(n, max(2k + 1, 20))`.
    pub ncv: Option<usize>,
    /// Relative residual tolerance of a Ritz pair. `0.0` means machine precision.
    pub tol: f64,
    /// Restart budget. `None` allows `10 · n` restarts.
    pub max_restarts: Option<usize>,
    pub which: Which,
    /// Seed of the starting vector. `None` draws it from OS entropy.
    pub seed: Option<u64>,
}

impl Default for EigenOptions {
    fn default() -> Self {
        EigenOptions {
            ncv: None,
            tol: 0.0,
            max_restarts: None,
            which: Which::LargestAlgebraic,
            seed: None,
        }
    }
}

impl EigenOptions {
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_which(mut self, which: Which) -> Self {
        self.which = which;
        self
    }

    pub(crate) fn subspace_size(&self, n: usize, k: usize) -> usize {
        self.ncv.unwrap_or_else(|| n.min((2 * k + 1).max(20)))
    }

    pub(crate) fn restart_budget(&self, n: usize) -> usize {
        self.max_restarts.unwrap_or(10 * n)
    }

    pub(crate) fn tolerance(&self) -> f64 {
        if self.tol > 0.0 {
            self.tol
        } else {
            f64::EPSILON
        }
    }
}

/// Converged eigenpairs of a symmetric operator.
#[derive(Clone, Debug)]
pub struct EigenSpectrum {
    /// Eigenvalues in non-increasing order.
    pub values: Vec<f64>,
    /// Unit eigenvectors; column `i` belongs to `values[i]`.
    pub vectors: Mat<f64>,
    /// Number of thick restarts performed.
    pub restarts: usize,
    /// Number of operator applications.
    pub matvecs: usize,
}

/// Threshold below which a Lanczos coefficient is treated as an invariant-subspace
/// breakdown, relative to the norm of the vector it was computed from.
pub(crate) fn breakdown_tolerance() -> f64 {
    64.0 * f64::EPSILON
}
