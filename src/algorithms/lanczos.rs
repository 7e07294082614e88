//! Thick-restart symmetric Lanczos for a few extreme eigenpairs.
//!
//! ** NOTE: We recommend using the high-level [`crate::solvers::estimate_top_eigen`] and
//! [`crate::solvers::estimate_top_eigen_op`] instead. This module is intended for callers
//! that manage their own [`MemStack`].
//!
//! The iteration keeps an explicit orthonormal basis `V` of `m + 1` columns and the
//! projection `T = Vᵀ A V` of size `m × m`. Each new Lanczos vector is reorthogonalised
//! against the whole basis with two passes of classical Gram–Schmidt, so the basis stays
//! orthonormal to working precision and no spurious copies of converged eigenvalues
//! appear. `T` is tridiagonal on the first sweep.
//!
//! When the basis is full, the best Ritz vectors are kept, the residual direction is
//! appended, and the sweep resumes from there (Wu and Simon's thick restart). `T` then
//! has an arrowhead block coupling the kept Ritz values to the residual direction,
//! followed by the usual tridiagonal tail. Memory usage scales as `O(n·m)`.

use super::{EigenOptions, EigenSpectrum, Which, breakdown_tolerance};
use crate::error::{SpectrumError, SpectrumErrorKind, dimension_mismatch, input_error};
use faer::{
    Accum, Mat, MatRef, Par, Side,
    dyn_stack::MemStack,
    linalg::matmul::matmul,
    matrix_free::LinOp,
};
use log::{debug, trace, warn};
use rand::{Rng, SeedableRng, rngs::StdRng};

/// Two passes of classical Gram–Schmidt of `w` against the columns of `basis`.
///
/// Returns the accumulated projection coefficients `Vᵀ w`.
fn orthogonalize(basis: MatRef<'_, f64>, w: &mut Mat<f64>) -> Vec<f64> {
    let cols = basis.ncols();
    let mut total = vec![0.0; cols];
    if cols == 0 {
        return total;
    }
    let mut h = Mat::<f64>::zeros(cols, 1);
    for _ in 0..2 {
        matmul(
            h.as_mut(),
            Accum::Replace,
            basis.transpose(),
            w.as_ref(),
            1.0,
            Par::Seq,
        );
        matmul(w.as_mut(), Accum::Add, basis, h.as_ref(), -1.0, Par::Seq);
        for (t, i) in total.iter_mut().zip(0..cols) {
            *t += h[(i, 0)];
        }
    }
    total
}

fn random_unit(n: usize, rng: &mut StdRng) -> Mat<f64> {
    let entries: Vec<f64> = (0..n).map(|_| rng.random_range(-1.0..1.0)).collect();
    let norm = entries.iter().map(|x| x * x).sum::<f64>().sqrt();
    Mat::from_fn(n, 1, |i, _| entries[i] / norm)
}

/// A random unit vector orthogonal to the first `cols` basis columns, or `None` if those
/// columns already span the space to working precision.
fn fresh_direction(basis: &Mat<f64>, cols: usize, rng: &mut StdRng) -> Option<Mat<f64>> {
    let mut w = random_unit(basis.nrows(), rng);
    orthogonalize(basis.as_ref().get(.., 0..cols), &mut w);
    let norm = w.as_ref().norm_l2();
    if norm <= 1e-8 {
        return None;
    }
    Some(Mat::from_fn(w.nrows(), 1, |i, _| w[(i, 0)] / norm))
}

fn store_column(basis: &mut Mat<f64>, col: usize, w: &Mat<f64>, scale: f64) {
    for i in 0..basis.nrows() {
        basis[(i, col)] = w[(i, 0)] / scale;
    }
}

/// Indices of the Ritz values, best first.
fn rank(values: &[f64], which: Which) -> Vec<usize> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    match which {
        Which::LargestAlgebraic => order.sort_by(|&a, &b| values[b].total_cmp(&values[a])),
        Which::LargestMagnitude => {
            order.sort_by(|&a, &b| values[b].abs().total_cmp(&values[a].abs()))
        }
    }
    order
}

/// `V[:, 0..dim] · U[:, selected]`.
fn ritz_vectors(basis: &Mat<f64>, dim: usize, u: MatRef<'_, f64>, selected: &[usize]) -> Mat<f64> {
    let u_sel = Mat::from_fn(dim, selected.len(), |i, j| u[(i, selected[j])]);
    let mut out = Mat::<f64>::zeros(basis.nrows(), selected.len());
    matmul(
        out.as_mut(),
        Accum::Replace,
        basis.as_ref().get(.., 0..dim),
        u_sel.as_ref(),
        1.0,
        Par::Seq,
    );
    out
}

/// Computes the `k` wanted eigenpairs of the symmetric operator `operator`.
///
/// # Arguments
/// * `operator`: A real symmetric linear operator implementing [`faer::matrix_free::LinOp`].
///   Symmetry is not checked.
/// * `k`: Number of eigenpairs, `1 <= k < n`.
/// * `options`: Subspace size, tolerance, restart budget, selection rule and seed.
/// * `stack`: Scratch space for one application of `operator` to a single column.
///
/// # Returns
/// The wanted eigenvalues in non-increasing order with matching unit eigenvectors.
///
/// # Errors
/// * `DimensionMismatch` if the operator is not square.
/// * `InvalidEigenCount` if `k == 0` or `k >= n`.
/// * `InputError` if the subspace size is not in `k < ncv <= n`.
/// * `NoConvergence` if the restart budget runs out first.
/// * `EvdError` if the projected eigenproblem fails.
pub fn thick_restart_lanczos(
    operator: &impl LinOp<f64>,
    k: usize,
    options: &EigenOptions,
    stack: &mut MemStack,
) -> Result<EigenSpectrum, SpectrumError> {
    let n = operator.nrows();
    if operator.ncols() != n {
        return Err(dimension_mismatch(n, operator.ncols()));
    }
    if k == 0 || k >= n {
        return Err(SpectrumErrorKind::InvalidEigenCount {
            requested: k,
            dimension: n,
        }
        .into());
    }
    let m = options.subspace_size(n, k);
    if m <= k || m > n {
        return Err(input_error(format!(
            "the Krylov subspace size must satisfy k < ncv <= n (k = {k}, ncv = {m}, n = {n})"
        )));
    }
    let tol = options.tolerance();
    let max_restarts = options.restart_budget(n);
    let floor = f64::EPSILON.powf(2.0 / 3.0);

    let mut rng = match options.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };

    let mut basis = Mat::<f64>::zeros(n, m + 1);
    let mut t = Mat::<f64>::zeros(m, m);
    let mut w = Mat::<f64>::zeros(n, 1);

    let start = random_unit(n, &mut rng);
    store_column(&mut basis, 0, &start, 1.0);

    let mut first = 0;
    let mut restarts = 0;
    let mut matvecs = 0;

    loop {
        // Extend the basis from column `first` up to `m`.
        let mut dim = m;
        let mut residual_beta = 0.0;
        for j in first..m {
            operator.apply(
                w.as_mut(),
                basis.as_ref().get(.., j..j + 1),
                Par::Seq,
                stack,
            );
            matvecs += 1;
            let applied_norm = w.as_ref().norm_l2();

            let h = orthogonalize(basis.as_ref().get(.., 0..j + 1), &mut w);
            t[(j, j)] = h[j];
            let beta = w.as_ref().norm_l2();
            trace!("lanczos step {j}: alpha = {:.6e}, beta = {beta:.6e}", h[j]);

            if j + 1 == n {
                // The basis spans the whole space, so the residual is zero.
                dim = n;
                break;
            }
            if beta > breakdown_tolerance() * applied_norm {
                if j + 1 < m {
                    t[(j, j + 1)] = beta;
                    t[(j + 1, j)] = beta;
                    store_column(&mut basis, j + 1, &w, beta);
                } else {
                    residual_beta = beta;
                    store_column(&mut basis, m, &w, beta);
                }
                continue;
            }

            // Invariant subspace: continue with an uncoupled direction.
            debug!("lanczos breakdown at step {j} (beta = {beta:.3e})");
            match fresh_direction(&basis, j + 1, &mut rng) {
                Some(v) if j + 1 < m => store_column(&mut basis, j + 1, &v, 1.0),
                Some(v) => store_column(&mut basis, m, &v, 1.0),
                None => {
                    if j + 1 < m {
                        warn!("could not extend the Krylov basis beyond {} vectors", j + 1);
                    }
                    dim = j + 1;
                    break;
                }
            }
        }

        let evd = t
            .as_ref()
            .get(0..dim, 0..dim)
            .self_adjoint_eigen(Side::Lower)
            .map_err(|e| SpectrumError::from(SpectrumErrorKind::EvdError(e)))?;
        let u = evd.U();
        let s = evd.S();
        let theta: Vec<f64> = (0..dim).map(|i| s[i]).collect();
        let order = rank(&theta, options.which);

        let residual = |i: usize| (residual_beta * u[(dim - 1, i)]).abs();
        let converged = order
            .iter()
            .take(k)
            .filter(|&&i| residual(i) <= tol * theta[i].abs().max(floor))
            .count();

        if dim >= k && converged == k {
            let mut wanted: Vec<usize> = order[..k].to_vec();
            wanted.sort_by(|&a, &b| theta[b].total_cmp(&theta[a]));
            let vectors = ritz_vectors(&basis, dim, u, &wanted);
            let values = wanted.iter().map(|&i| theta[i]).collect();
            debug!("lanczos converged after {restarts} restarts and {matvecs} products");
            return Ok(EigenSpectrum {
                values,
                vectors,
                restarts,
                matvecs,
            });
        }

        if dim < m || restarts >= max_restarts {
            return Err(SpectrumErrorKind::NoConvergence {
                requested: k,
                converged,
                restarts,
            }
            .into());
        }

        // Thick restart: keep the best Ritz vectors and the residual direction.
        let keep = (k + (m - k) / 2).min(m - 1);
        let selected = &order[..keep];
        let ritz = ritz_vectors(&basis, m, u, selected);
        for j in 0..keep {
            for i in 0..n {
                basis[(i, j)] = ritz[(i, j)];
            }
        }
        for i in 0..n {
            basis[(i, keep)] = basis[(i, m)];
        }

        t = Mat::zeros(m, m);
        for (j, &sel) in selected.iter().enumerate() {
            let coupling = residual_beta * u[(m - 1, sel)];
            t[(j, j)] = theta[sel];
            t[(j, keep)] = coupling;
            t[(keep, j)] = coupling;
        }

        restarts += 1;
        first = keep;
        debug!(
            "lanczos restart {restarts}: {converged}/{k} converged, leading ritz value {:.6e}",
            theta[order[0]]
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use faer::dyn_stack::MemBuffer;

    fn run(a: &Mat<f64>, k: usize, options: &EigenOptions) -> Result<EigenSpectrum, SpectrumError> {
        let op = a.as_ref();
        let mut mem = MemBuffer::new(op.apply_scratch(1, Par::Seq));
        let stack = MemStack::new(&mut mem);
        thick_restart_lanczos(&op, k, options, stack)
    }

    fn diagonal(values: &[f64]) -> Mat<f64> {
        Mat::from_fn(values.len(), values.len(), |i, j| if i == j { values[i] } else { 0.0 })
    }

    #[test]
    fn orthogonalize_removes_basis_components() {
        let basis = Mat::from_fn(3, 2, |i, j| if i == j { 1.0 } else { 0.0 });
        let mut w = Mat::from_fn(3, 1, |i, _| (i + 1) as f64);
        let h = orthogonalize(basis.as_ref(), &mut w);
        assert_eq!(h, vec![1.0, 2.0]);
        assert_eq!((w[(0, 0)], w[(1, 0)], w[(2, 0)]), (0.0, 0.0, 3.0));
    }

    #[test]
    fn restarts_on_a_large_diagonal() {
        // 200 distinct eigenvalues with a 20-vector subspace forces several restarts.
        let values: Vec<f64> = (1..=200).map(|i| i as f64).collect();
        let a = diagonal(&values);
        let options = EigenOptions {
            tol: 1e-10,
            seed: Some(3),
            ..EigenOptions::default()
        };
        let spectrum = run(&a, 3, &options).unwrap();
        assert!(spectrum.restarts > 0);
        for (got, want) in spectrum.values.iter().zip([200.0, 199.0, 198.0]) {
            assert!((got - want).abs() < 1e-8, "{got} vs {want}");
        }
        assert!(spectrum.matvecs >= 20);
    }

    #[test]
    fn small_operator_converges_in_one_sweep() {
        let a = diagonal(&[3.0, -7.0, 1.0, 2.0]);
        let options = EigenOptions::default().with_seed(4);
        let spectrum = run(&a, 2, &options).unwrap();
        assert_eq!(spectrum.restarts, 0);
        assert!((spectrum.values[0] - 3.0).abs() < 1e-12);
        assert!((spectrum.values[1] - 2.0).abs() < 1e-12);

        let lm = run(&a, 2, &options.clone().with_which(Which::LargestMagnitude)).unwrap();
        assert!((lm.values[0] - 3.0).abs() < 1e-12);
        assert!((lm.values[1] + 7.0).abs() < 1e-12);
    }

    #[test]
    fn subspace_size_must_exceed_k() {
        let a = diagonal(&[1.0, 2.0, 3.0, 4.0]);
        let options = EigenOptions {
            ncv: Some(2),
            ..EigenOptions::default()
        };
        let err = run(&a, 2, &options).unwrap_err();
        assert!(matches!(err.kind(), SpectrumErrorKind::InputError(_)));
    }
}
