//! Integration test suite for the Hessian-vector-product operator and the Hessian spectrum.
//!
//! # Test Methodology
//!
//! Products are validated against ground truths that do not depend on the automatic
//! differentiation engine:
//! 1.  **Explicit Hessians:** a linear model under squared error has the closed-form
//!     Hessian `mean [x; 1][x; 1]ᵀ`.
//! 2.  **Finite differences:** for a nonlinear network, `H e_i` is compared with a central
//!     difference of the gradient along `e_i`.
//! 3.  **Dense eigendecomposition:** the Hessian assembled column by column from products
//!     gives the reference spectrum for the Lanczos estimate.

use anyhow::{Result, anyhow, ensure};
use faer::{
    Mat, Par, Side,
    dyn_stack::{MemBuffer, MemStack},
    matrix_free::LinOp,
};
use hessian_lanczos::{
    EigenOptions, SpectrumErrorKind, hessian_eigenvalues, sharpness,
    autodiff::Float,
    data::{Dataset, Targets},
    hvp::{CurvatureSource, HvpOperator, compute_dataset_gradient, compute_dataset_hvp, compute_hvp},
    loss::{CrossEntropy, Loss, SquaredError},
    model::{Activation, Mlp, Model},
};
use rand::{Rng, SeedableRng, rngs::StdRng};

/// A 4-4-4-2 `tanh` network (50 parameters) and a two-class dataset.
fn network<F: Float>() -> Result<(Mlp<F>, Dataset<F>)> {
    let mut rng = StdRng::seed_from_u64(42);
    let model = Mlp::new(&[4, 4, 4, 2], Activation::Tanh, &mut rng)?;
    let data = Dataset::synthetic_classification(24, 4, 2, 0.5, &mut rng)?;
    Ok((model, data))
}

fn criterion() -> CrossEntropy {
    CrossEntropy { smoothing: 0.1 }
}

fn one_hot(n: usize, i: usize) -> Vec<f64> {
    (0..n).map(|j| if j == i { 1.0 } else { 0.0 }).collect()
}

fn max_abs_diff(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y).abs()).fold(0.0, f64::max)
}

/// The full Hessian, one product per column.
fn assemble_hessian<L: Loss<f64>>(model: &Mlp<f64>, loss: &L, data: &Dataset<f64>) -> Result<Mat<f64>> {
    let p = model.parameters().len();
    let mut h = Mat::zeros(p, p);
    for j in 0..p {
        let column = compute_dataset_hvp(model, loss, data, &one_hot(p, j), 7)?;
        for (i, value) in column.into_iter().enumerate() {
            h[(i, j)] = value;
        }
    }
    Ok(h)
}

/// A macro to generate the boilerplate for each finite-difference check.
///
/// Compares `H e_i` of the 50-parameter network with
/// `(∇L(θ + h e_i) − ∇L(θ − h e_i)) / 2h`.
macro_rules! generate_finite_difference_test {
    ($test_name:ident, $index:expr) => {
        #[test]
        fn $test_name() -> Result<()> {
            let (model, data) = network::<f64>()?;
            let loss = criterion();
            let p = model.parameters().len();
            ensure!(p == 50, "expected 50 parameters, got {p}");

            let hv = compute_dataset_hvp(&model, &loss, &data, &one_hot(p, $index), 8)?;

            let step = 1e-5;
            let theta = model.parameters().flatten();
            let mut shifted = model.clone();
            let mut plus = theta.clone();
            plus[$index] += step;
            shifted.parameters_mut().assign_flat(&plus)?;
            let (_, g_plus) = compute_dataset_gradient(&shifted, &loss, &data, 8)?;
            let mut minus = theta.clone();
            minus[$index] -= step;
            shifted.parameters_mut().assign_flat(&minus)?;
            let (_, g_minus) = compute_dataset_gradient(&shifted, &loss, &data, 8)?;

            let fd: Vec<f64> = g_plus
                .iter()
                .zip(&g_minus)
                .map(|(a, b)| (a - b) / (2.0 * step))
                .collect();
            let err = max_abs_diff(&hv, &fd);
            ensure!(err < 1e-6, "H e_{} differs from finite differences by {err}", $index);
            Ok(())
        }
    };
}

// First-layer weight, hidden weight, hidden bias, output weight.
generate_finite_difference_test!(test_finite_difference_first_layer_weight, 7);
generate_finite_difference_test!(test_finite_difference_hidden_weight, 22);
generate_finite_difference_test!(test_finite_difference_hidden_bias, 37);
generate_finite_difference_test!(test_finite_difference_output_weight, 45);

#[test]
fn test_linear_least_squares_matches_explicit_hessian() -> Result<()> {
    let mut rng = StdRng::seed_from_u64(3);
    let data = Dataset::<f64>::synthetic_regression(20, 3, 1, 0.1, &mut rng)?;
    let model = Mlp::<f64>::new(&[3, 1], Activation::Identity, &mut rng)?;

    // H = mean [x; 1][x; 1]^T, with parameters ordered (w0, w1, w2, b).
    let mut expected = Mat::<f64>::zeros(4, 4);
    for i in 0..data.len() {
        let mut z = data.input(i).to_vec();
        z.push(1.0);
        for r in 0..4 {
            for c in 0..4 {
                expected[(r, c)] += z[r] * z[c] / data.len() as f64;
            }
        }
    }

    let full = data.full();
    for j in 0..4 {
        let column = compute_hvp(&model, &SquaredError, &full, &one_hot(4, j))?;
        for (i, value) in column.iter().enumerate() {
            ensure!(
                (value - expected[(i, j)]).abs() < 1e-12,
                "H[{i}, {j}] = {value}, expected {}",
                expected[(i, j)]
            );
        }
    }

    let evd = expected
        .as_ref()
        .self_adjoint_eigen(Side::Upper)
        .map_err(|e| anyhow!("EVD failed: {:?}", e))?;
    let top = evd.S()[3];
    let estimate = sharpness(
        &model,
        &SquaredError,
        CurvatureSource::Batch(full),
        &EigenOptions::default().with_seed(0),
    )?;
    ensure!((estimate - top).abs() < 1e-10, "sharpness {estimate}, expected {top}");
    Ok(())
}

#[test]
fn test_dataset_hvp_does_not_depend_on_physical_batch_size() -> Result<()> {
    let (model, data) = network::<f64>()?;
    let loss = criterion();
    let mut rng = StdRng::seed_from_u64(5);
    let v: Vec<f64> = (0..50).map(|_| rng.random_range(-1.0..1.0)).collect();

    let reference = compute_hvp(&model, &loss, &data.full(), &v)?;
    for physical_batch_size in [1, 5, 24, 1000] {
        let hv = compute_dataset_hvp(&model, &loss, &data, &v, physical_batch_size)?;
        let err = max_abs_diff(&hv, &reference);
        ensure!(
            err < 1e-12,
            "physical batch size {physical_batch_size} changed the product by {err}"
        );
    }
    Ok(())
}

#[test]
fn test_wrong_direction_length_is_a_dimension_mismatch() -> Result<()> {
    let (model, data) = network::<f64>()?;
    let err = compute_dataset_hvp(&model, &criterion(), &data, &[0.0; 49], 8)
        .err()
        .ok_or_else(|| anyhow!("a 49-entry direction was accepted"))?;
    ensure!(
        err.kind()
            == &SpectrumErrorKind::DimensionMismatch {
                expected: 50,
                actual: 49
            },
        "unexpected error: {err}"
    );
    Ok(())
}

#[test]
fn test_operator_surfaces_errors_raised_inside_apply() -> Result<()> {
    let (model, data) = network::<f64>()?;
    let loss = criterion();
    let op = HvpOperator::new(
        &model,
        &loss,
        CurvatureSource::Dataset {
            dataset: &data,
            physical_batch_size: 8,
        },
    )?;

    // A well-formed column goes through the f64 host round trip unchanged.
    let e7 = Mat::from_fn(50, 1, |i, _| if i == 7 { 1.0 } else { 0.0 });
    let mut out = Mat::zeros(50, 1);
    let mut mem = MemBuffer::new(op.apply_scratch(1, Par::Seq));
    op.apply(out.as_mut(), e7.as_ref(), Par::Seq, MemStack::new(&mut mem));
    let direct = op.apply_vec(&one_hot(50, 7))?;
    for (i, value) in direct.iter().enumerate() {
        ensure!(out[(i, 0)] == *value);
    }
    ensure!(op.take_error().is_none());

    // A malformed column zero-fills the output and parks the error.
    let short = Mat::from_fn(49, 1, |_, _| 1.0);
    let mut out = Mat::from_fn(49, 1, |_, _| f64::NAN);
    op.apply(out.as_mut(), short.as_ref(), Par::Seq, MemStack::new(&mut mem));
    ensure!((0..49).all(|i| out[(i, 0)] == 0.0));
    let err = op
        .take_error()
        .ok_or_else(|| anyhow!("the failing product was not recorded"))?;
    ensure!(matches!(
        err.kind(),
        SpectrumErrorKind::DimensionMismatch {
            expected: 50,
            actual: 49
        }
    ));
    Ok(())
}

#[test]
fn test_single_precision_matches_double_precision() -> Result<()> {
    let (model64, data64) = network::<f64>()?;
    let (model32, data32) = network::<f32>()?;
    let mut rng = StdRng::seed_from_u64(6);
    let v: Vec<f64> = (0..50).map(|_| rng.random_range(-1.0..1.0)).collect();
    let v32: Vec<f32> = v.iter().map(|&x| x as f32).collect();

    let hv64 = compute_dataset_hvp(&model64, &criterion(), &data64, &v, 8)?;
    let hv32 = compute_dataset_hvp(&model32, &criterion(), &data32, &v32, 8)?;
    let scale = hv64.iter().map(|x| x.abs()).fold(0.0, f64::max);
    let hv32: Vec<f64> = hv32.iter().map(|&x| x as f64).collect();
    let err = max_abs_diff(&hv32, &hv64);
    ensure!(err < 1e-3 * scale.max(1.0), "f32 product off by {err} (scale {scale})");

    let top32 = sharpness(
        &model32,
        &criterion(),
        CurvatureSource::Dataset {
            dataset: &data32,
            physical_batch_size: 8,
        },
        &EigenOptions {
            tol: 1e-3,
            seed: Some(1),
            ..EigenOptions::default()
        },
    )?;
    ensure!(top32.is_finite());
    Ok(())
}

#[test]
fn test_top_eigenvalue_matches_assembled_hessian() -> Result<()> {
    let (model, data) = network::<f64>()?;
    let loss = criterion();
    let before = model.parameters().clone();

    let h = assemble_hessian(&model, &loss, &data)?;
    let mut asymmetry: f64 = 0.0;
    for i in 0..50 {
        for j in 0..50 {
            asymmetry = asymmetry.max((h[(i, j)] - h[(j, i)]).abs());
        }
    }
    ensure!(asymmetry < 1e-10, "assembled Hessian is not symmetric: {asymmetry}");

    let evd = h
        .as_ref()
        .self_adjoint_eigen(Side::Lower)
        .map_err(|e| anyhow!("EVD failed: {:?}", e))?;
    let s = evd.S();
    let expected = [s[49], s[48]];

    let options = EigenOptions {
        tol: 1e-10,
        seed: Some(11),
        ..EigenOptions::default()
    };
    let source = CurvatureSource::Dataset {
        dataset: &data,
        physical_batch_size: 8,
    };
    let spectrum = hessian_eigenvalues(&model, &loss, source, 2, &options)?;
    for (got, want) in spectrum.values.iter().zip(expected) {
        ensure!(
            (got - want).abs() < 1e-8 * want.abs().max(1.0),
            "Lanczos gave {got}, dense eigendecomposition {want}"
        );
    }
    ensure!(
        model.parameters() == &before,
        "estimating the spectrum modified the model parameters"
    );
    Ok(())
}

#[test]
fn test_loss_and_data_must_agree() -> Result<()> {
    let (model, data) = network::<f64>()?;
    // Squared error cannot consume class labels.
    let err = compute_hvp(&model, &SquaredError, &data.full(), &[0.0; 50])
        .err()
        .ok_or_else(|| anyhow!("squared error accepted class labels"))?;
    ensure!(matches!(err.kind(), SpectrumErrorKind::InputError(_)));

    let empty = Dataset::<f64>::new(
        Vec::new(),
        4,
        Targets::Classes {
            labels: Vec::new(),
            num_classes: 2,
        },
    )?;
    ensure!(compute_dataset_hvp(&model, &criterion(), &empty, &[0.0; 50], 8).is_err());
    Ok(())
}
