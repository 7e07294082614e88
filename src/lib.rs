//! Hessian spectrum ("sharpness") estimation for small differentiable models.
//!
//! The crate computes exact Hessian-vector products of a model's loss with respect to its
//! parameters and feeds them to a matrix-free Lanczos eigen-estimator, so the top
//! eigenvalues of the loss Hessian can be tracked without ever forming the Hessian.
//!
//! ## Building blocks
//!
//! **Hessian-vector products** ([`hvp`]): forward-over-reverse automatic differentiation
//! ([`autodiff`]) over a [`model::Model`] and a [`loss::Loss`], on a single batch or a
//! whole dataset processed in physical batches. [`hvp::HvpOperator`] exposes the product as
//! a [`faer::matrix_free::LinOp`].
//!
//! **Eigen-estimation** ([`estimate_top_eigen`], [`estimate_top_eigen_op`]): thick-restart
//! Lanczos with full reorthogonalisation for any symmetric operator: closures, dense
//! `faer::MatRef`s, sparse matrices or the Hessian operator itself.
//!
//! **Parameters** ([`params`]): ordered parameter sets and the flatten/unflatten bijection
//! between them and flat vectors.
//!
//! ## Example Usage
//!
//! ```rust
//! use hessian_lanczos::{estimate_top_eigen, EigenOptions};
//!
//! // diag(5, 4, 3, 2, 1) given only through its action.
//! let diag = [5.0, 4.0, 3.0, 2.0, 1.0];
//! let matvec = |x: &[f64]| x.iter().zip(&diag).map(|(x, d)| x * d).collect::<Vec<f64>>();
//!
//! let spectrum = estimate_top_eigen(matvec, 5, 2, &EigenOptions::default().with_seed(0)).unwrap();
//! assert!((spectrum.values[0] - 5.0).abs() < 1e-10);
//! assert!((spectrum.values[1] - 4.0).abs() < 1e-10);
//! assert!(spectrum.vectors[(0, 0)].abs() > 1.0 - 1e-8);
//! ```
//!
//! Estimating the sharpness of a model:
//!
//! ```rust
//! use hessian_lanczos::{
//!     data::Dataset, hvp::CurvatureSource, loss::SquaredError, model::ModelKind, sharpness,
//!     EigenOptions,
//! };
//! use rand::{SeedableRng, rngs::StdRng};
//!
//! let mut rng = StdRng::seed_from_u64(1);
//! let data = Dataset::<f64>::synthetic_regression(64, 3, 1, 0.1, &mut rng).unwrap();
//! let model = ModelKind::TanhMlp.build::<f64, _>(3, &[8], 1, &mut rng).unwrap();
//! let source = CurvatureSource::Dataset { dataset: &data, physical_batch_size: 16 };
//!
//! let top = sharpness(&model, &SquaredError, source, &EigenOptions::default().with_seed(2)).unwrap();
//! assert!(top.is_finite());
//! ```

pub mod algorithms;
pub mod autodiff;
pub mod data;
pub mod error;
pub mod hvp;
pub mod loss;
pub mod model;
pub mod operator;
pub mod params;
pub mod solvers;
pub mod utils;

pub use algorithms::{EigenOptions, EigenSpectrum, Which};
pub use error::{SpectrumError, SpectrumErrorKind};
pub use solvers::{estimate_top_eigen, estimate_top_eigen_op, hessian_eigenvalues, sharpness};
