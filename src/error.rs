//! This module defines the custom error types for the library.
//!
//! All failure modes of the Hessian-vector-product operator and the Lanczos
//! eigen-estimator are collected in a single enum, [`SpectrumErrorKind`], wrapped by the
//! public [`SpectrumError`].
//!
//! Using the [`thiserror`] crate allows us to create idiomatic error types with minimal
//! boilerplate. Note that [`faer::linalg::evd::EvdError`] does not implement the standard
//! [`std::error::Error`] trait, so we wrap it manually to provide a compatible error type.
use thiserror::Error;

/// Represents all possible errors that can occur while computing Hessian-vector
/// products or estimating the Hessian spectrum.
#[derive(Error, Debug)]
#[error(transparent)]
pub struct SpectrumError(#[from] SpectrumErrorKind);

impl SpectrumError {
    /// Returns the kind of failure, for callers that need to branch on it.
    pub fn kind(&self) -> &SpectrumErrorKind {
        &self.0
    }
}

/// The distinct kinds of errors.
#[derive(Error, Debug, PartialEq)]
pub enum SpectrumErrorKind {
    /// A vector does not have the length of the flattened parameter vector
    /// (or of the operator it is applied to).
    #[error("Dimension mismatch: expected a vector of length {expected}, got {actual}.")]
    DimensionMismatch { expected: usize, actual: usize },

    /// The number of requested eigenpairs must satisfy `1 <= k < dimension`.
    #[error(
        "Invalid eigenpair count: requested {requested} eigenpairs of an operator of dimension {dimension}; k must satisfy 1 <= k < dimension."
    )]
    InvalidEigenCount { requested: usize, dimension: usize },

    /// The iteration budget was exhausted before all requested Ritz pairs converged.
    #[error(
        "Lanczos did not converge: {converged} of {requested} eigenpairs converged after {restarts} restarts."
    )]
    NoConvergence {
        requested: usize,
        converged: usize,
        restarts: usize,
    },

    /// A parameter tensor or named quantity has an unexpected size.
    #[error("Parameter mismatch for '{param_name}': expected {expected}, got {actual}.")]
    ParameterMismatch {
        param_name: String,
        expected: usize,
        actual: usize,
    },

    /// Indicates that an invalid input parameter was provided to a function.
    #[error("Invalid input parameter: {0}")]
    InputError(String),

    /// Wraps an error originating from [`faer`]'s eigendecomposition module.
    #[error("A numerical error occurred during the eigendecomposition of the projected matrix: {0:?}")]
    EvdError(faer::linalg::evd::EvdError),
}

// Manually implement PartialEq for the public error type.
// We compare the inner `SpectrumErrorKind`.
impl PartialEq for SpectrumError {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

pub(crate) fn input_error(message: impl Into<String>) -> SpectrumError {
    SpectrumErrorKind::InputError(message.into()).into()
}

pub(crate) fn dimension_mismatch(expected: usize, actual: usize) -> SpectrumError {
    SpectrumErrorKind::DimensionMismatch { expected, actual }.into()
}

// Unit tests to ensure error messages are formatted correctly.
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dimension_mismatch_error_message() {
        let error = dimension_mismatch(50, 49);
        assert_eq!(
            error.to_string(),
            "Dimension mismatch: expected a vector of length 50, got 49."
        );
    }

    #[test]
    fn test_invalid_eigen_count_error_message() {
        let error = SpectrumError(SpectrumErrorKind::InvalidEigenCount {
            requested: 5,
            dimension: 5,
        });
        let expected_message = "Invalid eigenpair count: requested 5 eigenpairs of an operator of dimension 5; k must satisfy 1 <= k < dimension.";
        assert_eq!(error.to_string(), expected_message);
    }

    #[test]
    fn test_no_convergence_error_message() {
        let error = SpectrumError(SpectrumErrorKind::NoConvergence {
            requested: 3,
            converged: 1,
            restarts: 10,
        });
        assert_eq!(
            error.to_string(),
            "Lanczos did not converge: 1 of 3 eigenpairs converged after 10 restarts."
        );
    }

    #[test]
    fn test_input_error_message() {
        let error = input_error("physical batch size must be positive");
        assert_eq!(
            error.to_string(),
            "Invalid input parameter: physical batch size must be positive"
        );
        assert!(matches!(error.kind(), SpectrumErrorKind::InputError(_)));
    }

    #[test]
    fn test_evd_error_message() {
        let evd_error = faer::linalg::evd::EvdError::NoConvergence;
        let error = SpectrumError(SpectrumErrorKind::EvdError(evd_error));
        let expected_message = "A numerical error occurred during the eigendecomposition of the projected matrix: NoConvergence";
        assert_eq!(error.to_string(), expected_message);
    }
}
