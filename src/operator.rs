//! Implicit linear operators defined by their action on a vector.
//!
//! Iterative eigen-solvers never look at individual matrix entries; they only need
//! `y = A x`. [`FnOperator`] adapts any such callable to [`faer::matrix_free::LinOp`], so
//! the same estimator runs on closures, dense `faer::MatRef`s and sparse
//! `faer::sparse::SparseColMatRef`s (the latter two implement `LinOp` directly).

use std::fmt;

use faer::{
    MatMut, MatRef, Par,
    dyn_stack::{MemStack, StackReq},
    matrix_free::LinOp,
};

/// A square operator given by a matrix-vector product callable.
///
/// # Panics
/// Applying the operator panics if the callable returns a vector whose length differs
/// from the operator dimension.
///
/// ```
/// use faer::{Mat, Par, dyn_stack::{MemBuffer, MemStack}, matrix_free::LinOp};
/// use hessian_lanczos::operator::FnOperator;
///
/// let double = FnOperator::new(3, |x: &[f64]| x.iter().map(|v| 2.0 * v).collect());
/// let x = Mat::from_fn(3, 1, |i, _| i as f64);
/// let mut y = Mat::zeros(3, 1);
/// let mut mem = MemBuffer::new(double.apply_scratch(1, Par::Seq));
/// double.apply(y.as_mut(), x.as_ref(), Par::Seq, MemStack::new(&mut mem));
/// assert_eq!(y[(2, 0)], 4.0);
/// ```
pub struct FnOperator<Op>
where
    Op: Fn(&[f64]) -> Vec<f64> + Sync,
{
    dim: usize,
    op: Op,
}

impl<Op> FnOperator<Op>
where
    Op: Fn(&[f64]) -> Vec<f64> + Sync,
{
    pub fn new(dim: usize, op: Op) -> Self {
        FnOperator { dim, op }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }
}

impl<Op> fmt::Debug for FnOperator<Op>
where
    Op: Fn(&[f64]) -> Vec<f64> + Sync,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnOperator").field("dim", &self.dim).finish()
    }
}

impl<Op> LinOp<f64> for FnOperator<Op>
where
    Op: Fn(&[f64]) -> Vec<f64> + Sync,
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
            let x: Vec<f64> = (0..rhs.nrows()).map(|i| rhs[(i, j)]).collect();
            let y = (self.op)(&x);
            assert_eq!(
                y.len(),
                self.dim,
                "Dimension mismatch: the matrix-vector product returned {} entries for an operator of dimension {}.",
                y.len(),
                self.dim
            );
            for (i, value) in y.into_iter().enumerate() {
                out[(i, j)] = value;
            }
        }
    }

    fn conj_apply(&self, out: MatMut<'_, f64>, rhs: MatRef<'_, f64>, par: Par, stack: &mut MemStack) {
        self.apply(out, rhs, par, stack);
    }
}
