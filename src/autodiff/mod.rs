//! Forward-over-reverse automatic differentiation.
//!
//! Model evaluation is recorded on an Adept-style tape ([`tape::Tape`]) whose
//! partial derivatives are forward-mode [`Dual`] numbers. Entering every parameter as
//! `θ_i + v_i·ε` and running a single adjoint sweep yields, per parameter, the dual
//! number `∂L/∂θ_i + (H·v)_i·ε`: the real parts form the gradient and the tangent parts
//! form the exact Hessian-vector product. The Hessian itself is never materialised.
//!
//! ```
//! use hessian_lanczos::autodiff::{Dual, Var, record};
//!
//! // f(x, y) = x²y, H = [[2y, 2x], [2x, 0]]; at (3, 2) with v = (1, 0): H·v = (4, 6).
//! let (tape, (inputs, out)) = record::<f64, _, _>(|| {
//!     let x = Var::variable(Dual::new(3.0, 1.0));
//!     let y = Var::variable(Dual::new(2.0, 0.0));
//!     (vec![x, y], x * x * y)
//! });
//! let adjoints = tape.reverse(out.index());
//! assert_eq!(adjoints[inputs[0].index() as usize].re, 12.0);
//! assert_eq!(adjoints[inputs[0].index() as usize].eps, 4.0);
//! assert_eq!(adjoints[inputs[1].index() as usize].eps, 6.0);
//! ```

pub mod dual;
pub mod tape;
pub mod var;

use std::cell::RefCell;
use std::fmt::{Debug, Display};
use std::thread::LocalKey;

use num_traits::{Float as NumFloat, FloatConst, FromPrimitive};

pub use dual::Dual;
pub use tape::{Tape, record};
pub use var::Var;

/// Marker trait for base floating-point types (`f32`, `f64`).
///
/// Bundles the numeric and utility traits needed by the AD engine and the models.
/// Only primitive float types implement this; the AD wrapper types do not.
pub trait Float:
    NumFloat + FloatConst + FromPrimitive + Copy + Send + Sync + Default + Debug + Display + 'static
{
    /// Converts an `f64` literal or host value into this precision.
    fn lit(value: f64) -> Self;

    /// Widens (or passes through) to `f64`.
    fn as_f64(self) -> f64;

    /// The thread-local slot holding the active tape for this float type.
    #[doc(hidden)]
    fn tape_slot() -> &'static LocalKey<RefCell<Option<Tape<Self>>>>;
}

thread_local! {
    static TAPE_F32: RefCell<Option<Tape<f32>>> = const { RefCell::new(None) };
    static TAPE_F64: RefCell<Option<Tape<f64>>> = const { RefCell::new(None) };
}

impl Float for f32 {
    #[inline]
    fn lit(value: f64) -> Self {
        value as f32
    }

    #[inline]
    fn as_f64(self) -> f64 {
        self as f64
    }

    fn tape_slot() -> &'static LocalKey<RefCell<Option<Tape<Self>>>> {
        &TAPE_F32
    }
}

impl Float for f64 {
    #[inline]
    fn lit(value: f64) -> Self {
        value
    }

    #[inline]
    fn as_f64(self) -> f64 {
        self
    }

    fn tape_slot() -> &'static LocalKey<RefCell<Option<Tape<Self>>>> {
        &TAPE_F64
    }
}
