use std::fmt::{self, Display};
use std::iter::Sum;
use std::ops::{Add, AddAssign, Div, Mul, Neg, Sub};

use super::tape::{CONSTANT, with_active_tape};
use super::{Dual, Float};

/// Reverse-mode AD variable whose value is a forward-mode dual number.
///
/// Just a value and a tape index. `Copy` because the tape lives in a thread-local,
/// not inside this struct. Operations on constants never touch the tape, so a model
/// evaluated with constant parameters needs no active recording.
#[derive(Clone, Copy, Debug)]
pub struct Var<F: Float> {
    pub(crate) value: Dual<F>,
    pub(crate) index: u32,
}

impl<F: Float> Var<F> {
    /// Create a constant (not tracked on tape).
    #[inline]
    pub fn constant(value: F) -> Self {
        Var {
            value: Dual::constant(value),
            index: CONSTANT,
        }
    }

    /// Register an independent variable on the active tape.
    ///
    /// The tangent part of `value` is the direction along which second-order
    /// information is propagated.
    ///
    /// # Panics
    /// Panics if no tape is active on this thread.
    #[inline]
    pub fn variable(value: Dual<F>) -> Self {
        let index = with_active_tape::<F, _>(|tape| tape.new_variable());
        Var { value, index }
    }

    /// Primal value.
    #[inline]
    pub fn value(&self) -> F {
        self.value.re
    }

    /// Directional derivative of the value along the input tangents.
    #[inline]
    pub fn tangent(&self) -> F {
        self.value.eps
    }

    /// Get the tape index ([`CONSTANT`] for constants).
    #[inline]
    pub fn index(&self) -> u32 {
        self.index
    }

    #[inline]
    pub fn is_constant(&self) -> bool {
        self.index == CONSTANT
    }

    #[inline]
    fn unary(self, value: Dual<F>, multiplier: Dual<F>) -> Self {
        if self.is_constant() {
            return Var {
                value,
                index: CONSTANT,
            };
        }
        let index = with_active_tape::<F, _>(|tape| tape.push_unary(self.index, multiplier));
        Var { value, index }
    }

    #[inline]
    fn binary(self, rhs: Self, value: Dual<F>, lhs_mult: Dual<F>, rhs_mult: Dual<F>) -> Self {
        if self.is_constant() && rhs.is_constant() {
            return Var {
                value,
                index: CONSTANT,
            };
        }
        let index = with_active_tape::<F, _>(|tape| {
            tape.push_binary(self.index, lhs_mult, rhs.index, rhs_mult)
        });
        Var { value, index }
    }

    pub fn exp(self) -> Self {
        let e = self.value.exp();
        self.unary(e, e)
    }

    pub fn ln(self) -> Self {
        self.unary(self.value.ln(), self.value.recip())
    }

    pub fn tanh(self) -> Self {
        let t = self.value.tanh();
        self.unary(t, Dual::one() - t * t)
    }

    pub fn sigmoid(self) -> Self {
        let s = self.value.sigmoid();
        self.unary(s, s * (Dual::one() - s))
    }

    /// Rectified linear unit. The derivative at zero is taken as zero.
    pub fn relu(self) -> Self {
        if self.value.re > F::zero() {
            self.unary(self.value, Dual::one())
        } else {
            self.unary(Dual::zero(), Dual::zero())
        }
    }

    pub fn sqrt(self) -> Self {
        let s = self.value.sqrt();
        self.unary(s, (s + s).recip())
    }

    pub fn powi(self, n: i32) -> Self {
        let deriv = self.value.powi(n - 1).scale(F::lit(n as f64));
        self.unary(self.value.powi(n), deriv)
    }

    pub fn square(self) -> Self {
        self * self
    }
}

impl<F: Float> Display for Var<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value.re)
    }
}

impl<F: Float> Default for Var<F> {
    fn default() -> Self {
        Var::constant(F::zero())
    }
}

impl<F: Float> Add for Var<F> {
    type Output = Self;
    #[inline]
    fn add(self, rhs: Self) -> Self {
        self.binary(rhs, self.value + rhs.value, Dual::one(), Dual::one())
    }
}

impl<F: Float> Sub for Var<F> {
    type Output = Self;
    #[inline]
    fn sub(self, rhs: Self) -> Self {
        self.binary(rhs, self.value - rhs.value, Dual::one(), -Dual::one())
    }
}

impl<F: Float> Mul for Var<F> {
    type Output = Self;
    #[inline]
    fn mul(self, rhs: Self) -> Self {
        self.binary(rhs, self.value * rhs.value, rhs.value, self.value)
    }
}

impl<F: Float> Div for Var<F> {
    type Output = Self;
    #[inline]
    fn div(self, rhs: Self) -> Self {
        let inv = rhs.value.recip();
        let quotient = self.value * inv;
        self.binary(rhs, quotient, inv, -(quotient * inv))
    }
}

impl<F: Float> Neg for Var<F> {
    type Output = Self;
    #[inline]
    fn neg(self) -> Self {
        self.unary(-self.value, -Dual::one())
    }
}

impl<F: Float> AddAssign for Var<F> {
    #[inline]
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

// ── Mixed operations with plain scalars ──

impl<F: Float> Add<F> for Var<F> {
    type Output = Self;
    #[inline]
    fn add(self, rhs: F) -> Self {
        self.unary(self.value + Dual::constant(rhs), Dual::one())
    }
}

impl<F: Float> Sub<F> for Var<F> {
    type Output = Self;
    #[inline]
    fn sub(self, rhs: F) -> Self {
        self.unary(self.value - Dual::constant(rhs), Dual::one())
    }
}

impl<F: Float> Mul<F> for Var<F> {
    type Output = Self;
    #[inline]
    fn mul(self, rhs: F) -> Self {
        self.unary(self.value.scale(rhs), Dual::constant(rhs))
    }
}

impl<F: Float> Div<F> for Var<F> {
    type Output = Self;
    #[inline]
    fn div(self, rhs: F) -> Self {
        let inv = F::one() / rhs;
        self.unary(self.value.scale(inv), Dual::constant(inv))
    }
}

macro_rules! impl_scalar_lhs {
    ($($t:ty),*) => {$(
        impl Add<Var<$t>> for $t {
            type Output = Var<$t>;
            #[inline]
            fn add(self, rhs: Var<$t>) -> Var<$t> {
                rhs + self
            }
        }

        impl Sub<Var<$t>> for $t {
            type Output = Var<$t>;
            #[inline]
            fn sub(self, rhs: Var<$t>) -> Var<$t> {
                -rhs + self
            }
        }

        impl Mul<Var<$t>> for $t {
            type Output = Var<$t>;
            #[inline]
            fn mul(self, rhs: Var<$t>) -> Var<$t> {
                rhs * self
            }
        }
    )*};
}

impl_scalar_lhs!(f32, f64);

impl<F: Float> Sum for Var<F> {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Var::constant(F::zero()), |acc, x| acc + x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autodiff::record;

    /// Gradient and Hessian-vector product of `f` at `x` along `v`.
    fn grad_and_hvp(
        f: impl Fn(&[Var<f64>]) -> Var<f64>,
        x: &[f64],
        v: &[f64],
    ) -> (Vec<f64>, Vec<f64>) {
        let (tape, (inputs, out)) = record::<f64, _, _>(|| {
            let inputs: Vec<Var<f64>> = x
                .iter()
                .zip(v)
                .map(|(&xi, &vi)| Var::variable(Dual::new(xi, vi)))
                .collect();
            let out = f(&inputs);
            (inputs, out)
        });
        let adjoints = tape.reverse(out.index());
        inputs
            .iter()
            .map(|input| {
                let a = adjoints[input.index() as usize];
                (a.re, a.eps)
            })
            .unzip()
    }

    #[test]
    fn constants_do_not_need_a_tape() {
        let a = Var::constant(2.0_f64);
        let b = Var::constant(3.0_f64);
        let c = (a * b + 1.0).exp().ln() / b;
        assert!(c.is_constant());
        assert!((c.value() - 7.0 / 3.0).abs() < 1e-14);
    }

    #[test]
    fn hvp_of_rosenbrock() {
        // f = (1 - x)^2 + 100 (y - x^2)^2
        let f = |p: &[Var<f64>]| {
            let (x, y) = (p[0], p[1]);
            (1.0 - x).square() + 100.0 * (y - x * x).square()
        };
        let (x, y) = (0.5, -0.3);
        let v = [0.7, -1.1];
        let (g, hv) = grad_and_hvp(f, &[x, y], &v);

        let gx = -2.0 * (1.0 - x) - 400.0 * x * (y - x * x);
        let gy = 200.0 * (y - x * x);
        let hxx = 2.0 - 400.0 * (y - x * x) + 800.0 * x * x;
        let hxy = -400.0 * x;
        let hyy = 200.0;

        assert!((g[0] - gx).abs() < 1e-10);
        assert!((g[1] - gy).abs() < 1e-10);
        assert!((hv[0] - (hxx * v[0] + hxy * v[1])).abs() < 1e-10);
        assert!((hv[1] - (hxy * v[0] + hyy * v[1])).abs() < 1e-10);
    }

    #[test]
    fn hvp_through_elementary_functions() {
        // f = exp(x) * tanh(y) + ln(x) / y + sqrt(x) + sigmoid(y) + x^3
        let f = |p: &[Var<f64>]| {
            let (x, y) = (p[0], p[1]);
            x.exp() * y.tanh() + x.ln() / y + x.sqrt() + y.sigmoid() + x.powi(3)
        };
        let (x, y) = (0.8, 0.4);
        let h = 1e-5;
        let v = [0.3, -0.9];
        let (_, hv) = grad_and_hvp(f, &[x, y], &v);

        // Central differences of the gradient along v.
        let zero = [0.0, 0.0];
        let (g_plus, _) = grad_and_hvp(f, &[x + h * v[0], y + h * v[1]], &zero);
        let (g_minus, _) = grad_and_hvp(f, &[x - h * v[0], y - h * v[1]], &zero);
        for i in 0..2 {
            let fd = (g_plus[i] - g_minus[i]) / (2.0 * h);
            assert!((hv[i] - fd).abs() < 1e-6, "component {i}: {} vs {}", hv[i], fd);
        }
    }

    #[test]
    fn relu_has_zero_curvature() {
        let f = |p: &[Var<f64>]| (p[0] * 2.0).relu() + (p[1] - 5.0).relu();
        let (g, hv) = grad_and_hvp(f, &[1.0, 1.0], &[1.0, 1.0]);
        assert_eq!(g, vec![2.0, 0.0]);
        assert_eq!(hv, vec![0.0, 0.0]);
    }
}
