use std::fmt::{self, Display};
use std::ops::{Add, AddAssign, Div, Mul, Neg, Sub};

use super::Float;

/// Forward-mode dual number: a value paired with its tangent (derivative).
///
/// `Dual { re, eps }` represents `re + eps·ε` where `ε² = 0`.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Dual<F: Float> {
    /// Primal (real) value.
    pub re: F,
    /// Tangent (derivative) value.
    pub eps: F,
}

impl<F: Float> Display for Dual<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} + {}ε", self.re, self.eps)
    }
}

impl<F: Float> Dual<F> {
    /// Create a new dual number.
    #[inline]
    pub fn new(re: F, eps: F) -> Self {
        Dual { re, eps }
    }

    /// Create a constant (zero derivative).
    #[inline]
    pub fn constant(re: F) -> Self {
        Dual { re, eps: F::zero() }
    }

    #[inline]
    pub fn zero() -> Self {
        Dual::constant(F::zero())
    }

    #[inline]
    pub fn one() -> Self {
        Dual::constant(F::one())
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.re == F::zero() && self.eps == F::zero()
    }

    /// Multiply both parts by a plain scalar.
    #[inline]
    pub fn scale(self, factor: F) -> Self {
        Dual {
            re: self.re * factor,
            eps: self.eps * factor,
        }
    }

    /// Apply the chain rule: given `f(self.re)` and `f'(self.re)`, produce the dual result.
    #[inline]
    fn chain(self, f_val: F, f_deriv: F) -> Self {
        Dual {
            re: f_val,
            eps: self.eps * f_deriv,
        }
    }

    #[inline]
    pub fn recip(self) -> Self {
        let inv = F::one() / self.re;
        self.chain(inv, -inv * inv)
    }

    #[inline]
    pub fn sqrt(self) -> Self {
        let s = self.re.sqrt();
        self.chain(s, F::one() / (F::lit(2.0) * s))
    }

    #[inline]
    pub fn powi(self, n: i32) -> Self {
        let val = self.re.powi(n);
        let deriv = F::lit(n as f64) * self.re.powi(n - 1);
        self.chain(val, deriv)
    }

    #[inline]
    pub fn exp(self) -> Self {
        let e = self.re.exp();
        self.chain(e, e)
    }

    #[inline]
    pub fn ln(self) -> Self {
        self.chain(self.re.ln(), F::one() / self.re)
    }

    #[inline]
    pub fn tanh(self) -> Self {
        let t = self.re.tanh();
        self.chain(t, F::one() - t * t)
    }

    #[inline]
    pub fn sigmoid(self) -> Self {
        let s = F::one() / (F::one() + (-self.re).exp());
        self.chain(s, s * (F::one() - s))
    }
}

impl<F: Float> Add for Dual<F> {
    type Output = Self;
    #[inline]
    fn add(self, rhs: Self) -> Self {
        Dual {
            re: self.re + rhs.re,
            eps: self.eps + rhs.eps,
        }
    }
}

impl<F: Float> AddAssign for Dual<F> {
    #[inline]
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl<F: Float> Sub for Dual<F> {
    type Output = Self;
    #[inline]
    fn sub(self, rhs: Self) -> Self {
        Dual {
            re: self.re - rhs.re,
            eps: self.eps - rhs.eps,
        }
    }
}

impl<F: Float> Mul for Dual<F> {
    type Output = Self;
    #[inline]
    fn mul(self, rhs: Self) -> Self {
        Dual {
            re: self.re * rhs.re,
            eps: self.re * rhs.eps + self.eps * rhs.re,
        }
    }
}

impl<F: Float> Div for Dual<F> {
    type Output = Self;
    #[inline]
    fn div(self, rhs: Self) -> Self {
        let inv = F::one() / rhs.re;
        Dual {
            re: self.re * inv,
            eps: (self.eps * rhs.re - self.re * rhs.eps) * inv * inv,
        }
    }
}

impl<F: Float> Neg for Dual<F> {
    type Output = Self;
    #[inline]
    fn neg(self) -> Self {
        Dual {
            re: -self.re,
            eps: -self.eps,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn product_rule() {
        let x = Dual::new(3.0_f64, 1.0);
        let y = Dual::new(2.0_f64, 0.5);
        let p = x * y;
        assert_eq!(p.re, 6.0);
        assert_eq!(p.eps, 3.0 * 0.5 + 1.0 * 2.0);
    }

    #[test]
    fn quotient_rule() {
        let x = Dual::new(1.0_f64, 1.0);
        let y = Dual::constant(4.0_f64);
        let q = x / y;
        assert_eq!(q.re, 0.25);
        assert_eq!(q.eps, 0.25);
    }

    #[test]
    fn elementary_derivatives() {
        let x = Dual::new(0.5_f64, 1.0);
        assert!((x.exp().eps - 0.5_f64.exp()).abs() < 1e-15);
        assert!((x.ln().eps - 2.0).abs() < 1e-15);
        assert!((x.tanh().eps - (1.0 - 0.5_f64.tanh().powi(2))).abs() < 1e-15);
        assert!((x.powi(3).eps - 3.0 * 0.25).abs() < 1e-15);
        assert!((x.sqrt().eps - 0.5 / 0.5_f64.sqrt()).abs() < 1e-15);
        let s = 1.0 / (1.0 + (-0.5_f64).exp());
        assert!((x.sigmoid().eps - s * (1.0 - s)).abs() < 1e-15);
    }
}
