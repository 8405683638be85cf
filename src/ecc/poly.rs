//! Dense polynomials over GF(256).
//!
//! Coefficients are stored little-endian: `coeffs[0]` is the constant term.
//! Every operation trims trailing zero coefficients, so the representation
//! of a given polynomial is unique and `coeffs.len() - 1` is its degree.

use alloc::vec;
use alloc::vec::Vec;

use crate::ecc::gf256::Gf256;

/// A polynomial over GF(256).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Poly {
    coeffs: Vec<Gf256>,
}

impl Poly {
    /// Builds a polynomial from little-endian coefficients, trimming
    /// trailing zeros.
    pub fn new(coeffs: Vec<Gf256>) -> Self {
        let mut p = Self { coeffs };
        p.trim();
        p
    }

    /// Interprets `bytes` as coefficients, `bytes[0]` being the constant
    /// term.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self::new(bytes.iter().map(|&b| Gf256(b)).collect())
    }

    pub fn zero() -> Self {
        Self { coeffs: Vec::new() }
    }

    pub fn is_zero(&self) -> bool {
        self.coeffs.is_empty()
    }

    /// Degree of the polynomial; the zero polynomial reports degree 0.
    pub fn degree(&self) -> usize {
        self.coeffs.len().saturating_sub(1)
    }

    /// Coefficient of `x^i`, zero beyond the stored length.
    pub fn coeff(&self, i: usize) -> Gf256 {
        self.coeffs.get(i).copied().unwrap_or(Gf256::ZERO)
    }

    fn trim(&mut self) {
        while matches!(self.coeffs.last(), Some(c) if c.is_zero()) {
            self.coeffs.pop();
        }
    }

    /// Multiplies by `x^k` (prepends `k` zero coefficients).
    pub fn shift_up(&self, k: usize) -> Self {
        if self.is_zero() {
            return Self::zero();
        }
        let mut coeffs = vec![Gf256::ZERO; k];
        coeffs.extend_from_slice(&self.coeffs);
        Self { coeffs }
    }

    /// Remainder of the division by `divisor`.
    pub fn rem(&self, divisor: &Self) -> Self {
        if divisor.is_zero() {
            return self.clone();
        }

        let mut remainder = self.clone();
        let divisor_lead = *divisor.coeffs.last().expect("non-zero divisor");

        while remainder.coeffs.len() >= divisor.coeffs.len() {
            let shift = remainder.coeffs.len() - divisor.coeffs.len();
            let factor = *remainder.coeffs.last().expect("trimmed remainder") / divisor_lead;

            for (i, &c) in divisor.coeffs.iter().enumerate() {
                remainder.coeffs[shift + i] = remainder.coeffs[shift + i] + c * factor;
            }
            remainder.trim();
        }
        remainder
    }

    /// Evaluates the polynomial at `x` with Horner's scheme.
    pub fn evaluate(&self, x: Gf256) -> Gf256 {
        let mut acc = Gf256::ZERO;
        for &c in self.coeffs.iter().rev() {
            acc = acc * x + c;
        }
        acc
    }

    /// Formal derivative. Over GF(2^n) the derivative of `a·x^i` is
    /// `a·x^(i-1)` for odd `i` and zero otherwise.
    pub fn derivative(&self) -> Self {
        let mut coeffs = vec![Gf256::ZERO; self.coeffs.len().saturating_sub(1)];
        for (i, &c) in self.coeffs.iter().enumerate().skip(1) {
            if i % 2 == 1 {
                coeffs[i - 1] = c;
            }
        }
        Self::new(coeffs)
    }

    /// Coefficients of `x^from .. x^to`, zero-padded past the stored length.
    pub fn slice(&self, from: usize, to: usize) -> Vec<Gf256> {
        (from..to).map(|i| self.coeff(i)).collect()
    }

    /// The polynomial taken modulo `x^len`.
    pub fn truncated(&self, len: usize) -> Self {
        Self::new(self.coeffs.iter().copied().take(len).collect())
    }
}

impl core::ops::Add for &Poly {
    type Output = Poly;

    fn add(self, rhs: &Poly) -> Poly {
        let n = core::cmp::max(self.coeffs.len(), rhs.coeffs.len());
        let mut coeffs = Vec::with_capacity(n);
        for i in 0..n {
            coeffs.push(self.coeff(i) + rhs.coeff(i));
        }
        Poly::new(coeffs)
    }
}

impl core::ops::Mul for &Poly {
    type Output = Poly;

    fn mul(self, rhs: &Poly) -> Poly {
        if self.is_zero() || rhs.is_zero() {
            return Poly::zero();
        }

        let mut coeffs = vec![Gf256::ZERO; self.coeffs.len() + rhs.coeffs.len() - 1];
        for (i, &a) in self.coeffs.iter().enumerate() {
            for (j, &b) in rhs.coeffs.iter().enumerate() {
                coeffs[i + j] = coeffs[i + j] + a * b;
            }
        }
        Poly::new(coeffs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    extern crate std;

    fn poly(bytes: &[u8]) -> Poly {
        Poly::from_bytes(bytes)
    }

    #[test]
    fn addition_is_coefficientwise_xor() {
        let a = poly(&[1, 2, 3]);
        let b = poly(&[3, 2]);
        assert_eq!(&a + &b, poly(&[2, 0, 3]));
    }

    #[test]
    fn trailing_zeros_are_trimmed() {
        let p = poly(&[5, 0, 0]);
        assert_eq!(p.degree(), 0);
        let cancelled = &poly(&[1, 7]) + &poly(&[0, 7]);
        assert_eq!(cancelled, poly(&[1]));
    }

    #[test]
    fn remainder_has_degree_below_divisor() {
        let p = poly(&[7, 1, 9, 4, 2]);
        let d = poly(&[3, 1, 1]);
        let r = p.rem(&d);
        assert!(r.degree() < d.degree());

        // p + r is divisible by d once r is removed: (p - r) mod d == 0.
        let diff = &p + &r;
        assert!(diff.rem(&d).is_zero());
    }

    #[test]
    fn evaluate_matches_term_by_term_sum() {
        let p = poly(&[0x12, 0x34, 0x56]);
        let x = Gf256(0x0B);
        let expected = Gf256(0x12) + Gf256(0x34) * x + Gf256(0x56) * x * x;
        assert_eq!(p.evaluate(x), expected);
    }

    #[test]
    fn derivative_keeps_only_odd_terms() {
        // a + bx + cx^2 + dx^3 -> b + dx^2
        let p = poly(&[0x0A, 0x0B, 0x0C, 0x0D]);
        assert_eq!(p.derivative(), poly(&[0x0B, 0x00, 0x0D]));
    }

    #[test]
    fn shift_up_multiplies_by_x_k() {
        let p = poly(&[1, 2]);
        let shifted = p.shift_up(3);
        assert_eq!(shifted.coeff(3), Gf256(1));
        assert_eq!(shifted.coeff(4), Gf256(2));
        assert_eq!(shifted.coeff(0), Gf256::ZERO);
        let x = Gf256(0x1D);
        let x3 = x * x * x;
        assert_eq!(shifted.evaluate(x), p.evaluate(x) * x3);
    }

    #[test]
    fn slice_pads_with_zeros() {
        let p = poly(&[1, 2]);
        assert_eq!(
            p.slice(1, 4),
            std::vec![Gf256(2), Gf256::ZERO, Gf256::ZERO]
        );
    }
}
