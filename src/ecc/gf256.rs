//! Arithmetic in GF(256).
//!
//! The field is generated by the primitive polynomial `0x11D` with `α = 2`
//! as the primitive element. Multiplication and division go through
//! compile-time exponent / logarithm tables; addition and subtraction are
//! both XOR.

use bytemuck::{Pod, Zeroable};

/// Primitive polynomial generating the field.
pub const PRIMITIVE_POLY: u16 = 0x11D;

const fn build_exp() -> [u8; 256] {
    let mut exp = [0u8; 256];
    let mut x: u16 = 1;
    let mut i = 0;
    while i < 255 {
        exp[i] = x as u8;
        x <<= 1;
        if x & 0x100 != 0 {
            x ^= PRIMITIVE_POLY;
        }
        i += 1;
    }
    exp[255] = exp[0];
    exp
}

const fn build_log(exp: &[u8; 256]) -> [u8; 256] {
    let mut log = [0u8; 256];
    let mut i = 0;
    while i < 255 {
        log[exp[i] as usize] = i as u8;
        i += 1;
    }
    log
}

const EXP: [u8; 256] = build_exp();
const LOG: [u8; 256] = build_log(&EXP);

/// An element of GF(256).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Pod, Zeroable)]
#[repr(transparent)]
pub struct Gf256(pub u8);

impl Gf256 {
    pub const ZERO: Self = Self(0);
    pub const ONE: Self = Self(1);

    /// The primitive element `α`.
    pub const PRIMITIVE: Self = Self(2);

    /// Discrete logarithm base `α`. The caller must ensure the element is
    /// non-zero; `log(0)` is not defined.
    #[inline]
    pub fn log(self) -> u8 {
        LOG[self.0 as usize]
    }

    /// Multiplicative inverse, with `inv(0) = 0` by convention.
    #[inline]
    pub fn inv(self) -> Self {
        if self.0 == 0 {
            return Self::ZERO;
        }
        Self(EXP[(255 - LOG[self.0 as usize] as usize) % 255])
    }

    #[inline]
    pub fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl From<u8> for Gf256 {
    fn from(value: u8) -> Self {
        Self(value)
    }
}

impl From<Gf256> for u8 {
    fn from(value: Gf256) -> Self {
        value.0
    }
}

impl core::ops::Add for Gf256 {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self(self.0 ^ rhs.0)
    }
}

impl core::ops::Sub for Gf256 {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self(self.0 ^ rhs.0)
    }
}

impl core::ops::Mul for Gf256 {
    type Output = Self;

    fn mul(self, rhs: Self) -> Self {
        if self.0 == 0 || rhs.0 == 0 {
            return Self::ZERO;
        }
        let log_sum = LOG[self.0 as usize] as usize + LOG[rhs.0 as usize] as usize;
        Self(EXP[log_sum % 255])
    }
}

impl core::ops::Div for Gf256 {
    type Output = Self;

    /// Division with the `x / 0 = 0` convention of [`Gf256::inv`].
    fn div(self, rhs: Self) -> Self {
        if self.0 == 0 || rhs.0 == 0 {
            return Self::ZERO;
        }
        let log_diff =
            255 + LOG[self.0 as usize] as usize - LOG[rhs.0 as usize] as usize;
        Self(EXP[log_diff % 255])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    extern crate std;

    #[test]
    fn every_nonzero_element_has_an_inverse() {
        for v in 1..=255u8 {
            let a = Gf256(v);
            assert_eq!(a * a.inv(), Gf256::ONE, "inv failed for {v}");
        }
        assert_eq!(Gf256::ZERO.inv(), Gf256::ZERO);
    }

    #[test]
    fn multiplication_distributes_over_addition() {
        // A spread of triples rather than the full 256^3 space.
        for a in (0..=255u8).step_by(7) {
            for b in (0..=255u8).step_by(11) {
                for c in (0..=255u8).step_by(13) {
                    let (a, b, c) = (Gf256(a), Gf256(b), Gf256(c));
                    assert_eq!((a + b) * c, a * c + b * c);
                }
            }
        }
    }

    #[test]
    fn addition_is_its_own_inverse() {
        let a = Gf256(0x53);
        let b = Gf256(0xCA);
        assert_eq!(a + b - b, a);
        assert_eq!(a + a, Gf256::ZERO);
    }

    #[test]
    fn exp_table_wraps_at_255() {
        assert_eq!(EXP[0], 1);
        assert_eq!(EXP[255], EXP[0]);
        // α^8 = α^4 · α^4
        assert_eq!(Gf256(EXP[8]), Gf256(EXP[4]) * Gf256(EXP[4]));
    }

    #[test]
    fn primitive_element_generates_the_field() {
        let mut seen = [false; 256];
        let mut x = Gf256::ONE;
        for _ in 0..255 {
            assert!(!seen[x.0 as usize]);
            seen[x.0 as usize] = true;
            x = x * Gf256::PRIMITIVE;
        }
        assert_eq!(x, Gf256::ONE);
    }
}
