//! Error-control arithmetic shared by the block codecs.
//!
//! [`gf256`] implements the finite field the Reed-Solomon codec works in,
//! [`poly`] the dense polynomials over it, [`crc`] the configurable CRC
//! polynomial with its bit-level long division, and [`bits`] the MSB-first
//! bit addressing used by the CRC and Hamming codecs.

pub mod bits;
pub mod crc;
pub mod gf256;
pub mod poly;

pub use crc::CrcPolynomial;
pub use gf256::Gf256;
pub use poly::Poly;
