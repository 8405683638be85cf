use alloc::vec;
use alloc::vec::Vec;

use crate::device::{read_raw, write_raw, DataLocation};
use crate::ecc::{Gf256, Poly};
use crate::err::{CanFail, DeviceError, FsError};
use crate::storage::Storage;
use crate::telemetry::{self, FsEvent};

/// Maximum Reed-Solomon codeword length: one byte per non-zero field
/// element of GF(256).
pub const MAX_RS_BLOCK_SIZE: usize = 255;

/// Reed-Solomon codec over GF(256), bytes as symbols.
///
/// A raw block is one systematic codeword: the `2t` parity bytes occupy the
/// low-degree coefficients `[0, 2t)` and the payload the coefficients
/// `[2t, raw_block_size)`. Up to `t` corrupted bytes per block are corrected
/// in place and written back to the medium.
///
/// Block sizes above 255 are clamped to the codeword limit, and
/// `correctable_bytes` to half the block.
pub struct ReedSolomonDevice {
    raw_block_size: usize,
    correctable: usize,
    generator: Poly,
}

impl ReedSolomonDevice {
    /// # Errors
    ///
    /// Fails with [`FsError::InvalidRequest`] when the redundancy leaves no
    /// payload space.
    pub fn new(block_size: usize, correctable_bytes: usize) -> Result<Self, FsError> {
        let raw_block_size = core::cmp::min(block_size, MAX_RS_BLOCK_SIZE);
        let correctable = core::cmp::min(correctable_bytes, raw_block_size / 2);
        if 2 * correctable >= raw_block_size || correctable == 0 {
            return Err(FsError::InvalidRequest);
        }

        Ok(Self {
            raw_block_size,
            correctable,
            generator: Self::generator(correctable),
        })
    }

    /// `g(x) = Π_{i=1..2t} (x - α^i)`.
    fn generator(correctable: usize) -> Poly {
        let mut g = Poly::new(vec![Gf256::ONE]);
        let mut power = Gf256::PRIMITIVE;
        for _ in 0..2 * correctable {
            g = &g * &Poly::new(vec![power, Gf256::ONE]);
            power = power * Gf256::PRIMITIVE;
        }
        g
    }

    pub fn raw_block_size(&self) -> usize {
        self.raw_block_size
    }

    pub fn data_size(&self) -> usize {
        self.raw_block_size - 2 * self.correctable
    }

    /// Number of byte errors the codec repairs per block.
    pub fn correctable_bytes(&self) -> usize {
        self.correctable
    }

    /// Encodes a payload into a full raw codeword:
    /// `c = m·x^{2t} + (m·x^{2t} mod g)`.
    fn encode(&self, payload: &[u8]) -> Vec<u8> {
        let shifted = Poly::from_bytes(payload).shift_up(2 * self.correctable);
        let codeword = &shifted + &shifted.rem(&self.generator);

        codeword
            .slice(0, self.raw_block_size)
            .into_iter()
            .map(u8::from)
            .collect()
    }

    /// Validates the codeword in `raw`, repairing up to `t` byte errors in
    /// place (and on the medium). Returns the payload bytes.
    fn fix_and_extract<S: Storage>(
        &self,
        storage: &mut S,
        block: u32,
        raw: &mut [u8],
    ) -> Result<Vec<u8>, DeviceError> {
        let codeword = Poly::from_bytes(raw);

        let mut syndromes = Vec::with_capacity(2 * self.correctable);
        let mut power = Gf256::PRIMITIVE;
        let mut clean = true;
        for _ in 0..2 * self.correctable {
            let s = codeword.evaluate(power);
            clean &= s.is_zero();
            syndromes.push(s);
            power = power * Gf256::PRIMITIVE;
        }

        if clean {
            return Ok(self.payload_of(raw));
        }

        let sigma = Self::berlekamp_massey(&syndromes);

        // Error locations: X = 1/root for every root of σ, the byte index
        // being log(X).
        let mut roots = Vec::new();
        for v in 1..=255u16 {
            let x = Gf256(v as u8);
            if sigma.evaluate(x).is_zero() {
                roots.push(x);
            }
        }
        if roots.len() != sigma.degree() {
            telemetry::record(FsEvent::ErrorDetection {
                codec: "ReedSolomon",
                block,
            });
            return Err(DeviceError::Correction);
        }

        let omega = (&Poly::new(syndromes) * &sigma).truncated(2 * self.correctable);
        let sigma_derivative = sigma.derivative();

        for &root in &roots {
            let position = root.inv().log() as usize;
            if position >= self.raw_block_size {
                telemetry::record(FsEvent::ErrorDetection {
                    codec: "ReedSolomon",
                    block,
                });
                return Err(DeviceError::Correction);
            }

            // Forney: e = ω(X⁻¹) / σ'(X⁻¹), with X⁻¹ being the root itself.
            let magnitude = omega.evaluate(root) / sigma_derivative.evaluate(root);
            raw[position] ^= u8::from(magnitude);
        }

        write_raw(storage, block, raw)?;
        telemetry::record(FsEvent::ErrorCorrection {
            codec: "ReedSolomon",
            block,
        });

        Ok(self.payload_of(raw))
    }

    fn payload_of(&self, raw: &[u8]) -> Vec<u8> {
        raw[2 * self.correctable..].to_vec()
    }

    /// Berlekamp-Massey: shortest LFSR `σ` generating the syndrome
    /// sequence.
    fn berlekamp_massey(syndromes: &[Gf256]) -> Poly {
        let mut sigma = Poly::new(vec![Gf256::ONE]);
        let mut prev = Poly::new(vec![Gf256::ONE]);
        let mut prev_discrepancy = Gf256::ONE;
        let mut length: usize = 0;
        let mut gap: usize = 1;

        for n in 0..syndromes.len() {
            let mut discrepancy = syndromes[n];
            for i in 1..=length {
                discrepancy = discrepancy + sigma.coeff(i) * syndromes[n - i];
            }

            if discrepancy.is_zero() {
                gap += 1;
                continue;
            }

            let candidate = sigma.clone();
            let correction =
                (&prev * &Poly::new(vec![discrepancy / prev_discrepancy])).shift_up(gap);
            sigma = &sigma + &correction;

            if 2 * length <= n {
                length = n + 1 - length;
                prev = candidate;
                prev_discrepancy = discrepancy;
                gap = 1;
            } else {
                gap += 1;
            }
        }

        sigma
    }

    /// Zeroes the raw block; the zero codeword is valid.
    pub fn format_block<S: Storage>(&self, storage: &mut S, block: u32) -> CanFail<DeviceError> {
        write_raw(storage, block, &vec![0u8; self.raw_block_size])
    }

    pub fn read_block<S: Storage>(
        &self,
        storage: &mut S,
        loc: DataLocation,
        out: &mut [u8],
    ) -> Result<usize, DeviceError> {
        let mut raw = vec![0u8; self.raw_block_size];
        read_raw(storage, loc.block, self.raw_block_size, &mut raw)?;

        let payload = self.fix_and_extract(storage, loc.block, &mut raw)?;

        let to_read = core::cmp::min(out.len(), self.data_size() - loc.offset);
        out[..to_read].copy_from_slice(&payload[loc.offset..loc.offset + to_read]);

        Ok(to_read)
    }

    pub fn write_block<S: Storage>(
        &self,
        storage: &mut S,
        bytes: &[u8],
        loc: DataLocation,
    ) -> Result<usize, DeviceError> {
        let mut raw = vec![0u8; self.raw_block_size];
        read_raw(storage, loc.block, self.raw_block_size, &mut raw)?;

        let mut payload = self.fix_and_extract(storage, loc.block, &mut raw)?;

        let to_write = core::cmp::min(bytes.len(), self.data_size() - loc.offset);
        payload[loc.offset..loc.offset + to_write].copy_from_slice(&bytes[..to_write]);

        write_raw(storage, loc.block, &self.encode(&payload))?;

        Ok(to_write)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::HeapStorage;
    extern crate std;
    use std::vec::Vec;

    #[test]
    fn parameters_are_clamped_to_the_field() {
        let device = ReedSolomonDevice::new(512, 3).unwrap();
        assert_eq!(device.raw_block_size(), 255);
        assert_eq!(device.data_size(), 249);

        let device = ReedSolomonDevice::new(32, 3).unwrap();
        assert_eq!(device.data_size(), 26);

        assert!(ReedSolomonDevice::new(4, 2).is_err());
    }

    #[test]
    fn codewords_have_zero_syndromes() {
        let device = ReedSolomonDevice::new(64, 4).unwrap();
        let payload: Vec<u8> = (0..56).map(|i| (i * 7 + 1) as u8).collect();
        let codeword = Poly::from_bytes(&device.encode(&payload));

        let mut power = Gf256::PRIMITIVE;
        for _ in 0..8 {
            assert!(codeword.evaluate(power).is_zero());
            power = power * Gf256::PRIMITIVE;
        }
    }

    #[test]
    fn encode_is_systematic() {
        let device = ReedSolomonDevice::new(64, 4).unwrap();
        let payload: Vec<u8> = (0..56).map(|i| (i + 3) as u8).collect();
        let raw = device.encode(&payload);
        assert_eq!(&raw[8..], &payload[..]);
    }

    #[test]
    fn round_trips_clean_blocks() {
        let mut storage = HeapStorage::new(4096);
        let device = ReedSolomonDevice::new(255, 3).unwrap();

        let payload = [0xAB; 128];
        device
            .write_block(&mut storage, &payload, DataLocation::at(2))
            .unwrap();

        let mut out = [0u8; 128];
        device
            .read_block(&mut storage, DataLocation::at(2), &mut out)
            .unwrap();
        assert_eq!(out, payload);
    }

    #[test]
    fn corrects_up_to_t_byte_errors() {
        let mut storage = HeapStorage::new(4096);
        let device = ReedSolomonDevice::new(255, 3).unwrap();

        device
            .write_block(&mut storage, &[0xAB; 128], DataLocation::at(0))
            .unwrap();

        // Corrupt three raw bytes, parity and payload regions both.
        storage.bytes_mut()[4] ^= 0x81;
        storage.bytes_mut()[100] = 0x00;
        storage.bytes_mut()[200] = 0xFF;

        let mut out = [0u8; 128];
        device
            .read_block(&mut storage, DataLocation::at(0), &mut out)
            .unwrap();
        assert_eq!(out, [0xAB; 128]);
    }

    #[test]
    fn correction_repairs_the_medium() {
        let mut storage = HeapStorage::new(4096);
        let device = ReedSolomonDevice::new(255, 3).unwrap();

        device
            .write_block(&mut storage, &[0x77; 100], DataLocation::at(1))
            .unwrap();
        let pristine: Vec<u8> = storage.bytes()[255..510].to_vec();

        storage.bytes_mut()[255 + 17] ^= 0xFF;
        let mut out = [0u8; 100];
        device
            .read_block(&mut storage, DataLocation::at(1), &mut out)
            .unwrap();

        assert_eq!(&storage.bytes()[255..510], &pristine[..]);
    }

    #[test]
    fn too_many_errors_do_not_return_the_original() {
        let mut storage = HeapStorage::new(4096);
        let device = ReedSolomonDevice::new(255, 2).unwrap();

        device
            .write_block(&mut storage, &[0x11; 64], DataLocation::at(0))
            .unwrap();

        // 2t + 1 = 5 corrupted bytes: beyond the guarantee, so either the
        // decode fails or the payload comes back wrong.
        for i in 0..5 {
            storage.bytes_mut()[10 + i * 13] ^= 0x5A;
        }

        let mut out = [0u8; 64];
        match device.read_block(&mut storage, DataLocation::at(0), &mut out) {
            Err(DeviceError::Correction) => {}
            Ok(_) => assert_ne!(out, [0x11; 64]),
            Err(e) => panic!("unexpected error {e:?}"),
        }
    }
}
