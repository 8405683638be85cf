use alloc::vec;
use alloc::vec::Vec;

use crate::device::{read_raw, write_raw, DataLocation};
use crate::ecc::bits;
use crate::ecc::CrcPolynomial;
use crate::err::{CanFail, DeviceError, FsError};
use crate::storage::Storage;
use crate::telemetry::{self, FsEvent};

/// CRC codec: the payload bits, MSB-first, are followed by the `deg(P)`-bit
/// remainder of their division by the generator polynomial.
///
/// Detection only. The remainder occupies the `deg(P)` bits directly after
/// the payload; any unused low bits of the trailing byte stay zero. On read
/// the stream of payload-plus-remainder bits must divide evenly, otherwise
/// the block is reported corrupt.
pub struct CrcDevice {
    polynomial: CrcPolynomial,
    block_size: usize,
    data_size: usize,
}

impl CrcDevice {
    /// Builds the codec from the explicit integer form of the polynomial.
    ///
    /// # Errors
    ///
    /// Fails with [`FsError::InvalidRequest`] when the redundancy would not
    /// fit into the block.
    pub fn new(explicit_polynomial: u64, block_size: usize) -> Result<Self, FsError> {
        if explicit_polynomial < 2 {
            return Err(FsError::InvalidRequest);
        }
        let polynomial = CrcPolynomial::from_explicit(explicit_polynomial);
        let tail_bytes = polynomial.degree().div_ceil(8) as usize;
        if tail_bytes >= block_size {
            return Err(FsError::InvalidRequest);
        }

        Ok(Self {
            data_size: block_size - tail_bytes,
            polynomial,
            block_size,
        })
    }

    pub fn raw_block_size(&self) -> usize {
        self.block_size
    }

    pub fn data_size(&self) -> usize {
        self.data_size
    }

    /// Bits covered by the check: the payload plus the remainder tail,
    /// excluding byte-rounding slack.
    fn covered_bits(&self) -> usize {
        self.data_size * 8 + self.polynomial.degree() as usize
    }

    fn read_and_check<S: Storage>(
        &self,
        storage: &mut S,
        block: u32,
        raw: &mut [u8],
    ) -> CanFail<DeviceError> {
        read_raw(storage, block, self.block_size, raw)?;

        let mut stream = Vec::with_capacity(self.covered_bits());
        bits::push_bits(raw, self.covered_bits(), &mut stream);

        if self.polynomial.remainder(&stream).iter().any(|&b| b) {
            telemetry::record(FsEvent::ErrorDetection {
                codec: "CRC",
                block,
            });
            return Err(DeviceError::Correction);
        }
        Ok(())
    }

    /// Recomputes the remainder of the payload and writes the raw block.
    fn seal_and_write<S: Storage>(
        &self,
        storage: &mut S,
        block: u32,
        raw: &mut [u8],
    ) -> CanFail<DeviceError> {
        let mut stream = Vec::with_capacity(self.covered_bits());
        bits::push_bits(raw, self.data_size * 8, &mut stream);
        stream.extend(core::iter::repeat(false).take(self.polynomial.degree() as usize));

        let remainder = self.polynomial.remainder(&stream);
        for (i, &bit) in remainder.iter().enumerate() {
            bits::set_bit(raw, self.data_size * 8 + i, bit);
        }

        write_raw(storage, block, raw)
    }

    pub fn format_block<S: Storage>(&self, storage: &mut S, block: u32) -> CanFail<DeviceError> {
        let mut raw = vec![0u8; self.block_size];
        self.seal_and_write(storage, block, &mut raw)
    }

    pub fn read_block<S: Storage>(
        &self,
        storage: &mut S,
        loc: DataLocation,
        out: &mut [u8],
    ) -> Result<usize, DeviceError> {
        let mut raw = vec![0u8; self.block_size];
        self.read_and_check(storage, loc.block, &mut raw)?;

        let to_read = core::cmp::min(out.len(), self.data_size - loc.offset);
        out[..to_read].copy_from_slice(&raw[loc.offset..loc.offset + to_read]);

        Ok(to_read)
    }

    pub fn write_block<S: Storage>(
        &self,
        storage: &mut S,
        bytes: &[u8],
        loc: DataLocation,
    ) -> Result<usize, DeviceError> {
        let mut raw = vec![0u8; self.block_size];
        self.read_and_check(storage, loc.block, &mut raw)?;

        let to_write = core::cmp::min(bytes.len(), self.data_size - loc.offset);
        raw[loc.offset..loc.offset + to_write].copy_from_slice(&bytes[..to_write]);

        self.seal_and_write(storage, loc.block, &mut raw)?;

        Ok(to_write)
    }
}
