//! Block-level error-control codecs.
//!
//! A [`BlockDevice`] divides the raw [`Storage`] into fixed-size raw blocks
//! and maps each one to a smaller payload plus codec redundancy. The five
//! codecs share one contract:
//!
//! - reads and writes address `(block, offset)` inside the payload and are
//!   clamped to `data_size - offset`,
//! - a write is read-modify-write at block granularity: the current raw
//!   block is decoded first, and uncorrectable corruption fails the write
//!   with [`DeviceError::Correction`] without touching the block,
//! - corrected and detected corruptions are reported through
//!   [`crate::telemetry`].
//!
//! The codec is a value: its state (sizes, polynomial, generator) is small
//! and immutable, and it borrows the storage only for the duration of one
//! call. Dispatch is a single `match` on the codec kind.

use crate::err::{CanFail, DeviceError, FsError};
use crate::storage::Storage;

mod crc;
mod hamming;
mod parity;
mod raw;
mod rs;

pub use crc::CrcDevice;
pub use hamming::HammingDevice;
pub use parity::ParityDevice;
pub use raw::RawDevice;
pub use rs::ReedSolomonDevice;

/// Supported error-control schemes.
///
/// The discriminants are stored in the superblock and are part of the
/// on-disk format.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum EccType {
    /// No error control.
    #[default]
    None = 0,

    /// Cyclic redundancy check (detection only).
    Crc = 1,

    /// Extended Hamming code (single-bit correction, double-bit detection).
    Hamming = 2,

    /// Even parity byte (detection only).
    Parity = 3,

    /// Reed-Solomon over GF(256) (multi-byte correction).
    ReedSolomon = 4,
}

impl TryFrom<u8> for EccType {
    type Error = FsError;

    fn try_from(tag: u8) -> Result<Self, FsError> {
        match tag {
            0 => Ok(EccType::None),
            1 => Ok(EccType::Crc),
            2 => Ok(EccType::Hamming),
            3 => Ok(EccType::Parity),
            4 => Ok(EccType::ReedSolomon),
            _ => Err(FsError::InvalidRequest),
        }
    }
}

/// Payload position addressed by a block read or write.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DataLocation {
    /// Raw block index.
    pub block: u32,

    /// Byte offset inside the block payload.
    pub offset: usize,
}

impl DataLocation {
    pub fn new(block: u32, offset: usize) -> Self {
        Self { block, offset }
    }

    /// Start of the block payload.
    pub fn at(block: u32) -> Self {
        Self { block, offset: 0 }
    }
}

/// A block codec over a raw storage medium.
pub enum BlockDevice {
    Raw(RawDevice),
    Parity(ParityDevice),
    Crc(CrcDevice),
    Hamming(HammingDevice),
    ReedSolomon(ReedSolomonDevice),
}

impl BlockDevice {
    /// Builds the codec selected by `ecc`.
    ///
    /// `crc_polynomial` (explicit form) is only consulted for
    /// [`EccType::Crc`] and `rs_correctable_bytes` only for
    /// [`EccType::ReedSolomon`].
    ///
    /// # Errors
    ///
    /// Fails with [`FsError::InvalidRequest`] when the parameters leave no
    /// payload space in a block.
    pub fn new(
        ecc: EccType,
        block_size: u32,
        crc_polynomial: u64,
        rs_correctable_bytes: u32,
    ) -> Result<Self, FsError> {
        let device = match ecc {
            EccType::None => BlockDevice::Raw(RawDevice::new(block_size as usize)),
            EccType::Parity => BlockDevice::Parity(ParityDevice::new(block_size as usize)),
            EccType::Crc => {
                BlockDevice::Crc(CrcDevice::new(crc_polynomial, block_size as usize)?)
            }
            EccType::Hamming => {
                BlockDevice::Hamming(HammingDevice::new(block_size as usize)?)
            }
            EccType::ReedSolomon => BlockDevice::ReedSolomon(ReedSolomonDevice::new(
                block_size as usize,
                rs_correctable_bytes as usize,
            )?),
        };

        if device.data_size() == 0 {
            return Err(FsError::InvalidRequest);
        }
        Ok(device)
    }

    /// Size of one raw block in bytes, redundancy included.
    pub fn raw_block_size(&self) -> usize {
        match self {
            BlockDevice::Raw(d) => d.raw_block_size(),
            BlockDevice::Parity(d) => d.raw_block_size(),
            BlockDevice::Crc(d) => d.raw_block_size(),
            BlockDevice::Hamming(d) => d.raw_block_size(),
            BlockDevice::ReedSolomon(d) => d.raw_block_size(),
        }
    }

    /// Usable payload bytes per raw block.
    pub fn data_size(&self) -> usize {
        match self {
            BlockDevice::Raw(d) => d.data_size(),
            BlockDevice::Parity(d) => d.data_size(),
            BlockDevice::Crc(d) => d.data_size(),
            BlockDevice::Hamming(d) => d.data_size(),
            BlockDevice::ReedSolomon(d) => d.data_size(),
        }
    }

    /// Number of raw blocks the medium holds.
    pub fn num_of_blocks<S: Storage>(&self, storage: &S) -> u64 {
        storage.size() / self.raw_block_size() as u64
    }

    /// Resets a raw block to a valid, all-zero-payload state.
    pub fn format_block<S: Storage>(&self, storage: &mut S, block: u32) -> CanFail<DeviceError> {
        match self {
            BlockDevice::Raw(d) => d.format_block(storage, block),
            BlockDevice::Parity(d) => d.format_block(storage, block),
            BlockDevice::Crc(d) => d.format_block(storage, block),
            BlockDevice::Hamming(d) => d.format_block(storage, block),
            BlockDevice::ReedSolomon(d) => d.format_block(storage, block),
        }
    }

    /// Reads payload bytes at `loc` into `out`, returning how many were
    /// produced (clamped to the end of the payload).
    ///
    /// # Errors
    ///
    /// Fails with [`DeviceError::Correction`] when the raw block is
    /// corrupted beyond repair; storage failures pass through.
    pub fn read_block<S: Storage>(
        &self,
        storage: &mut S,
        loc: DataLocation,
        out: &mut [u8],
    ) -> Result<usize, DeviceError> {
        match self {
            BlockDevice::Raw(d) => d.read_block(storage, loc, out),
            BlockDevice::Parity(d) => d.read_block(storage, loc, out),
            BlockDevice::Crc(d) => d.read_block(storage, loc, out),
            BlockDevice::Hamming(d) => d.read_block(storage, loc, out),
            BlockDevice::ReedSolomon(d) => d.read_block(storage, loc, out),
        }
    }

    /// Writes `bytes` at `loc`, returning how many were accepted (clamped
    /// to the end of the payload).
    ///
    /// # Errors
    ///
    /// Fails with [`DeviceError::Correction`] when the pre-write decode of
    /// the raw block finds uncorrectable corruption; the block is left
    /// unchanged. Storage failures pass through.
    pub fn write_block<S: Storage>(
        &self,
        storage: &mut S,
        bytes: &[u8],
        loc: DataLocation,
    ) -> Result<usize, DeviceError> {
        match self {
            BlockDevice::Raw(d) => d.write_block(storage, bytes, loc),
            BlockDevice::Parity(d) => d.write_block(storage, bytes, loc),
            BlockDevice::Crc(d) => d.write_block(storage, bytes, loc),
            BlockDevice::Hamming(d) => d.write_block(storage, bytes, loc),
            BlockDevice::ReedSolomon(d) => d.write_block(storage, bytes, loc),
        }
    }
}

/// Reads one full raw block into a scratch buffer.
fn read_raw<S: Storage>(
    storage: &mut S,
    block: u32,
    raw_block_size: usize,
    buf: &mut [u8],
) -> CanFail<DeviceError> {
    storage
        .read(block as u64 * raw_block_size as u64, &mut buf[..raw_block_size])
        .map_err(DeviceError::from)
}

/// Writes one full raw block back.
fn write_raw<S: Storage>(
    storage: &mut S,
    block: u32,
    raw: &[u8],
) -> CanFail<DeviceError> {
    storage
        .write(block as u64 * raw.len() as u64, raw)
        .map(|_| ())
        .map_err(DeviceError::from)
}
