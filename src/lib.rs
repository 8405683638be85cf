//! `PPFS` is a small block-addressed filesystem for storage media exposed to
//! bit-flip and stuck-bit faults (embedded or space-grade NAND / SRAM).
//!
//! The crate stacks three layers between a raw byte-addressed [`Storage`]
//! medium and a POSIX-shaped file API:
//!
//! - pluggable block-level error-control codecs ([`device::BlockDevice`]):
//!   pass-through, parity, CRC, extended Hamming and Reed-Solomon over
//!   GF(256),
//! - the on-disk engine (superblock, bitmaps, inode table, data-block
//!   allocator, direct / indirect block indexing),
//! - the session layer ([`fs::Ppfs`]): open-files table, path resolution,
//!   and a single mutex serializing every public operation.
//!
//! All on-disk structures are packed and little-endian; their layout is part
//! of the disk image format and must not change.
//!
//! [`Storage`]: storage::Storage

#![no_std]

extern crate alloc;

#[cfg(any(test, feature = "std"))]
extern crate std;

pub mod device;
pub mod ecc;
pub mod err;
pub mod fs;
pub mod storage;
pub mod telemetry;

pub use device::EccType;
pub use err::{CanFail, DeviceError, FsError, FsResult, StorageError};
pub use fs::{FileAttributes, FsConfig, OpenMode, Ppfs};
pub use storage::Storage;
