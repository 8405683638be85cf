//! Filesystem creation parameters.

use crate::device::EccType;

/// Parameters for [`crate::fs::Ppfs::format`].
#[derive(Clone, Copy, Debug)]
pub struct FsConfig {
    /// Total size of the filesystem in bytes; must be a multiple of
    /// `block_size`.
    pub total_size: u64,

    /// Expected average file size in bytes; sizes the inode table.
    pub average_file_size: u64,

    /// Raw block size in bytes; must be a power of two.
    pub block_size: u32,

    /// Error-control scheme for every block of the medium.
    pub ecc_type: EccType,

    /// CRC generator polynomial in explicit form; consulted only when
    /// `ecc_type` is [`EccType::Crc`].
    ///
    /// The default detects up to 5 flips in messages up to 30000 bits
    /// (CRC Zoo, implicit form `0x9960034c`).
    pub crc_polynomial: u64,

    /// Correctable bytes per block; consulted only when `ecc_type` is
    /// [`EccType::ReedSolomon`].
    pub rs_correctable_bytes: u32,

    /// Journaling switch. Must stay `false`; formatting with a journal is
    /// not implemented.
    pub use_journal: bool,
}

impl Default for FsConfig {
    fn default() -> Self {
        Self {
            total_size: 0,
            average_file_size: 0,
            block_size: 512,
            ecc_type: EccType::None,
            crc_polynomial: (0x9960034c << 1) | 1,
            rs_correctable_bytes: 3,
            use_journal: false,
        }
    }
}
