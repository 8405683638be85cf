//! On-disk superblock and its dual-copy manager.
//!
//! The superblock is written twice: a primary copy at the very start of the
//! medium and a backup in front of the reserved tail region, at raw block
//! `total_blocks - ceil(size_of::<SuperBlock>() / data_size)`. Both copies
//! are raw bytes on the byte-addressed storage, so a mount can parse the
//! primary before any codec exists.
//!
//! Reads prefer the primary copy; when it is unreadable or carries a bad
//! signature the backup is used and the primary rewritten from it. The
//! backup's byte offset is a function of fields recorded inside the
//! superblock itself (`total_blocks`, `block_size`, the codec parameters),
//! so a mount that has lost the primary cannot compute it directly.
//! [`SuperBlockManager::attach`] recovers by scanning the trailing region
//! of the medium for a backup that describes its own location; once either
//! copy is readable the manager holds both offsets and repairs copy by
//! copy.

use bytemuck::{bytes_of, pod_read_unaligned, Pod, Zeroable};

use crate::device::BlockDevice;
use crate::err::{CanFail, FsError};
use crate::storage::Storage;

/// Magic bytes at offset 0 of any mountable image.
pub const SB_SIGNATURE: [u8; 4] = *b"PPFS";

/// How far behind the end of the medium [`SuperBlockManager::attach`]
/// searches for the backup copy when the primary is gone.
const BACKUP_SCAN_WINDOW: u64 = 128 * 1024;

/// On-disk superblock. Packed, little-endian, 53 bytes.
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
#[repr(C, packed)]
pub struct SuperBlock {
    /// `"PPFS"`.
    pub signature: [u8; 4],

    /// Total number of raw blocks in the filesystem.
    pub total_blocks: u32,

    /// Total number of inode table slots.
    pub total_inodes: u32,

    /// First block of the data-block bitmap.
    pub block_bitmap_address: u32,

    /// First block of the inode bitmap.
    pub inode_bitmap_address: u32,

    /// First block of the inode table.
    pub inode_table_address: u32,

    /// First block of the journal; unused, journaling is configured out.
    pub journal_address: u32,

    /// First block of the data region.
    pub first_data_block_address: u32,

    /// Last block of the data region (inclusive).
    pub last_data_block_address: u32,

    /// Raw block size in bytes.
    pub block_size: u32,

    /// CRC generator polynomial, explicit form. Meaningful only when
    /// `ecc_type` selects CRC.
    pub crc_polynomial: u64,

    /// Correctable bytes per block. Meaningful only when `ecc_type` selects
    /// Reed-Solomon.
    pub rs_correctable_bytes: u32,

    /// [`crate::device::EccType`] discriminant.
    pub ecc_type: u8,
}

impl SuperBlock {
    pub const SIZE: usize = core::mem::size_of::<SuperBlock>();

    pub fn is_valid(&self) -> bool {
        self.signature == SB_SIGNATURE
    }

    /// Number of raw blocks reserved for one superblock copy.
    pub(crate) fn blocks_reserved(data_size: usize) -> u32 {
        Self::SIZE.div_ceil(data_size) as u32
    }

    /// Byte offset of the backup copy described by this superblock.
    pub(crate) fn backup_offset(&self) -> Result<u64, FsError> {
        let device = BlockDevice::new(
            self.ecc_type.try_into()?,
            self.block_size,
            self.crc_polynomial,
            self.rs_correctable_bytes,
        )?;
        let reserved = Self::blocks_reserved(device.data_size());
        let total_blocks = self.total_blocks;
        if total_blocks < reserved {
            return Err(FsError::Internal);
        }

        Ok((total_blocks - reserved) as u64 * device.raw_block_size() as u64)
    }
}

/// Manager of the two superblock copies.
#[derive(Debug)]
pub(crate) struct SuperBlockManager {
    /// Byte offsets of the primary and backup copies.
    entries: [u64; 2],
    cached: Option<SuperBlock>,
}

fn read_sb_at<S: Storage>(storage: &mut S, offset: u64) -> Result<SuperBlock, FsError> {
    let mut buf = [0u8; SuperBlock::SIZE];
    storage.read(offset, &mut buf)?;
    Ok(pod_read_unaligned(&buf))
}

impl SuperBlockManager {
    pub(crate) fn new(entries: [u64; 2]) -> Self {
        Self {
            entries,
            cached: None,
        }
    }

    /// Bootstraps the manager from an already-formatted medium.
    ///
    /// The primary copy is parsed first; when it is gone, the trailing
    /// region is scanned for a self-consistent backup, which is then used
    /// to rewrite the primary.
    ///
    /// # Errors
    ///
    /// Fails with [`FsError::Internal`] when neither copy can be located.
    pub(crate) fn attach<S: Storage>(storage: &mut S) -> Result<(Self, SuperBlock), FsError> {
        if let Ok(sb) = read_sb_at(storage, 0) {
            if sb.is_valid() {
                if let Ok(backup) = sb.backup_offset() {
                    let mut manager = Self::new([0, backup]);
                    manager.cached = Some(sb);
                    return Ok((manager, sb));
                }
            }
        }

        let (sb, backup) = Self::scan_backup(storage)?;
        let mut manager = Self::new([0, backup]);
        manager.cached = Some(sb);
        manager.write_copy(storage, 0)?;

        Ok((manager, sb))
    }

    /// Searches the trailing region of the medium for a backup copy that
    /// describes its own location.
    ///
    /// A candidate is accepted only when its signature matches, its
    /// `block_size` is a non-zero power of two, `total_blocks * block_size`
    /// equals the medium size, and the backup offset derived from its own
    /// fields equals the position it was found at. The window always covers
    /// the backup: copy 1 sits `ceil(53 / data_size)` raw blocks before the
    /// end of the filesystem.
    fn scan_backup<S: Storage>(storage: &mut S) -> Result<(SuperBlock, u64), FsError> {
        let size = storage.size();
        let window = core::cmp::min(size, BACKUP_SCAN_WINDOW) as usize;
        if window < SuperBlock::SIZE {
            return Err(FsError::Internal);
        }

        let base = size - window as u64;
        let mut region = alloc::vec![0u8; window];
        storage.read(base, &mut region)?;

        for p in 0..=window - SuperBlock::SIZE {
            if region[p..p + 4] != SB_SIGNATURE {
                continue;
            }
            let candidate: SuperBlock =
                pod_read_unaligned(&region[p..p + SuperBlock::SIZE]);
            let block_size = candidate.block_size;
            let total_blocks = candidate.total_blocks;
            if block_size == 0 || !block_size.is_power_of_two() {
                continue;
            }
            if total_blocks as u64 * block_size as u64 != size {
                continue;
            }
            match candidate.backup_offset() {
                Ok(offset) if offset == base + p as u64 => {
                    return Ok((candidate, offset));
                }
                _ => continue,
            }
        }

        Err(FsError::Internal)
    }

    fn write_copy<S: Storage>(&self, storage: &mut S, index: usize) -> CanFail<FsError> {
        let sb = self.cached.ok_or(FsError::InvalidRequest)?;
        storage.write(self.entries[index], bytes_of(&sb))?;
        Ok(())
    }

    /// Returns the current superblock, repairing earlier copies from the
    /// first readable one.
    ///
    /// # Errors
    ///
    /// Fails with [`FsError::Internal`] when both copies are bad.
    pub(crate) fn get<S: Storage>(&mut self, storage: &mut S) -> Result<SuperBlock, FsError> {
        if let Some(sb) = self.cached {
            return Ok(sb);
        }

        for i in 0..self.entries.len() {
            let sb = match read_sb_at(storage, self.entries[i]) {
                Ok(sb) if sb.is_valid() => sb,
                _ => continue,
            };

            self.cached = Some(sb);
            for j in 0..i {
                let _ = self.write_copy(storage, j);
            }
            return Ok(sb);
        }

        Err(FsError::Internal)
    }

    /// Writes `sb` to both copies; succeeds if at least one write lands.
    pub(crate) fn put<S: Storage>(
        &mut self,
        storage: &mut S,
        sb: SuperBlock,
    ) -> CanFail<FsError> {
        self.cached = Some(sb);

        let mut any_success = false;
        for i in 0..self.entries.len() {
            if self.write_copy(storage, i).is_ok() {
                any_success = true;
            }
        }

        if any_success {
            Ok(())
        } else {
            Err(FsError::Internal)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::EccType;
    use crate::storage::HeapStorage;
    extern crate std;

    #[test]
    fn superblock_layout_is_53_bytes() {
        assert_eq!(SuperBlock::SIZE, 53);
    }

    fn sample_sb(total_blocks: u32, block_size: u32) -> SuperBlock {
        SuperBlock {
            signature: SB_SIGNATURE,
            total_blocks,
            total_inodes: 128,
            block_bitmap_address: 5,
            inode_bitmap_address: 1,
            inode_table_address: 2,
            journal_address: 0,
            first_data_block_address: 6,
            last_data_block_address: total_blocks - 1,
            block_size,
            crc_polynomial: 0,
            rs_correctable_bytes: 0,
            ecc_type: EccType::None as u8,
        }
    }

    #[test]
    fn put_then_get_round_trips_both_copies() {
        let mut storage = HeapStorage::new(64 * 512);
        let sb = sample_sb(64, 512);
        let backup = sb.backup_offset().unwrap();

        let mut manager = SuperBlockManager::new([0, backup]);
        manager.put(&mut storage, sb).unwrap();

        let mut reader = SuperBlockManager::new([0, backup]);
        let back = reader.get(&mut storage).unwrap();
        assert!(back.is_valid());
        let total = back.total_blocks;
        assert_eq!(total, 64);

        // Both copies carry the signature.
        assert_eq!(&storage.bytes()[0..4], b"PPFS");
        assert_eq!(
            &storage.bytes()[backup as usize..backup as usize + 4],
            b"PPFS"
        );
    }

    #[test]
    fn bad_primary_is_repaired_from_the_backup() {
        let mut storage = HeapStorage::new(64 * 512);
        let sb = sample_sb(64, 512);
        let backup = sb.backup_offset().unwrap();

        let mut manager = SuperBlockManager::new([0, backup]);
        manager.put(&mut storage, sb).unwrap();

        // Clobber the primary signature.
        storage.bytes_mut()[0] = b'X';

        let mut reader = SuperBlockManager::new([0, backup]);
        let back = reader.get(&mut storage).unwrap();
        assert!(back.is_valid());
        assert_eq!(&storage.bytes()[0..4], b"PPFS");
    }

    #[test]
    fn attach_recovers_from_a_lost_primary() {
        let mut storage = HeapStorage::new(64 * 512);
        let sb = sample_sb(64, 512);
        let backup = sb.backup_offset().unwrap();

        let mut manager = SuperBlockManager::new([0, backup]);
        manager.put(&mut storage, sb).unwrap();
        storage.bytes_mut()[0..8].fill(0xEE);

        let (_, recovered) = SuperBlockManager::attach(&mut storage).unwrap();
        assert!(recovered.is_valid());
        let total = recovered.total_blocks;
        assert_eq!(total, 64);
        assert_eq!(&storage.bytes()[0..4], b"PPFS");
    }

    #[test]
    fn attach_fails_on_an_unformatted_medium() {
        let mut storage = HeapStorage::new(64 * 512);
        assert_eq!(
            SuperBlockManager::attach(&mut storage).unwrap_err(),
            FsError::Internal
        );
    }
}
