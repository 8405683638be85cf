//! Inode records and the inode table manager.
//!
//! Inodes live in a packed on-disk table right after the inode bitmap. The
//! bitmap polarity is 1 = free (the opposite of the data-block bitmap; both
//! polarities are baked into existing disk images). Inode 0 is always the
//! root directory, installed by `format` and never removable.
//!
//! Because the codec chooses `data_size` freely, an inode record may
//! straddle a raw-block boundary; reads and writes split the record across
//! as many blocks as needed.

use bytemuck::{bytes_of, pod_read_unaligned, Pod, Zeroable};

use crate::device::{BlockDevice, DataLocation};
use crate::err::{CanFail, FsError};
use crate::fs::bitmap::Bitmap;
use crate::fs::sb::SuperBlock;
use crate::storage::Storage;

/// Number of data blocks addressed directly from the inode.
pub const DIRECT_BLOCKS: usize = 12;

/// Inode record kind.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(transparent)]
pub struct InodeKind(u8);

impl InodeKind {
    pub const FILE: Self = Self(0);
    pub const DIRECTORY: Self = Self(1);
}

/// On-disk inode. Packed, little-endian, 85 bytes.
///
/// Unoccupied block pointer slots have unspecified contents; only the
/// slots implied by `file_size` are meaningful. The two time fields are
/// opaque to the engine.
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
#[repr(C, packed)]
pub struct Inode {
    pub time_creation: u64,
    pub time_modified: u64,

    /// The first twelve data-block pointers, stored inline.
    pub direct_blocks: [u32; DIRECT_BLOCKS],

    /// Block of data-block pointers.
    pub indirect_block: u32,

    /// Block of pointers to singly-indirect blocks.
    pub doubly_indirect_block: u32,

    /// Block of pointers to doubly-indirect blocks.
    pub trebly_indirect_block: u32,

    /// File size in bytes; always equals the materialized extent.
    pub file_size: u32,

    pub kind: InodeKind,
}

impl Inode {
    pub const SIZE: usize = core::mem::size_of::<Inode>();

    pub(crate) fn new_file() -> Self {
        Self {
            kind: InodeKind::FILE,
            ..Zeroable::zeroed()
        }
    }

    pub(crate) fn new_directory() -> Self {
        Self {
            kind: InodeKind::DIRECTORY,
            ..Zeroable::zeroed()
        }
    }

    pub fn is_directory(&self) -> bool {
        self.kind == InodeKind::DIRECTORY
    }
}

/// Manager of the inode table and its allocation bitmap.
pub(crate) struct InodeManager {
    bitmap: Bitmap,
    table_address: u32,
}

impl InodeManager {
    pub(crate) fn new(sb: &SuperBlock) -> Self {
        Self {
            bitmap: Bitmap::new(sb.inode_bitmap_address, sb.total_inodes as u64),
            table_address: sb.inode_table_address,
        }
    }

    fn locate(&self, data_size: usize, index: u32) -> DataLocation {
        let byte = index as u64 * Inode::SIZE as u64;
        DataLocation::new(
            self.table_address + (byte / data_size as u64) as u32,
            (byte % data_size as u64) as usize,
        )
    }

    fn write_record<S: Storage>(
        &self,
        device: &BlockDevice,
        storage: &mut S,
        index: u32,
        inode: &Inode,
    ) -> CanFail<FsError> {
        let bytes = bytes_of(inode);
        let mut loc = self.locate(device.data_size(), index);
        let mut written = 0;

        while written < Inode::SIZE {
            let n = device.write_block(storage, &bytes[written..], loc)?;
            written += n;
            loc = DataLocation::at(loc.block + 1);
        }
        Ok(())
    }

    fn read_record<S: Storage>(
        &self,
        device: &BlockDevice,
        storage: &mut S,
        index: u32,
    ) -> Result<Inode, FsError> {
        let mut bytes = [0u8; Inode::SIZE];
        let mut loc = self.locate(device.data_size(), index);
        let mut read = 0;

        while read < Inode::SIZE {
            let n = device.read_block(storage, loc, &mut bytes[read..])?;
            read += n;
            loc = DataLocation::at(loc.block + 1);
        }
        Ok(pod_read_unaligned(&bytes))
    }

    /// Marks every inode free, then installs the root directory at index 0.
    pub(crate) fn format<S: Storage>(
        &mut self,
        device: &BlockDevice,
        storage: &mut S,
    ) -> CanFail<FsError> {
        self.bitmap.set_all(device, storage, true)?;

        if !self.bitmap.get_bit(device, storage, 0)? {
            return Err(FsError::AlreadyTaken);
        }
        self.write_record(device, storage, 0, &Inode::new_directory())?;
        self.bitmap.set_bit(device, storage, 0, false)
    }

    /// Writes `inode` into the first free slot and marks it used.
    ///
    /// # Errors
    ///
    /// Fails with [`FsError::NoMoreFreeInodes`] when the table is full.
    pub(crate) fn create<S: Storage>(
        &mut self,
        device: &BlockDevice,
        storage: &mut S,
        inode: &Inode,
    ) -> Result<u32, FsError> {
        let index = match self.bitmap.first_eq(device, storage, true) {
            Ok(index) => index as u32,
            Err(FsError::NotFound) => return Err(FsError::NoMoreFreeInodes),
            Err(e) => return Err(e),
        };

        self.write_record(device, storage, index, inode)?;
        self.bitmap.set_bit(device, storage, index as u64, false)?;

        Ok(index)
    }

    /// Releases the slot; the record bytes are left behind.
    pub(crate) fn remove<S: Storage>(
        &mut self,
        device: &BlockDevice,
        storage: &mut S,
        index: u32,
    ) -> CanFail<FsError> {
        if self.bitmap.get_bit(device, storage, index as u64)? {
            return Err(FsError::AlreadyFree);
        }
        self.bitmap.set_bit(device, storage, index as u64, true)
    }

    pub(crate) fn get<S: Storage>(
        &self,
        device: &BlockDevice,
        storage: &mut S,
        index: u32,
    ) -> Result<Inode, FsError> {
        if self.bitmap.get_bit(device, storage, index as u64)? {
            return Err(FsError::NotFound);
        }
        self.read_record(device, storage, index)
    }

    /// Rewrites the record of an inode that is in use.
    pub(crate) fn update<S: Storage>(
        &self,
        device: &BlockDevice,
        storage: &mut S,
        index: u32,
        inode: &Inode,
    ) -> CanFail<FsError> {
        if self.bitmap.get_bit(device, storage, index as u64)? {
            return Err(FsError::NotFound);
        }
        self.write_record(device, storage, index, inode)
    }

    pub(crate) fn free_count<S: Storage>(
        &mut self,
        device: &BlockDevice,
        storage: &mut S,
    ) -> Result<u64, FsError> {
        self.bitmap.count(device, storage, true)
    }
}
