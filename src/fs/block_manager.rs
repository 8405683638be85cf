//! Data-block allocator.
//!
//! A bitmap with one bit per block of the data region, 1 = used. The
//! manager speaks absolute raw-block indices; the bitmap itself is indexed
//! relative to the first data block.

use crate::device::BlockDevice;
use crate::err::{CanFail, FsError};
use crate::fs::bitmap::Bitmap;
use crate::fs::sb::SuperBlock;
use crate::storage::Storage;

pub(crate) struct BlockManager {
    bitmap: Bitmap,
    first_data_block: u32,
}

impl BlockManager {
    pub(crate) fn new(sb: &SuperBlock) -> Self {
        let count = sb.last_data_block_address - sb.first_data_block_address + 1;
        Self {
            bitmap: Bitmap::new(sb.block_bitmap_address, count as u64),
            first_data_block: sb.first_data_block_address,
        }
    }

    fn to_relative(&self, absolute: u32) -> u64 {
        (absolute - self.first_data_block) as u64
    }

    pub(crate) fn format<S: Storage>(
        &mut self,
        device: &BlockDevice,
        storage: &mut S,
    ) -> CanFail<FsError> {
        self.bitmap.set_all(device, storage, false)
    }

    /// Marks `block` (absolute index) used.
    ///
    /// # Errors
    ///
    /// Fails with [`FsError::AlreadyTaken`] when the block is already used.
    pub(crate) fn reserve<S: Storage>(
        &mut self,
        device: &BlockDevice,
        storage: &mut S,
        block: u32,
    ) -> CanFail<FsError> {
        let relative = self.to_relative(block);
        if self.bitmap.get_bit(device, storage, relative)? {
            return Err(FsError::AlreadyTaken);
        }
        self.bitmap.set_bit(device, storage, relative, true)
    }

    /// Releases `block` (absolute index).
    ///
    /// # Errors
    ///
    /// Fails with [`FsError::AlreadyFree`] when the block is already free.
    pub(crate) fn free<S: Storage>(
        &mut self,
        device: &BlockDevice,
        storage: &mut S,
        block: u32,
    ) -> CanFail<FsError> {
        let relative = self.to_relative(block);
        if !self.bitmap.get_bit(device, storage, relative)? {
            return Err(FsError::AlreadyFree);
        }
        self.bitmap.set_bit(device, storage, relative, false)
    }

    /// Absolute index of the first free data block.
    ///
    /// # Errors
    ///
    /// Fails with [`FsError::NoMoreFreeBlocks`] when the region is full.
    pub(crate) fn get_free<S: Storage>(
        &mut self,
        device: &BlockDevice,
        storage: &mut S,
    ) -> Result<u32, FsError> {
        match self.bitmap.first_eq(device, storage, false) {
            Ok(relative) => Ok(self.first_data_block + relative as u32),
            Err(FsError::NotFound) => Err(FsError::NoMoreFreeBlocks),
            Err(e) => Err(e),
        }
    }

    pub(crate) fn free_count<S: Storage>(
        &mut self,
        device: &BlockDevice,
        storage: &mut S,
    ) -> Result<u64, FsError> {
        self.bitmap.count(device, storage, false)
    }

    pub(crate) fn total(&self) -> u64 {
        self.bitmap.bit_count()
    }
}
