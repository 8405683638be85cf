//! Disk-backed bit array.
//!
//! Both allocation bitmaps are stored through the block codec as plain
//! payload bytes, MSB-first (bit 0 of a byte is `0x80`). The bitmap spans
//! `ceil(ceil(bit_count / 8) / data_size)` consecutive blocks starting at
//! its start block.

use alloc::vec;

use crate::device::{BlockDevice, DataLocation};
use crate::ecc::bits;
use crate::err::{CanFail, FsError};
use crate::storage::Storage;

/// A bit array stored on disk, with a cached ones-count.
pub(crate) struct Bitmap {
    start_block: u32,
    bit_count: u64,
    ones: Option<u64>,
}

impl Bitmap {
    pub(crate) fn new(start_block: u32, bit_count: u64) -> Self {
        Self {
            start_block,
            bit_count,
            ones: None,
        }
    }

    pub(crate) fn bit_count(&self) -> u64 {
        self.bit_count
    }

    /// Number of blocks the bitmap occupies.
    pub(crate) fn blocks_spanned(&self, data_size: usize) -> u32 {
        (self.bit_count.div_ceil(8).div_ceil(data_size as u64)) as u32
    }

    fn byte_location(&self, data_size: usize, bit_index: u64) -> DataLocation {
        let byte = bit_index / 8;
        DataLocation::new(
            self.start_block + (byte / data_size as u64) as u32,
            (byte % data_size as u64) as usize,
        )
    }

    fn read_byte<S: Storage>(
        &self,
        device: &BlockDevice,
        storage: &mut S,
        bit_index: u64,
    ) -> Result<u8, FsError> {
        let mut byte = [0u8; 1];
        device.read_block(
            storage,
            self.byte_location(device.data_size(), bit_index),
            &mut byte,
        )?;
        Ok(byte[0])
    }

    pub(crate) fn get_bit<S: Storage>(
        &self,
        device: &BlockDevice,
        storage: &mut S,
        bit_index: u64,
    ) -> Result<bool, FsError> {
        if bit_index >= self.bit_count {
            return Err(FsError::IndexOutOfRange);
        }
        let byte = self.read_byte(device, storage, bit_index)?;
        Ok((byte >> (7 - (bit_index % 8))) & 1 != 0)
    }

    pub(crate) fn set_bit<S: Storage>(
        &mut self,
        device: &BlockDevice,
        storage: &mut S,
        bit_index: u64,
        value: bool,
    ) -> CanFail<FsError> {
        if bit_index >= self.bit_count {
            return Err(FsError::IndexOutOfRange);
        }

        let old = self.read_byte(device, storage, bit_index)?;
        let mask = 0x80u8 >> (bit_index % 8);
        let new = if value { old | mask } else { old & !mask };

        device.write_block(
            storage,
            &[new],
            self.byte_location(device.data_size(), bit_index),
        )?;

        if new != old {
            if let Some(ones) = self.ones.as_mut() {
                if value {
                    *ones += 1;
                } else {
                    *ones -= 1;
                }
            }
        }
        Ok(())
    }

    /// Counts the bits equal to `value`, scanning the spanned blocks unless
    /// the ones-count is cached.
    pub(crate) fn count<S: Storage>(
        &mut self,
        device: &BlockDevice,
        storage: &mut S,
        value: bool,
    ) -> Result<u64, FsError> {
        let ones = match self.ones {
            Some(ones) => ones,
            None => {
                let ones = self.scan_ones(device, storage)?;
                self.ones = Some(ones);
                ones
            }
        };

        Ok(if value { ones } else { self.bit_count - ones })
    }

    fn scan_ones<S: Storage>(
        &self,
        device: &BlockDevice,
        storage: &mut S,
    ) -> Result<u64, FsError> {
        let data_size = device.data_size();
        let spanned = self.blocks_spanned(data_size);
        let mut buf = vec![0u8; data_size];
        let mut ones: u64 = 0;

        for block in 0..spanned.saturating_sub(1) {
            device.read_block(
                storage,
                DataLocation::at(self.start_block + block),
                &mut buf,
            )?;
            ones += buf.iter().map(|b| b.count_ones() as u64).sum::<u64>();
        }

        // The last block may cover more bits than the bitmap holds.
        device.read_block(
            storage,
            DataLocation::at(self.start_block + spanned - 1),
            &mut buf,
        )?;
        let mut tail_bits = self.bit_count % (data_size as u64 * 8);
        if tail_bits == 0 {
            tail_bits = data_size as u64 * 8;
        }
        for i in 0..tail_bits as usize {
            ones += bits::get_bit(&buf, i) as u64;
        }

        Ok(ones)
    }

    /// Index of the first bit equal to `value`, in block order.
    ///
    /// # Errors
    ///
    /// Fails with [`FsError::NotFound`] when no bit matches.
    pub(crate) fn first_eq<S: Storage>(
        &self,
        device: &BlockDevice,
        storage: &mut S,
        value: bool,
    ) -> Result<u64, FsError> {
        let data_size = device.data_size();
        let mut buf = vec![0u8; data_size];

        for block in 0..self.blocks_spanned(data_size) {
            device.read_block(
                storage,
                DataLocation::at(self.start_block + block),
                &mut buf,
            )?;

            for i in 0..data_size * 8 {
                let index = block as u64 * data_size as u64 * 8 + i as u64;
                if index >= self.bit_count {
                    return Err(FsError::NotFound);
                }
                if bits::get_bit(&buf, i) == value {
                    return Ok(index);
                }
            }
        }
        Err(FsError::NotFound)
    }

    /// Fills the whole bitmap with `value` and resets the cached count.
    pub(crate) fn set_all<S: Storage>(
        &mut self,
        device: &BlockDevice,
        storage: &mut S,
        value: bool,
    ) -> CanFail<FsError> {
        let data_size = device.data_size();
        let fill = vec![if value { 0xFFu8 } else { 0x00u8 }; data_size];

        for block in 0..self.blocks_spanned(data_size) {
            device.write_block(storage, &fill, DataLocation::at(self.start_block + block))?;
        }

        self.ones = Some(if value { self.bit_count } else { 0 });
        Ok(())
    }
}
