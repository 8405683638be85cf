use alloc::vec;

use crate::device::{read_raw, write_raw, DataLocation};
use crate::err::{CanFail, DeviceError};
use crate::storage::Storage;
use crate::telemetry::{self, FsEvent};

/// Even-parity codec: the trailing byte keeps the ones-count of the whole
/// raw block even.
///
/// Detects any odd number of bit flips; corrects nothing. The parity byte
/// is maintained by flipping its low bit whenever a payload update leaves
/// the count odd.
pub struct ParityDevice {
    block_size: usize,
}

impl ParityDevice {
    pub fn new(block_size: usize) -> Self {
        Self { block_size }
    }

    pub fn raw_block_size(&self) -> usize {
        self.block_size
    }

    pub fn data_size(&self) -> usize {
        self.block_size - 1
    }

    fn parity_is_even(raw: &[u8]) -> bool {
        raw.iter().map(|b| b.count_ones()).sum::<u32>() % 2 == 0
    }

    /// Zeroes the raw block; an all-zero block has even parity.
    pub fn format_block<S: Storage>(&self, storage: &mut S, block: u32) -> CanFail<DeviceError> {
        write_raw(storage, block, &vec![0u8; self.block_size])
    }

    pub fn read_block<S: Storage>(
        &self,
        storage: &mut S,
        loc: DataLocation,
        out: &mut [u8],
    ) -> Result<usize, DeviceError> {
        let mut raw = vec![0u8; self.block_size];
        read_raw(storage, loc.block, self.block_size, &mut raw)?;

        if !Self::parity_is_even(&raw) {
            telemetry::record(FsEvent::ErrorDetection {
                codec: "Parity",
                block: loc.block,
            });
            return Err(DeviceError::Correction);
        }

        let to_read = core::cmp::min(out.len(), self.data_size() - loc.offset);
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
        read_raw(storage, loc.block, self.block_size, &mut raw)?;

        if !Self::parity_is_even(&raw) {
            telemetry::record(FsEvent::ErrorDetection {
                codec: "Parity",
                block: loc.block,
            });
            return Err(DeviceError::Correction);
        }

        let to_write = core::cmp::min(bytes.len(), self.data_size() - loc.offset);
        raw[loc.offset..loc.offset + to_write].copy_from_slice(&bytes[..to_write]);

        if !Self::parity_is_even(&raw) {
            raw[self.block_size - 1] ^= 1;
        }
        write_raw(storage, loc.block, &raw)?;

        Ok(to_write)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::HeapStorage;
    extern crate std;

    #[test]
    fn payload_loses_the_parity_byte() {
        assert_eq!(ParityDevice::new(32).data_size(), 31);
    }

    #[test]
    fn written_blocks_always_have_even_parity() {
        let mut storage = HeapStorage::new(256);
        let device = ParityDevice::new(32);

        device
            .write_block(&mut storage, &[0x01, 0x03, 0x07], DataLocation::at(1))
            .unwrap();
        let raw = &storage.bytes()[32..64];
        assert!(ParityDevice::parity_is_even(raw));

        let mut out = [0u8; 3];
        device
            .read_block(&mut storage, DataLocation::at(1), &mut out)
            .unwrap();
        assert_eq!(out, [0x01, 0x03, 0x07]);
    }

    #[test]
    fn single_flip_is_detected_on_read() {
        let mut storage = HeapStorage::new(256);
        let device = ParityDevice::new(32);

        device
            .write_block(&mut storage, &[0xAA; 31], DataLocation::at(0))
            .unwrap();
        storage.flip_bit(7 * 8 + 2);

        let mut out = [0u8; 31];
        assert_eq!(
            device.read_block(&mut storage, DataLocation::at(0), &mut out),
            Err(DeviceError::Correction)
        );
    }

    #[test]
    fn corrupted_block_refuses_the_next_write() {
        let mut storage = HeapStorage::new(256);
        let device = ParityDevice::new(32);

        device
            .write_block(&mut storage, &[0x55; 8], DataLocation::at(0))
            .unwrap();
        storage.flip_bit(3);

        assert_eq!(
            device.write_block(&mut storage, &[0u8; 4], DataLocation::at(0)),
            Err(DeviceError::Correction)
        );
        // The block is left as it was.
        assert_eq!(storage.bytes()[0] & !0x10, 0x55 & !0x10);
    }

    #[test]
    fn double_flip_goes_unnoticed() {
        let mut storage = HeapStorage::new(256);
        let device = ParityDevice::new(32);

        device
            .write_block(&mut storage, &[0xF0; 31], DataLocation::at(0))
            .unwrap();
        storage.flip_bit(10);
        storage.flip_bit(50);

        let mut out = [0u8; 31];
        assert!(device
            .read_block(&mut storage, DataLocation::at(0), &mut out)
            .is_ok());
    }
}
