use alloc::vec;

use crate::device::{read_raw, write_raw, DataLocation};
use crate::ecc::bits;
use crate::err::{CanFail, DeviceError, FsError};
use crate::storage::Storage;
use crate::telemetry::{self, FsEvent};

/// Extended Hamming codec: single-bit correction, double-bit detection.
///
/// The raw block size must be a power of two (`2^k` bytes). Hamming parity
/// bits sit at raw-bit positions `1, 2, 4, ..`, the overall parity bit at
/// position 0, and the payload bits fill the remaining positions in
/// increasing order. `k` check bits cover `2^k` byte blocks, so the payload
/// is `2^k - ceil((3k + 1) / 8)` bytes; the byte-rounding slack bits stay
/// unused and zero.
///
/// A corrected bit is written back to the medium immediately, so a healthy
/// read leaves the block clean again.
pub struct HammingDevice {
    block_size: usize,
    data_size: usize,
}

/// Raw-bit positions holding payload bits: everything except position 0 and
/// the powers of two, in increasing order.
struct DataBitPositions {
    current: u32,
    remaining: u32,
}

impl DataBitPositions {
    fn new(data_size: usize) -> Self {
        Self {
            current: 0,
            remaining: (data_size * 8) as u32,
        }
    }
}

impl Iterator for DataBitPositions {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        if self.remaining == 0 {
            return None;
        }
        while self.current == 0 || self.current.is_power_of_two() {
            self.current += 1;
        }
        self.remaining -= 1;
        let position = self.current;
        self.current += 1;
        Some(position)
    }
}

/// Every raw-bit position that participates in the code: payload and parity
/// positions in increasing order, then the parity positions above the last
/// payload bit. Slack bits are never yielded.
struct UsedBitPositions {
    current: u32,
    data_remaining: u32,
    next_parity: u32,
    total_bits: u32,
}

impl UsedBitPositions {
    fn new(block_size: usize, data_size: usize) -> Self {
        Self {
            current: 0,
            data_remaining: (data_size * 8) as u32,
            next_parity: 1,
            total_bits: (block_size * 8) as u32,
        }
    }
}

impl Iterator for UsedBitPositions {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        if self.data_remaining == 0 {
            if self.next_parity >= self.total_bits {
                return None;
            }
            let position = self.next_parity;
            self.next_parity <<= 1;
            return Some(position);
        }

        let position = self.current;
        if position.is_power_of_two() {
            self.next_parity = position << 1;
        } else if position != 0 {
            self.data_remaining -= 1;
        }
        self.current += 1;
        Some(position)
    }
}

impl HammingDevice {
    /// # Errors
    ///
    /// Fails with [`FsError::InvalidRequest`] unless `block_size` is a
    /// power of two large enough to hold the check bits.
    pub fn new(block_size: usize) -> Result<Self, FsError> {
        if !block_size.is_power_of_two() {
            return Err(FsError::InvalidRequest);
        }
        let k = block_size.trailing_zeros() as usize;
        let parity_bytes = (3 * k + 1).div_ceil(8);
        if parity_bytes >= block_size {
            return Err(FsError::InvalidRequest);
        }

        Ok(Self {
            block_size,
            data_size: block_size - parity_bytes,
        })
    }

    pub fn raw_block_size(&self) -> usize {
        self.block_size
    }

    pub fn data_size(&self) -> usize {
        self.data_size
    }

    /// Reads the raw block, correcting a single flipped bit in place.
    ///
    /// The syndrome is the XOR of every set bit position; the overall
    /// parity disambiguates one flip (odd) from two (even but non-zero
    /// syndrome).
    fn read_and_fix<S: Storage>(
        &self,
        storage: &mut S,
        block: u32,
        raw: &mut [u8],
    ) -> CanFail<DeviceError> {
        read_raw(storage, block, self.block_size, raw)?;

        let mut syndrome: u32 = 0;
        let mut parity_even = true;
        for position in UsedBitPositions::new(self.block_size, self.data_size) {
            if bits::get_bit(raw, position as usize) {
                syndrome ^= position;
                parity_even = !parity_even;
            }
        }

        if !parity_even {
            let position = syndrome as usize;
            let fixed = !bits::get_bit(raw, position);
            bits::set_bit(raw, position, fixed);

            let byte = position / 8;
            storage.write(
                block as u64 * self.block_size as u64 + byte as u64,
                &raw[byte..byte + 1],
            )?;
            telemetry::record(FsEvent::ErrorCorrection {
                codec: "Hamming",
                block,
            });
        } else if syndrome != 0 {
            telemetry::record(FsEvent::ErrorDetection {
                codec: "Hamming",
                block,
            });
            return Err(DeviceError::Correction);
        }

        Ok(())
    }

    fn extract(&self, raw: &[u8], payload: &mut [u8]) {
        let mut positions = DataBitPositions::new(self.data_size);
        for i in 0..self.data_size * 8 {
            let position = positions.next().expect("payload bit positions exhausted");
            bits::set_bit(payload, i, bits::get_bit(raw, position as usize));
        }
    }

    fn encode(&self, payload: &[u8], raw: &mut [u8]) {
        raw.fill(0);

        let mut parity_even = true;
        let mut syndrome_xor: u32 = 0;

        let mut positions = DataBitPositions::new(self.data_size);
        for i in 0..self.data_size * 8 {
            let position = positions.next().expect("payload bit positions exhausted");
            let bit = bits::get_bit(payload, i);
            if bit {
                parity_even = !parity_even;
                syndrome_xor ^= position;
            }
            bits::set_bit(raw, position as usize, bit);
        }

        let mut parity_position: u32 = 1;
        while (parity_position as usize) < self.block_size * 8 {
            let bit = syndrome_xor & parity_position != 0;
            if bit {
                parity_even = !parity_even;
            }
            bits::set_bit(raw, parity_position as usize, bit);
            parity_position <<= 1;
        }

        bits::set_bit(raw, 0, !parity_even);
    }

    /// Zeroes the raw block; an all-zero block is a valid codeword.
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
        self.read_and_fix(storage, loc.block, &mut raw)?;

        let mut payload = vec![0u8; self.data_size];
        self.extract(&raw, &mut payload);

        let to_read = core::cmp::min(out.len(), self.data_size - loc.offset);
        out[..to_read].copy_from_slice(&payload[loc.offset..loc.offset + to_read]);

        Ok(to_read)
    }

    pub fn write_block<S: Storage>(
        &self,
        storage: &mut S,
        bytes: &[u8],
        loc: DataLocation,
    ) -> Result<usize, DeviceError> {
        let mut raw = vec![0u8; self.block_size];
        self.read_and_fix(storage, loc.block, &mut raw)?;

        let mut payload = vec![0u8; self.data_size];
        self.extract(&raw, &mut payload);

        let to_write = core::cmp::min(bytes.len(), self.data_size - loc.offset);
        payload[loc.offset..loc.offset + to_write].copy_from_slice(&bytes[..to_write]);

        self.encode(&payload, &mut raw);
        write_raw(storage, loc.block, &raw)?;

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
    fn payload_size_follows_the_check_bit_count() {
        // 2^4 = 16 bytes, 3*4 + 1 = 13 check bits -> 2 parity bytes.
        assert_eq!(HammingDevice::new(16).unwrap().data_size(), 14);
        // 2^8 = 256 bytes, 25 check bits -> 4 parity bytes.
        assert_eq!(HammingDevice::new(256).unwrap().data_size(), 252);
        assert!(HammingDevice::new(24).is_err());
    }

    #[test]
    fn data_positions_skip_zero_and_powers_of_two() {
        let positions: Vec<u32> = DataBitPositions::new(2).take(8).collect();
        assert_eq!(positions, std::vec![3, 5, 6, 7, 9, 10, 11, 12]);
    }

    #[test]
    fn used_positions_cover_data_and_parity_only() {
        let device = HammingDevice::new(16).unwrap();
        let used: Vec<u32> =
            UsedBitPositions::new(device.block_size, device.data_size).collect();

        // 14 * 8 data bits + 8 parity positions (0, 1, 2, 4, .., 64); the
        // byte-rounding slack bits above the last data bit stay out.
        assert_eq!(used.len(), 14 * 8 + 8);
        let mut sorted = used.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), used.len());
        assert!(used.contains(&0));
        assert!(used.contains(&64));
        assert!(used.iter().all(|&p| p < 120));
    }

    #[test]
    fn round_trips_clean_blocks() {
        let mut storage = HeapStorage::new(512);
        let device = HammingDevice::new(16).unwrap();

        device
            .write_block(&mut storage, b"slay", DataLocation::at(0))
            .unwrap();

        let mut out = [0u8; 4];
        device
            .read_block(&mut storage, DataLocation::at(0), &mut out)
            .unwrap();
        assert_eq!(&out, b"slay");
    }

    #[test]
    fn corrects_any_single_bit_flip() {
        let device = HammingDevice::new(16).unwrap();

        for bit in 0..16 * 8 {
            let mut storage = HeapStorage::new(512);
            device
                .write_block(&mut storage, b"slay", DataLocation::at(0))
                .unwrap();
            storage.flip_bit(bit);

            let mut out = [0u8; 4];
            device
                .read_block(&mut storage, DataLocation::at(0), &mut out)
                .unwrap();
            assert_eq!(&out, b"slay", "flip at raw bit {bit} not corrected");
        }
    }

    #[test]
    fn correction_repairs_the_medium() {
        let mut storage = HeapStorage::new(512);
        let device = HammingDevice::new(16).unwrap();

        device
            .write_block(&mut storage, &[0xC3; 14], DataLocation::at(0))
            .unwrap();
        let pristine: Vec<u8> = storage.bytes()[..16].to_vec();

        storage.flip_bit(35);
        let mut out = [0u8; 14];
        device
            .read_block(&mut storage, DataLocation::at(0), &mut out)
            .unwrap();

        assert_eq!(&storage.bytes()[..16], &pristine[..]);
    }

    #[test]
    fn two_flips_in_code_positions_are_detected() {
        let mut storage = HeapStorage::new(512);
        let device = HammingDevice::new(16).unwrap();

        device
            .write_block(&mut storage, &[0x5A; 14], DataLocation::at(0))
            .unwrap();
        // Positions 3 and 5 both carry payload bits.
        storage.flip_bit(3);
        storage.flip_bit(5);

        let mut out = [0u8; 14];
        assert_eq!(
            device.read_block(&mut storage, DataLocation::at(0), &mut out),
            Err(DeviceError::Correction)
        );
    }
}
