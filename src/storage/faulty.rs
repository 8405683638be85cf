use alloc::vec::Vec;

use crate::err::{CanFail, StorageError};
use crate::storage::Storage;
use crate::telemetry::{self, FsEvent};

/// Fault-injecting wrapper around another [`Storage`].
///
/// Models the two failure modes of an irradiated medium:
///
/// - *bit flips*: [`FaultyStorage::flip_random_bit`] flips one uniformly
///   chosen bit in place and reports it as a [`FsEvent::BitFlip`],
/// - *stuck bits*: a pinned bit silently swallows every write; the
///   filesystem does not see the failure until the next read.
///
/// The generator is a seeded xorshift, so a simulation run is reproducible
/// from its seed.
pub struct FaultyStorage<S: Storage> {
    inner: S,
    rng: u64,
    stuck: Vec<StuckBit>,
}

struct StuckBit {
    bit_index: u64,
    value: bool,
}

impl<S: Storage> FaultyStorage<S> {
    pub fn new(inner: S, seed: u64) -> Self {
        Self {
            inner,
            // A zero state would lock the generator at zero.
            rng: seed | 1,
            stuck: Vec::new(),
        }
    }

    pub fn into_inner(self) -> S {
        self.inner
    }

    fn next_random(&mut self) -> u64 {
        let mut x = self.rng;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.rng = x;
        x
    }

    fn read_byte(&mut self, address: u64) -> Result<u8, StorageError> {
        let mut byte = [0u8];
        self.inner.read(address, &mut byte)?;
        Ok(byte[0])
    }

    /// Flips one uniformly random bit of the medium and reports it.
    pub fn flip_random_bit(&mut self) -> CanFail<StorageError> {
        let bit_index = self.next_random() % (self.inner.size() * 8);
        self.flip_bit_at(bit_index)
    }

    /// Flips the given bit (MSB-first within each byte) and reports it.
    pub fn flip_bit_at(&mut self, bit_index: u64) -> CanFail<StorageError> {
        let address = bit_index / 8;
        let byte = self.read_byte(address)? ^ (0x80 >> (bit_index % 8));
        self.inner.write(address, &[byte])?;

        telemetry::record(FsEvent::BitFlip {
            byte_index: address,
        });
        Ok(())
    }

    /// Pins the given bit to its current value; writes no longer move it.
    pub fn stick_bit(&mut self, bit_index: u64) -> CanFail<StorageError> {
        let byte = self.read_byte(bit_index / 8)?;
        let value = byte & (0x80 >> (bit_index % 8)) != 0;
        self.stuck.push(StuckBit { bit_index, value });
        Ok(())
    }

    /// Re-applies every stuck bit intersecting `address..address + len`.
    fn repin(&mut self, address: u64, len: usize) -> CanFail<StorageError> {
        for i in 0..self.stuck.len() {
            let StuckBit { bit_index, value } = self.stuck[i];
            let byte_index = bit_index / 8;
            if byte_index < address || byte_index >= address + len as u64 {
                continue;
            }

            let mask = 0x80u8 >> (bit_index % 8);
            let current = self.read_byte(byte_index)?;
            let pinned = if value { current | mask } else { current & !mask };
            if pinned != current {
                self.inner.write(byte_index, &[pinned])?;
            }
        }
        Ok(())
    }
}

impl<S: Storage> Storage for FaultyStorage<S> {
    fn size(&self) -> u64 {
        self.inner.size()
    }

    fn read(&mut self, address: u64, out: &mut [u8]) -> CanFail<StorageError> {
        self.inner.read(address, out)
    }

    fn write(&mut self, address: u64, bytes: &[u8]) -> Result<usize, StorageError> {
        let written = self.inner.write(address, bytes)?;
        self.repin(address, written)?;
        Ok(written)
    }
}
