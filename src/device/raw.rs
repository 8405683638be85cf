use crate::device::DataLocation;
use crate::err::{CanFail, DeviceError};
use crate::storage::Storage;

/// Pass-through codec: the whole raw block is payload.
///
/// Sub-block requests go straight to the storage at the exact byte range;
/// there is no read-modify-write cycle and no redundancy to maintain, so
/// every raw state is valid and `format_block` has nothing to do.
pub struct RawDevice {
    block_size: usize,
}

impl RawDevice {
    pub fn new(block_size: usize) -> Self {
        Self { block_size }
    }

    pub fn raw_block_size(&self) -> usize {
        self.block_size
    }

    pub fn data_size(&self) -> usize {
        self.block_size
    }

    pub fn format_block<S: Storage>(&self, _storage: &mut S, _block: u32) -> CanFail<DeviceError> {
        Ok(())
    }

    pub fn read_block<S: Storage>(
        &self,
        storage: &mut S,
        loc: DataLocation,
        out: &mut [u8],
    ) -> Result<usize, DeviceError> {
        let to_read = core::cmp::min(out.len(), self.block_size - loc.offset);
        let address = loc.block as u64 * self.block_size as u64 + loc.offset as u64;
        storage.read(address, &mut out[..to_read])?;

        Ok(to_read)
    }

    pub fn write_block<S: Storage>(
        &self,
        storage: &mut S,
        bytes: &[u8],
        loc: DataLocation,
    ) -> Result<usize, DeviceError> {
        let to_write = core::cmp::min(bytes.len(), self.block_size - loc.offset);
        let address = loc.block as u64 * self.block_size as u64 + loc.offset as u64;
        storage.write(address, &bytes[..to_write])?;

        Ok(to_write)
    }
}
