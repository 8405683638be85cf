use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::err::{CanFail, StorageError};
use crate::storage::Storage;

/// Storage backed by a regular file of the host filesystem.
///
/// The file length is fixed at creation time; it is the medium capacity.
pub struct FileStorage {
    file: File,
    size: u64,
}

impl FileStorage {
    /// Opens `path` for read/write access, creating it with `size` bytes if
    /// it does not exist.
    ///
    /// # Errors
    ///
    /// Fails with [`StorageError::Io`] if the file cannot be opened or
    /// sized.
    pub fn open(path: &Path, size: u64) -> Result<Self, StorageError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)
            .map_err(|_| StorageError::Io)?;
        file.set_len(size).map_err(|_| StorageError::Io)?;

        Ok(Self { file, size })
    }

    fn seek_to(&mut self, address: u64) -> CanFail<StorageError> {
        self.file
            .seek(SeekFrom::Start(address))
            .map(|_| ())
            .map_err(|_| StorageError::Io)
    }
}

impl Storage for FileStorage {
    fn size(&self) -> u64 {
        self.size
    }

    fn read(&mut self, address: u64, out: &mut [u8]) -> CanFail<StorageError> {
        if address + out.len() as u64 > self.size {
            return Err(StorageError::OutOfBounds);
        }
        self.seek_to(address)?;
        self.file.read_exact(out).map_err(|_| StorageError::Io)
    }

    fn write(&mut self, address: u64, bytes: &[u8]) -> Result<usize, StorageError> {
        if address + bytes.len() as u64 > self.size {
            return Err(StorageError::OutOfBounds);
        }
        self.seek_to(address)?;
        self.file.write_all(bytes).map_err(|_| StorageError::Io)?;

        Ok(bytes.len())
    }
}
