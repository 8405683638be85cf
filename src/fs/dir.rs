//! Directory entries and directory operations.
//!
//! A directory's body is the plain concatenation of fixed-width
//! [`DirectoryEntry`] records stored through the file I/O path, so
//! `file_size` is always `entry_count * 128`. Entries keep insertion
//! order; removal overwrites the victim with the last entry and shrinks
//! the body by one record. No `.` / `..` entries are stored.

use alloc::string::String;
use alloc::vec::Vec;

use bytemuck::{bytes_of, pod_read_unaligned, Pod, Zeroable};

use crate::err::{CanFail, FsError};
use crate::fs::inode::Inode;
use crate::fs::FsCore;
use crate::storage::Storage;

/// Maximum length of a single name, in bytes.
pub const NAME_MAX: usize = 123;

const NAME_FIELD: usize = 124;

/// On-disk directory entry. Packed, 128 bytes.
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
#[repr(C, packed)]
pub struct DirectoryEntry {
    inode: i32,
    name: [u8; NAME_FIELD],
}

impl DirectoryEntry {
    pub const SIZE: usize = core::mem::size_of::<DirectoryEntry>();

    /// Builds an entry; `name` must be at most [`NAME_MAX`] bytes.
    pub(crate) fn new(inode: u32, name: &[u8]) -> Self {
        debug_assert!(name.len() <= NAME_MAX);
        let mut field = [0u8; NAME_FIELD];
        field[..name.len()].copy_from_slice(name);
        Self {
            inode: inode as i32,
            name: field,
        }
    }

    pub fn inode(&self) -> u32 {
        self.inode as u32
    }

    /// The stored name, up to the first NUL.
    pub fn name_bytes(&self) -> &[u8] {
        let end = self
            .name
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(NAME_FIELD);
        &self.name[..end]
    }

    /// The stored name as UTF-8; undecodable bytes are replaced.
    pub fn name(&self) -> String {
        String::from_utf8_lossy(self.name_bytes()).into_owned()
    }
}

fn entries_from_bytes(bytes: &[u8]) -> Vec<DirectoryEntry> {
    bytes
        .chunks_exact(DirectoryEntry::SIZE)
        .map(pod_read_unaligned)
        .collect()
}

impl FsCore {
    /// Returns the target inode, failing unless it is a directory.
    pub(crate) fn directory_inode<S: Storage>(
        &mut self,
        storage: &mut S,
        dir: u32,
    ) -> Result<Inode, FsError> {
        let inode = self.inodes.get(&self.device, storage, dir)?;
        if !inode.is_directory() {
            return Err(FsError::InvalidRequest);
        }
        Ok(inode)
    }

    /// Reads up to `limit` entries starting at entry `offset`; `limit = 0`
    /// reads to the end.
    pub(crate) fn dir_entries<S: Storage>(
        &mut self,
        storage: &mut S,
        dir: u32,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<DirectoryEntry>, FsError> {
        let inode = self.directory_inode(storage, dir)?;

        let byte_offset = offset as u64 * DirectoryEntry::SIZE as u64;
        let body = inode.file_size as u64;
        if byte_offset > body {
            return Ok(Vec::new());
        }

        let remaining = (body - byte_offset) as usize;
        let wanted = if limit == 0 {
            remaining
        } else {
            core::cmp::min(limit as usize * DirectoryEntry::SIZE, remaining)
        };

        let bytes = self.read_file(storage, &inode, byte_offset, wanted)?;
        Ok(entries_from_bytes(&bytes))
    }

    /// Appends `entry`, enforcing name uniqueness.
    pub(crate) fn dir_add_entry<S: Storage>(
        &mut self,
        storage: &mut S,
        dir: u32,
        entry: DirectoryEntry,
    ) -> CanFail<FsError> {
        let mut inode = self.dir_check_name_unique(storage, dir, entry.name_bytes())?;

        let end = inode.file_size as u64;
        self.write_file(storage, dir, &mut inode, end, bytes_of(&entry))?;
        Ok(())
    }

    /// Removes the entry referencing `target`, compacting with the last
    /// entry.
    pub(crate) fn dir_remove_entry<S: Storage>(
        &mut self,
        storage: &mut S,
        dir: u32,
        target: u32,
    ) -> CanFail<FsError> {
        let mut inode = self.directory_inode(storage, dir)?;
        let entries = {
            let body = inode.file_size as usize;
            let bytes = self.read_file(storage, &inode, 0, body)?;
            entries_from_bytes(&bytes)
        };

        let position = entries
            .iter()
            .position(|e| e.inode() == target)
            .ok_or(FsError::NotFound)?;

        let new_body = inode.file_size as u64 - DirectoryEntry::SIZE as u64;
        if position as u64 * DirectoryEntry::SIZE as u64 != new_body {
            let last = entries[entries.len() - 1];
            self.write_file(
                storage,
                dir,
                &mut inode,
                position as u64 * DirectoryEntry::SIZE as u64,
                bytes_of(&last),
            )?;
        }

        self.resize_file(storage, dir, &mut inode, new_body)
    }

    /// Returns the directory inode when `name` is absent.
    ///
    /// # Errors
    ///
    /// Fails with [`FsError::NameTaken`] when any entry already carries
    /// `name`.
    pub(crate) fn dir_check_name_unique<S: Storage>(
        &mut self,
        storage: &mut S,
        dir: u32,
        name: &[u8],
    ) -> Result<Inode, FsError> {
        let inode = self.directory_inode(storage, dir)?;
        let bytes = self.read_file(storage, &inode, 0, inode.file_size as usize)?;

        if entries_from_bytes(&bytes)
            .iter()
            .any(|e| e.name_bytes() == name)
        {
            return Err(FsError::NameTaken);
        }
        Ok(inode)
    }

    /// Inode referenced by `name`.
    pub(crate) fn dir_inode_by_name<S: Storage>(
        &mut self,
        storage: &mut S,
        dir: u32,
        name: &[u8],
    ) -> Result<u32, FsError> {
        let inode = self.directory_inode(storage, dir)?;
        let bytes = self.read_file(storage, &inode, 0, inode.file_size as usize)?;

        entries_from_bytes(&bytes)
            .iter()
            .find(|e| e.name_bytes() == name)
            .map(DirectoryEntry::inode)
            .ok_or(FsError::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_layout_is_128_bytes() {
        assert_eq!(DirectoryEntry::SIZE, 128);
    }

    #[test]
    fn names_are_nul_terminated_and_zero_padded() {
        let entry = DirectoryEntry::new(7, b"logs");
        assert_eq!(entry.inode(), 7);
        assert_eq!(entry.name_bytes(), b"logs");
        assert_eq!(entry.name(), "logs");
        assert!(entry.name[4..].iter().all(|&b| b == 0));
    }

    #[test]
    fn a_full_width_name_has_no_terminator() {
        let name = [b'x'; NAME_MAX];
        let entry = DirectoryEntry::new(1, &name);
        assert_eq!(entry.name_bytes().len(), NAME_MAX);
    }

    #[test]
    fn entries_deserialize_in_order() {
        let a = DirectoryEntry::new(1, b"a");
        let b = DirectoryEntry::new(2, b"b");
        let mut bytes = Vec::new();
        bytes.extend_from_slice(bytes_of(&a));
        bytes.extend_from_slice(bytes_of(&b));

        let entries = entries_from_bytes(&bytes);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name(), "a");
        assert_eq!(entries[1].inode(), 2);
    }
}
