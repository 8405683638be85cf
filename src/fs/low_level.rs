//! Inode-indexed facade.
//!
//! Host bridges (FUSE-style) keep inode numbers rather than paths, so this
//! surface mirrors the path facade with parent-inode + name addressing.
//! Every operation shares the path facade's mutex and managers. The `.` and
//! `..` entries are not stored on disk; a host bridge has to synthesize
//! them itself.

use alloc::vec::Vec;

use crate::err::{CanFail, FsError, FsResult};
use crate::fs::dir::DirectoryEntry;
use crate::fs::inode::InodeKind;
use crate::fs::open_files::{Fd, OpenMode};
use crate::fs::{FsCore, Ppfs};
use crate::storage::Storage;

/// Metadata of one inode, as host bridges consume it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FileAttributes {
    /// File size in bytes (directories: body size).
    pub size: u64,

    /// Payload bytes per block of the underlying codec.
    pub block_size: usize,

    /// Whether the inode is a file or a directory.
    pub kind: InodeKind,
}

/// Capacity counters, as `statfs`-style host queries consume them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FsUsage {
    /// Blocks in the data region.
    pub total_blocks: u64,

    /// Data blocks not currently allocated.
    pub free_blocks: u64,

    /// Slots in the inode table.
    pub total_inodes: u64,

    /// Inode slots not currently allocated.
    pub free_inodes: u64,

    /// Payload bytes per block.
    pub block_size: usize,
}

impl<S: Storage> Ppfs<S> {
    /// Metadata of `inode`.
    pub fn attributes(&self, inode: u32) -> FsResult<FileAttributes> {
        self.with_core(|core, storage| {
            let record = core.get_inode(storage, inode)?;
            Ok(FileAttributes {
                size: record.file_size as u64,
                block_size: core.device.data_size(),
                kind: record.kind,
            })
        })
    }

    /// Resolves `name` inside the directory `parent`.
    pub fn lookup(&self, parent: u32, name: &str) -> FsResult<u32> {
        self.with_core(|core, storage| core.dir_inode_by_name(storage, parent, name.as_bytes()))
    }

    /// Reads up to `limit` entries of the directory `inode`, starting at
    /// entry `offset`; `limit = 0` reads to the end.
    pub fn directory_entries(
        &self,
        inode: u32,
        limit: u32,
        offset: u32,
    ) -> FsResult<Vec<DirectoryEntry>> {
        self.with_core(|core, storage| core.dir_entries(storage, inode, limit, offset))
    }

    /// Creates a directory named `name` under `parent` and returns its
    /// inode.
    pub fn create_directory_in(&self, parent: u32, name: &str) -> FsResult<u32> {
        self.with_core(|core, storage| {
            core.create_node_in(storage, parent, name.as_bytes(), InodeKind::DIRECTORY)
        })
    }

    /// Creates a file named `name` under `parent` and returns its inode.
    pub fn create_in(&self, parent: u32, name: &str) -> FsResult<u32> {
        self.with_core(|core, storage| {
            core.create_node_in(storage, parent, name.as_bytes(), InodeKind::FILE)
        })
    }

    /// Opens `inode` directly. Only files can be opened this way.
    pub fn open_inode(&self, inode: u32, mode: OpenMode) -> FsResult<Fd> {
        self.with_core(|core, storage| {
            let record = core.get_inode(storage, inode)?;
            if record.is_directory() {
                return Err(FsError::InvalidRequest);
            }
            core.open_common(storage, inode, mode)
        })
    }

    /// Removes `name` under `parent`; see [`Ppfs::remove`] for the rules.
    pub fn remove_in(&self, parent: u32, name: &str, recursive: bool) -> CanFail<FsError> {
        self.with_core(|core, storage| {
            FsCore::remove_in(core, storage, parent, name.as_bytes(), recursive)
        })
    }

    /// Resizes the file `inode` to `new_size` bytes.
    ///
    /// # Errors
    ///
    /// Fails with [`FsError::InvalidRequest`] for directories.
    pub fn truncate(&self, inode: u32, new_size: u64) -> CanFail<FsError> {
        self.with_core(|core, storage| {
            let mut record = core.get_inode(storage, inode)?;
            if record.is_directory() {
                return Err(FsError::InvalidRequest);
            }
            core.resize_file(storage, inode, &mut record, new_size)
        })
    }

    /// Capacity counters of the mounted filesystem.
    pub fn usage(&self) -> FsResult<FsUsage> {
        self.with_core(|core, storage| {
            let (free_blocks, free_inodes) = {
                let FsCore {
                    device,
                    blocks,
                    inodes,
                    ..
                } = core;
                (
                    blocks.free_count(device, storage)?,
                    inodes.free_count(device, storage)?,
                )
            };
            let total_inodes = core.sb.total_inodes;

            Ok(FsUsage {
                total_blocks: core.blocks.total(),
                free_blocks,
                total_inodes: total_inodes as u64,
                free_inodes,
                block_size: core.device.data_size(),
            })
        })
    }
}
