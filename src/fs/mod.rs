//! The filesystem engine and its path-based facade.
//!
//! [`Ppfs`] owns the raw storage and, once formatted or mounted, the engine
//! state: the block codec, the cached superblock, the inode and data-block
//! managers and the open-files table. Every public operation takes the
//! single process-wide mutex for its whole duration; operations before a
//! successful [`Ppfs::format`] or [`Ppfs::init`] fail with
//! [`FsError::NotInitialized`].
//!
//! Paths are absolute (`/a/b/c`), components split on `/`, resolved from
//! the root directory at inode 0.

use alloc::string::String;
use alloc::vec::Vec;

use spin::Mutex;

use crate::device::{BlockDevice, EccType};
use crate::err::{CanFail, FsError, FsResult};
use crate::storage::Storage;
use crate::telemetry::{self, FsEvent};

mod bitmap;
mod block_manager;
mod config;
mod dir;
mod file_io;
mod inode;
mod low_level;
mod open_files;
mod sb;

use block_manager::BlockManager;
use inode::InodeManager;
use open_files::{OpenFile, OpenFileTable};
use sb::SuperBlockManager;

pub use config::FsConfig;
pub use dir::{DirectoryEntry, NAME_MAX};
pub use inode::{Inode, InodeKind, DIRECT_BLOCKS};
pub use low_level::{FileAttributes, FsUsage};
pub use open_files::{Fd, OpenMode, OPEN_FILES_MAX};
pub use sb::{SuperBlock, SB_SIGNATURE};

/// The root directory always lives at inode 0.
pub const ROOT_INODE: u32 = 0;

/// Engine state of a mounted filesystem.
pub(crate) struct FsCore {
    pub(crate) device: BlockDevice,
    pub(crate) sb: SuperBlock,
    pub(crate) sbm: SuperBlockManager,
    pub(crate) inodes: InodeManager,
    pub(crate) blocks: BlockManager,
    pub(crate) open: OpenFileTable,
}

fn path_is_valid(path: &str) -> bool {
    if path.is_empty() || !path.starts_with('/') {
        return false;
    }
    !path.as_bytes().windows(2).any(|pair| pair == b"//")
}

/// The last path component, as bytes.
fn leaf_name(path: &str) -> Result<&[u8], FsError> {
    let leaf = &path[path.rfind('/').expect("validated path") + 1..];
    if leaf.is_empty() || leaf.len() > NAME_MAX {
        return Err(FsError::InvalidPath);
    }
    Ok(leaf.as_bytes())
}

impl FsCore {
    fn get_inode<S: Storage>(&mut self, storage: &mut S, index: u32) -> Result<Inode, FsError> {
        self.inodes.get(&self.device, storage, index)
    }

    /// Resolves every component but the last, starting from the root.
    fn parent_inode_from_path<S: Storage>(
        &mut self,
        storage: &mut S,
        path: &str,
    ) -> Result<u32, FsError> {
        let parent_path = &path[..path.rfind('/').expect("validated path")];

        let mut current = ROOT_INODE;
        for component in parent_path.split('/').skip(1) {
            current = self.dir_inode_by_name(storage, current, component.as_bytes())?;
        }
        Ok(current)
    }

    fn inode_from_path<S: Storage>(
        &mut self,
        storage: &mut S,
        path: &str,
    ) -> Result<u32, FsError> {
        if path == "/" {
            return Ok(ROOT_INODE);
        }
        let parent = self.parent_inode_from_path(storage, path)?;
        self.dir_inode_by_name(storage, parent, leaf_name(path)?)
    }

    /// Creates a file or directory under `parent` and links it.
    fn create_node_in<S: Storage>(
        &mut self,
        storage: &mut S,
        parent: u32,
        name: &[u8],
        kind: InodeKind,
    ) -> Result<u32, FsError> {
        if name.is_empty() || name.len() > NAME_MAX {
            return Err(FsError::InvalidPath);
        }
        self.dir_check_name_unique(storage, parent, name)?;

        let record = if kind == InodeKind::DIRECTORY {
            Inode::new_directory()
        } else {
            Inode::new_file()
        };
        let index = {
            let FsCore { device, inodes, .. } = self;
            inodes.create(device, storage, &record)?
        };

        self.dir_add_entry(storage, parent, DirectoryEntry::new(index, name))?;
        Ok(index)
    }

    fn create_node<S: Storage>(
        &mut self,
        storage: &mut S,
        path: &str,
        kind: InodeKind,
    ) -> Result<u32, FsError> {
        if !path_is_valid(path) {
            return Err(FsError::InvalidPath);
        }
        let parent = self.parent_inode_from_path(storage, path)?;
        self.create_node_in(storage, parent, leaf_name(path)?, kind)
    }

    fn open_common<S: Storage>(
        &mut self,
        storage: &mut S,
        inode_index: u32,
        mode: OpenMode,
    ) -> Result<Fd, FsError> {
        let fd = self.open.open(inode_index, mode)?;

        if mode.contains(OpenMode::TRUNCATE) {
            if let Err(e) = self.truncate_inode(storage, inode_index) {
                let _ = self.open.close(fd);
                return Err(e);
            }
        }
        Ok(fd)
    }

    fn truncate_inode<S: Storage>(
        &mut self,
        storage: &mut S,
        inode_index: u32,
    ) -> CanFail<FsError> {
        let mut record = self.get_inode(storage, inode_index)?;
        self.resize_file(storage, inode_index, &mut record, 0)
    }

    fn read_fd<S: Storage>(
        &mut self,
        storage: &mut S,
        fd: Fd,
        len: usize,
    ) -> Result<Vec<u8>, FsError> {
        let record: OpenFile = *self.open.get(fd).ok_or(FsError::NotFound)?;
        if record.mode.contains(OpenMode::APPEND) {
            return Err(FsError::InvalidRequest);
        }

        let inode = self.get_inode(storage, record.inode)?;
        let available = (inode.file_size as u64).saturating_sub(record.position);
        let len = core::cmp::min(len as u64, available) as usize;

        let data = self.read_file(storage, &inode, record.position, len)?;
        self.open
            .get_mut(fd)
            .expect("descriptor validated above")
            .position += data.len() as u64;

        telemetry::record(FsEvent::Read { size: data.len() });
        Ok(data)
    }

    fn write_fd<S: Storage>(&mut self, storage: &mut S, fd: Fd, bytes: &[u8]) -> CanFail<FsError> {
        let record: OpenFile = *self.open.get(fd).ok_or(FsError::NotFound)?;
        let mut inode = self.get_inode(storage, record.inode)?;

        let offset = if record.mode.contains(OpenMode::APPEND) {
            inode.file_size as u64
        } else {
            record.position
        };

        let written = self.write_file(storage, record.inode, &mut inode, offset, bytes)?;
        self.open
            .get_mut(fd)
            .expect("descriptor validated above")
            .position = offset + written as u64;

        telemetry::record(FsEvent::Write { size: written });
        Ok(())
    }

    fn seek_fd<S: Storage>(&mut self, storage: &mut S, fd: Fd, position: u64) -> CanFail<FsError> {
        let record: OpenFile = *self.open.get(fd).ok_or(FsError::NotFound)?;
        if record.mode.contains(OpenMode::APPEND) {
            return Err(FsError::InvalidRequest);
        }

        let inode = self.get_inode(storage, record.inode)?;
        if position > inode.file_size as u64 {
            return Err(FsError::OutOfBounds);
        }

        self.open
            .get_mut(fd)
            .expect("descriptor validated above")
            .position = position;
        Ok(())
    }

    /// Rejects the removal while the target, or any file below it, is open.
    fn check_in_use<S: Storage>(&mut self, storage: &mut S, target: u32) -> CanFail<FsError> {
        let inode = self.get_inode(storage, target)?;
        if !inode.is_directory() {
            if self.open.is_open(target) {
                return Err(FsError::FileInUse);
            }
            return Ok(());
        }

        for entry in self.dir_entries(storage, target, 0, 0)? {
            self.check_in_use(storage, entry.inode())?;
        }
        Ok(())
    }

    /// Removes `target` (and, for directories, everything below it):
    /// children first, then the body, the inode, and the parent link.
    fn remove_tree<S: Storage>(
        &mut self,
        storage: &mut S,
        parent: u32,
        target: u32,
    ) -> CanFail<FsError> {
        let mut record = self.get_inode(storage, target)?;

        if record.is_directory() {
            for entry in self.dir_entries(storage, target, 0, 0)? {
                self.remove_tree(storage, target, entry.inode())?;
            }
            // The body shrank while children unlinked themselves.
            record = self.get_inode(storage, target)?;
        }

        self.resize_file(storage, target, &mut record, 0)?;
        {
            let FsCore { device, inodes, .. } = self;
            inodes.remove(device, storage, target)?;
        }
        self.dir_remove_entry(storage, parent, target)
    }

    fn remove_in<S: Storage>(
        &mut self,
        storage: &mut S,
        parent: u32,
        name: &[u8],
        recursive: bool,
    ) -> CanFail<FsError> {
        let target = self.dir_inode_by_name(storage, parent, name)?;

        if !recursive {
            let record = self.get_inode(storage, target)?;
            let body = record.file_size;
            if record.is_directory() && body > 0 {
                return Err(FsError::DirectoryNotEmpty);
            }
        }

        self.check_in_use(storage, target)?;
        self.remove_tree(storage, parent, target)
    }

    fn file_count<S: Storage>(&mut self, storage: &mut S) -> Result<u64, FsError> {
        let free = {
            let FsCore { device, inodes, .. } = self;
            inodes.free_count(device, storage)?
        };
        let total = self.sb.total_inodes;
        Ok(total as u64 - free)
    }
}

struct Inner<S: Storage> {
    storage: S,
    core: Option<FsCore>,
}

/// The filesystem facade.
///
/// All operations are serialized by one internal mutex; every block write
/// reaches the storage before the call returns.
pub struct Ppfs<S: Storage> {
    inner: Mutex<Inner<S>>,
}

impl<S: Storage> Ppfs<S> {
    /// Wraps a storage medium. The filesystem is unusable until
    /// [`Ppfs::format`] or [`Ppfs::init`] succeeds.
    pub fn new(storage: S) -> Self {
        Self {
            inner: Mutex::new(Inner {
                storage,
                core: None,
            }),
        }
    }

    /// Unwraps the facade, returning the storage medium.
    pub fn into_storage(self) -> S {
        self.inner.into_inner().storage
    }

    fn with_core<T>(
        &self,
        f: impl FnOnce(&mut FsCore, &mut S) -> Result<T, FsError>,
    ) -> FsResult<T> {
        let mut guard = self.inner.lock();
        let Inner { storage, core } = &mut *guard;
        let core = core.as_mut().ok_or(FsError::NotInitialized)?;
        f(core, storage)
    }

    /// Creates a fresh filesystem on the medium.
    ///
    /// Validates the configuration, computes the on-disk layout, writes
    /// both superblock copies, formats both bitmaps and installs the root
    /// directory. The facade is mounted afterwards.
    ///
    /// # Errors
    ///
    /// Fails with [`FsError::InvalidRequest`] on inconsistent parameters or
    /// a layout that leaves no data region, and with
    /// [`FsError::NotImplemented`] when `use_journal` is set.
    pub fn format(&self, cfg: &FsConfig) -> CanFail<FsError> {
        let mut guard = self.inner.lock();
        let Inner { storage, core } = &mut *guard;
        *core = None;

        if cfg.total_size == 0 || cfg.block_size == 0 || cfg.average_file_size == 0 {
            return Err(FsError::InvalidRequest);
        }
        if cfg.total_size % cfg.block_size as u64 != 0 {
            return Err(FsError::InvalidRequest);
        }
        if !cfg.block_size.is_power_of_two() {
            return Err(FsError::InvalidRequest);
        }
        if cfg.use_journal {
            return Err(FsError::NotImplemented);
        }

        let device = BlockDevice::new(
            cfg.ecc_type,
            cfg.block_size,
            cfg.crc_polynomial,
            cfg.rs_correctable_bytes,
        )?;
        let data_size = device.data_size() as u64;

        let total_blocks = cfg.total_size / cfg.block_size as u64;
        let total_inodes = cfg.total_size / cfg.average_file_size;
        if total_blocks == 0
            || total_inodes == 0
            || total_blocks > u32::MAX as u64
            || total_inodes > u32::MAX as u64
        {
            return Err(FsError::InvalidRequest);
        }

        let inode_bitmap = (2 * SuperBlock::SIZE as u64).div_ceil(data_size);
        let inode_table = inode_bitmap + total_inodes.div_ceil(8).div_ceil(data_size);
        let block_bitmap = inode_table + (total_inodes * Inode::SIZE as u64).div_ceil(data_size);
        let first_data = block_bitmap + total_blocks.div_ceil(8).div_ceil(data_size);
        let reserved_tail = (SuperBlock::SIZE as u64).div_ceil(data_size);
        if total_blocks < reserved_tail {
            return Err(FsError::InvalidRequest);
        }
        let last_data = total_blocks - reserved_tail;

        if first_data >= last_data || last_data >= total_blocks {
            return Err(FsError::InvalidRequest);
        }

        let sb = SuperBlock {
            signature: SB_SIGNATURE,
            total_blocks: total_blocks as u32,
            total_inodes: total_inodes as u32,
            block_bitmap_address: block_bitmap as u32,
            inode_bitmap_address: inode_bitmap as u32,
            inode_table_address: inode_table as u32,
            journal_address: 0,
            first_data_block_address: first_data as u32,
            last_data_block_address: last_data as u32,
            block_size: cfg.block_size,
            crc_polynomial: if cfg.ecc_type == EccType::Crc {
                cfg.crc_polynomial
            } else {
                0
            },
            rs_correctable_bytes: if cfg.ecc_type == EccType::ReedSolomon {
                cfg.rs_correctable_bytes
            } else {
                0
            },
            ecc_type: cfg.ecc_type as u8,
        };

        let backup = sb.backup_offset()?;
        let mut sbm = SuperBlockManager::new([0, backup]);
        sbm.put(storage, sb)?;

        let mut inodes = InodeManager::new(&sb);
        inodes.format(&device, storage)?;
        let mut blocks = BlockManager::new(&sb);
        blocks.format(&device, storage)?;

        *core = Some(FsCore {
            device,
            sb,
            sbm,
            inodes,
            blocks,
            open: OpenFileTable::new(),
        });
        Ok(())
    }

    /// Mounts an already-formatted medium: reads the superblock (repairing
    /// a lost primary copy from the backup), rebuilds the codec it
    /// describes and wires the managers.
    pub fn init(&self) -> CanFail<FsError> {
        let mut guard = self.inner.lock();
        let Inner { storage, core } = &mut *guard;
        *core = None;

        let (sbm, sb) = SuperBlockManager::attach(storage)?;
        let device = BlockDevice::new(
            sb.ecc_type.try_into()?,
            sb.block_size,
            sb.crc_polynomial,
            sb.rs_correctable_bytes,
        )?;

        *core = Some(FsCore {
            device,
            sb,
            sbm,
            inodes: InodeManager::new(&sb),
            blocks: BlockManager::new(&sb),
            open: OpenFileTable::new(),
        });
        Ok(())
    }

    /// Creates an empty file at `path`.
    pub fn create(&self, path: &str) -> CanFail<FsError> {
        self.with_core(|core, storage| {
            core.create_node(storage, path, InodeKind::FILE).map(|_| ())
        })
    }

    /// Creates an empty directory at `path`.
    pub fn create_directory(&self, path: &str) -> CanFail<FsError> {
        self.with_core(|core, storage| {
            core.create_node(storage, path, InodeKind::DIRECTORY)
                .map(|_| ())
        })
    }

    /// Opens `path` and returns a file descriptor.
    pub fn open(&self, path: &str, mode: OpenMode) -> FsResult<Fd> {
        self.with_core(|core, storage| {
            if !path_is_valid(path) {
                return Err(FsError::InvalidPath);
            }
            let inode_index = core.inode_from_path(storage, path)?;
            core.open_common(storage, inode_index, mode)
        })
    }

    /// Releases a file descriptor.
    pub fn close(&self, fd: Fd) -> CanFail<FsError> {
        self.with_core(|core, _| core.open.close(fd))
    }

    /// Reads up to `len` bytes at the descriptor's cursor; the result is
    /// shorter at end-of-file.
    pub fn read(&self, fd: Fd, len: usize) -> FsResult<Vec<u8>> {
        self.with_core(|core, storage| core.read_fd(storage, fd, len))
    }

    /// Writes `bytes` at the descriptor's cursor (or the end of the file
    /// for append descriptors), growing the file as needed.
    pub fn write(&self, fd: Fd, bytes: &[u8]) -> CanFail<FsError> {
        self.with_core(|core, storage| core.write_fd(storage, fd, bytes))
    }

    /// Moves the descriptor's cursor; `position` must not exceed the file
    /// size.
    pub fn seek(&self, fd: Fd, position: u64) -> CanFail<FsError> {
        self.with_core(|core, storage| core.seek_fd(storage, fd, position))
    }

    /// Removes the file or directory at `path`. Non-empty directories
    /// require `recursive`.
    ///
    /// # Errors
    ///
    /// Fails with [`FsError::FileInUse`] when the target or any descendant
    /// is open, and with [`FsError::DirectoryNotEmpty`] for a non-recursive
    /// removal of a filled directory.
    pub fn remove(&self, path: &str, recursive: bool) -> CanFail<FsError> {
        self.with_core(|core, storage| {
            if !path_is_valid(path) {
                return Err(FsError::InvalidPath);
            }
            if path == "/" {
                return Err(FsError::InvalidRequest);
            }
            let parent = core.parent_inode_from_path(storage, path)?;
            core.remove_in(storage, parent, leaf_name(path)?, recursive)
        })
    }

    /// Names of the entries of the directory at `path`, in entry order.
    pub fn read_directory(&self, path: &str) -> FsResult<Vec<String>> {
        self.with_core(|core, storage| {
            if !path_is_valid(path) {
                return Err(FsError::InvalidPath);
            }
            let dir = core.inode_from_path(storage, path)?;
            let entries = core.dir_entries(storage, dir, 0, 0)?;
            Ok(entries.iter().map(DirectoryEntry::name).collect())
        })
    }

    /// Number of inodes in use (the root directory counts as one).
    pub fn file_count(&self) -> FsResult<u64> {
        self.with_core(|core, storage| core.file_count(storage))
    }

    /// The superblock of the mounted filesystem, re-read through the
    /// dual-copy manager (which repairs a lost copy as a side effect).
    pub fn superblock(&self) -> FsResult<SuperBlock> {
        self.with_core(|core, storage| core.sbm.get(storage))
    }
}
