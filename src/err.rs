//! Error types shared across the filesystem stack.
//!
//! Errors are split by layer: [`StorageError`] for the raw medium,
//! [`DeviceError`] for the block codecs sitting on top of it, and [`FsError`]
//! for everything the filesystem engine itself can report. Lower layers
//! convert upward through [`From`], so `?` propagates a storage failure all
//! the way to the facade without rewrapping at every call site.

/// `CanFail` is a return type for operations that are allowed to fail and do
/// not produce a value.
pub type CanFail<E> = Result<(), E>;

/// Result alias for facade-level operations.
pub type FsResult<T> = Result<T, FsError>;

/// Failures reported by the raw storage medium.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StorageError {
    /// The medium failed to carry out the transfer.
    Io,

    /// The requested address range lies outside the medium.
    OutOfBounds,

    /// The request itself is malformed (zero-sized medium, bad buffer, ...).
    InvalidRequest,
}

/// Failures reported by a block codec.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceError {
    /// The raw block is corrupted beyond what the codec can repair.
    Correction,

    /// The underlying storage failed.
    Storage(StorageError),
}

impl From<StorageError> for DeviceError {
    fn from(err: StorageError) -> Self {
        DeviceError::Storage(err)
    }
}

/// Failures reported by the filesystem engine and its managers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FsError {
    /// The facade was used before `init` or `format` succeeded.
    NotInitialized,

    /// The path is syntactically invalid (empty, relative, `//`, or an
    /// over-long component).
    InvalidPath,

    /// A path component, inode, directory entry or descriptor does not
    /// exist.
    NotFound,

    /// The operation does not apply to the target (directory vs file
    /// mismatch, read on an append-only descriptor, ...).
    InvalidRequest,

    /// An offset or index lies outside the valid range.
    OutOfBounds,

    /// A bitmap index lies outside the bitmap.
    IndexOutOfRange,

    /// The directory already contains an entry with this name.
    NameTaken,

    /// The inode table is exhausted.
    NoMoreFreeInodes,

    /// The data region is exhausted.
    NoMoreFreeBlocks,

    /// The inode or block is already free.
    AlreadyFree,

    /// The inode or block is already in use.
    AlreadyTaken,

    /// The file is already open in an incompatible sharing mode.
    AlreadyOpen,

    /// Every slot of the open-files table is occupied.
    OpenFilesTableFull,

    /// The file (or a descendant of the directory) is currently open.
    FileInUse,

    /// The directory still contains entries.
    DirectoryNotEmpty,

    /// The requested feature is configured out (journaling).
    NotImplemented,

    /// Invariant violation inside the engine, or both superblock copies are
    /// unreadable.
    Internal,

    /// A block codec detected uncorrectable corruption.
    Correction,

    /// The underlying storage failed.
    Storage(StorageError),
}

impl From<StorageError> for FsError {
    fn from(err: StorageError) -> Self {
        FsError::Storage(err)
    }
}

impl From<DeviceError> for FsError {
    fn from(err: DeviceError) -> Self {
        match err {
            DeviceError::Correction => FsError::Correction,
            DeviceError::Storage(e) => FsError::Storage(e),
        }
    }
}
