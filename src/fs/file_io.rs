//! File body I/O and the logical-to-physical block mapping.
//!
//! A file's logical block `L` is resolved through the classic Unix scheme:
//! twelve direct pointers in the inode, then one singly-, one doubly- and
//! one trebly-indirect tree. With `n` pointers per index block the file can
//! address `12 + n + n² + n³` blocks.
//!
//! [`BlockIndexIterator`] walks that mapping as an explicit state machine
//! over the path levels, holding at most three cached index blocks. In
//! allocating mode it reserves data blocks and index blocks on demand,
//! formats fresh index blocks and persists every index-block update through
//! the codec as it happens. The inode itself is only mutated in memory;
//! persisting it is the caller's job.

use alloc::vec;
use alloc::vec::Vec;

use crate::device::{BlockDevice, DataLocation};
use crate::err::{CanFail, FsError};
use crate::fs::block_manager::BlockManager;
use crate::fs::inode::{Inode, DIRECT_BLOCKS};
use crate::fs::FsCore;
use crate::storage::Storage;

/// Pointer slots per index block.
fn pointers_per_block(data_size: usize) -> u64 {
    (data_size / core::mem::size_of::<u32>()) as u64
}

/// Total logical blocks addressable by one inode.
fn addressable_blocks(n: u64) -> u64 {
    DIRECT_BLOCKS as u64 + n + n * n + n * n * n
}

/// Position of a logical block inside the pointer hierarchy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum BlockPath {
    Direct { slot: usize },
    Single { slot: usize },
    Double { first: usize, second: usize },
    Triple { first: usize, second: usize, third: usize },
    OutOfRange,
}

fn locate(logical: u64, n: u64) -> BlockPath {
    let direct = DIRECT_BLOCKS as u64;
    if logical < direct {
        return BlockPath::Direct {
            slot: logical as usize,
        };
    }
    if logical < direct + n {
        return BlockPath::Single {
            slot: (logical - direct) as usize,
        };
    }
    if logical < direct + n + n * n {
        let rest = logical - direct - n;
        return BlockPath::Double {
            first: (rest / n) as usize,
            second: (rest % n) as usize,
        };
    }
    if logical < addressable_blocks(n) {
        let rest = logical - direct - n - n * n;
        return BlockPath::Triple {
            first: (rest / (n * n)) as usize,
            second: ((rest / n) % n) as usize,
            third: (rest % n) as usize,
        };
    }
    BlockPath::OutOfRange
}

/// One cached index block: its own block index plus its pointer slots.
struct IndexBlockCache {
    block: u32,
    entries: Vec<u32>,
}

impl IndexBlockCache {
    fn fresh(block: u32, n: u64) -> Self {
        Self {
            block,
            entries: vec![0u32; n as usize],
        }
    }
}

fn read_index_block<S: Storage>(
    device: &BlockDevice,
    storage: &mut S,
    block: u32,
) -> Result<IndexBlockCache, FsError> {
    let n = pointers_per_block(device.data_size()) as usize;
    let mut bytes = vec![0u8; n * 4];
    device.read_block(storage, DataLocation::at(block), &mut bytes)?;

    let entries = bytes
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    Ok(IndexBlockCache { block, entries })
}

fn write_index_block<S: Storage>(
    device: &BlockDevice,
    storage: &mut S,
    cache: &IndexBlockCache,
) -> CanFail<FsError> {
    let mut bytes = Vec::with_capacity(cache.entries.len() * 4);
    for entry in &cache.entries {
        bytes.extend_from_slice(&entry.to_le_bytes());
    }
    device.write_block(storage, &bytes, DataLocation::at(cache.block))?;
    Ok(())
}

/// Iterator over the physical block indices of a file.
///
/// Yields the absolute data-block index of each logical block starting at
/// the construction index. In allocating mode the walk extends the file:
/// each step past the materialized extent reserves a data block (and any
/// index blocks the path needs). A finished iteration is terminal.
pub(crate) struct BlockIndexIterator {
    logical: u64,
    occupied: u64,
    allocate: bool,
    finished: bool,
    level1: Option<IndexBlockCache>,
    level2: Option<IndexBlockCache>,
    level3: Option<IndexBlockCache>,
}

impl BlockIndexIterator {
    /// `occupied` is the number of materialized blocks,
    /// `ceil(file_size / data_size)`.
    pub(crate) fn new(start_logical: u64, occupied: u64, allocate: bool) -> Self {
        Self {
            logical: start_logical,
            occupied,
            allocate,
            finished: false,
            level1: None,
            level2: None,
            level3: None,
        }
    }

    fn level1_block(&self) -> Option<u32> {
        self.level1.as_ref().map(|c| c.block)
    }

    fn level2_block(&self) -> Option<u32> {
        self.level2.as_ref().map(|c| c.block)
    }

    fn level3_block(&self) -> Option<u32> {
        self.level3.as_ref().map(|c| c.block)
    }

    /// Next data-block index, allocating on demand in allocating mode.
    pub(crate) fn next<S: Storage>(
        &mut self,
        device: &BlockDevice,
        storage: &mut S,
        blocks: &mut BlockManager,
        inode: &mut Inode,
    ) -> Result<Option<u32>, FsError> {
        self.step(device, storage, blocks, inode, None)
    }

    /// Like [`Self::next`], but appends the index blocks allocated by this
    /// step to `new_index_blocks` (recovery paths use this to know what a
    /// failed write reserved).
    #[allow(dead_code)]
    pub(crate) fn next_with_new_index_blocks<S: Storage>(
        &mut self,
        device: &BlockDevice,
        storage: &mut S,
        blocks: &mut BlockManager,
        inode: &mut Inode,
        new_index_blocks: &mut Vec<u32>,
    ) -> Result<Option<u32>, FsError> {
        self.step(device, storage, blocks, inode, Some(new_index_blocks))
    }

    fn reserve_data_block<S: Storage>(
        device: &BlockDevice,
        storage: &mut S,
        blocks: &mut BlockManager,
    ) -> Result<u32, FsError> {
        let block = blocks.get_free(device, storage)?;
        blocks.reserve(device, storage, block)?;
        Ok(block)
    }

    fn reserve_index_block<S: Storage>(
        device: &BlockDevice,
        storage: &mut S,
        blocks: &mut BlockManager,
        new_index_blocks: &mut Option<&mut Vec<u32>>,
    ) -> Result<u32, FsError> {
        let block = Self::reserve_data_block(device, storage, blocks)?;
        device.format_block(storage, block)?;
        if let Some(list) = new_index_blocks.as_mut() {
            list.push(block);
        }
        Ok(block)
    }

    /// (Re)loads the cache slot for the index block `expected`.
    fn ensure_cached<S: Storage>(
        device: &BlockDevice,
        storage: &mut S,
        cache: &mut Option<IndexBlockCache>,
        expected: u32,
    ) -> CanFail<FsError> {
        if cache.as_ref().map(|c| c.block) != Some(expected) {
            *cache = Some(read_index_block(device, storage, expected)?);
        }
        Ok(())
    }

    fn step<S: Storage>(
        &mut self,
        device: &BlockDevice,
        storage: &mut S,
        blocks: &mut BlockManager,
        inode: &mut Inode,
        mut new_index_blocks: Option<&mut Vec<u32>>,
    ) -> Result<Option<u32>, FsError> {
        if self.finished {
            return Ok(None);
        }

        let logical = self.logical;
        if !self.allocate && logical >= self.occupied {
            self.finished = true;
            return Ok(None);
        }

        let n = pointers_per_block(device.data_size());
        let appending = logical >= self.occupied;

        let block = match locate(logical, n) {
            BlockPath::OutOfRange => {
                self.finished = true;
                return Ok(None);
            }

            BlockPath::Direct { slot } => {
                if appending {
                    let block = Self::reserve_data_block(device, storage, blocks)?;
                    inode.direct_blocks[slot] = block;
                }
                inode.direct_blocks[slot]
            }

            BlockPath::Single { slot } => {
                if appending && slot == 0 {
                    let root =
                        Self::reserve_index_block(device, storage, blocks, &mut new_index_blocks)?;
                    inode.indirect_block = root;
                    self.level1 = Some(IndexBlockCache::fresh(root, n));
                } else {
                    Self::ensure_cached(device, storage, &mut self.level1, inode.indirect_block)?;
                }

                let leaf = self.level1.as_mut().expect("singly-indirect block loaded");
                if appending {
                    let block = Self::reserve_data_block(device, storage, blocks)?;
                    leaf.entries[slot] = block;
                    write_index_block(device, storage, leaf)?;
                }
                leaf.entries[slot]
            }

            BlockPath::Double { first, second } => {
                if appending && first == 0 && second == 0 {
                    let root =
                        Self::reserve_index_block(device, storage, blocks, &mut new_index_blocks)?;
                    inode.doubly_indirect_block = root;
                    self.level1 = Some(IndexBlockCache::fresh(root, n));
                } else {
                    Self::ensure_cached(
                        device,
                        storage,
                        &mut self.level1,
                        inode.doubly_indirect_block,
                    )?;
                }

                if appending && second == 0 {
                    let child =
                        Self::reserve_index_block(device, storage, blocks, &mut new_index_blocks)?;
                    let root = self.level1.as_mut().expect("doubly-indirect block loaded");
                    root.entries[first] = child;
                    write_index_block(device, storage, root)?;
                    self.level2 = Some(IndexBlockCache::fresh(child, n));
                } else {
                    let expected =
                        self.level1.as_ref().expect("doubly-indirect block loaded").entries[first];
                    Self::ensure_cached(device, storage, &mut self.level2, expected)?;
                }

                let leaf = self.level2.as_mut().expect("singly-indirect block loaded");
                if appending {
                    let block = Self::reserve_data_block(device, storage, blocks)?;
                    leaf.entries[second] = block;
                    write_index_block(device, storage, leaf)?;
                }
                leaf.entries[second]
            }

            BlockPath::Triple {
                first,
                second,
                third,
            } => {
                if appending && first == 0 && second == 0 && third == 0 {
                    let root =
                        Self::reserve_index_block(device, storage, blocks, &mut new_index_blocks)?;
                    inode.trebly_indirect_block = root;
                    self.level1 = Some(IndexBlockCache::fresh(root, n));
                } else {
                    Self::ensure_cached(
                        device,
                        storage,
                        &mut self.level1,
                        inode.trebly_indirect_block,
                    )?;
                }

                if appending && second == 0 && third == 0 {
                    let child =
                        Self::reserve_index_block(device, storage, blocks, &mut new_index_blocks)?;
                    let root = self.level1.as_mut().expect("trebly-indirect block loaded");
                    root.entries[first] = child;
                    write_index_block(device, storage, root)?;
                    self.level2 = Some(IndexBlockCache::fresh(child, n));
                } else {
                    let expected =
                        self.level1.as_ref().expect("trebly-indirect block loaded").entries[first];
                    Self::ensure_cached(device, storage, &mut self.level2, expected)?;
                }

                if appending && third == 0 {
                    let child =
                        Self::reserve_index_block(device, storage, blocks, &mut new_index_blocks)?;
                    let mid = self.level2.as_mut().expect("doubly-indirect block loaded");
                    mid.entries[second] = child;
                    write_index_block(device, storage, mid)?;
                    self.level3 = Some(IndexBlockCache::fresh(child, n));
                } else {
                    let expected =
                        self.level2.as_ref().expect("doubly-indirect block loaded").entries[second];
                    Self::ensure_cached(device, storage, &mut self.level3, expected)?;
                }

                let leaf = self.level3.as_mut().expect("singly-indirect block loaded");
                if appending {
                    let block = Self::reserve_data_block(device, storage, blocks)?;
                    leaf.entries[third] = block;
                    write_index_block(device, storage, leaf)?;
                }
                leaf.entries[third]
            }
        };

        if appending {
            self.occupied = logical + 1;
        }
        self.logical = logical + 1;

        Ok(Some(block))
    }
}

impl FsCore {
    /// Reads `len` bytes of the file body starting at `offset`.
    ///
    /// # Errors
    ///
    /// Fails with [`FsError::OutOfBounds`] when the range extends past
    /// `file_size`.
    pub(crate) fn read_file<S: Storage>(
        &mut self,
        storage: &mut S,
        inode: &Inode,
        offset: u64,
        len: usize,
    ) -> Result<Vec<u8>, FsError> {
        let file_size = inode.file_size as u64;
        if offset + len as u64 > file_size {
            return Err(FsError::OutOfBounds);
        }

        let data_size = self.device.data_size();
        let occupied = file_size.div_ceil(data_size as u64);
        let mut iter = BlockIndexIterator::new(offset / data_size as u64, occupied, false);
        let mut scratch = *inode;

        let FsCore { device, blocks, .. } = self;
        let mut out = Vec::with_capacity(len);
        let mut in_block = (offset % data_size as u64) as usize;

        while out.len() < len {
            let block = iter
                .next(device, storage, blocks, &mut scratch)?
                .ok_or(FsError::Internal)?;

            let want = core::cmp::min(len - out.len(), data_size - in_block);
            let mut buf = vec![0u8; want];
            device.read_block(storage, DataLocation::new(block, in_block), &mut buf)?;
            out.extend_from_slice(&buf);
            in_block = 0;
        }

        Ok(out)
    }

    /// Writes `bytes` at `offset`, growing the file as needed, and persists
    /// the inode.
    ///
    /// On a mid-write allocation failure, blocks reserved so far stay
    /// reserved and the inode is not persisted; the on-disk file keeps its
    /// previous size.
    ///
    /// # Errors
    ///
    /// Fails with [`FsError::OutOfBounds`] when `offset` lies past the end
    /// of the file (the extent is always contiguous), and with
    /// [`FsError::NoMoreFreeBlocks`] when the data region runs out.
    pub(crate) fn write_file<S: Storage>(
        &mut self,
        storage: &mut S,
        inode_index: u32,
        inode: &mut Inode,
        offset: u64,
        bytes: &[u8],
    ) -> Result<usize, FsError> {
        let file_size = inode.file_size as u64;
        if offset > file_size {
            return Err(FsError::OutOfBounds);
        }
        if offset + bytes.len() as u64 > u32::MAX as u64 {
            return Err(FsError::OutOfBounds);
        }

        let data_size = self.device.data_size();
        let occupied = file_size.div_ceil(data_size as u64);
        let mut iter = BlockIndexIterator::new(offset / data_size as u64, occupied, true);

        let FsCore { device, blocks, .. } = self;
        let mut written = 0;
        let mut in_block = (offset % data_size as u64) as usize;

        while written < bytes.len() {
            let block = iter
                .next(device, storage, blocks, inode)?
                .ok_or(FsError::Internal)?;

            let n = device.write_block(
                storage,
                &bytes[written..],
                DataLocation::new(block, in_block),
            )?;
            written += n;
            in_block = 0;
        }

        inode.file_size = core::cmp::max(file_size, offset + written as u64) as u32;
        self.inodes
            .update(&self.device, storage, inode_index, inode)?;

        Ok(written)
    }

    /// Changes the file size, releasing or allocating data blocks, and
    /// persists the inode.
    ///
    /// Shrinking walks the mapping over the released range and frees every
    /// data block plus every index block whose whole coverage is released.
    /// Growing allocates fresh blocks and resets each to the codec's
    /// formatted state; the new bytes are whatever `format_block` leaves
    /// behind.
    pub(crate) fn resize_file<S: Storage>(
        &mut self,
        storage: &mut S,
        inode_index: u32,
        inode: &mut Inode,
        new_size: u64,
    ) -> CanFail<FsError> {
        if new_size > u32::MAX as u64 {
            return Err(FsError::OutOfBounds);
        }

        let data_size = self.device.data_size() as u64;
        let old_size = inode.file_size as u64;
        let old_blocks = old_size.div_ceil(data_size);
        let new_blocks = new_size.div_ceil(data_size);

        if new_blocks > addressable_blocks(pointers_per_block(self.device.data_size())) {
            return Err(FsError::OutOfBounds);
        }

        if new_blocks < old_blocks {
            self.release_tail(storage, inode, new_blocks, old_blocks)?;
        } else if new_blocks > old_blocks {
            let FsCore { device, blocks, .. } = self;
            let mut iter = BlockIndexIterator::new(old_blocks, old_blocks, true);
            for _ in old_blocks..new_blocks {
                let block = iter
                    .next(device, storage, blocks, inode)?
                    .ok_or(FsError::Internal)?;
                device.format_block(storage, block)?;
            }
        }

        inode.file_size = new_size as u32;
        self.inodes.update(&self.device, storage, inode_index, inode)
    }

    /// Frees the data blocks of logical range `from..to` together with the
    /// index blocks entirely contained in it.
    fn release_tail<S: Storage>(
        &mut self,
        storage: &mut S,
        inode: &Inode,
        from: u64,
        to: u64,
    ) -> CanFail<FsError> {
        let n = pointers_per_block(self.device.data_size());
        let mut to_free: Vec<u32> = Vec::new();

        {
            let FsCore { device, blocks, .. } = &mut *self;
            let mut iter = BlockIndexIterator::new(from, to, false);
            let mut scratch = *inode;

            for logical in from..to {
                let block = iter
                    .next(device, storage, blocks, &mut scratch)?
                    .ok_or(FsError::Internal)?;
                to_free.push(block);

                // An index block is released with the first logical block
                // it covers.
                match locate(logical, n) {
                    BlockPath::Direct { .. } | BlockPath::OutOfRange => {}
                    BlockPath::Single { slot } => {
                        if slot == 0 {
                            to_free.extend(iter.level1_block());
                        }
                    }
                    BlockPath::Double { first, second } => {
                        if second == 0 {
                            to_free.extend(iter.level2_block());
                            if first == 0 {
                                to_free.extend(iter.level1_block());
                            }
                        }
                    }
                    BlockPath::Triple {
                        first,
                        second,
                        third,
                    } => {
                        if third == 0 {
                            to_free.extend(iter.level3_block());
                            if second == 0 {
                                to_free.extend(iter.level2_block());
                                if first == 0 {
                                    to_free.extend(iter.level1_block());
                                }
                            }
                        }
                    }
                }
            }
        }

        for block in to_free {
            self.blocks.free(&self.device, storage, block)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::EccType;
    use crate::fs::sb::{SuperBlock, SB_SIGNATURE};
    use crate::storage::HeapStorage;
    extern crate std;
    use std::collections::BTreeSet;

    #[test]
    fn locate_matches_the_level_boundaries() {
        let n = 4;
        assert_eq!(locate(0, n), BlockPath::Direct { slot: 0 });
        assert_eq!(locate(11, n), BlockPath::Direct { slot: 11 });
        assert_eq!(locate(12, n), BlockPath::Single { slot: 0 });
        assert_eq!(locate(15, n), BlockPath::Single { slot: 3 });
        assert_eq!(
            locate(16, n),
            BlockPath::Double {
                first: 0,
                second: 0
            }
        );
        assert_eq!(
            locate(31, n),
            BlockPath::Double {
                first: 3,
                second: 3
            }
        );
        assert_eq!(
            locate(32, n),
            BlockPath::Triple {
                first: 0,
                second: 0,
                third: 0
            }
        );
        assert_eq!(
            locate(95, n),
            BlockPath::Triple {
                first: 3,
                second: 3,
                third: 3
            }
        );
        assert_eq!(locate(96, n), BlockPath::OutOfRange);
        assert_eq!(addressable_blocks(n), 96);
    }

    fn setup() -> (BlockDevice, HeapStorage, BlockManager) {
        // 16-byte payloads: 4 pointers per index block, 96-block capacity.
        let device = BlockDevice::new(EccType::None, 16, 0, 0).unwrap();
        let storage = HeapStorage::new(4096 * 16);
        let sb = SuperBlock {
            signature: SB_SIGNATURE,
            total_blocks: 4096,
            total_inodes: 16,
            block_bitmap_address: 4,
            inode_bitmap_address: 1,
            inode_table_address: 2,
            journal_address: 0,
            first_data_block_address: 40,
            last_data_block_address: 4095,
            block_size: 16,
            crc_polynomial: 0,
            rs_correctable_bytes: 0,
            ecc_type: EccType::None as u8,
        };
        let mut blocks = BlockManager::new(&sb);
        let mut s = storage;
        blocks.format(&device, &mut s).unwrap();
        (device, s, blocks)
    }

    #[test]
    fn allocating_walk_yields_distinct_blocks_up_to_capacity() {
        let (device, mut storage, mut blocks) = setup();
        let mut inode = Inode::new_file();
        let mut iter = BlockIndexIterator::new(0, 0, true);

        let mut seen = BTreeSet::new();
        for _ in 0..96 {
            let block = iter
                .next(&device, &mut storage, &mut blocks, &mut inode)
                .unwrap()
                .unwrap();
            assert!(seen.insert(block), "block {block} yielded twice");
        }

        // Capacity reached: the iterator terminates.
        assert_eq!(
            iter.next(&device, &mut storage, &mut blocks, &mut inode)
                .unwrap(),
            None
        );
        assert_eq!(seen.len(), 96);
    }

    #[test]
    fn reading_walk_replays_the_allocated_mapping() {
        let (device, mut storage, mut blocks) = setup();
        let mut inode = Inode::new_file();

        let mut iter = BlockIndexIterator::new(0, 0, true);
        let mut allocated = Vec::new();
        for _ in 0..40 {
            allocated.push(
                iter.next(&device, &mut storage, &mut blocks, &mut inode)
                    .unwrap()
                    .unwrap(),
            );
        }

        let mut replay = BlockIndexIterator::new(0, 40, false);
        for &expected in &allocated {
            assert_eq!(
                replay
                    .next(&device, &mut storage, &mut blocks, &mut inode)
                    .unwrap(),
                Some(expected)
            );
        }
        assert_eq!(
            replay
                .next(&device, &mut storage, &mut blocks, &mut inode)
                .unwrap(),
            None
        );
    }

    #[test]
    fn mid_file_start_resolves_through_the_right_chain() {
        let (device, mut storage, mut blocks) = setup();
        let mut inode = Inode::new_file();

        let mut iter = BlockIndexIterator::new(0, 0, true);
        let mut allocated = Vec::new();
        for _ in 0..30 {
            allocated.push(
                iter.next(&device, &mut storage, &mut blocks, &mut inode)
                    .unwrap()
                    .unwrap(),
            );
        }

        // Start in the middle of the doubly-indirect range.
        let mut replay = BlockIndexIterator::new(20, 30, false);
        for &expected in &allocated[20..] {
            assert_eq!(
                replay
                    .next(&device, &mut storage, &mut blocks, &mut inode)
                    .unwrap(),
                Some(expected)
            );
        }
    }

    #[test]
    fn new_index_blocks_are_reported_at_chain_starts() {
        let (device, mut storage, mut blocks) = setup();
        let mut inode = Inode::new_file();
        let mut iter = BlockIndexIterator::new(0, 0, true);

        // Direct range: no index blocks.
        for _ in 0..12 {
            let mut added = Vec::new();
            iter.next_with_new_index_blocks(
                &device,
                &mut storage,
                &mut blocks,
                &mut inode,
                &mut added,
            )
            .unwrap();
            assert!(added.is_empty());
        }

        // First singly-indirect step allocates the singly root.
        let mut added = Vec::new();
        iter.next_with_new_index_blocks(&device, &mut storage, &mut blocks, &mut inode, &mut added)
            .unwrap();
        assert_eq!(added.len(), 1);
        let indirect_block = inode.indirect_block;
        assert_eq!(added[0], indirect_block);

        // Remaining singly steps add nothing.
        for _ in 13..16 {
            let mut added = Vec::new();
            iter.next_with_new_index_blocks(
                &device,
                &mut storage,
                &mut blocks,
                &mut inode,
                &mut added,
            )
            .unwrap();
            assert!(added.is_empty());
        }

        // First doubly step allocates the doubly root plus a singly child.
        let mut added = Vec::new();
        iter.next_with_new_index_blocks(&device, &mut storage, &mut blocks, &mut inode, &mut added)
            .unwrap();
        assert_eq!(added.len(), 2);
        let doubly_indirect_block = inode.doubly_indirect_block;
        assert_eq!(added[0], doubly_indirect_block);
    }
}
