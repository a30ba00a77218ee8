//! block allocation on the simulated device
use bitvec::prelude::*;
use log::debug;

/// index of a fixed-size block on the simulated device
pub type BlockIndex = u64;

/// hands out free blocks of the simulated device
///
/// The inode tree only ever calls [allocate_block](BlockAllocator::allocate_block);
/// [release_block](BlockAllocator::release_block) is reached solely through explicit
/// reclamation.
pub trait BlockAllocator {
    /// reserve a free block, `None` when the device is exhausted
    fn allocate_block(&mut self) -> Option<BlockIndex>;

    /// give a block back to the free pool
    fn release_block(&mut self, index: BlockIndex);
}

/// a bitmap of the device's blocks, one bit per block, set when occupied
#[derive(Debug, Default, Clone)]
pub struct BitmapAllocator {
    bitmap: BitVec<u8, Lsb0>,
    next_free: Option<usize>,
}

impl BitmapAllocator {
    /// a device of `block_count` free blocks
    pub fn new(block_count: usize) -> Self {
        Self::from_bitmap(bitvec![u8, Lsb0; 0; block_count])
    }

    pub fn from_bitmap(bitmap: BitVec<u8, Lsb0>) -> Self {
        let mut allocator = BitmapAllocator {
            bitmap,
            next_free: None,
        };
        allocator.next_free = allocator.next_free_block();
        allocator
    }

    pub fn free_blocks(&self) -> usize {
        self.bitmap.count_zeros()
    }

    /// check if a block is occupied, out of range blocks are reported as free
    pub fn is_allocated(&self, index: BlockIndex) -> bool {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.bitmap.get(i).as_deref().copied())
            .unwrap_or(false)
    }

    /// occupy a specific block, used to rebuild the bitmap from a loaded tree
    /// # Return
    /// `false` if the block is out of range or already occupied
    pub fn mark_allocated(&mut self, index: BlockIndex) -> bool {
        let Ok(i) = usize::try_from(index) else {
            return false;
        };
        if i >= self.bitmap.len() || self.bitmap[i] {
            return false;
        }
        self.bitmap.set(i, true);
        if self.next_free == Some(i) {
            self.next_free = self.next_free_block();
        }
        true
    }

    fn next_free_block(&self) -> Option<usize> {
        self.bitmap.first_zero()
    }
}

impl BlockAllocator for BitmapAllocator {
    fn allocate_block(&mut self) -> Option<BlockIndex> {
        let index = self.next_free?;
        self.bitmap.set(index, true);
        self.next_free = self.next_free_block();
        debug!("allocated block {index}");
        Some(index as BlockIndex)
    }

    fn release_block(&mut self, index: BlockIndex) {
        let Ok(i) = usize::try_from(index) else {
            return;
        };
        if i < self.bitmap.len() {
            self.bitmap.set(i, false);
            self.next_free = self.next_free.map_or(Some(i), |next| Some(next.min(i)));
            debug!("released block {index}");
        }
    }
}
