//! Free-list sub-allocator
//!
//! Tracks the free byte ranges of a fixed-size region. Blocks are kept sorted by
//! offset and coalesced on free, so the list never holds two adjacent blocks.
//! Allocation is first-fit.

use crate::render::api::{RenderError, RenderResult};

/// A free `[offset, offset + size)` range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeBlock {
    /// Start of the range
    pub offset: u64,
    /// Length of the range
    pub size: u64,
}

impl FreeBlock {
    fn end(&self) -> u64 {
        self.offset + self.size
    }
}

/// First-fit free-list over `total_size` bytes
#[derive(Debug, Clone)]
pub struct FreeList {
    total_size: u64,
    blocks: Vec<FreeBlock>,
}

impl FreeList {
    /// A list whose whole range is free
    pub fn new(total_size: u64) -> Self {
        let blocks = if total_size > 0 {
            vec![FreeBlock { offset: 0, size: total_size }]
        } else {
            Vec::new()
        };
        Self { total_size, blocks }
    }

    /// Reserve `size` bytes, returning the offset, or `None` if no block fits
    pub fn allocate(&mut self, size: u64) -> Option<u64> {
        if size == 0 {
            return None;
        }

        let index = self.blocks.iter().position(|block| block.size >= size)?;
        let block = &mut self.blocks[index];
        let offset = block.offset;
        if block.size == size {
            self.blocks.remove(index);
        } else {
            block.offset += size;
            block.size -= size;
        }
        Some(offset)
    }

    /// Return a range to the list, merging it with adjacent free blocks
    ///
    /// Fails if the range lies outside the region or overlaps a block that is
    /// already free (a double free).
    pub fn free(&mut self, offset: u64, size: u64) -> RenderResult<()> {
        if size == 0 || offset.checked_add(size).map_or(true, |end| end > self.total_size) {
            return Err(RenderError::OutOfRange { offset, size, capacity: self.total_size });
        }

        let freed = FreeBlock { offset, size };
        let index = self.blocks.partition_point(|block| block.offset < offset);

        let overlaps_prev = index > 0 && self.blocks[index - 1].end() > offset;
        let overlaps_next = index < self.blocks.len() && freed.end() > self.blocks[index].offset;
        if overlaps_prev || overlaps_next {
            return Err(RenderError::InvalidState(format!(
                "double free of range [{}, {}) in free list",
                offset,
                freed.end()
            )));
        }

        let merge_prev = index > 0 && self.blocks[index - 1].end() == offset;
        let merge_next = index < self.blocks.len() && self.blocks[index].offset == freed.end();

        match (merge_prev, merge_next) {
            (true, true) => {
                let next = self.blocks.remove(index);
                self.blocks[index - 1].size += size + next.size;
            }
            (true, false) => self.blocks[index - 1].size += size,
            (false, true) => {
                let next = &mut self.blocks[index];
                next.offset = offset;
                next.size += size;
            }
            (false, false) => self.blocks.insert(index, freed),
        }
        Ok(())
    }

    /// Grow the managed region; the new tail becomes free
    pub fn resize(&mut self, new_size: u64) -> RenderResult<()> {
        if new_size < self.total_size {
            return Err(RenderError::InvalidState(format!(
                "free list cannot shrink from {} to {} bytes",
                self.total_size, new_size
            )));
        }
        let grown = new_size - self.total_size;
        if grown == 0 {
            return Ok(());
        }

        let old_size = self.total_size;
        self.total_size = new_size;
        match self.blocks.last_mut() {
            Some(last) if last.end() == old_size => last.size += grown,
            _ => self.blocks.push(FreeBlock { offset: old_size, size: grown }),
        }
        Ok(())
    }

    /// Mark the whole region free again
    pub fn clear(&mut self) {
        *self = Self::new(self.total_size);
    }

    /// Total bytes currently free
    pub fn free_space(&self) -> u64 {
        self.blocks.iter().map(|block| block.size).sum()
    }

    /// Number of disjoint free blocks
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Size of the managed region
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Free blocks in offset order
    pub fn blocks(&self) -> &[FreeBlock] {
        &self.blocks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_and_free_coalesce() {
        let mut list = FreeList::new(512);
        let a = list.allocate(64).unwrap();
        let b = list.allocate(32).unwrap();
        let c = list.allocate(64).unwrap();
        assert_eq!((a, b, c), (0, 64, 96));
        assert_eq!(list.free_space(), 512 - 160);

        list.free(b, 32).unwrap();
        assert_eq!(list.block_count(), 2);

        list.free(a, 64).unwrap();
        assert_eq!(list.block_count(), 2);
        assert_eq!(list.blocks()[0], FreeBlock { offset: 0, size: 96 });

        list.free(c, 64).unwrap();
        assert_eq!(list.block_count(), 1);
        assert_eq!(list.free_space(), 512);
    }

    #[test]
    fn test_allocate_exhaustion() {
        let mut list = FreeList::new(128);
        assert_eq!(list.allocate(128), Some(0));
        assert_eq!(list.allocate(1), None);
        assert_eq!(list.free_space(), 0);
        assert_eq!(list.allocate(0), None);
    }

    #[test]
    fn test_first_fit_reuses_hole() {
        let mut list = FreeList::new(300);
        let a = list.allocate(100).unwrap();
        let _b = list.allocate(100).unwrap();
        list.free(a, 100).unwrap();
        assert_eq!(list.allocate(50), Some(0));
        assert_eq!(list.allocate(50), Some(50));
        assert_eq!(list.allocate(100), Some(200));
    }

    #[test]
    fn test_double_free_detected() {
        let mut list = FreeList::new(256);
        let a = list.allocate(64).unwrap();
        list.free(a, 64).unwrap();
        assert!(matches!(list.free(a, 64), Err(RenderError::InvalidState(_))));
        assert!(list.free(200, 100).is_err());
    }

    #[test]
    fn test_resize_extends_tail() {
        let mut list = FreeList::new(100);
        list.allocate(60).unwrap();
        list.resize(200).unwrap();
        assert_eq!(list.block_count(), 1);
        assert_eq!(list.free_space(), 140);

        list.allocate(140).unwrap();
        list.resize(250).unwrap();
        assert_eq!(list.blocks(), &[FreeBlock { offset: 200, size: 50 }]);
        assert!(list.resize(10).is_err());
    }

    #[test]
    fn test_no_overlap_and_conservation() {
        let capacity = 4096;
        let mut list = FreeList::new(capacity);
        let mut live: Vec<(u64, u64)> = Vec::new();

        // Deterministic pseudo-random allocate/free sequence.
        let mut seed = 0x2545_f491_u64;
        for step in 0..500 {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            if step % 3 == 2 && !live.is_empty() {
                let (offset, size) = live.swap_remove((seed as usize) % live.len());
                list.free(offset, size).unwrap();
            } else {
                let size = 1 + seed % 200;
                if let Some(offset) = list.allocate(size) {
                    live.push((offset, size));
                }
            }

            let allocated: u64 = live.iter().map(|(_, size)| size).sum();
            assert_eq!(allocated + list.free_space(), capacity);

            let mut sorted = live.clone();
            sorted.sort_unstable();
            for pair in sorted.windows(2) {
                assert!(pair[0].0 + pair[0].1 <= pair[1].0);
            }
        }
    }
}
