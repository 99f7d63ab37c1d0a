//! Block Allocator
//!
//! Free blocks form a singly linked list threaded through the FAT, headed by
//! the superblock's `free_block` word, with `n_free_blocks` tracking its
//! length. The functions here are the only code that touches either word or
//! any FAT cell of a free block.

use log::{debug, trace};

use crate::error::{FsError, FsResult};
use crate::image::Image;
use crate::layout::{END_OF_CHAIN, SB_FREE_BLOCK, SB_N_FREE_BLOCKS};
use crate::storage::Storage;

impl<S: Storage> Image<S> {
    /// Number of blocks on the free list
    pub fn free_blocks(&self) -> FsResult<u32> {
        let count = self.read_word(SB_N_FREE_BLOCKS)?;
        u32::try_from(count)
            .map_err(|_| FsError::Corrupt(format!("negative free block count {}", count)))
    }

    /// Head of the free list, `None` when it is empty
    pub fn free_head(&self) -> FsResult<Option<u32>> {
        match self.read_word(SB_FREE_BLOCK)? {
            END_OF_CHAIN => Ok(None),
            head => {
                let head = u32::try_from(head)
                    .map_err(|_| FsError::Corrupt(format!("free list head {}", head)))?;
                self.check_block(head)?;
                Ok(Some(head))
            }
        }
    }

    /// Succeed only if `needed` blocks can be allocated right now.
    pub fn reserve(&self, needed: u32) -> FsResult<()> {
        let free = self.free_blocks()?;
        if needed > free {
            debug!("space check failed: {} blocks needed, {} free", needed, free);
            return Err(FsError::OutOfSpace { needed, free });
        }
        Ok(())
    }

    /// Pop the head of the free list.
    ///
    /// The returned block is detached: its FAT cell is the chain terminator.
    pub fn allocate(&mut self) -> FsResult<u32> {
        let free = self.free_blocks()?;
        if free == 0 {
            return Err(FsError::OutOfSpace { needed: 1, free: 0 });
        }
        let block = self.free_head()?.ok_or_else(|| {
            FsError::Corrupt(format!("free list empty but {} blocks counted free", free))
        })?;

        let next = self.fat(block)?;
        self.write_word(SB_FREE_BLOCK, next)?;
        self.set_fat(block, END_OF_CHAIN)?;
        self.write_word(SB_N_FREE_BLOCKS, (free - 1) as i32)?;

        trace!("allocated block {} ({} left)", block, free - 1);
        Ok(block)
    }

    /// Push `block` onto the free list.
    ///
    /// `block` must not be reachable from any chain any more; a double free
    /// corrupts the list.
    pub fn release(&mut self, block: u32) -> FsResult<()> {
        self.check_block(block)?;
        let head = self.read_word(SB_FREE_BLOCK)?;
        let free = self.free_blocks()?;

        self.set_fat(block, head)?;
        self.write_word(SB_FREE_BLOCK, block as i32)?;
        self.write_word(SB_N_FREE_BLOCKS, (free + 1) as i32)?;

        trace!("released block {} ({} free)", block, free + 1);
        Ok(())
    }

    /// Return a whole chain to the free list. The chain is walked completely
    /// before the first block is released.
    pub fn release_chain(&mut self, head: Option<u32>) -> FsResult<u32> {
        let blocks = self.chain(head)?;
        for &block in &blocks {
            self.release(block)?;
        }
        if !blocks.is_empty() {
            debug!("released chain of {} blocks starting at {:?}", blocks.len(), head);
        }
        Ok(blocks.len() as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{BlockSize, FatClass, Geometry};
    use crate::storage::MemStorage;

    fn image() -> Image<MemStorage> {
        Image::format(
            MemStorage::new(),
            Geometry::new(BlockSize::B256, FatClass::Fat8),
        )
        .unwrap()
    }

    fn free_chain_len(image: &Image<MemStorage>) -> usize {
        image.chain(image.free_head().unwrap()).unwrap().len()
    }

    #[test]
    fn test_allocate_pops_head() {
        let mut image = image();
        assert_eq!(image.allocate().unwrap(), 1);
        assert_eq!(image.allocate().unwrap(), 2);
        assert_eq!(image.fat(1).unwrap(), END_OF_CHAIN);
        assert_eq!(image.free_head().unwrap(), Some(3));
        assert_eq!(image.free_blocks().unwrap(), 253);
        assert_eq!(free_chain_len(&image), 253);
    }

    #[test]
    fn test_release_pushes_head() {
        let mut image = image();
        let a = image.allocate().unwrap();
        let _b = image.allocate().unwrap();
        image.release(a).unwrap();
        assert_eq!(image.free_head().unwrap(), Some(a));
        assert_eq!(image.fat(a).unwrap(), 3);
        assert_eq!(image.free_blocks().unwrap(), 254);
        assert_eq!(free_chain_len(&image), 254);
    }

    #[test]
    fn test_exhaustion_leaves_state_alone() {
        let mut image = image();
        for _ in 0..255 {
            image.allocate().unwrap();
        }
        assert_eq!(image.free_head().unwrap(), None);
        let before = image.superblock().unwrap();
        assert!(matches!(
            image.allocate(),
            Err(FsError::OutOfSpace { needed: 1, free: 0 })
        ));
        assert_eq!(image.superblock().unwrap(), before);
    }

    #[test]
    fn test_reserve() {
        let mut image = image();
        assert!(image.reserve(255).is_ok());
        image.allocate().unwrap();
        assert!(matches!(
            image.reserve(255),
            Err(FsError::OutOfSpace { needed: 255, free: 254 })
        ));
    }

    #[test]
    fn test_release_chain_returns_every_block() {
        let mut image = image();
        let a = image.allocate().unwrap();
        let b = image.allocate().unwrap();
        let c = image.allocate().unwrap();
        image.link(a, b).unwrap();
        image.link(b, c).unwrap();
        assert_eq!(image.release_chain(Some(a)).unwrap(), 3);
        assert_eq!(image.free_blocks().unwrap(), 255);
        assert_eq!(free_chain_len(&image), 255);
        assert_eq!(image.release_chain(None).unwrap(), 0);
    }
}
