//! Image Store
//!
//! Creates or validates the backing storage and exposes word-, FAT- and
//! block-level access to it. All addressing comes from the [`Geometry`]
//! recorded in the image's own superblock once it is mounted.

use std::path::Path;

use log::{debug, info};

use crate::date::Date;
use crate::error::{FsError, FsResult};
use crate::layout::{
    Geometry, Superblock, END_OF_CHAIN, MAGIC, ROOT_BLOCK, SUPERBLOCK_LEN,
};
use crate::storage::{FileStorage, Storage};

/// A mounted image
pub struct Image<S> {
    storage: S,
    geometry: Geometry,
}

impl Image<FileStorage> {
    /// Open the image at `path`, formatting a new one with `geometry` if the
    /// file does not exist yet.
    ///
    /// For an existing file `geometry` is ignored: the header stored in the
    /// image decides block size and FAT class.
    pub fn open_or_create(path: &Path, geometry: Geometry) -> FsResult<Self> {
        if path.exists() {
            Self::mount(FileStorage::open(path)?)
        } else {
            Self::format(FileStorage::create(path)?, geometry)
        }
    }
}

impl<S: Storage> Image<S> {
    /// Lay out a brand new image on `storage`, discarding whatever it held.
    pub fn format(mut storage: S, geometry: Geometry) -> FsResult<Self> {
        info!(
            "formatting virtual file-system ({} bytes, {} blocks of {} bytes)",
            geometry.image_len(),
            geometry.block_count(),
            geometry.block_bytes()
        );

        // Truncate first so every region starts zeroed
        storage.set_len(0)?;
        storage.set_len(geometry.image_len())?;
        storage.write_at(0, &Superblock::fresh(&geometry).encode())?;

        // Block 0 is the root; 1 -> 2 -> ... -> n-1 is the free list
        let blocks = geometry.block_count();
        let mut fat = Vec::with_capacity(geometry.fat_len() as usize);
        for block in 0..blocks {
            let next = if block == ROOT_BLOCK || block + 1 == blocks {
                END_OF_CHAIN
            } else {
                (block + 1) as i32
            };
            fat.extend_from_slice(&next.to_le_bytes());
        }
        storage.write_at(geometry.fat_offset(), &fat)?;

        let mut image = Self { storage, geometry };
        image.init_dir_block(ROOT_BLOCK, ROOT_BLOCK, Date::today())?;
        image.flush()?;
        Ok(image)
    }

    /// Validate and adopt an existing image.
    pub fn mount(storage: S) -> FsResult<Self> {
        let actual_len = storage.len()?;
        if actual_len < SUPERBLOCK_LEN as u64 {
            return Err(FsError::InvalidImage(format!(
                "{} bytes is too small to hold a superblock",
                actual_len
            )));
        }

        let mut raw = [0u8; SUPERBLOCK_LEN];
        storage.read_at(0, &mut raw)?;
        let sb = Superblock::decode(&raw);

        if sb.check_number != MAGIC {
            return Err(FsError::InvalidImage(format!(
                "bad check number {}",
                sb.check_number
            )));
        }
        let geometry = sb.geometry().ok_or_else(|| {
            FsError::InvalidImage(format!(
                "unsupported block size {} / fat type {}",
                sb.block_size, sb.fat_class
            ))
        })?;
        if actual_len != geometry.image_len() {
            return Err(FsError::InvalidImage(format!(
                "size is {} bytes, header implies {}",
                actual_len,
                geometry.image_len()
            )));
        }
        if sb.root_block != ROOT_BLOCK as i32 {
            return Err(FsError::InvalidImage(format!(
                "root block is {}",
                sb.root_block
            )));
        }
        let blocks = geometry.block_count() as i32;
        if sb.free_block != END_OF_CHAIN && !(0..blocks).contains(&sb.free_block) {
            return Err(FsError::InvalidImage(format!(
                "free list head {} out of range",
                sb.free_block
            )));
        }
        if !(0..blocks).contains(&sb.n_free_blocks) {
            return Err(FsError::InvalidImage(format!(
                "free block count {} out of range",
                sb.n_free_blocks
            )));
        }

        info!(
            "mounted image: {} blocks of {} bytes, {} free",
            geometry.block_count(),
            geometry.block_bytes(),
            sb.n_free_blocks
        );
        Ok(Self { storage, geometry })
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    pub fn superblock(&self) -> FsResult<Superblock> {
        let mut raw = [0u8; SUPERBLOCK_LEN];
        self.storage.read_at(0, &mut raw)?;
        Ok(Superblock::decode(&raw))
    }

    /// Write pending changes through to the medium.
    pub fn flush(&mut self) -> FsResult<()> {
        self.storage.flush()
    }

    pub fn into_storage(self) -> S {
        self.storage
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // WORD / FAT ACCESS
    // ═══════════════════════════════════════════════════════════════════════════

    pub(crate) fn read_word(&self, offset: u64) -> FsResult<i32> {
        let mut raw = [0u8; 4];
        self.storage.read_at(offset, &mut raw)?;
        Ok(i32::from_le_bytes(raw))
    }

    pub(crate) fn write_word(&mut self, offset: u64, value: i32) -> FsResult<()> {
        self.storage.write_at(offset, &value.to_le_bytes())
    }

    /// Fail with `Corrupt` unless `block` addresses a real block.
    pub fn check_block(&self, block: u32) -> FsResult<()> {
        if block >= self.geometry.block_count() {
            return Err(FsError::Corrupt(format!(
                "block {} outside 0..{}",
                block,
                self.geometry.block_count()
            )));
        }
        Ok(())
    }

    /// Raw FAT cell for `block`
    pub fn fat(&self, block: u32) -> FsResult<i32> {
        self.check_block(block)?;
        self.read_word(self.geometry.fat_cell_offset(block))
    }

    pub(crate) fn set_fat(&mut self, block: u32, value: i32) -> FsResult<()> {
        self.check_block(block)?;
        self.write_word(self.geometry.fat_cell_offset(block), value)
    }

    /// Follow the FAT one step. `None` at a chain terminator.
    pub fn next_block(&self, block: u32) -> FsResult<Option<u32>> {
        match self.fat(block)? {
            END_OF_CHAIN => Ok(None),
            next if next >= 0 && (next as u32) < self.geometry.block_count() => {
                Ok(Some(next as u32))
            }
            bad => Err(FsError::Corrupt(format!(
                "block {} links to invalid block {}",
                block, bad
            ))),
        }
    }

    /// Every block of the chain starting at `head`, in order.
    ///
    /// The walk is bounded by the number of blocks, so a cyclic chain is
    /// reported instead of looping forever.
    pub fn chain(&self, head: Option<u32>) -> FsResult<Vec<u32>> {
        let mut blocks = Vec::new();
        let mut cursor = head;
        while let Some(block) = cursor {
            self.check_block(block)?;
            if blocks.len() as u32 >= self.geometry.block_count() {
                return Err(FsError::Corrupt(format!(
                    "chain starting at {:?} loops",
                    head
                )));
            }
            blocks.push(block);
            cursor = self.next_block(block)?;
        }
        Ok(blocks)
    }

    /// Link `next` after `block` in a chain this caller owns.
    pub(crate) fn link(&mut self, block: u32, next: u32) -> FsResult<()> {
        self.check_block(next)?;
        self.set_fat(block, next as i32)
    }

    /// Terminate the chain at `block`.
    pub(crate) fn terminate(&mut self, block: u32) -> FsResult<()> {
        self.set_fat(block, END_OF_CHAIN)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // BLOCK ACCESS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Read `buf.len()` bytes starting `offset` bytes into `block`.
    pub fn read_in_block(&self, block: u32, offset: usize, buf: &mut [u8]) -> FsResult<()> {
        self.check_span(block, offset, buf.len())?;
        self.storage
            .read_at(self.geometry.block_offset(block) + offset as u64, buf)
    }

    /// Write `data` starting `offset` bytes into `block`.
    pub(crate) fn write_in_block(&mut self, block: u32, offset: usize, data: &[u8]) -> FsResult<()> {
        self.check_span(block, offset, data.len())?;
        self.storage
            .write_at(self.geometry.block_offset(block) + offset as u64, data)
    }

    /// Overwrite a whole block; `data` shorter than a block is zero padded.
    pub(crate) fn write_block(&mut self, block: u32, data: &[u8]) -> FsResult<()> {
        let size = self.geometry.block_bytes();
        if data.len() == size {
            return self.write_in_block(block, 0, data);
        }
        let mut padded = vec![0u8; size];
        padded[..data.len().min(size)].copy_from_slice(&data[..data.len().min(size)]);
        self.write_in_block(block, 0, &padded)
    }

    pub(crate) fn zero_block(&mut self, block: u32) -> FsResult<()> {
        debug!("zeroing block {}", block);
        self.write_block(block, &[])
    }

    fn check_span(&self, block: u32, offset: usize, len: usize) -> FsResult<()> {
        self.check_block(block)?;
        if offset + len > self.geometry.block_bytes() {
            return Err(FsError::Corrupt(format!(
                "access {}..{} beyond block size {}",
                offset,
                offset + len,
                self.geometry.block_bytes()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{BlockSize, FatClass};
    use crate::storage::MemStorage;

    fn small() -> Geometry {
        Geometry::new(BlockSize::B256, FatClass::Fat8)
    }

    #[test]
    fn test_format_layout() {
        let image = Image::format(MemStorage::new(), small()).unwrap();
        let sb = image.superblock().unwrap();
        assert_eq!(sb.check_number, MAGIC);
        assert_eq!(sb.block_size, 256);
        assert_eq!(sb.fat_class, 8);
        assert_eq!(sb.free_block, 1);
        assert_eq!(sb.n_free_blocks, 255);

        assert_eq!(image.fat(0).unwrap(), END_OF_CHAIN);
        assert_eq!(image.fat(1).unwrap(), 2);
        assert_eq!(image.fat(254).unwrap(), 255);
        assert_eq!(image.fat(255).unwrap(), END_OF_CHAIN);
        assert_eq!(image.chain(Some(1)).unwrap().len(), 255);

        let storage = image.into_storage();
        assert_eq!(storage.0.len() as u64, small().image_len());
    }

    #[test]
    fn test_mount_uses_stored_geometry() {
        let geometry = Geometry::new(BlockSize::B1024, FatClass::Fat10);
        let storage = Image::format(MemStorage::new(), geometry)
            .unwrap()
            .into_storage();
        let image = Image::mount(storage).unwrap();
        assert_eq!(*image.geometry(), geometry);
    }

    #[test]
    fn test_mount_rejects_bad_magic() {
        let mut storage = Image::format(MemStorage::new(), small())
            .unwrap()
            .into_storage();
        storage.0[0] = 0;
        assert!(matches!(
            Image::mount(storage),
            Err(FsError::InvalidImage(_))
        ));
    }

    #[test]
    fn test_mount_rejects_size_mismatch() {
        let mut storage = Image::format(MemStorage::new(), small())
            .unwrap()
            .into_storage();
        storage.0.push(0);
        assert!(matches!(
            Image::mount(storage),
            Err(FsError::InvalidImage(_))
        ));
    }

    #[test]
    fn test_mount_rejects_tiny_file() {
        assert!(matches!(
            Image::mount(MemStorage(vec![0u8; 3])),
            Err(FsError::InvalidImage(_))
        ));
    }

    #[test]
    fn test_chain_detects_cycle() {
        let mut image = Image::format(MemStorage::new(), small()).unwrap();
        image.set_fat(255, 1).unwrap();
        assert!(matches!(image.chain(Some(1)), Err(FsError::Corrupt(_))));
    }

    #[test]
    fn test_next_block_rejects_garbage() {
        let mut image = Image::format(MemStorage::new(), small()).unwrap();
        image.set_fat(3, 9000).unwrap();
        assert!(matches!(image.next_block(3), Err(FsError::Corrupt(_))));
        assert!(matches!(image.fat(256), Err(FsError::Corrupt(_))));
    }

    #[test]
    fn test_block_io_keeps_zero_bytes() {
        let mut image = Image::format(MemStorage::new(), small()).unwrap();
        let data: Vec<u8> = (0..256u32).map(|i| (i % 3) as u8).collect();
        image.write_block(7, &data).unwrap();
        let mut back = vec![0xffu8; 256];
        image.read_in_block(7, 0, &mut back).unwrap();
        assert_eq!(back, data);

        image.write_block(7, b"ab").unwrap();
        image.read_in_block(7, 0, &mut back).unwrap();
        assert_eq!(&back[..2], b"ab");
        assert!(back[2..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_open_or_create_host_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fs.img");
        {
            let image = Image::open_or_create(&path, small()).unwrap();
            assert_eq!(image.superblock().unwrap().n_free_blocks, 255);
        }
        assert_eq!(
            std::fs::metadata(&path).unwrap().len(),
            small().image_len()
        );

        // Caller geometry is ignored for an existing image
        let other = Geometry::new(BlockSize::B1024, FatClass::Fat12);
        let image = Image::open_or_create(&path, other).unwrap();
        assert_eq!(*image.geometry(), small());
    }

    #[test]
    fn test_open_rejects_foreign_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("junk.img");
        std::fs::write(&path, vec![7u8; 4096]).unwrap();
        assert!(matches!(
            Image::open_or_create(&path, small()),
            Err(FsError::InvalidImage(_))
        ));
    }
}
