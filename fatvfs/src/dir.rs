//! Directory Engine
//!
//! A directory is a chain of blocks packed with 32-byte records. The first two
//! records of the first block are always `.` and `..`; the `.` record's size
//! field is the entry count of the whole directory. Entry `i` lives in chain
//! block `i / entries_per_block`, slot `i % entries_per_block`.
//!
//! Directories are addressed by the index of their first block.

use std::fmt;

use log::{debug, trace};

use crate::date::Date;
use crate::error::{FsError, FsResult};
use crate::image::Image;
use crate::layout::{DirEntry, EntryKind, DIR_ENTRY_SIZE, ROOT_BLOCK};
use crate::storage::Storage;

/// Index of `.` within a directory
pub const SELF_INDEX: u32 = 0;

/// Index of `..` within a directory
pub const PARENT_INDEX: u32 = 1;

/// Entry count of a directory holding only `.` and `..`
pub const EMPTY_DIR_ENTRIES: u32 = 2;

/// One line of a directory listing
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Listing {
    pub name: String,
    pub kind: EntryKind,
    pub date: Date,
    pub size: u64,
}

impl From<&DirEntry> for Listing {
    fn from(entry: &DirEntry) -> Self {
        Self {
            name: entry.name.clone(),
            kind: entry.kind,
            date: entry.date,
            size: entry.len(),
        }
    }
}

impl fmt::Display for Listing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            EntryKind::Dir => write!(f, "{}\t{}\tDIR", self.name, self.date),
            EntryKind::File => write!(f, "{}\t{}\t{}", self.name, self.date, self.size),
        }
    }
}

impl<S: Storage> Image<S> {
    /// Seed a freshly allocated block as an empty directory.
    pub(crate) fn init_dir_block(&mut self, block: u32, parent: u32, date: Date) -> FsResult<()> {
        self.zero_block(block)?;

        let mut this = DirEntry::dir(".", block, date);
        this.size = EMPTY_DIR_ENTRIES as i32;
        self.write_entry(block, SELF_INDEX, &this)?;
        self.write_entry(block, PARENT_INDEX, &DirEntry::dir("..", parent, date))?;

        debug!("initialised directory block {} (parent {})", block, parent);
        Ok(())
    }

    /// Number of entries in `dir`, including `.` and `..`.
    ///
    /// This is the size field of the `.` record.
    pub fn entry_count(&self, dir: u32) -> FsResult<u32> {
        let this = self.read_entry(dir, SELF_INDEX)?;
        u32::try_from(this.size)
            .ok()
            .filter(|&n| n >= EMPTY_DIR_ENTRIES)
            .ok_or_else(|| {
                FsError::Corrupt(format!("directory {} has entry count {}", dir, this.size))
            })
    }

    fn set_entry_count(&mut self, dir: u32, count: u32) -> FsResult<()> {
        let mut this = self.read_entry(dir, SELF_INDEX)?;
        this.size = count as i32;
        self.write_entry(dir, SELF_INDEX, &this)
    }

    pub fn read_entry(&self, block: u32, slot: u32) -> FsResult<DirEntry> {
        let mut raw = [0u8; DIR_ENTRY_SIZE];
        self.read_in_block(block, slot as usize * DIR_ENTRY_SIZE, &mut raw)?;
        Ok(DirEntry::decode(&raw))
    }

    fn write_entry(&mut self, block: u32, slot: u32, entry: &DirEntry) -> FsResult<()> {
        self.write_in_block(block, slot as usize * DIR_ENTRY_SIZE, &entry.encode())
    }

    fn clear_entry(&mut self, block: u32, slot: u32) -> FsResult<()> {
        self.write_in_block(block, slot as usize * DIR_ENTRY_SIZE, &[0u8; DIR_ENTRY_SIZE])
    }

    /// Block and slot holding entry `index` of the directory whose chain is
    /// `blocks`.
    fn locate(&self, blocks: &[u32], index: u32) -> FsResult<(u32, u32)> {
        let per_block = self.geometry().entries_per_block();
        let block = blocks
            .get((index / per_block) as usize)
            .copied()
            .ok_or_else(|| {
                FsError::Corrupt(format!(
                    "entry {} lies beyond the {} blocks of directory {}",
                    index,
                    blocks.len(),
                    blocks[0]
                ))
            })?;
        Ok((block, index % per_block))
    }

    /// All entries of `dir` in on-disk order, `.` and `..` first.
    pub fn entries(&self, dir: u32) -> FsResult<Vec<DirEntry>> {
        let count = self.entry_count(dir)?;
        let per_block = self.geometry().entries_per_block();
        let mut entries = Vec::with_capacity(count as usize);
        let mut block = dir;

        for index in 0..count {
            if index > 0 && index % per_block == 0 {
                block = self.next_block(block)?.ok_or_else(|| {
                    FsError::Corrupt(format!(
                        "directory {} ends before its {} entries",
                        dir, count
                    ))
                })?;
                trace!("directory {}: continuing in block {}", dir, block);
            }
            entries.push(self.read_entry(block, index % per_block)?);
        }
        Ok(entries)
    }

    /// First entry of `dir` called `name`, with its index.
    pub fn lookup(&self, dir: u32, name: &str) -> FsResult<Option<(u32, DirEntry)>> {
        Ok(self
            .entries(dir)?
            .into_iter()
            .enumerate()
            .find(|(_, entry)| entry.name == name)
            .map(|(index, entry)| (index as u32, entry)))
    }

    /// Blocks the directory chain itself must grow by to take one more entry.
    pub fn growth_blocks(&self, dir: u32) -> FsResult<u32> {
        let count = self.entry_count(dir)?;
        let per_block = self.geometry().entries_per_block();
        Ok(u32::from(count > 0 && count % per_block == 0))
    }

    /// Append `entry` to `dir`, growing the chain by one block when the last
    /// block is full.
    ///
    /// The growth block is checked for before anything is written, so on
    /// `OutOfSpace` the directory is untouched.
    pub(crate) fn insert_entry(&mut self, dir: u32, entry: &DirEntry) -> FsResult<()> {
        let count = self.entry_count(dir)?;
        let per_block = self.geometry().entries_per_block();
        let growth = self.growth_blocks(dir)?;
        self.reserve(growth)?;

        let blocks = self.chain(Some(dir))?;
        let mut last = *blocks.last().unwrap_or(&dir);

        if growth > 0 {
            let block = self.allocate()?;
            self.zero_block(block)?;
            self.link(last, block)?;
            debug!("directory {} grew into block {}", dir, block);
            last = block;
        }

        self.write_entry(last, count % per_block, entry)?;
        self.set_entry_count(dir, count + 1)?;
        debug!(
            "directory {}: inserted {:?} as entry {}",
            dir, entry.name, count
        );
        Ok(())
    }

    /// Remove entry `index` by moving the last entry into its slot.
    ///
    /// When that empties the final block of a multi-block chain, the block is
    /// unlinked and released.
    pub(crate) fn remove_entry(&mut self, dir: u32, index: u32) -> FsResult<()> {
        let count = self.entry_count(dir)?;
        if index < EMPTY_DIR_ENTRIES || index >= count {
            return Err(FsError::Corrupt(format!(
                "cannot remove entry {} of directory {} with {} entries",
                index, dir, count
            )));
        }

        let blocks = self.chain(Some(dir))?;
        let last = count - 1;
        let (last_block, last_slot) = self.locate(&blocks, last)?;

        if index != last {
            let moved = self.read_entry(last_block, last_slot)?;
            let (block, slot) = self.locate(&blocks, index)?;
            self.write_entry(block, slot, &moved)?;
            debug!(
                "directory {}: moved {:?} from entry {} to {}",
                dir, moved.name, last, index
            );
        }
        self.set_entry_count(dir, last)?;

        if last_slot == 0 {
            // The last entry was alone in the final block
            let chain_pos = blocks
                .iter()
                .position(|&b| b == last_block)
                .unwrap_or(0);
            if chain_pos > 0 {
                self.terminate(blocks[chain_pos - 1])?;
                self.release(last_block)?;
                debug!("directory {} shrank, released block {}", dir, last_block);
            }
        } else {
            self.clear_entry(last_block, last_slot)?;
        }
        Ok(())
    }

    /// First block of the parent of `dir`.
    pub fn parent_of(&self, dir: u32) -> FsResult<u32> {
        self.read_entry(dir, PARENT_INDEX)?.head().ok_or_else(|| {
            FsError::Corrupt(format!("directory {} has no parent link", dir))
        })
    }

    /// Absolute path of the directory starting at `dir`.
    pub fn path_of(&self, dir: u32) -> FsResult<String> {
        let mut names = Vec::new();
        let mut current = dir;

        while current != ROOT_BLOCK {
            if names.len() as u32 >= self.geometry().block_count() {
                return Err(FsError::Corrupt(format!(
                    "parent links from directory {} loop",
                    dir
                )));
            }
            let parent = self.parent_of(current)?;
            if parent == current {
                break;
            }
            let name = self
                .entries(parent)?
                .into_iter()
                .skip(EMPTY_DIR_ENTRIES as usize)
                .find(|entry| entry.is_dir() && entry.head() == Some(current))
                .map(|entry| entry.name)
                .ok_or_else(|| {
                    FsError::Corrupt(format!(
                        "directory {} is not listed in its parent {}",
                        current, parent
                    ))
                })?;
            names.push(name);
            current = parent;
        }

        if names.is_empty() {
            return Ok("/".into());
        }
        Ok(names
            .iter()
            .rev()
            .fold(String::new(), |path, name| path + "/" + name))
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

    fn file(name: &str) -> DirEntry {
        DirEntry::file(name, 0, None, Date::new(1, 1, 100))
    }

    #[test]
    fn test_root_is_seeded() {
        let image = image();
        assert_eq!(image.entry_count(ROOT_BLOCK).unwrap(), 2);
        let entries = image.entries(ROOT_BLOCK).unwrap();
        assert_eq!(entries[0].name, ".");
        assert_eq!(entries[1].name, "..");
        assert_eq!(entries[1].head(), Some(ROOT_BLOCK));
        assert_eq!(image.parent_of(ROOT_BLOCK).unwrap(), ROOT_BLOCK);
        assert_eq!(image.path_of(ROOT_BLOCK).unwrap(), "/");
    }

    #[test]
    fn test_insert_grows_chain() {
        let mut image = image();
        // 8 entries per block: `.`, `..` and six files fill block 0
        for i in 0..6 {
            image.insert_entry(ROOT_BLOCK, &file(&format!("f{}", i))).unwrap();
        }
        assert_eq!(image.chain(Some(ROOT_BLOCK)).unwrap().len(), 1);
        assert_eq!(image.growth_blocks(ROOT_BLOCK).unwrap(), 1);

        image.insert_entry(ROOT_BLOCK, &file("f6")).unwrap();
        assert_eq!(image.chain(Some(ROOT_BLOCK)).unwrap().len(), 2);
        assert_eq!(image.entry_count(ROOT_BLOCK).unwrap(), 9);
        assert_eq!(image.free_blocks().unwrap(), 254);
        let (index, entry) = image.lookup(ROOT_BLOCK, "f6").unwrap().unwrap();
        assert_eq!(index, 8);
        assert_eq!(entry.name, "f6");
    }

    #[test]
    fn test_insert_without_space_changes_nothing() {
        let mut image = image();
        for i in 0..6 {
            image.insert_entry(ROOT_BLOCK, &file(&format!("f{}", i))).unwrap();
        }
        while image.free_blocks().unwrap() > 0 {
            image.allocate().unwrap();
        }
        assert!(matches!(
            image.insert_entry(ROOT_BLOCK, &file("late")),
            Err(FsError::OutOfSpace { needed: 1, free: 0 })
        ));
        assert_eq!(image.entry_count(ROOT_BLOCK).unwrap(), 8);
        assert_eq!(image.chain(Some(ROOT_BLOCK)).unwrap().len(), 1);
    }

    #[test]
    fn test_remove_relocates_from_later_block() {
        let mut image = image();
        for i in 0..7 {
            image.insert_entry(ROOT_BLOCK, &file(&format!("f{}", i))).unwrap();
        }
        let mut last = DirEntry::dir("sub", 42, Date::new(2, 2, 102));
        last.size = 0;
        image.insert_entry(ROOT_BLOCK, &last).unwrap();
        // f0 sits in block 0, `sub` in the second chain block
        let (index, _) = image.lookup(ROOT_BLOCK, "f0").unwrap().unwrap();
        assert_eq!(index, 2);

        image.remove_entry(ROOT_BLOCK, index).unwrap();
        let (moved_index, moved) = image.lookup(ROOT_BLOCK, "sub").unwrap().unwrap();
        assert_eq!(moved_index, 2);
        assert_eq!(moved, last);
        assert!(image.lookup(ROOT_BLOCK, "f0").unwrap().is_none());
        assert_eq!(image.entry_count(ROOT_BLOCK).unwrap(), 9);
        assert_eq!(image.chain(Some(ROOT_BLOCK)).unwrap().len(), 2);
    }

    #[test]
    fn test_remove_last_in_block_shrinks_chain() {
        let mut image = image();
        for i in 0..7 {
            image.insert_entry(ROOT_BLOCK, &file(&format!("f{}", i))).unwrap();
        }
        let free = image.free_blocks().unwrap();
        let (index, _) = image.lookup(ROOT_BLOCK, "f6").unwrap().unwrap();
        assert_eq!(index, 8);

        image.remove_entry(ROOT_BLOCK, index).unwrap();
        assert_eq!(image.chain(Some(ROOT_BLOCK)).unwrap().len(), 1);
        assert_eq!(image.free_blocks().unwrap(), free + 1);
        assert_eq!(image.entry_count(ROOT_BLOCK).unwrap(), 8);
    }

    #[test]
    fn test_remove_refuses_dot_entries() {
        let mut image = image();
        image.insert_entry(ROOT_BLOCK, &file("x")).unwrap();
        assert!(image.remove_entry(ROOT_BLOCK, SELF_INDEX).is_err());
        assert!(image.remove_entry(ROOT_BLOCK, PARENT_INDEX).is_err());
        assert!(image.remove_entry(ROOT_BLOCK, 3).is_err());
    }

    #[test]
    fn test_lookup_first_match_wins() {
        let mut image = image();
        let mut first = file("dup");
        first.size = 1;
        image.insert_entry(ROOT_BLOCK, &first).unwrap();
        image.insert_entry(ROOT_BLOCK, &file("dup")).unwrap();
        let (index, entry) = image.lookup(ROOT_BLOCK, "dup").unwrap().unwrap();
        assert_eq!(index, 2);
        assert_eq!(entry.size, 1);
    }

    #[test]
    fn test_path_of_nested_directories() {
        let mut image = image();
        let a = image.allocate().unwrap();
        image.init_dir_block(a, ROOT_BLOCK, Date::new(1, 1, 100)).unwrap();
        image
            .insert_entry(ROOT_BLOCK, &DirEntry::dir("a", a, Date::new(1, 1, 100)))
            .unwrap();
        let b = image.allocate().unwrap();
        image.init_dir_block(b, a, Date::new(1, 1, 100)).unwrap();
        image
            .insert_entry(a, &DirEntry::dir("b", b, Date::new(1, 1, 100)))
            .unwrap();

        assert_eq!(image.path_of(a).unwrap(), "/a");
        assert_eq!(image.path_of(b).unwrap(), "/a/b");
    }

    #[test]
    fn test_listing_format() {
        let dir = Listing::from(&DirEntry::dir("docs", 3, Date::new(9, 8, 125)));
        assert_eq!(dir.to_string(), "docs\t09-08-2025\tDIR");
        let file = Listing::from(&DirEntry::file("a.bin", 5000, Some(4), Date::new(9, 8, 125)));
        assert_eq!(file.to_string(), "a.bin\t09-08-2025\t5000");
    }
}
