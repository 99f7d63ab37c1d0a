//! On-disk layout
//!
//! ```text
//! offset 0                          superblock (six little-endian i32 words)
//! offset block_size                 FAT, one i32 per block
//! offset block_size + 4 * blocks    block region, blocks * block_size bytes
//! ```
//!
//! Every integer on disk is little-endian.

use crate::date::Date;
use crate::error::{FsError, FsResult};

// ═══════════════════════════════════════════════════════════════════════════════
// CONSTANTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Superblock check value
pub const MAGIC: i32 = 9999;

/// Chain terminator in the FAT
pub const END_OF_CHAIN: i32 = -1;

/// The root directory always lives in block 0
pub const ROOT_BLOCK: u32 = 0;

/// Size of one FAT cell in bytes
pub const FAT_CELL_SIZE: u64 = 4;

/// Size of a directory entry record in bytes
pub const DIR_ENTRY_SIZE: usize = 32;

/// Room for the name inside a record, including the terminating NUL
pub const NAME_FIELD_LEN: usize = 20;

/// Longest name that fits a record
pub const MAX_NAME_LEN: usize = NAME_FIELD_LEN - 1;

// Superblock word offsets
pub(crate) const SB_CHECK_NUMBER: u64 = 0;
pub(crate) const SB_BLOCK_SIZE: u64 = 4;
pub(crate) const SB_FAT_CLASS: u64 = 8;
pub(crate) const SB_ROOT_BLOCK: u64 = 12;
pub(crate) const SB_FREE_BLOCK: u64 = 16;
pub(crate) const SB_N_FREE_BLOCKS: u64 = 20;

/// Bytes covered by the six superblock words
pub const SUPERBLOCK_LEN: usize = 24;

const KIND_DIR: u8 = b'D';
const KIND_FILE: u8 = b'F';

// ═══════════════════════════════════════════════════════════════════════════════
// GEOMETRY
// ═══════════════════════════════════════════════════════════════════════════════

/// Supported block sizes
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockSize {
    B256,
    B512,
    B1024,
}

impl BlockSize {
    pub fn from_bytes(bytes: i32) -> Option<Self> {
        match bytes {
            256 => Some(Self::B256),
            512 => Some(Self::B512),
            1024 => Some(Self::B1024),
            _ => None,
        }
    }

    pub const fn bytes(self) -> u32 {
        match self {
            Self::B256 => 256,
            Self::B512 => 512,
            Self::B1024 => 1024,
        }
    }
}

/// FAT cardinality class: 8, 10 or 12 bits worth of entries
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FatClass {
    Fat8,
    Fat10,
    Fat12,
}

impl FatClass {
    pub fn from_class(class: i32) -> Option<Self> {
        match class {
            8 => Some(Self::Fat8),
            10 => Some(Self::Fat10),
            12 => Some(Self::Fat12),
            _ => None,
        }
    }

    pub const fn class(self) -> u32 {
        match self {
            Self::Fat8 => 8,
            Self::Fat10 => 10,
            Self::Fat12 => 12,
        }
    }

    /// Number of FAT entries, which is also the number of blocks.
    pub const fn entries(self) -> u32 {
        1 << self.class()
    }
}

/// Addressing derived once from block size and FAT class
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Geometry {
    pub block_size: BlockSize,
    pub fat_class: FatClass,
}

impl Geometry {
    pub const fn new(block_size: BlockSize, fat_class: FatClass) -> Self {
        Self {
            block_size,
            fat_class,
        }
    }

    pub const fn block_bytes(&self) -> usize {
        self.block_size.bytes() as usize
    }

    /// Total number of blocks (and FAT entries)
    pub const fn block_count(&self) -> u32 {
        self.fat_class.entries()
    }

    pub const fn entries_per_block(&self) -> u32 {
        self.block_size.bytes() / DIR_ENTRY_SIZE as u32
    }

    pub const fn fat_offset(&self) -> u64 {
        self.block_size.bytes() as u64
    }

    pub const fn fat_len(&self) -> u64 {
        self.block_count() as u64 * FAT_CELL_SIZE
    }

    pub const fn blocks_offset(&self) -> u64 {
        self.fat_offset() + self.fat_len()
    }

    /// Exact size of a valid image with this geometry
    pub const fn image_len(&self) -> u64 {
        self.blocks_offset() + self.block_count() as u64 * self.block_size.bytes() as u64
    }

    pub const fn fat_cell_offset(&self, block: u32) -> u64 {
        self.fat_offset() + block as u64 * FAT_CELL_SIZE
    }

    pub const fn block_offset(&self, block: u32) -> u64 {
        self.blocks_offset() + block as u64 * self.block_size.bytes() as u64
    }

    /// Blocks needed to hold `bytes` of file content (saturating)
    pub fn blocks_for(&self, bytes: u64) -> u32 {
        let blocks = bytes.div_ceil(self.block_size.bytes() as u64);
        u32::try_from(blocks).unwrap_or(u32::MAX)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SUPERBLOCK
// ═══════════════════════════════════════════════════════════════════════════════

/// Decoded superblock words
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Superblock {
    pub check_number: i32,
    pub block_size: i32,
    pub fat_class: i32,
    pub root_block: i32,
    pub free_block: i32,
    pub n_free_blocks: i32,
}

impl Superblock {
    /// Superblock of a freshly formatted image: everything but block 0 is free.
    pub fn fresh(geometry: &Geometry) -> Self {
        let blocks = geometry.block_count() as i32;
        Self {
            check_number: MAGIC,
            block_size: geometry.block_size.bytes() as i32,
            fat_class: geometry.fat_class.class() as i32,
            root_block: ROOT_BLOCK as i32,
            free_block: if blocks > 1 { 1 } else { END_OF_CHAIN },
            n_free_blocks: blocks - 1,
        }
    }

    pub fn decode(buf: &[u8; SUPERBLOCK_LEN]) -> Self {
        let word = |offset: u64| read_i32(buf, offset as usize);
        Self {
            check_number: word(SB_CHECK_NUMBER),
            block_size: word(SB_BLOCK_SIZE),
            fat_class: word(SB_FAT_CLASS),
            root_block: word(SB_ROOT_BLOCK),
            free_block: word(SB_FREE_BLOCK),
            n_free_blocks: word(SB_N_FREE_BLOCKS),
        }
    }

    pub fn encode(&self) -> [u8; SUPERBLOCK_LEN] {
        let mut buf = [0u8; SUPERBLOCK_LEN];
        write_i32(&mut buf, SB_CHECK_NUMBER as usize, self.check_number);
        write_i32(&mut buf, SB_BLOCK_SIZE as usize, self.block_size);
        write_i32(&mut buf, SB_FAT_CLASS as usize, self.fat_class);
        write_i32(&mut buf, SB_ROOT_BLOCK as usize, self.root_block);
        write_i32(&mut buf, SB_FREE_BLOCK as usize, self.free_block);
        write_i32(&mut buf, SB_N_FREE_BLOCKS as usize, self.n_free_blocks);
        buf
    }

    /// Geometry declared by the header, if it is one we understand.
    pub fn geometry(&self) -> Option<Geometry> {
        Some(Geometry::new(
            BlockSize::from_bytes(self.block_size)?,
            FatClass::from_class(self.fat_class)?,
        ))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// DIRECTORY ENTRY RECORD
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryKind {
    Dir,
    File,
}

/// One 32-byte directory record.
///
/// For the `.` record of a directory, `size` holds the number of entries in the
/// whole directory (including `.` and `..`) instead of a byte length.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirEntry {
    pub kind: EntryKind,
    pub name: String,
    pub date: Date,
    pub size: i32,
    pub first_block: i32,
}

impl DirEntry {
    pub fn dir(name: &str, first_block: u32, date: Date) -> Self {
        Self {
            kind: EntryKind::Dir,
            name: name.into(),
            date,
            size: 0,
            first_block: first_block as i32,
        }
    }

    /// File entry; `first_block` is `None` for an empty file.
    pub fn file(name: &str, size: u32, first_block: Option<u32>, date: Date) -> Self {
        Self {
            kind: EntryKind::File,
            name: name.into(),
            date,
            size: size as i32,
            first_block: first_block.map_or(END_OF_CHAIN, |b| b as i32),
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Dir
    }

    /// Head of the entry's own chain, `None` for an empty file.
    pub fn head(&self) -> Option<u32> {
        u32::try_from(self.first_block).ok()
    }

    /// Byte length of a file entry
    pub fn len(&self) -> u64 {
        self.size.max(0) as u64
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn decode(buf: &[u8]) -> Self {
        let kind = if buf[0] == KIND_DIR {
            EntryKind::Dir
        } else {
            EntryKind::File
        };
        let raw_name = &buf[1..1 + NAME_FIELD_LEN];
        let name_len = raw_name
            .iter()
            .position(|&c| c == 0)
            .unwrap_or(NAME_FIELD_LEN);
        Self {
            kind,
            name: String::from_utf8_lossy(&raw_name[..name_len]).into_owned(),
            date: Date::new(buf[21], buf[22], buf[23]),
            size: read_i32(buf, 24),
            first_block: read_i32(buf, 28),
        }
    }

    pub fn encode(&self) -> [u8; DIR_ENTRY_SIZE] {
        let mut buf = [0u8; DIR_ENTRY_SIZE];
        buf[0] = match self.kind {
            EntryKind::Dir => KIND_DIR,
            EntryKind::File => KIND_FILE,
        };
        let name = self.name.as_bytes();
        let len = name.len().min(MAX_NAME_LEN);
        buf[1..1 + len].copy_from_slice(&name[..len]);
        buf[21] = self.date.day;
        buf[22] = self.date.month;
        buf[23] = self.date.year;
        write_i32(&mut buf, 24, self.size);
        write_i32(&mut buf, 28, self.first_block);
        buf
    }
}

/// Whether `name` is one of the two synthetic entries.
pub fn is_dot_name(name: &str) -> bool {
    name == "." || name == ".."
}

/// Check that a user-supplied name can be stored in a record.
pub fn validate_name(name: &str) -> FsResult<()> {
    if name.is_empty()
        || name.len() > MAX_NAME_LEN
        || name.contains('/')
        || name.contains('\0')
        || is_dot_name(name)
    {
        return Err(FsError::InvalidName(name.into()));
    }
    Ok(())
}

fn read_i32(buf: &[u8], offset: usize) -> i32 {
    i32::from_le_bytes([
        buf[offset],
        buf[offset + 1],
        buf[offset + 2],
        buf[offset + 3],
    ])
}

fn write_i32(buf: &mut [u8], offset: usize, value: i32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geometry_sizes() {
        let g = Geometry::new(BlockSize::B256, FatClass::Fat8);
        assert_eq!(g.block_count(), 256);
        assert_eq!(g.entries_per_block(), 8);
        assert_eq!(g.fat_offset(), 256);
        assert_eq!(g.blocks_offset(), 256 + 1024);
        assert_eq!(g.image_len(), 256 + 256 * 4 + 256 * 256);

        let g = Geometry::new(BlockSize::B1024, FatClass::Fat12);
        assert_eq!(g.block_count(), 4096);
        assert_eq!(g.entries_per_block(), 32);
        assert_eq!(g.image_len(), 1024 + 4096 * 4 + 4096 * 1024);
    }

    #[test]
    fn test_blocks_for() {
        let g = Geometry::new(BlockSize::B256, FatClass::Fat8);
        assert_eq!(g.blocks_for(0), 0);
        assert_eq!(g.blocks_for(1), 1);
        assert_eq!(g.blocks_for(256), 1);
        assert_eq!(g.blocks_for(257), 2);
        assert_eq!(g.blocks_for(5000), 20);
    }

    #[test]
    fn test_unknown_geometry_rejected() {
        assert_eq!(BlockSize::from_bytes(300), None);
        assert_eq!(FatClass::from_class(16), None);
        let mut sb = Superblock::fresh(&Geometry::new(BlockSize::B512, FatClass::Fat10));
        assert!(sb.geometry().is_some());
        sb.block_size = 2048;
        assert!(sb.geometry().is_none());
    }

    #[test]
    fn test_fresh_superblock() {
        let sb = Superblock::fresh(&Geometry::new(BlockSize::B256, FatClass::Fat8));
        assert_eq!(sb.check_number, MAGIC);
        assert_eq!(sb.root_block, 0);
        assert_eq!(sb.free_block, 1);
        assert_eq!(sb.n_free_blocks, 255);
        assert_eq!(Superblock::decode(&sb.encode()), sb);
    }

    #[test]
    fn test_entry_record_layout() {
        let entry = DirEntry::file("notes.txt", 5000, Some(7), Date::new(19, 10, 126));
        let raw = entry.encode();
        assert_eq!(raw[0], b'F');
        assert_eq!(&raw[1..10], b"notes.txt");
        assert_eq!(raw[10], 0);
        assert_eq!(&raw[21..24], &[19, 10, 126]);
        assert_eq!(&raw[24..28], &5000i32.to_le_bytes());
        assert_eq!(&raw[28..32], &7i32.to_le_bytes());
        assert_eq!(DirEntry::decode(&raw), entry);
    }

    #[test]
    fn test_empty_file_has_no_head() {
        let entry = DirEntry::file("empty", 0, None, Date::new(1, 1, 100));
        assert_eq!(entry.first_block, END_OF_CHAIN);
        assert_eq!(entry.head(), None);
        assert!(entry.is_empty());
    }

    #[test]
    fn test_name_validation() {
        assert!(validate_name("a").is_ok());
        assert!(validate_name("nineteen-bytes-name").is_ok());
        assert!(matches!(
            validate_name("twenty-bytes-name-xx"),
            Err(FsError::InvalidName(_))
        ));
        assert!(validate_name("").is_err());
        assert!(validate_name(".").is_err());
        assert!(validate_name("..").is_err());
        assert!(validate_name("a/b").is_err());
    }
}
