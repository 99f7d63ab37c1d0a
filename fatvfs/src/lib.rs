//! Single-file virtual file system
//!
//! A whole directory tree lives inside one host file, laid out as a
//! superblock, a FAT of chained block indices and a region of fixed-size
//! blocks. Directories are block chains of 32-byte entry records; files are
//! block chains of raw content.
//!
//! ```text
//! FileSystem (cwd cursor, commands)
//!     ├── Directory Engine (insert, compaction, lookup, paths)
//!     ├── File Content Engine (import, export, copy)
//!     ├── Block Allocator (free list in the FAT)
//!     └── Image Store (superblock, FAT, blocks) over a Storage backend
//! ```

pub mod allocator;
pub mod check;
pub mod date;
pub mod dir;
pub mod error;
pub mod file;
pub mod fs;
pub mod image;
pub mod layout;
pub mod storage;

pub use check::CheckReport;
pub use date::Date;
pub use dir::Listing;
pub use error::{FsError, FsResult};
pub use fs::{FileSystem, Usage};
pub use image::Image;
pub use layout::{BlockSize, DirEntry, EntryKind, FatClass, Geometry, Superblock};
pub use storage::{FileStorage, MemStorage, Storage};
