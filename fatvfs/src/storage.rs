//! Byte-addressable backing stores for an image.
//!
//! The image layer only ever asks for "these bytes at this offset". Host files
//! are written through on every call so nothing is staged between a command and
//! the backing file; tests use an in-memory buffer instead.

use std::fs::{File, OpenOptions, TryLockError};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::{FsError, FsResult};

/// Storage that an image lives in
pub trait Storage {
    /// Current length in bytes
    fn len(&self) -> FsResult<u64>;

    /// Grow or shrink to exactly `len` bytes (new bytes are zero)
    fn set_len(&mut self, len: u64) -> FsResult<()>;

    /// Fill `buf` from `offset`
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> FsResult<()>;

    /// Write all of `buf` at `offset`
    fn write_at(&mut self, offset: u64, buf: &[u8]) -> FsResult<()>;

    /// Push pending writes down to the medium
    fn flush(&mut self) -> FsResult<()>;

    fn is_empty(&self) -> FsResult<bool> {
        Ok(self.len()? == 0)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// HOST FILE
// ═══════════════════════════════════════════════════════════════════════════════

/// Image stored in a host file, exclusively locked while the handle lives.
pub struct FileStorage {
    file: File,
    path: PathBuf,
}

impl FileStorage {
    /// Create a new, empty backing file. Fails if the path already exists.
    pub fn create(path: &Path) -> FsResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;
        Self::locked(file, path)
    }

    /// Open an existing backing file for reading and writing.
    pub fn open(path: &Path) -> FsResult<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Self::locked(file, path)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn locked(file: File, path: &Path) -> FsResult<Self> {
        match file.try_lock() {
            Ok(()) => {}
            Err(TryLockError::WouldBlock) => return Err(FsError::Locked(path.to_path_buf())),
            Err(TryLockError::Error(e)) => return Err(e.into()),
        }
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }
}

impl Storage for FileStorage {
    fn len(&self) -> FsResult<u64> {
        Ok(self.file.metadata()?.len())
    }

    fn set_len(&mut self, len: u64) -> FsResult<()> {
        self.file.set_len(len)?;
        Ok(())
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> FsResult<()> {
        let mut file = &self.file;
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(buf)?;
        Ok(())
    }

    fn write_at(&mut self, offset: u64, buf: &[u8]) -> FsResult<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(buf)?;
        Ok(())
    }

    fn flush(&mut self) -> FsResult<()> {
        self.file.sync_all()?;
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// MEMORY
// ═══════════════════════════════════════════════════════════════════════════════

/// Image held entirely in memory
#[derive(Clone, Debug, Default)]
pub struct MemStorage(pub Vec<u8>);

impl MemStorage {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    fn range(&self, offset: u64, len: usize) -> FsResult<std::ops::Range<usize>> {
        let start = offset as usize;
        let end = start + len;
        if end > self.0.len() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("access {}..{} past end of {} bytes", start, end, self.0.len()),
            )
            .into());
        }
        Ok(start..end)
    }
}

impl Storage for MemStorage {
    fn len(&self) -> FsResult<u64> {
        Ok(self.0.len() as u64)
    }

    fn set_len(&mut self, len: u64) -> FsResult<()> {
        self.0.resize(len as usize, 0);
        Ok(())
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> FsResult<()> {
        let range = self.range(offset, buf.len())?;
        buf.copy_from_slice(&self.0[range]);
        Ok(())
    }

    fn write_at(&mut self, offset: u64, buf: &[u8]) -> FsResult<()> {
        let range = self.range(offset, buf.len())?;
        self.0[range].copy_from_slice(buf);
        Ok(())
    }

    fn flush(&mut self) -> FsResult<()> {
        Ok(())
    }
}
