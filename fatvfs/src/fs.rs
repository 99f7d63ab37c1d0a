//! File system session
//!
//! [`FileSystem`] pairs a mounted image with the current-directory cursor and
//! implements the command surface on top of the engines. Every name argument
//! is a single path component resolved against the current directory.

use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use log::{debug, info};

use crate::check::CheckReport;
use crate::date::Date;
use crate::dir::{Listing, EMPTY_DIR_ENTRIES};
use crate::error::{FsError, FsResult};
use crate::image::Image;
use crate::layout::{is_dot_name, validate_name, DirEntry, Geometry, ROOT_BLOCK};
use crate::storage::{FileStorage, Storage};

/// Block usage of an image, as reported by `df`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Usage {
    pub block_size: u32,
    pub total_blocks: u32,
    pub used_blocks: u32,
    pub free_blocks: u32,
}

impl Usage {
    /// Bytes in use and total bytes of the block region
    pub fn bytes(&self) -> (u64, u64) {
        let block = self.block_size as u64;
        (self.used_blocks as u64 * block, self.total_blocks as u64 * block)
    }
}

impl fmt::Display for Usage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (used, total) = self.bytes();
        write!(
            f,
            "{} blocks of {} bytes: {} used, {} free ({} of {} bytes in use)",
            self.total_blocks, self.block_size, self.used_blocks, self.free_blocks, used, total
        )
    }
}

/// Where a copy lands
struct Target {
    dir: u32,
    name: String,
    /// File of the same name that the copy replaces
    existing: Option<(u32, DirEntry)>,
}

/// A mounted image together with the current directory
pub struct FileSystem<S> {
    image: Image<S>,
    cwd: u32,
}

impl FileSystem<FileStorage> {
    /// Open the image at `path`, creating it with `geometry` if needed.
    pub fn open(path: &Path, geometry: Geometry) -> FsResult<Self> {
        Ok(Self::new(Image::open_or_create(path, geometry)?))
    }
}

impl<S: Storage> FileSystem<S> {
    /// Start a session in the root directory.
    pub fn new(image: Image<S>) -> Self {
        Self {
            image,
            cwd: ROOT_BLOCK,
        }
    }

    pub fn image(&self) -> &Image<S> {
        &self.image
    }

    /// First block of the current directory
    pub fn cwd(&self) -> u32 {
        self.cwd
    }

    pub fn into_image(self) -> Image<S> {
        self.image
    }

    pub fn flush(&mut self) -> FsResult<()> {
        self.image.flush()
    }

    /// Verify the block accounting of the whole image.
    pub fn check(&self) -> FsResult<CheckReport> {
        self.image.check()
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // DIRECTORIES
    // ═══════════════════════════════════════════════════════════════════════════

    /// Every entry of the current directory, sorted by name bytes.
    pub fn ls(&self) -> FsResult<Vec<Listing>> {
        let mut listing: Vec<Listing> = self
            .image
            .entries(self.cwd)?
            .iter()
            .map(Listing::from)
            .collect();
        listing.sort_by(|a, b| a.name.as_bytes().cmp(b.name.as_bytes()));
        Ok(listing)
    }

    /// Create an empty directory `name` in the current directory.
    pub fn mkdir(&mut self, name: &str) -> FsResult<()> {
        validate_name(name)?;
        self.ensure_absent(self.cwd, name)?;

        // One block for the child plus possibly one for our own chain
        let growth = self.image.growth_blocks(self.cwd)?;
        self.image.reserve(1 + growth)?;

        let block = self.image.allocate()?;
        let date = Date::today();
        if let Err(err) = self.link_dir(block, name, date) {
            self.image.release(block)?;
            return Err(err);
        }
        info!("mkdir {:?} at block {}", name, block);
        Ok(())
    }

    fn link_dir(&mut self, block: u32, name: &str, date: Date) -> FsResult<()> {
        self.image.init_dir_block(block, self.cwd, date)?;
        self.image
            .insert_entry(self.cwd, &DirEntry::dir(name, block, date))
    }

    /// Move the cursor into the subdirectory `name` (`.` and `..` included).
    pub fn cd(&mut self, name: &str) -> FsResult<()> {
        let (_, entry) = self.find(self.cwd, name)?;
        if !entry.is_dir() {
            return Err(FsError::NotADirectory(name.into()));
        }
        let target = entry
            .head()
            .ok_or_else(|| FsError::Corrupt(format!("directory {:?} has no first block", name)))?;
        self.image.check_block(target)?;
        debug!("cd {:?}: block {} -> {}", name, self.cwd, target);
        self.cwd = target;
        Ok(())
    }

    /// Absolute path of the current directory.
    pub fn pwd(&self) -> FsResult<String> {
        self.image.path_of(self.cwd)
    }

    /// Remove the empty subdirectory `name` and reclaim its chain.
    pub fn rmdir(&mut self, name: &str) -> FsResult<()> {
        if is_dot_name(name) {
            return Err(FsError::InvalidName(name.into()));
        }
        let (index, entry) = self.find(self.cwd, name)?;
        if !entry.is_dir() {
            return Err(FsError::NotADirectory(name.into()));
        }
        let child = entry
            .head()
            .ok_or_else(|| FsError::Corrupt(format!("directory {:?} has no first block", name)))?;
        if self.image.entry_count(child)? != EMPTY_DIR_ENTRIES {
            return Err(FsError::NotEmpty(name.into()));
        }

        self.image.release_chain(Some(child))?;
        self.image.remove_entry(self.cwd, index)?;
        info!("rmdir {:?} (block {})", name, child);
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // FILES
    // ═══════════════════════════════════════════════════════════════════════════

    /// Import the host file at `source` as `name` in the current directory.
    pub fn get(&mut self, source: &Path, name: &str) -> FsResult<()> {
        validate_name(name)?;
        self.ensure_absent(self.cwd, name)?;

        let mut file = File::open(source)?;
        let len = file.metadata()?.len();
        let data = self.image.geometry().blocks_for(len);
        let growth = self.image.growth_blocks(self.cwd)?;
        self.image.reserve(data.saturating_add(growth))?;

        let head = self.image.import_chain(&mut file, len)?;
        self.link_file(self.cwd, name, len, head)?;
        info!("get {} -> {:?} ({} bytes)", source.display(), name, len);
        Ok(())
    }

    /// Export the file `name` to the host path `dest`.
    pub fn put(&self, name: &str, dest: &Path) -> FsResult<()> {
        let (_, entry) = self.find_file(self.cwd, name)?;
        let mut out = BufWriter::new(File::create(dest)?);
        self.image.export_chain(entry.head(), entry.len(), &mut out)?;
        out.flush()?;
        info!("put {:?} -> {} ({} bytes)", name, dest.display(), entry.len());
        Ok(())
    }

    /// Write the contents of the file `name` to `sink`.
    pub fn cat<W: Write>(&self, name: &str, sink: &mut W) -> FsResult<()> {
        let (_, entry) = self.find_file(self.cwd, name)?;
        self.image.export_chain(entry.head(), entry.len(), sink)
    }

    /// Copy the file `src` to `dst`.
    ///
    /// `dst` naming a directory copies into it under the source's name;
    /// `dst` naming a file replaces that file.
    pub fn cp(&mut self, src: &str, dst: &str) -> FsResult<()> {
        let (_, source) = self.find_file(self.cwd, src)?;
        let target = self.resolve_target(src, &source, dst)?;
        let len = source.len();
        let data = self.image.geometry().blocks_for(len);

        match target.existing {
            Some((index, old)) => {
                // The replaced file's blocks come back before the copy is made,
                // and removing its entry frees the slot the copy then takes.
                let credit = self.image.chain(old.head())?.len() as u32;
                let free = self.image.free_blocks()?;
                if data > free.saturating_add(credit) {
                    return Err(FsError::OutOfSpace { needed: data, free });
                }
                self.remove_file(target.dir, index, &old)?;
            }
            None => {
                let growth = self.image.growth_blocks(target.dir)?;
                self.image.reserve(data.saturating_add(growth))?;
            }
        }

        let head = self.image.copy_chain(source.head(), len)?;
        self.link_file(target.dir, &target.name, len, head)?;
        info!("cp {:?} -> {:?} in block {}", src, target.name, target.dir);
        Ok(())
    }

    /// Move the file `src` to `dst`: a copy followed by removal of the source.
    ///
    /// If the removal fails the copy stays, so data is duplicated, never lost.
    pub fn mv(&mut self, src: &str, dst: &str) -> FsResult<()> {
        self.cp(src, dst)?;
        self.rm(src)
    }

    /// Delete the file `name` and reclaim its chain.
    pub fn rm(&mut self, name: &str) -> FsResult<()> {
        let (index, entry) = self.find_file(self.cwd, name)?;
        self.remove_file(self.cwd, index, &entry)?;
        info!("rm {:?}", name);
        Ok(())
    }

    /// Block usage of the image.
    pub fn df(&self) -> FsResult<Usage> {
        let total_blocks = self.image.geometry().block_count();
        let free_blocks = self.image.free_blocks()?;
        Ok(Usage {
            block_size: self.image.geometry().block_size.bytes(),
            total_blocks,
            used_blocks: total_blocks.saturating_sub(free_blocks),
            free_blocks,
        })
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // HELPERS
    // ═══════════════════════════════════════════════════════════════════════════

    fn find(&self, dir: u32, name: &str) -> FsResult<(u32, DirEntry)> {
        self.image
            .lookup(dir, name)?
            .ok_or_else(|| FsError::NotFound(name.into()))
    }

    fn find_file(&self, dir: u32, name: &str) -> FsResult<(u32, DirEntry)> {
        let found = self.find(dir, name)?;
        if found.1.is_dir() {
            return Err(FsError::IsADirectory(name.into()));
        }
        Ok(found)
    }

    fn ensure_absent(&self, dir: u32, name: &str) -> FsResult<()> {
        if self.image.lookup(dir, name)?.is_some() {
            return Err(FsError::AlreadyExists(name.into()));
        }
        Ok(())
    }

    fn resolve_target(&self, src: &str, source: &DirEntry, dst: &str) -> FsResult<Target> {
        let (dir, name) = match self.image.lookup(self.cwd, dst)? {
            Some((_, entry)) if entry.is_dir() => {
                let dir = entry.head().ok_or_else(|| {
                    FsError::Corrupt(format!("directory {:?} has no first block", dst))
                })?;
                (dir, src.to_string())
            }
            Some(_) => (self.cwd, dst.to_string()),
            None => {
                validate_name(dst)?;
                return Ok(Target {
                    dir: self.cwd,
                    name: dst.into(),
                    existing: None,
                });
            }
        };

        if dir == self.cwd && name == src {
            return Err(FsError::SameFile(src.into()));
        }
        let existing = match self.image.lookup(dir, &name)? {
            Some((_, entry)) if entry.is_dir() => return Err(FsError::AlreadyExists(name)),
            Some((_, entry)) if entry.head().is_some() && entry.head() == source.head() => {
                return Err(FsError::SameFile(src.into()))
            }
            other => other,
        };
        Ok(Target {
            dir,
            name,
            existing,
        })
    }

    /// Give a fresh chain its directory entry, releasing the chain if the
    /// entry cannot be written.
    fn link_file(&mut self, dir: u32, name: &str, len: u64, head: Option<u32>) -> FsResult<()> {
        let entry = DirEntry::file(name, len as u32, head, Date::today());
        if let Err(err) = self.image.insert_entry(dir, &entry) {
            self.image.release_chain(head)?;
            return Err(err);
        }
        Ok(())
    }

    /// Chain first, then the entry, so no block is leaked or freed twice.
    fn remove_file(&mut self, dir: u32, index: u32, entry: &DirEntry) -> FsResult<()> {
        self.image.release_chain(entry.head())?;
        self.image.remove_entry(dir, index)
    }
}
