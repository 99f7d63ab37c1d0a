//! Consistency checker
//!
//! Walks the free list and the whole directory tree and verifies that every
//! block belongs to exactly one chain.

use std::fmt;

use log::{debug, info};

use crate::dir::{EMPTY_DIR_ENTRIES, PARENT_INDEX, SELF_INDEX};
use crate::error::{FsError, FsResult};
use crate::image::Image;
use crate::layout::ROOT_BLOCK;
use crate::storage::Storage;

/// Summary of a successful check
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CheckReport {
    pub total_blocks: u32,
    pub free_blocks: u32,
    pub used_blocks: u32,
    pub directories: u32,
    pub files: u32,
}

impl fmt::Display for CheckReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "clean: {} directories, {} files, {} blocks used, {} free, {} total",
            self.directories, self.files, self.used_blocks, self.free_blocks, self.total_blocks
        )
    }
}

/// Which chain has claimed each block so far
struct Claims {
    owner: Vec<Option<String>>,
}

impl Claims {
    fn new(blocks: u32) -> Self {
        Self {
            owner: vec![None; blocks as usize],
        }
    }

    fn claim(&mut self, blocks: &[u32], owner: &str) -> FsResult<()> {
        for &block in blocks {
            let slot = &mut self.owner[block as usize];
            if let Some(previous) = slot {
                return Err(FsError::Inconsistent(format!(
                    "block {} belongs to both {} and {}",
                    block, previous, owner
                )));
            }
            *slot = Some(owner.to_string());
        }
        Ok(())
    }

    fn claimed(&self) -> u32 {
        self.owner.iter().filter(|o| o.is_some()).count() as u32
    }
}

impl<S: Storage> Image<S> {
    /// Verify the free list and every chain reachable from the root.
    pub fn check(&self) -> FsResult<CheckReport> {
        let total = self.geometry().block_count();
        let per_block = self.geometry().entries_per_block();
        let mut claims = Claims::new(total);

        let free = self.free_blocks()?;
        let free_chain = self.chain(self.free_head()?)?;
        if free_chain.len() as u32 != free {
            return Err(FsError::Inconsistent(format!(
                "free list holds {} blocks, superblock counts {}",
                free_chain.len(),
                free
            )));
        }
        claims.claim(&free_chain, "the free list")?;

        let mut directories = 0;
        let mut files = 0;
        let mut pending = vec![(ROOT_BLOCK, ROOT_BLOCK, String::from("/"))];

        while let Some((dir, parent, path)) = pending.pop() {
            directories += 1;
            let blocks = self.chain(Some(dir))?;
            let count = self.entry_count(dir)?;
            let expected = count.div_ceil(per_block);
            if blocks.len() as u32 != expected {
                return Err(FsError::Inconsistent(format!(
                    "directory {} has {} entries in {} blocks, expected {}",
                    path,
                    count,
                    blocks.len(),
                    expected
                )));
            }
            claims.claim(&blocks, &path)?;

            let entries = self.entries(dir)?;
            if entries[SELF_INDEX as usize].head() != Some(dir)
                || entries[PARENT_INDEX as usize].head() != Some(parent)
            {
                return Err(FsError::Inconsistent(format!(
                    "directory {} has broken `.` or `..` links",
                    path
                )));
            }

            for entry in entries.iter().skip(EMPTY_DIR_ENTRIES as usize) {
                let child_path = if path == "/" {
                    format!("/{}", entry.name)
                } else {
                    format!("{}/{}", path, entry.name)
                };

                if entry.is_dir() {
                    let head = entry.head().ok_or_else(|| {
                        FsError::Inconsistent(format!("directory {} has no first block", child_path))
                    })?;
                    self.check_block(head)?;
                    pending.push((head, dir, child_path));
                    continue;
                }

                files += 1;
                let chain = self.chain(entry.head())?;
                let expected = self.geometry().blocks_for(entry.len());
                if chain.len() as u32 != expected {
                    return Err(FsError::Inconsistent(format!(
                        "file {} of {} bytes owns {} blocks, expected {}",
                        child_path,
                        entry.len(),
                        chain.len(),
                        expected
                    )));
                }
                claims.claim(&chain, &child_path)?;
            }
            debug!("checked directory {} ({} entries)", path, count);
        }

        let claimed = claims.claimed();
        if claimed != total {
            return Err(FsError::Inconsistent(format!(
                "{} blocks are neither free nor in use",
                total - claimed
            )));
        }

        let report = CheckReport {
            total_blocks: total,
            free_blocks: free,
            used_blocks: total - free,
            directories,
            files,
        };
        info!("{}", report);
        Ok(report)
    }
}
