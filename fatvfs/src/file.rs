//! File Content Engine
//!
//! Moves byte streams in and out of block chains. A file of `n` bytes owns
//! exactly `ceil(n / block_size)` blocks; the entry's size field is the only
//! source of its length, so blocks hold raw bytes including zeros.

use std::io::{Read, Write};

use log::{debug, warn};

use crate::error::{FsError, FsResult};
use crate::image::Image;
use crate::storage::Storage;

impl<S: Storage> Image<S> {
    /// Build a chain of `ceil(len / block_size)` blocks, asking `fill` for the
    /// bytes of each chunk in order.
    ///
    /// Space for the whole chain is checked up front. If `fill` or a write
    /// fails part way, every block taken so far goes back to the free list.
    fn build_chain<F>(&mut self, len: u64, mut fill: F) -> FsResult<Option<u32>>
    where
        F: FnMut(&Self, usize, &mut [u8]) -> FsResult<()>,
    {
        let needed = self.geometry().blocks_for(len);
        self.reserve(needed)?;

        let mut head = None;
        match self.fill_chain(len, &mut head, &mut fill) {
            Ok(()) => {
                debug!("wrote {} bytes into {} blocks from {:?}", len, needed, head);
                Ok(head)
            }
            Err(err) => {
                warn!("chain write failed, releasing partial chain: {}", err);
                self.release_chain(head)?;
                Err(err)
            }
        }
    }

    fn fill_chain<F>(&mut self, len: u64, head: &mut Option<u32>, fill: &mut F) -> FsResult<()>
    where
        F: FnMut(&Self, usize, &mut [u8]) -> FsResult<()>,
    {
        let block_bytes = self.geometry().block_bytes();
        let mut buf = vec![0u8; block_bytes];
        let mut remaining = len;
        let mut tail: Option<u32> = None;
        let mut chunk_index = 0;

        while remaining > 0 {
            let chunk = remaining.min(block_bytes as u64) as usize;
            buf.fill(0);
            fill(&*self, chunk_index, &mut buf[..chunk])?;

            let block = self.allocate()?;
            match tail {
                None => *head = Some(block),
                Some(prev) => {
                    if let Err(err) = self.link(prev, block) {
                        self.release(block)?;
                        return Err(err);
                    }
                }
            }
            tail = Some(block);
            self.write_block(block, &buf)?;

            remaining -= chunk as u64;
            chunk_index += 1;
        }
        Ok(())
    }

    /// Stream exactly `len` bytes from `source` into a new chain.
    pub(crate) fn import_chain<R: Read>(&mut self, source: &mut R, len: u64) -> FsResult<Option<u32>> {
        self.build_chain(len, |_, _, buf| {
            source.read_exact(buf)?;
            Ok(())
        })
    }

    /// Duplicate the first `len` bytes of the chain at `head` into a new,
    /// independent chain.
    pub(crate) fn copy_chain(&mut self, head: Option<u32>, len: u64) -> FsResult<Option<u32>> {
        let source = self.chain(head)?;
        self.check_chain_len(&source, len)?;
        self.build_chain(len, |image, index, buf| {
            image.read_in_block(source[index], 0, buf)
        })
    }

    /// Write the first `len` bytes of the chain at `head` to `sink`.
    ///
    /// Every block is written whole except the last, which is cut at `len`.
    pub fn export_chain<W: Write>(&self, head: Option<u32>, len: u64, sink: &mut W) -> FsResult<()> {
        let blocks = self.chain(head)?;
        self.check_chain_len(&blocks, len)?;

        let block_bytes = self.geometry().block_bytes();
        let mut buf = vec![0u8; block_bytes];
        let mut remaining = len;
        for block in blocks {
            let chunk = remaining.min(block_bytes as u64) as usize;
            self.read_in_block(block, 0, &mut buf[..chunk])?;
            sink.write_all(&buf[..chunk])?;
            remaining -= chunk as u64;
        }
        Ok(())
    }

    fn check_chain_len(&self, blocks: &[u32], len: u64) -> FsResult<()> {
        let expected = self.geometry().blocks_for(len);
        if blocks.len() as u32 != expected {
            return Err(FsError::Corrupt(format!(
                "file of {} bytes should own {} blocks, chain has {}",
                len,
                expected,
                blocks.len()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{BlockSize, FatClass, Geometry};
    use crate::storage::MemStorage;
    use std::io::{self, Cursor};

    fn image() -> Image<MemStorage> {
        Image::format(
            MemStorage::new(),
            Geometry::new(BlockSize::B256, FatClass::Fat8),
        )
        .unwrap()
    }

    fn pattern(len: usize) -> Vec<u8> {
        // Plenty of zero bytes to catch string-style copies
        (0..len).map(|i| if i % 5 == 0 { 0 } else { (i * 7) as u8 }).collect()
    }

    /// Reader that fails after handing out `limit` bytes
    struct FailingReader {
        data: Cursor<Vec<u8>>,
        limit: usize,
    }

    impl Read for FailingReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.data.position() as usize >= self.limit {
                return Err(io::Error::new(io::ErrorKind::Other, "disk unplugged"));
            }
            let room = self.limit - self.data.position() as usize;
            let n = buf.len().min(room);
            self.data.read(&mut buf[..n])
        }
    }

    #[test]
    fn test_import_export_roundtrip() {
        let mut image = image();
        let data = pattern(1000);
        let head = image.import_chain(&mut Cursor::new(&data), 1000).unwrap();
        assert_eq!(image.chain(head).unwrap().len(), 4);
        assert_eq!(image.free_blocks().unwrap(), 251);

        let mut out = Vec::new();
        image.export_chain(head, 1000, &mut out).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn test_empty_stream_owns_no_blocks() {
        let mut image = image();
        let head = image.import_chain(&mut io::empty(), 0).unwrap();
        assert_eq!(head, None);
        assert_eq!(image.free_blocks().unwrap(), 255);
        let mut out = Vec::new();
        image.export_chain(None, 0, &mut out).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_import_without_space_changes_nothing() {
        let mut image = image();
        while image.free_blocks().unwrap() > 1 {
            image.allocate().unwrap();
        }
        let before = image.superblock().unwrap();
        let data = pattern(300);
        assert!(matches!(
            image.import_chain(&mut Cursor::new(&data), 300),
            Err(FsError::OutOfSpace { needed: 2, free: 1 })
        ));
        assert_eq!(image.superblock().unwrap(), before);
    }

    #[test]
    fn test_failed_read_rolls_back() {
        let mut image = image();
        let mut reader = FailingReader {
            data: Cursor::new(pattern(2000)),
            limit: 700,
        };
        assert!(matches!(
            image.import_chain(&mut reader, 2000),
            Err(FsError::HostIo(_))
        ));
        assert_eq!(image.free_blocks().unwrap(), 255);
        assert_eq!(image.chain(image.free_head().unwrap()).unwrap().len(), 255);
    }

    #[test]
    fn test_short_source_rolls_back() {
        let mut image = image();
        let data = pattern(100);
        assert!(image.import_chain(&mut Cursor::new(&data), 600).is_err());
        assert_eq!(image.free_blocks().unwrap(), 255);
    }

    #[test]
    fn test_copy_is_independent() {
        let mut image = image();
        let data = pattern(600);
        let head = image.import_chain(&mut Cursor::new(&data), 600).unwrap();
        let copy = image.copy_chain(head, 600).unwrap();

        let original = image.chain(head).unwrap();
        let duplicate = image.chain(copy).unwrap();
        assert_eq!(duplicate.len(), 3);
        assert!(original.iter().all(|b| !duplicate.contains(b)));

        let mut out = Vec::new();
        image.export_chain(copy, 600, &mut out).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn test_export_rejects_short_chain() {
        let mut image = image();
        let data = pattern(200);
        let head = image.import_chain(&mut Cursor::new(&data), 200).unwrap();
        let mut out = Vec::new();
        assert!(matches!(
            image.export_chain(head, 5000, &mut out),
            Err(FsError::Corrupt(_))
        ));
    }
}
