//! Byte sources.
//!
//! A [`ByteSource`] is a scoped, readable range of bytes: a slice of memory,
//! a region of a file, or a transformed (decompressed) view of another
//! source. Sources never own the underlying file; many sources may alias the
//! same file region through a shared handle.

use crate::error::Result;
use flate2::read::DeflateDecoder;
use std::cell::RefCell;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::rc::Rc;

/// Shared, non-owning handle to an open archive file.
///
/// The archive engine is single-threaded; entries and the archive itself
/// alias the file through this handle without an ownership cycle.
pub type SharedFile = Rc<RefCell<File>>;

/// A readable range of bytes.
pub trait ByteSource {
    /// Size of this source in bytes.
    fn size(&self) -> u64;

    /// Open a fresh reader over the full range.
    fn open(&self) -> Result<Box<dyn Read>>;

    /// Read the entire range into memory.
    fn read_all(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(self.size() as usize);
        self.open()?.read_to_end(&mut out)?;
        Ok(out)
    }
}

/// A source backed by an in-memory buffer.
#[derive(Debug, Clone)]
pub struct MemorySource {
    data: Rc<Vec<u8>>,
}

impl MemorySource {
    /// Create a source over the given bytes.
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data: Rc::new(data),
        }
    }

    /// Borrow the underlying bytes without copying.
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }
}

impl ByteSource for MemorySource {
    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn open(&self) -> Result<Box<dyn Read>> {
        Ok(Box::new(MemoryReader {
            data: Rc::clone(&self.data),
            pos: 0,
        }))
    }

    fn read_all(&self) -> Result<Vec<u8>> {
        Ok(self.data.as_ref().clone())
    }
}

struct MemoryReader {
    data: Rc<Vec<u8>>,
    pos: usize,
}

impl Read for MemoryReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let remaining = &self.data[self.pos..];
        let n = remaining.len().min(buf.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        self.pos += n;
        Ok(n)
    }
}

/// A source reading a fixed region of a shared file.
#[derive(Clone)]
pub struct FileRegionSource {
    file: SharedFile,
    offset: u64,
    len: u64,
}

impl FileRegionSource {
    /// Create a source over `len` bytes starting at `offset`.
    pub fn new(file: SharedFile, offset: u64, len: u64) -> Self {
        Self { file, offset, len }
    }
}

impl ByteSource for FileRegionSource {
    fn size(&self) -> u64 {
        self.len
    }

    fn open(&self) -> Result<Box<dyn Read>> {
        Ok(Box::new(RegionReader {
            file: Rc::clone(&self.file),
            pos: self.offset,
            end: self.offset + self.len,
        }))
    }
}

struct RegionReader {
    file: SharedFile,
    pos: u64,
    end: u64,
}

impl Read for RegionReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.pos >= self.end {
            return Ok(0);
        }
        let max = ((self.end - self.pos) as usize).min(buf.len());
        let mut file = self.file.borrow_mut();
        file.seek(SeekFrom::Start(self.pos))?;
        let n = file.read(&mut buf[..max])?;
        self.pos += n as u64;
        Ok(n)
    }
}

/// A source exposing the DEFLATE-decompressed view of another source.
pub struct InflateSource {
    inner: Box<dyn ByteSource>,
    uncompressed_size: u64,
}

impl InflateSource {
    /// Wrap `inner` (raw DEFLATE data) with its known uncompressed size.
    pub fn new(inner: Box<dyn ByteSource>, uncompressed_size: u64) -> Self {
        Self {
            inner,
            uncompressed_size,
        }
    }
}

impl ByteSource for InflateSource {
    fn size(&self) -> u64 {
        self.uncompressed_size
    }

    fn open(&self) -> Result<Box<dyn Read>> {
        Ok(Box::new(DeflateDecoder::new(self.inner.open()?)))
    }
}
