//! Paged file layer (spec §4.1): fixed-size page I/O over a single OS file,
//! a small write-through page cache, and an in-memory header region holding
//! read/write/append counters plus whatever directory bytes the layer above
//! (record file or index file) wants to keep there.
//!
//! Grounded on the teacher's `src/pager/mod.rs` (`Pager`, `Page`,
//! `lru::LruCache` write-through eviction, `fetch_page`/`allocate_page`
//! naming) with the WAL/mmap/checksum machinery dropped — base spec's
//! non-goals exclude crash safety and checksums entirely.

use std::convert::TryInto;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::num::NonZeroUsize;
use std::path::Path;

use lru::LruCache;
use tracing::trace;

use crate::error::{Error, Result};
use crate::types::PageNum;

/// Fixed page size for every file the engine manages (spec §3).
pub const PAGE_SIZE: usize = 4096;
/// Header pages for a record file (spec §3).
pub const RECORD_FILE_HEADER_PAGES: usize = 6;
/// Header pages for an index file (spec §3).
pub const INDEX_FILE_HEADER_PAGES: usize = 1;

const DEFAULT_CACHE_CAPACITY: usize = 64;
/// Byte offset of the four header counters common to both file kinds
/// (spec §6: `read_counter, write_counter, append_counter, num_pages`).
const COUNTERS_LEN: usize = 16;

#[derive(Debug)]
struct Page {
    data: Vec<u8>,
    dirty: bool,
}

/// A page-addressable file with a write-through LRU cache.
pub struct PagedFile {
    file: File,
    header: Vec<u8>,
    header_dirty: bool,
    header_pages: usize,
    cache: LruCache<PageNum, Page>,
    num_pages: usize,
    read_counter: u32,
    write_counter: u32,
    append_counter: u32,
}

impl PagedFile {
    /// Create a brand-new, empty paged file. Fails with [`Error::AlreadyExists`]
    /// if `path` already exists.
    pub fn create(path: &Path, header_pages: usize) -> Result<Self> {
        if path.exists() {
            return Err(Error::AlreadyExists("paged file"));
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;
        let mut pf = Self {
            file,
            header: vec![0u8; header_pages * PAGE_SIZE],
            header_dirty: true,
            header_pages,
            cache: LruCache::new(NonZeroUsize::new(DEFAULT_CACHE_CAPACITY).unwrap()),
            num_pages: 0,
            read_counter: 0,
            write_counter: 0,
            append_counter: 0,
        };
        pf.write_counters_into_header();
        pf.flush_header()?;
        Ok(pf)
    }

    /// Open an existing paged file. Fails with [`Error::NotFound`] if missing.
    pub fn open(path: &Path, header_pages: usize) -> Result<Self> {
        if !path.exists() {
            return Err(Error::NotFound("paged file"));
        }
        let mut file = OpenOptions::new().read(true).write(true).open(path)?;
        let mut header = vec![0u8; header_pages * PAGE_SIZE];
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut header)?;
        let read_counter = u32::from_le_bytes(header[0..4].try_into().unwrap());
        let write_counter = u32::from_le_bytes(header[4..8].try_into().unwrap());
        let append_counter = u32::from_le_bytes(header[8..12].try_into().unwrap());
        let num_pages = u32::from_le_bytes(header[12..16].try_into().unwrap()) as usize;
        Ok(Self {
            file,
            header,
            header_dirty: false,
            header_pages,
            cache: LruCache::new(NonZeroUsize::new(DEFAULT_CACHE_CAPACITY).unwrap()),
            num_pages,
            read_counter,
            write_counter,
            append_counter,
        })
    }

    fn write_counters_into_header(&mut self) {
        self.header[0..4].copy_from_slice(&self.read_counter.to_le_bytes());
        self.header[4..8].copy_from_slice(&self.write_counter.to_le_bytes());
        self.header[8..12].copy_from_slice(&self.append_counter.to_le_bytes());
        self.header[12..16].copy_from_slice(&(self.num_pages as u32).to_le_bytes());
    }

    /// Bytes of the header region past the four shared counters, for the
    /// record/index layer to store its own directory structures in.
    pub fn header_extra(&self) -> &[u8] {
        &self.header[COUNTERS_LEN..]
    }

    /// Mutable access to the header's extra region. Marks the header dirty.
    pub fn header_extra_mut(&mut self) -> &mut [u8] {
        self.header_dirty = true;
        &mut self.header[COUNTERS_LEN..]
    }

    pub fn num_pages(&self) -> usize {
        self.num_pages
    }

    pub fn read_counter(&self) -> u32 {
        self.read_counter
    }
    pub fn write_counter(&self) -> u32 {
        self.write_counter
    }
    pub fn append_counter(&self) -> u32 {
        self.append_counter
    }

    fn data_offset(&self, n: PageNum) -> u64 {
        (self.header_pages * PAGE_SIZE) as u64 + (n as u64) * PAGE_SIZE as u64
    }

    /// Read page `n` into `buf`. Fails if `n` is not allocated.
    pub fn read_page(&mut self, n: PageNum, buf: &mut [u8]) -> Result<()> {
        if n < 0 || n as usize >= self.num_pages {
            return Err(Error::logical(format!("page {n} out of range")));
        }
        if buf.len() != PAGE_SIZE {
            return Err(Error::logical("buffer must be exactly PAGE_SIZE"));
        }
        self.read_counter += 1;
        if let Some(page) = self.cache.get(&n) {
            buf.copy_from_slice(&page.data);
            return Ok(());
        }
        self.file.seek(SeekFrom::Start(self.data_offset(n)))?;
        self.file.read_exact(buf)?;
        self.cache_insert(n, buf.to_vec(), false)?;
        Ok(())
    }

    /// Overwrite page `n`. Fails if `n` is not allocated.
    pub fn write_page(&mut self, n: PageNum, buf: &[u8]) -> Result<()> {
        if n < 0 || n as usize >= self.num_pages {
            return Err(Error::logical(format!("page {n} out of range")));
        }
        if buf.len() != PAGE_SIZE {
            return Err(Error::logical("buffer must be exactly PAGE_SIZE"));
        }
        self.write_counter += 1;
        self.cache_insert(n, buf.to_vec(), true)?;
        Ok(())
    }

    /// Allocate a new page beyond the current tail and write its initial
    /// contents.
    pub fn append_page(&mut self, buf: &[u8]) -> Result<PageNum> {
        if buf.len() != PAGE_SIZE {
            return Err(Error::logical("buffer must be exactly PAGE_SIZE"));
        }
        self.append_counter += 1;
        let n = self.num_pages as PageNum;
        self.num_pages += 1;
        self.header_dirty = true;
        trace!(page = n, "pager.append_page");
        self.cache_insert(n, buf.to_vec(), true)?;
        Ok(n)
    }

    fn cache_insert(&mut self, n: PageNum, data: Vec<u8>, dirty: bool) -> Result<()> {
        if let Some((evicted_id, evicted_page)) = self.cache.push(n, Page { data, dirty }) {
            if evicted_id != n && evicted_page.dirty {
                self.write_page_to_disk(evicted_id, &evicted_page.data)?;
            }
        }
        Ok(())
    }

    fn write_page_to_disk(&mut self, n: PageNum, data: &[u8]) -> Result<()> {
        self.file.seek(SeekFrom::Start(self.data_offset(n)))?;
        self.file.write_all(data)?;
        Ok(())
    }

    /// Flush every dirty cached page to disk without rewriting the header.
    pub fn flush_pages(&mut self) -> Result<()> {
        let dirty: Vec<(PageNum, Vec<u8>)> = self
            .cache
            .iter()
            .filter(|(_, p)| p.dirty)
            .map(|(&id, p)| (id, p.data.clone()))
            .collect();
        for (id, data) in dirty {
            self.write_page_to_disk(id, &data)?;
        }
        for (_, page) in self.cache.iter_mut() {
            page.dirty = false;
        }
        Ok(())
    }

    fn flush_header(&mut self) -> Result<()> {
        self.write_counters_into_header();
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&self.header)?;
        self.header_dirty = false;
        Ok(())
    }

    /// Flush all dirty pages and rewrite the header (spec §3: "header is
    /// read on open and rewritten on close").
    pub fn close(mut self) -> Result<()> {
        self.flush_pages()?;
        self.flush_header()?;
        self.file.sync_all()?;
        Ok(())
    }
}

impl Drop for PagedFile {
    fn drop(&mut self) {
        let _ = self.flush_pages();
        if self.header_dirty {
            let _ = self.flush_header();
        }
    }
}
