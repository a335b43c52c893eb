//! # Pager: Paged File I/O with a Bounded LRU Cache
//!
//! The pager gives the B+tree layers page-granular access to one index
//! file. It owns the file handle, a bounded set of resident page frames,
//! the free-page list, and the file header. It knows nothing about tree
//! semantics; everything above it works in terms of [`PageId`]s and whole
//! page buffers.
//!
//! ## Caching
//!
//! Frames are kept in a map keyed by page id. Every access stamps the frame
//! with a monotonically increasing clock tick; when the cache is full the
//! frame with the oldest stamp is evicted, preferring clean frames so a
//! scan does not force writes. A dirty victim is flushed before being
//! dropped. Hit/miss/created counters are kept for end-of-build
//! diagnostics.
//!
//! ## Why No Pin Counts
//!
//! A build is single-threaded and every page access goes through
//! `&mut self`, so the borrow checker already guarantees that no page
//! reference can survive a later fetch (which might evict it). This is the
//! compile-time equivalent of a pin count, with zero runtime bookkeeping.
//!
//! ## Allocation
//!
//! `allocate` pops the free list when it can and otherwise appends a page
//! at end-of-file; either way the caller receives a zeroed page. `release`
//! pushes a page onto the free list; the file itself never shrinks.
//!
//! ## Failure Semantics
//!
//! Any I/O error propagates immediately as `Err`. Index builds are one-shot
//! batch operations: a failed write leaves the index unusable, so the
//! caller aborts the build rather than retrying.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use eyre::{ensure, Result, WrapErr};
use hashbrown::HashMap;
use tracing::debug;

use super::{Freelist, IndexFileHeader, PageHeader, PageId, PageType};
use crate::config::{FILE_HEADER_SIZE, MIN_PAGE_SIZE, PAGE_HEADER_SIZE};

#[derive(Debug, Default, Clone, Copy)]
pub struct PagerStats {
    pub pages_created: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub pages_flushed: u64,
}

#[derive(Debug)]
struct Frame {
    data: Vec<u8>,
    dirty: bool,
    stamp: u64,
}

#[derive(Debug)]
pub struct Pager {
    file: File,
    path: PathBuf,
    page_size: usize,
    capacity: usize,
    frames: HashMap<PageId, Frame>,
    clock: u64,
    header: IndexFileHeader,
    freelist: Freelist,
    stats: PagerStats,
}

impl Pager {
    /// Creates (or truncates) an index file with the given header and
    /// writes the header page. The header's page size becomes the page
    /// size for all subsequent I/O on this pager.
    pub fn create<P: AsRef<Path>>(
        path: P,
        mut header: IndexFileHeader,
        capacity: usize,
    ) -> Result<Self> {
        let path = path.as_ref();
        let page_size = header.page_size() as usize;

        ensure!(
            page_size >= MIN_PAGE_SIZE,
            "page size {} below minimum {}",
            page_size,
            MIN_PAGE_SIZE
        );
        ensure!(capacity >= 1, "cache capacity must be at least one page");

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .wrap_err_with(|| format!("failed to create index file '{}'", path.display()))?;

        let mut page0 = vec![0u8; page_size];
        header.write_to(&mut page0)?;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&page0)
            .wrap_err_with(|| format!("failed to write header of '{}'", path.display()))?;

        Ok(Self {
            file,
            path: path.to_path_buf(),
            page_size,
            capacity,
            frames: HashMap::with_capacity(capacity),
            clock: 0,
            header,
            freelist: Freelist::new(),
            stats: PagerStats::default(),
        })
    }

    /// Opens an existing index file, verifying the header (magic, version,
    /// CRC) and adopting the page size, layout parameters and free list
    /// recorded in it.
    pub fn open<P: AsRef<Path>>(path: P, capacity: usize) -> Result<Self> {
        let path = path.as_ref();
        ensure!(capacity >= 1, "cache capacity must be at least one page");

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .wrap_err_with(|| format!("failed to open index file '{}'", path.display()))?;

        let mut raw = [0u8; FILE_HEADER_SIZE];
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut raw)
            .wrap_err_with(|| format!("failed to read header of '{}'", path.display()))?;

        let header = IndexFileHeader::from_bytes(&raw)
            .wrap_err_with(|| format!("invalid index file '{}'", path.display()))?;

        let page_size = header.page_size() as usize;
        ensure!(
            page_size >= MIN_PAGE_SIZE,
            "index file '{}' declares page size {} below minimum {}",
            path.display(),
            page_size,
            MIN_PAGE_SIZE
        );

        let freelist = Freelist::with_head(header.free_head(), header.free_count());

        Ok(Self {
            file,
            path: path.to_path_buf(),
            page_size,
            capacity,
            frames: HashMap::with_capacity(capacity),
            clock: 0,
            header,
            freelist,
            stats: PagerStats::default(),
        })
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn page_count(&self) -> u64 {
        self.header.page_count()
    }

    pub fn header(&self) -> &IndexFileHeader {
        &self.header
    }

    pub fn stats(&self) -> PagerStats {
        self.stats
    }

    pub fn root(&self) -> PageId {
        self.header.root_page()
    }

    pub fn set_root(&mut self, page: PageId) {
        self.header.set_root_page(page);
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    /// Returns a read-only view of the page. The borrow of `self` ends the
    /// caller's use of the slice before any further pager call.
    pub fn page(&mut self, id: PageId) -> Result<&[u8]> {
        self.ensure_resident(id)?;
        let stamp = self.tick();
        let frame = self
            .frames
            .get_mut(&id)
            .ok_or_else(|| eyre::eyre!("page {} vanished from cache after fetch", id))?;
        frame.stamp = stamp;
        Ok(&frame.data)
    }

    /// Returns a writable view of the page and marks it dirty.
    pub fn page_mut(&mut self, id: PageId) -> Result<&mut [u8]> {
        self.ensure_resident(id)?;
        let stamp = self.tick();
        let frame = self
            .frames
            .get_mut(&id)
            .ok_or_else(|| eyre::eyre!("page {} vanished from cache after fetch", id))?;
        frame.stamp = stamp;
        frame.dirty = true;
        Ok(&mut frame.data)
    }

    /// Hands out a zeroed page: the free-list head if one exists, else a
    /// fresh page appended at end-of-file.
    pub fn allocate(&mut self) -> Result<PageId> {
        if !self.freelist.is_empty() {
            let id = self.freelist.head();
            let next = {
                let data = self.page(id)?;
                let header = PageHeader::from_bytes(data)?;
                ensure!(
                    header.page_type() == PageType::Free,
                    "free-list head {} is not a free page",
                    id
                );
                header.next()
            };
            self.freelist.pop(next);
            let data = self.page_mut(id)?;
            data.fill(0);
            return Ok(id);
        }

        let id = PageId(self.header.page_count());
        self.header.set_page_count(id.0 + 1);
        self.stats.pages_created += 1;

        if self.frames.len() >= self.capacity {
            self.evict_one()?;
        }
        let stamp = self.tick();
        self.frames.insert(
            id,
            Frame {
                data: vec![0u8; self.page_size],
                dirty: true,
                stamp,
            },
        );
        Ok(id)
    }

    /// Pushes a page onto the free list. The page content is zeroed and
    /// retyped; the file is never truncated.
    pub fn release(&mut self, id: PageId) -> Result<()> {
        ensure!(!id.is_null(), "cannot release the header page");
        ensure!(
            id.0 < self.header.page_count(),
            "release of page {} beyond page count {}",
            id,
            self.header.page_count()
        );

        let old_head = self.freelist.head();
        let data = self.page_mut(id)?;
        data.fill(0);
        let header = PageHeader::from_bytes_mut(data)?;
        header.set_page_type(PageType::Free);
        header.set_next(old_head);
        self.freelist.push(id);
        Ok(())
    }

    /// Writes all dirty frames and the file header back to disk.
    pub fn flush(&mut self) -> Result<()> {
        let page_size = self.page_size;
        let mut flushed = 0u64;

        for (&id, frame) in self.frames.iter_mut() {
            if frame.dirty {
                write_page(&mut self.file, &self.path, page_size, id, &frame.data)?;
                frame.dirty = false;
                flushed += 1;
            }
        }
        self.stats.pages_flushed += flushed;

        self.header.set_free_head(self.freelist.head());
        self.header.set_free_count(self.freelist.count());

        let mut raw = [0u8; FILE_HEADER_SIZE];
        self.header.write_to(&mut raw)?;
        self.file.seek(SeekFrom::Start(0))?;
        self.file
            .write_all(&raw)
            .wrap_err_with(|| format!("failed to write header of '{}'", self.path.display()))?;

        Ok(())
    }

    /// Flushes everything, syncs the file and drops the cache, leaving the
    /// index consistent on disk.
    pub fn close(mut self) -> Result<()> {
        self.flush()?;
        self.file
            .sync_all()
            .wrap_err_with(|| format!("failed to sync '{}'", self.path.display()))?;
        debug!(
            path = %self.path.display(),
            pages = self.header.page_count(),
            created = self.stats.pages_created,
            hits = self.stats.cache_hits,
            misses = self.stats.cache_misses,
            flushed = self.stats.pages_flushed,
            "index cache closed"
        );
        Ok(())
    }

    fn ensure_resident(&mut self, id: PageId) -> Result<()> {
        ensure!(!id.is_null(), "page 0 is the header page, not a tree page");
        ensure!(
            id.0 < self.header.page_count(),
            "page {} out of bounds (page_count={})",
            id,
            self.header.page_count()
        );

        if self.frames.contains_key(&id) {
            self.stats.cache_hits += 1;
            return Ok(());
        }
        self.stats.cache_misses += 1;

        if self.frames.len() >= self.capacity {
            self.evict_one()?;
        }

        let mut data = vec![0u8; self.page_size];
        let offset = id.0 * self.page_size as u64;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(&mut data).wrap_err_with(|| {
            format!(
                "failed to read page {} of '{}'",
                id,
                self.path.display()
            )
        })?;

        let stamp = self.tick();
        self.frames.insert(
            id,
            Frame {
                data,
                dirty: false,
                stamp,
            },
        );
        Ok(())
    }

    /// Evicts the least-recently-used frame, preferring clean victims.
    /// A dirty victim is flushed before being dropped.
    fn evict_one(&mut self) -> Result<()> {
        let clean_victim = self
            .frames
            .iter()
            .filter(|(_, f)| !f.dirty)
            .min_by_key(|(_, f)| f.stamp)
            .map(|(&id, _)| id);

        let victim = match clean_victim {
            Some(id) => id,
            None => self
                .frames
                .iter()
                .min_by_key(|(_, f)| f.stamp)
                .map(|(&id, _)| id)
                .ok_or_else(|| eyre::eyre!("cache full with no frames to evict"))?,
        };

        if let Some(frame) = self.frames.remove(&victim) {
            if frame.dirty {
                write_page(
                    &mut self.file,
                    &self.path,
                    self.page_size,
                    victim,
                    &frame.data,
                )?;
                self.stats.pages_flushed += 1;
            }
        }
        Ok(())
    }
}

fn write_page(
    file: &mut File,
    path: &Path,
    page_size: usize,
    id: PageId,
    data: &[u8],
) -> Result<()> {
    let offset = id.0 * page_size as u64;
    file.seek(SeekFrom::Start(offset))?;
    file.write_all(data)
        .wrap_err_with(|| format!("failed to write page {} of '{}'", id, path.display()))?;
    Ok(())
}
