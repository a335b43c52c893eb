//! # Index File Header
//!
//! Every index file starts with a 128-byte header at offset 0 (the front of
//! page 0). It records the layout parameters the tree was built with, the
//! free-list head, and the current root page, so a file can be reopened
//! with exactly the geometry it was written with.
//!
//! ## Header Layout (128 bytes)
//!
//! ```text
//! Offset  Size  Field         Description
//! ------  ----  -----------   ----------------------------------------
//! 0       8     magic         b"flatidx1"
//! 8       4     version       Format version (currently 1)
//! 12      4     page_size     Page size in bytes
//! 16      4     order         Node order (max children per internal node)
//! 20      4     fill          Bucket fill factor (max entries per bucket)
//! 24      4     key_len       Stored key width for the primary tree
//! 28      4     sec_key_len   Stored key width for secondary trees
//! 32      4     cache_pages   Cache capacity the file was built with
//! 36      4     flags         Bit 0: field is secondary (keyword-like)
//! 40      8     free_head     First page of the free list (0 = empty)
//! 48      8     free_count    Number of pages on the free list
//! 56      8     page_count    Total pages in the file (including page 0)
//! 64      8     root_page     Current root page of the primary tree
//! 72      52    reserved      Zeroed, reserved for future use
//! 124     4     crc           CRC-32 of bytes 0..124
//! ```
//!
//! The trailing CRC turns a torn or misdirected header write into a
//! detectable open-time failure rather than silent tree corruption.
//!
//! All multi-byte fields are little-endian via zerocopy's `U32`/`U64`.

use crc::{Crc, CRC_32_ISO_HDLC};
use eyre::{ensure, Result};
use zerocopy::little_endian::{U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use super::PageId;
use crate::config::FILE_HEADER_SIZE;

pub const INDEX_MAGIC: &[u8; 8] = b"flatidx1";
pub const CURRENT_VERSION: u32 = 1;

pub const FLAG_SECONDARY: u32 = 0x01;

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);
const CRC_OFFSET: usize = FILE_HEADER_SIZE - 4;

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct IndexFileHeader {
    magic: [u8; 8],
    version: U32,
    page_size: U32,
    order: U32,
    fill: U32,
    key_len: U32,
    sec_key_len: U32,
    cache_pages: U32,
    flags: U32,
    free_head: U64,
    free_count: U64,
    page_count: U64,
    root_page: U64,
    reserved: [u8; 52],
    crc: U32,
}

const _: () = assert!(std::mem::size_of::<IndexFileHeader>() == FILE_HEADER_SIZE);

impl IndexFileHeader {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        page_size: u32,
        order: u32,
        fill: u32,
        key_len: u32,
        sec_key_len: u32,
        cache_pages: u32,
        secondary: bool,
    ) -> Self {
        Self {
            magic: *INDEX_MAGIC,
            version: U32::new(CURRENT_VERSION),
            page_size: U32::new(page_size),
            order: U32::new(order),
            fill: U32::new(fill),
            key_len: U32::new(key_len),
            sec_key_len: U32::new(sec_key_len),
            cache_pages: U32::new(cache_pages),
            flags: U32::new(if secondary { FLAG_SECONDARY } else { 0 }),
            free_head: U64::new(0),
            free_count: U64::new(0),
            page_count: U64::new(1),
            root_page: U64::new(0),
            reserved: [0u8; 52],
            crc: U32::new(0),
        }
    }

    /// Parses and validates a header read back from disk. Magic, version
    /// and CRC mismatches are all fatal: a tree with an unreadable header
    /// cannot be safely traversed.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        ensure!(
            bytes.len() >= FILE_HEADER_SIZE,
            "buffer too small for IndexFileHeader: {} < {}",
            bytes.len(),
            FILE_HEADER_SIZE
        );

        let header = Self::read_from_bytes(&bytes[..FILE_HEADER_SIZE])
            .map_err(|e| eyre::eyre!("failed to parse IndexFileHeader: {:?}", e))?;

        ensure!(
            &header.magic == INDEX_MAGIC,
            "not a flatidx index file (bad magic)"
        );

        ensure!(
            header.version.get() == CURRENT_VERSION,
            "unsupported index version: {} (expected {})",
            header.version.get(),
            CURRENT_VERSION
        );

        let expected = CRC32.checksum(&bytes[..CRC_OFFSET]);
        ensure!(
            header.crc.get() == expected,
            "index header checksum mismatch: stored {:08x}, computed {:08x}",
            header.crc.get(),
            expected
        );

        Ok(header)
    }

    /// Serializes the header, recomputing the trailing CRC.
    pub fn write_to(&mut self, bytes: &mut [u8]) -> Result<()> {
        ensure!(
            bytes.len() >= FILE_HEADER_SIZE,
            "buffer too small for IndexFileHeader: {} < {}",
            bytes.len(),
            FILE_HEADER_SIZE
        );

        bytes[..FILE_HEADER_SIZE].copy_from_slice(self.as_bytes());
        let crc = CRC32.checksum(&bytes[..CRC_OFFSET]);
        self.crc = U32::new(crc);
        bytes[CRC_OFFSET..FILE_HEADER_SIZE].copy_from_slice(&crc.to_le_bytes());
        Ok(())
    }

    pub fn page_size(&self) -> u32 {
        self.page_size.get()
    }

    pub fn order(&self) -> u32 {
        self.order.get()
    }

    pub fn fill(&self) -> u32 {
        self.fill.get()
    }

    pub fn key_len(&self) -> u32 {
        self.key_len.get()
    }

    pub fn sec_key_len(&self) -> u32 {
        self.sec_key_len.get()
    }

    pub fn cache_pages(&self) -> u32 {
        self.cache_pages.get()
    }

    pub fn is_secondary(&self) -> bool {
        self.flags.get() & FLAG_SECONDARY != 0
    }

    pub fn free_head(&self) -> PageId {
        PageId(self.free_head.get())
    }

    pub fn set_free_head(&mut self, page: PageId) {
        self.free_head = U64::new(page.0);
    }

    pub fn free_count(&self) -> u64 {
        self.free_count.get()
    }

    pub fn set_free_count(&mut self, count: u64) {
        self.free_count = U64::new(count);
    }

    pub fn page_count(&self) -> u64 {
        self.page_count.get()
    }

    pub fn set_page_count(&mut self, count: u64) {
        self.page_count = U64::new(count);
    }

    pub fn root_page(&self) -> PageId {
        PageId(self.root_page.get())
    }

    pub fn set_root_page(&mut self, page: PageId) {
        self.root_page = U64::new(page.0);
    }
}

#[cfg(test)]
mod tests {
    // Deliberately avoid `use super::*`: it would pull zerocopy's
    // `IntoBytes` trait into scope, whose `write_to(&self, ..)` shadows the
    // inherent `IndexFileHeader::write_to(&mut self, ..)` at the `&` autoref
    // step and skips the CRC update.
    use super::{IndexFileHeader, PageId, FILE_HEADER_SIZE, U32};

    #[test]
    fn header_size_is_128_bytes() {
        assert_eq!(std::mem::size_of::<IndexFileHeader>(), FILE_HEADER_SIZE);
    }

    #[test]
    fn header_round_trips_through_bytes() {
        let mut header = IndexFileHeader::new(2048, 73, 42, 15, 12, 100, true);
        header.set_root_page(PageId(1));
        header.set_page_count(9);
        header.set_free_head(PageId(5));
        header.set_free_count(2);

        let mut buf = [0u8; FILE_HEADER_SIZE];
        header.write_to(&mut buf).unwrap();

        let back = IndexFileHeader::from_bytes(&buf).unwrap();
        assert_eq!(back.page_size(), 2048);
        assert_eq!(back.order(), 73);
        assert_eq!(back.fill(), 42);
        assert_eq!(back.key_len(), 15);
        assert_eq!(back.sec_key_len(), 12);
        assert_eq!(back.cache_pages(), 100);
        assert!(back.is_secondary());
        assert_eq!(back.root_page(), PageId(1));
        assert_eq!(back.page_count(), 9);
        assert_eq!(back.free_head(), PageId(5));
        assert_eq!(back.free_count(), 2);
    }

    #[test]
    fn header_rejects_bad_magic() {
        let mut header = IndexFileHeader::new(2048, 73, 42, 15, 12, 100, false);
        let mut buf = [0u8; FILE_HEADER_SIZE];
        header.write_to(&mut buf).unwrap();
        buf[0] = b'x';

        let result = IndexFileHeader::from_bytes(&buf);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("bad magic"));
    }

    #[test]
    fn header_rejects_corrupted_body() {
        let mut header = IndexFileHeader::new(2048, 73, 42, 15, 12, 100, false);
        let mut buf = [0u8; FILE_HEADER_SIZE];
        header.write_to(&mut buf).unwrap();
        // Flip a bit in the order field, leaving magic and CRC bytes alone.
        buf[16] ^= 0x01;

        let result = IndexFileHeader::from_bytes(&buf);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("checksum"));
    }

    #[test]
    fn header_rejects_future_version() {
        let mut header = IndexFileHeader::new(2048, 73, 42, 15, 12, 100, false);
        header.version = U32::new(99);
        let mut buf = [0u8; FILE_HEADER_SIZE];
        header.write_to(&mut buf).unwrap();

        let result = IndexFileHeader::from_bytes(&buf);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("version"));
    }
}
