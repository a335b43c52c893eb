//! # Page Types and Header Layout
//!
//! Every page in an index file begins with a 16-byte header describing what
//! the page holds. The rest of the page is interpreted by the B+tree codecs
//! in `crate::btree`; this module only knows about the header.
//!
//! ## Page Header Layout (16 bytes)
//!
//! ```text
//! Offset  Size  Field      Description
//! ------  ----  ---------  ----------------------------------------
//! 0       1     page_type  Type of page (Internal, Leaf, Bucket, ...)
//! 1       1     flags      Reserved, currently always 0
//! 2       2     key_count  Number of keys/entries in this page
//! 4       4     reserved   Reserved for future use
//! 8       8     next       Next-leaf pointer (leaf pages),
//!                          next-free pointer (freed pages), 0 otherwise
//! ```
//!
//! ## Page Identity
//!
//! Pages are addressed by [`PageId`], a page *number* within one file, not
//! a byte offset. Page 0 always holds the file header and is never a tree
//! page, so 0 doubles as the null pointer ([`PageId::NULL`]). Raw byte
//! offsets are computed inside the pager and never escape it.
//!
//! ## Zero-Copy Access
//!
//! `PageHeader` uses `zerocopy` so headers can be read in place from a
//! cached page buffer without copying. Multi-byte fields are little-endian.

use eyre::{ensure, Result};
use zerocopy::little_endian::{U16, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::config::PAGE_HEADER_SIZE;

/// Number of a page within one index file. Page 0 is the file header page,
/// so `PageId(0)` serves as the null pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PageId(pub u64);

impl PageId {
    pub const NULL: PageId = PageId(0);

    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl std::fmt::Display for PageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageType {
    Unused = 0x00,
    Internal = 0x01,
    Leaf = 0x02,
    Bucket = 0x03,
    SecInternal = 0x04,
    SecLeaf = 0x05,
    Free = 0x30,
}

impl PageType {
    pub fn from_byte(b: u8) -> Self {
        match b {
            0x01 => PageType::Internal,
            0x02 => PageType::Leaf,
            0x03 => PageType::Bucket,
            0x04 => PageType::SecInternal,
            0x05 => PageType::SecLeaf,
            0x30 => PageType::Free,
            _ => PageType::Unused,
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct PageHeader {
    page_type: u8,
    flags: u8,
    key_count: U16,
    reserved: [u8; 4],
    next: U64,
}

const _: () = assert!(std::mem::size_of::<PageHeader>() == PAGE_HEADER_SIZE);

impl PageHeader {
    pub fn new(page_type: PageType) -> Self {
        Self {
            page_type: page_type as u8,
            flags: 0,
            key_count: U16::new(0),
            reserved: [0; 4],
            next: U64::new(0),
        }
    }

    pub fn from_bytes(data: &[u8]) -> Result<&Self> {
        ensure!(
            data.len() >= PAGE_HEADER_SIZE,
            "buffer too small for PageHeader: {} < {}",
            data.len(),
            PAGE_HEADER_SIZE
        );

        Self::ref_from_bytes(&data[..PAGE_HEADER_SIZE])
            .map_err(|e| eyre::eyre!("failed to read PageHeader: {:?}", e))
    }

    pub fn from_bytes_mut(data: &mut [u8]) -> Result<&mut Self> {
        ensure!(
            data.len() >= PAGE_HEADER_SIZE,
            "buffer too small for PageHeader: {} < {}",
            data.len(),
            PAGE_HEADER_SIZE
        );

        Self::mut_from_bytes(&mut data[..PAGE_HEADER_SIZE])
            .map_err(|e| eyre::eyre!("failed to read PageHeader: {:?}", e))
    }

    pub fn write_to(&self, data: &mut [u8]) -> Result<()> {
        ensure!(
            data.len() >= PAGE_HEADER_SIZE,
            "buffer too small for PageHeader: {} < {}",
            data.len(),
            PAGE_HEADER_SIZE
        );

        data[..PAGE_HEADER_SIZE].copy_from_slice(self.as_bytes());
        Ok(())
    }

    pub fn page_type(&self) -> PageType {
        PageType::from_byte(self.page_type)
    }

    pub fn set_page_type(&mut self, page_type: PageType) {
        self.page_type = page_type as u8;
    }

    pub fn key_count(&self) -> u16 {
        self.key_count.get()
    }

    pub fn set_key_count(&mut self, count: u16) {
        self.key_count = U16::new(count);
    }

    pub fn next(&self) -> PageId {
        PageId(self.next.get())
    }

    pub fn set_next(&mut self, page: PageId) {
        self.next = U64::new(page.0);
    }
}
