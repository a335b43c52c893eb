//! # B+Tree Module
//!
//! Primary and secondary B+trees over the pager, plus the layout
//! derivation that ties page size and key length to node order and bucket
//! fill factor.
//!
//! ## Two Trees, One File
//!
//! Each index file holds one primary tree and any number of secondary
//! trees, all drawing pages from the same pager:
//!
//! - the **primary tree** maps a truncated string key to a bucket entry
//!   carrying the key's duplicate count, its first record location, and
//!   optionally the root of a secondary tree;
//! - a **secondary tree** resolves one primary key to the full set of
//!   referring records: identifier strings for keyword-like fields,
//!   encoded record-offset triples for identifier-like fields.
//!
//! ## Module Organization
//!
//! - `node`: the `Node` enum and its page (de)serialization, the only
//!   code that touches raw node bytes
//! - `bucket`: overflow bucket pages referenced from primary-tree leaves
//! - `primary`: insert, duplicate chaining, bucket/leaf/internal splits,
//!   in-order cursor
//! - `secondary`: the key-only nested tree
//!
//! ## Layout Derivation
//!
//! [`TreeLayout::derive`] computes order and fill arithmetically from the
//! page size and key widths, so the page geometry is reproducible from the
//! stored parameters alone:
//!
//! ```text
//! order = (page_size - PAGE_HEADER_SIZE - 8) / (key_width + NODE_KEY_OVERHEAD)
//! fill  = (page_size - PAGE_HEADER_SIZE)     / (key_width + BUCKET_ENTRY_OVERHEAD)
//! ```
//!
//! A node holds at most `order - 1` keys; a bucket holds at most `fill`
//! entries. The derivation is validated against the actual encodings at
//! build time and must round-trip identically through the parameter file.

mod bucket;
mod node;
mod primary;
mod secondary;

pub use bucket::{Bucket, BucketEntry};
pub use node::{find_slot, Node, TreeKind};
pub use primary::{Cursor, PrimaryTree};
pub use secondary::{decode_offset_triple, encode_offset_triple, SecondaryTree};

use eyre::{ensure, Result};

use crate::config::{
    BUCKET_ENTRY_OVERHEAD, MIN_FILL, MIN_ORDER, MIN_PAGE_SIZE, NODE_KEY_OVERHEAD,
    PAGE_HEADER_SIZE,
};
use crate::storage::IndexFileHeader;

/// The unit handed to a primary-tree identifier insert: one record's key
/// plus its location. Reused as a scratch object across inserts. The key
/// is kept as the clipped bytes so truncation never resynthesizes text.
#[derive(Debug, Default, Clone)]
pub struct HybridKey {
    pub key: Vec<u8>,
    pub file_index: u32,
    pub pri_off: u64,
    pub sec_off: u64,
    pub dup_count: u32,
}

impl HybridKey {
    pub fn reset(&mut self) {
        self.key.clear();
        self.file_index = 0;
        self.pri_off = 0;
        self.sec_off = 0;
        self.dup_count = 0;
    }
}

/// Page geometry for one tree file, derived once at build time and
/// recorded in both the file header and the parameter file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeLayout {
    pub page_size: usize,
    pub order: usize,
    pub fill: usize,
    pub key_width: usize,
    pub sec_key_width: usize,
    pub sec_order: usize,
}

impl TreeLayout {
    /// Maximum children of an internal node with `key_width`-byte keys on
    /// a `page_size`-byte page. A node stores `order - 1` keys (u16 length
    /// prefix each) and `order` child pointers, one of which sits outside
    /// the per-key slots.
    pub fn order_for(page_size: usize, key_width: usize) -> Result<usize> {
        ensure!(
            page_size >= MIN_PAGE_SIZE,
            "page size {} below minimum {}",
            page_size,
            MIN_PAGE_SIZE
        );
        let order = (page_size - PAGE_HEADER_SIZE - 8) / (key_width + NODE_KEY_OVERHEAD);
        let order = order.max(MIN_ORDER);
        let worst = PAGE_HEADER_SIZE + order * 8 + (order - 1) * (2 + key_width);
        ensure!(
            worst <= page_size,
            "key length {} too large for page size {}",
            key_width,
            page_size
        );
        Ok(order)
    }

    /// Maximum entries of a bucket page with `key_width`-byte keys.
    pub fn fill_for(page_size: usize, key_width: usize) -> Result<usize> {
        ensure!(
            page_size >= MIN_PAGE_SIZE,
            "page size {} below minimum {}",
            page_size,
            MIN_PAGE_SIZE
        );
        let fill = (page_size - PAGE_HEADER_SIZE) / (key_width + BUCKET_ENTRY_OVERHEAD);
        let fill = fill.max(MIN_FILL);
        let worst = PAGE_HEADER_SIZE + fill * (key_width + BUCKET_ENTRY_OVERHEAD);
        ensure!(
            worst <= page_size,
            "key length {} too large for bucket pages of {} bytes",
            key_width,
            page_size
        );
        Ok(fill)
    }

    pub fn derive(page_size: usize, key_len: usize, sec_key_len: usize) -> Result<Self> {
        ensure!(key_len > 0, "key length must be positive");
        ensure!(sec_key_len > 0, "secondary key length must be positive");

        Ok(Self {
            page_size,
            order: Self::order_for(page_size, key_len)?,
            fill: Self::fill_for(page_size, key_len)?,
            key_width: key_len,
            sec_key_width: sec_key_len,
            sec_order: Self::order_for(page_size, sec_key_len)?,
        })
    }

    /// Reconstructs the layout recorded in an index file header. The
    /// derivation is re-run rather than trusted blindly, so a header
    /// edited out-of-band cannot smuggle in a geometry the encodings
    /// cannot honor.
    pub fn from_header(header: &IndexFileHeader) -> Result<Self> {
        let layout = Self::derive(
            header.page_size() as usize,
            header.key_len() as usize,
            header.sec_key_len() as usize,
        )?;
        ensure!(
            layout.order == header.order() as usize && layout.fill == header.fill() as usize,
            "index header order/fill ({}/{}) disagree with derivation ({}/{})",
            header.order(),
            header.fill(),
            layout.order,
            layout.fill
        );
        Ok(layout)
    }

    /// Max keys per node.
    pub fn max_keys(&self) -> usize {
        self.order - 1
    }
}

/// Truncates a key to the stored width. Truncation is never an error at
/// this layer; callers count occurrences for the end-of-build report.
pub fn truncate_key(key: &[u8], width: usize) -> &[u8] {
    &key[..key.len().min(width)]
}
