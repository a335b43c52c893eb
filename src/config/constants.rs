//! # Index Engine Configuration Constants
//!
//! This module centralizes the constants that define the on-disk format and
//! the default build parameters. Constants that depend on each other are
//! co-located to prevent mismatch bugs.
//!
//! ## Dependency Graph
//!
//! ```text
//! DEFAULT_PAGE_SIZE (2048 bytes)
//!       │
//!       ├─> PAGE_HEADER_SIZE (16 bytes, fixed, every page)
//!       │
//!       ├─> FILE_HEADER_SIZE (128 bytes, page 0 only)
//!       │
//!       └─> node order / bucket fill (derived per tree, see btree::TreeLayout)
//!             order = (page_size - PAGE_HEADER_SIZE - 8) / (key_width + NODE_KEY_OVERHEAD)
//!             fill  = (page_size - PAGE_HEADER_SIZE) / (key_width + BUCKET_ENTRY_OVERHEAD)
//!
//! NODE_KEY_OVERHEAD (10)
//!       │
//!       └─> u16 stored key length + u64 child/bucket pointer per slot.
//!           Changing the node encoding in btree::node requires changing this.
//!
//! BUCKET_ENTRY_OVERHEAD (34)
//!       │
//!       └─> u16 key length + dup_count u32 + file_index u32
//!           + pri_off u64 + sec_off u64 + sec_root u64.
//!           Changing BucketEntry in btree::bucket requires changing this.
//! ```
//!
//! These overhead values are load-bearing for the on-disk format: they are
//! baked into every index file via the derived order and fill factor, and
//! the derivation must round-trip identically through the parameter file so
//! a tree can be reopened with the exact layout it was built with.
//!
//! ## Key Lengths
//!
//! Keys longer than a field's configured length are truncated, never
//! rejected. The defaults (12 for identifiers, 15 for other fields) keep
//! node fan-out high on 2KB pages while covering the common accession and
//! keyword vocabularies; oversized tokens are counted and reported at the
//! end of the build.

/// Size of each index page in bytes. Overridable per build via
/// [`crate::index::RsConfig`]; must be at least [`MIN_PAGE_SIZE`].
pub const DEFAULT_PAGE_SIZE: usize = 2048;

/// Smallest page size the layout derivation stays sane for.
pub const MIN_PAGE_SIZE: usize = 512;

/// Default capacity of the in-memory page cache, in pages, per open tree.
pub const DEFAULT_CACHE_PAGES: usize = 100;

/// Size of the per-page header (type, flags, key count, next pointer).
pub const PAGE_HEADER_SIZE: usize = 16;

/// Size of the file header occupying the start of page 0.
pub const FILE_HEADER_SIZE: usize = 128;

/// Default stored length for identifier keys.
pub const DEFAULT_ID_KEYLEN: usize = 12;

/// Default stored length for non-identifier field keys.
pub const DEFAULT_KEYLEN: usize = 15;

/// Per-key overhead in a node page: u16 actual length + u64 pointer.
pub const NODE_KEY_OVERHEAD: usize = 10;

/// Per-entry overhead in a bucket page, excluding the fixed key width:
/// u16 key length, u32 dup_count, u32 file_index, u64 primary offset,
/// u64 secondary offset, u64 secondary-tree root.
pub const BUCKET_ENTRY_OVERHEAD: usize = 34;

/// Width of the encoded (file_index, pri_off, sec_off) triple used as the
/// key of identifier-field secondary trees.
pub const SECONDARY_ID_KEY_WIDTH: usize = 20;

/// Lower clamp for the derived node order. Below this a page could not
/// hold a meaningful B+tree node.
pub const MIN_ORDER: usize = 4;

/// Lower clamp for the derived bucket fill factor.
pub const MIN_FILL: usize = 2;

const _: () = assert!(
    MIN_PAGE_SIZE >= FILE_HEADER_SIZE + PAGE_HEADER_SIZE,
    "page 0 must fit the file header"
);

const _: () = assert!(
    SECONDARY_ID_KEY_WIDTH == 4 + 8 + 8,
    "secondary id key is file_index u32 + pri_off u64 + sec_off u64"
);

const _: () = assert!(
    BUCKET_ENTRY_OVERHEAD == 2 + 4 + 4 + 8 + 8 + 8,
    "BUCKET_ENTRY_OVERHEAD derivation mismatch"
);

const _: () = assert!(
    NODE_KEY_OVERHEAD == 2 + 8,
    "NODE_KEY_OVERHEAD derivation mismatch"
);
