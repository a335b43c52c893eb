//! # Storage Module
//!
//! The storage layer provides durable, page-granular access to one index
//! file through an explicit read/write pager with a bounded in-memory
//! cache. Nothing in this module knows about B+tree semantics; it deals in
//! pages, page headers, the file header and the free-page list.
//!
//! ## Module Organization
//!
//! - `page`: [`PageId`] newtype, page types, the 16-byte page header
//! - `header`: the CRC-protected 128-byte file header on page 0
//! - `freelist`: in-memory mirror of the on-disk free-page chain
//! - `pager`: [`Pager`], the LRU page cache and file I/O
//!
//! ## File Format
//!
//! An index file is a sequence of fixed-size pages:
//!
//! ```text
//! Offset 0:              Page 0: file header + unused remainder
//! Offset page_size:      Page 1: initial tree root
//! Offset 2*page_size:    Page 2
//! ...
//! ```
//!
//! The page size is chosen at build time (default 2048 bytes) and recorded
//! in the file header; reopening adopts whatever the header declares.
//!
//! ## Ownership
//!
//! A `Pager` exclusively owns its file handle and page table for the
//! duration of a build. Access is `&mut self` throughout: the engine is a
//! single-threaded batch tool, and the borrow checker does the work that
//! pin counts and shard locks do in concurrent caches.

mod freelist;
mod header;
mod page;
mod pager;

pub use freelist::Freelist;
pub use header::{IndexFileHeader, CURRENT_VERSION, INDEX_MAGIC};
pub use page::{PageHeader, PageId, PageType};
pub use pager::{Pager, PagerStats};
