//! # Free Page Tracking
//!
//! Released pages are never returned to the filesystem; the file only ever
//! grows. Instead, a released page is pushed onto a free list and handed
//! back out the next time the tree needs a page.
//!
//! ## On-Disk Representation
//!
//! The list is threaded through the freed pages themselves: a freed page is
//! retyped to `PageType::Free` and its header `next` field points at the
//! previously freed page. The head of the chain and the total count live in
//! the file header, so the list survives close/reopen.
//!
//! ```text
//! file header ── free_head ──> page 9 ── next ──> page 4 ── next ──> 0
//! ```
//!
//! The `Freelist` struct here is only the in-memory mirror of (head, count);
//! the chain itself is read and written through the pager, which owns all
//! page I/O.

use super::PageId;

#[derive(Debug)]
pub struct Freelist {
    head: PageId,
    count: u64,
}

impl Default for Freelist {
    fn default() -> Self {
        Self::new()
    }
}

impl Freelist {
    pub fn new() -> Self {
        Self {
            head: PageId::NULL,
            count: 0,
        }
    }

    pub fn with_head(head: PageId, count: u64) -> Self {
        Self { head, count }
    }

    pub fn head(&self) -> PageId {
        self.head
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Records that `page` is now the head of the chain.
    pub fn push(&mut self, page: PageId) {
        self.head = page;
        self.count += 1;
    }

    /// Records that the head was handed out; `next` is the page the old
    /// head's header pointed at.
    pub fn pop(&mut self, next: PageId) {
        self.head = next;
        self.count = self.count.saturating_sub(1);
    }
}
