//! # Primary Tree
//!
//! The primary B+tree maps truncated keys to bucket entries. Leaf keys are
//! separators only; the entries themselves live in overflow bucket pages,
//! one bucket per leaf slot, so a leaf covers `order * fill` keys before
//! it has to split.
//!
//! ## Insert Path
//!
//! ```text
//! descend ──> leaf slot ──> bucket
//!                            │
//!              ┌─────────────┼──────────────┐
//!              │             │              │
//!          key found     bucket has     bucket full
//!          (duplicate)   room           │
//!              │             │          split bucket, add
//!          bump count,   insert         separator to leaf
//!          grow sec      entry          │
//!          tree                         leaf full? split leaf,
//!                                       propagate upward
//! ```
//!
//! Duplicates are never an error. The first occurrence of a key keeps its
//! record location inline in the bucket entry; later occurrences are
//! pushed into a per-key secondary tree and only the duplicate count and
//! secondary root change. Keyword-like fields route every occurrence
//! through the secondary tree instead, so the full identifier set is
//! recoverable in sorted order.
//!
//! ## Separator Invariant
//!
//! A leaf separator equals the lowest key of its bucket. A key below the
//! lowest existing separator lands in slot 0 and lowers that separator in
//! place; this can only happen in the leftmost leaf, since everywhere else
//! the parent separator bounds the leaf from below.

use std::collections::VecDeque;

use eyre::{bail, ensure, Result};
use smallvec::SmallVec;

use super::bucket::{Bucket, BucketEntry};
use super::node::{find_slot, Node, TreeKind};
use super::secondary::{encode_offset_triple, SecondaryTree};
use super::{truncate_key, TreeLayout};
use crate::config::SECONDARY_ID_KEY_WIDTH;
use crate::storage::{PageId, Pager};

type PathStack = SmallVec<[PageId; 8]>;

/// What an insert attaches to a key: a record location for identifier
/// fields, a referring identifier for keyword fields.
enum Payload<'a> {
    Offsets {
        file_index: u32,
        pri_off: u64,
        sec_off: u64,
    },
    Ident(&'a [u8]),
}

#[derive(Debug, Clone, Copy)]
pub struct PrimaryTree {
    layout: TreeLayout,
    root: PageId,
    /// Node order for secondary trees keyed by 20-byte offset triples.
    triple_order: usize,
}

impl PrimaryTree {
    /// Initializes a new tree in a freshly created file: one empty leaf,
    /// registered as the root in the file header.
    pub fn create(pager: &mut Pager, layout: TreeLayout) -> Result<Self> {
        let root = pager.allocate()?;
        let page = pager.page_mut(root)?;
        Node::empty_leaf().encode(page, TreeKind::Primary, layout.key_width)?;
        pager.set_root(root);

        Ok(Self {
            layout,
            root,
            triple_order: TreeLayout::order_for(layout.page_size, SECONDARY_ID_KEY_WIDTH)?,
        })
    }

    /// Attaches to the tree recorded in an opened file's header.
    pub fn open(pager: &Pager) -> Result<Self> {
        let layout = TreeLayout::from_header(pager.header())?;
        let root = pager.root();
        ensure!(!root.is_null(), "index file has no root page");

        Ok(Self {
            layout,
            root,
            triple_order: TreeLayout::order_for(layout.page_size, SECONDARY_ID_KEY_WIDTH)?,
        })
    }

    pub fn layout(&self) -> &TreeLayout {
        &self.layout
    }

    pub fn root(&self) -> PageId {
        self.root
    }

    /// Indexes one identifier occurrence: key plus the record location it
    /// was seen at. Keys longer than the stored width are truncated here;
    /// the caller counts truncations for the build report.
    pub fn insert_id(
        &mut self,
        pager: &mut Pager,
        key: &[u8],
        file_index: u32,
        pri_off: u64,
        sec_off: u64,
    ) -> Result<()> {
        let key = truncate_key(key, self.layout.key_width).to_vec();
        self.upsert(
            pager,
            &key,
            Payload::Offsets {
                file_index,
                pri_off,
                sec_off,
            },
        )
    }

    /// Indexes one keyword-like occurrence: a term plus the identifier of
    /// the record it came from. The term becomes the primary key; the
    /// identifier goes into the term's secondary tree.
    pub fn insert_term(&mut self, pager: &mut Pager, term: &[u8], ident: &[u8]) -> Result<()> {
        let term = truncate_key(term, self.layout.key_width).to_vec();
        let ident = truncate_key(ident, self.layout.sec_key_width);
        self.upsert(pager, &term, Payload::Ident(ident))
    }

    /// Looks up a single key. `None` means the key was never indexed.
    pub fn search(&self, pager: &mut Pager, key: &[u8]) -> Result<Option<BucketEntry>> {
        let key = truncate_key(key, self.layout.key_width);
        let (leaf_id, _) = self.descend(pager, key)?;

        let page = pager.page(leaf_id)?;
        let node = Node::decode(page, TreeKind::Primary, self.layout.key_width)?;
        let Node::Leaf { keys, buckets, .. } = node else {
            bail!("descend landed on a non-leaf page {}", leaf_id);
        };
        if keys.is_empty() {
            return Ok(None);
        }

        let slot = match find_slot(&keys, key) {
            Ok(i) => i,
            Err(0) => return Ok(None),
            Err(i) => i - 1,
        };
        let bucket = Bucket::decode(pager.page(buckets[slot])?, self.layout.key_width)?;
        Ok(match bucket.find(key) {
            Ok(i) => Some(bucket.entries[i].clone()),
            Err(_) => None,
        })
    }

    /// In-order cursor over every bucket entry in the tree.
    pub fn cursor(&self, pager: &mut Pager) -> Result<Cursor> {
        let mut cur = self.root;
        loop {
            let page = pager.page(cur)?;
            let node = Node::decode(page, TreeKind::Primary, self.layout.key_width)?;
            match node {
                Node::Internal { children, .. } => cur = children[0],
                Node::Leaf { .. } => break,
            }
        }

        Ok(Cursor {
            key_width: self.layout.key_width,
            next_leaf: cur,
            buckets: VecDeque::new(),
            entries: VecDeque::new(),
        })
    }

    fn upsert(&mut self, pager: &mut Pager, key: &[u8], payload: Payload<'_>) -> Result<()> {
        let (leaf_id, path) = self.descend(pager, key)?;
        let page = pager.page(leaf_id)?;
        let mut leaf = Node::decode(page, TreeKind::Primary, self.layout.key_width)?;

        // Very first insert into an empty tree.
        if leaf.key_count() == 0 {
            let entry = self.new_entry(pager, key, payload)?;
            let bucket_id = self.write_bucket(pager, None, &Bucket { entries: vec![entry] })?;
            let Node::Leaf { keys, buckets, .. } = &mut leaf else {
                bail!("descend landed on a non-leaf page {}", leaf_id);
            };
            keys.push(key.to_vec());
            buckets.push(bucket_id);
            return self.store_node(pager, leaf_id, &leaf);
        }

        let (slot, bucket_id, lowered) = {
            let Node::Leaf { keys, buckets, .. } = &mut leaf else {
                bail!("descend landed on a non-leaf page {}", leaf_id);
            };
            let (slot, lowered) = match find_slot(keys, key) {
                Ok(i) => (i, false),
                // Below the lowest separator: lower it. Only reachable in
                // the leftmost leaf.
                Err(0) => {
                    keys[0] = key.to_vec();
                    (0, true)
                }
                Err(i) => (i - 1, false),
            };
            (slot, buckets[slot], lowered)
        };
        ensure!(
            !bucket_id.is_null(),
            "leaf {} slot {} has no bucket page",
            leaf_id,
            slot
        );

        let mut bucket = Bucket::decode(pager.page(bucket_id)?, self.layout.key_width)?;
        match bucket.find(key) {
            Ok(i) => {
                self.bump_duplicate(pager, &mut bucket.entries[i], payload)?;
                self.write_bucket(pager, Some(bucket_id), &bucket)?;
                if lowered {
                    self.store_node(pager, leaf_id, &leaf)?;
                }
                Ok(())
            }
            Err(pos) => {
                let entry = self.new_entry(pager, key, payload)?;
                bucket.entries.insert(pos, entry);
                if bucket.len() <= self.layout.fill {
                    self.write_bucket(pager, Some(bucket_id), &bucket)?;
                    if lowered {
                        self.store_node(pager, leaf_id, &leaf)?;
                    }
                    Ok(())
                } else {
                    self.split_bucket(pager, leaf_id, leaf, slot, bucket_id, bucket, path)
                }
            }
        }
    }

    /// Builds the entry for a key's first occurrence. Keyword entries get
    /// their secondary tree immediately; identifier entries stay inline
    /// until a duplicate shows up.
    fn new_entry(&self, pager: &mut Pager, key: &[u8], payload: Payload<'_>) -> Result<BucketEntry> {
        Ok(match payload {
            Payload::Offsets {
                file_index,
                pri_off,
                sec_off,
            } => BucketEntry::first(key.to_vec(), file_index, pri_off, sec_off),
            Payload::Ident(ident) => {
                let mut sec = SecondaryTree::create(
                    pager,
                    self.layout.sec_key_width,
                    self.layout.sec_order,
                )?;
                sec.insert(pager, ident)?;
                BucketEntry {
                    key: key.to_vec(),
                    dup_count: 1,
                    file_index: 0,
                    pri_off: 0,
                    sec_off: 0,
                    sec_root: sec.root(),
                }
            }
        })
    }

    /// Applies a repeat occurrence of an existing key. The count only
    /// grows when the secondary tree actually gained a key, so indexing
    /// the same record twice stays idempotent.
    fn bump_duplicate(
        &self,
        pager: &mut Pager,
        entry: &mut BucketEntry,
        payload: Payload<'_>,
    ) -> Result<()> {
        match payload {
            Payload::Offsets {
                file_index,
                pri_off,
                sec_off,
            } => {
                let mut sec = if entry.sec_root.is_null() {
                    SecondaryTree::create(pager, SECONDARY_ID_KEY_WIDTH, self.triple_order)?
                } else {
                    SecondaryTree::open(entry.sec_root, SECONDARY_ID_KEY_WIDTH, self.triple_order)?
                };
                let triple = encode_offset_triple(file_index, pri_off, sec_off);
                if sec.insert(pager, &triple)? {
                    entry.dup_count += 1;
                }
                entry.sec_root = sec.root();
            }
            Payload::Ident(ident) => {
                ensure!(
                    !entry.sec_root.is_null(),
                    "keyword entry is missing its secondary tree"
                );
                let mut sec = SecondaryTree::open(
                    entry.sec_root,
                    self.layout.sec_key_width,
                    self.layout.sec_order,
                )?;
                if sec.insert(pager, ident)? {
                    entry.dup_count += 1;
                }
                entry.sec_root = sec.root();
            }
        }
        Ok(())
    }

    /// Splits an overfull bucket at the median and hangs the right half
    /// off a new leaf slot; the leaf splits in turn if that overfills it.
    fn split_bucket(
        &mut self,
        pager: &mut Pager,
        leaf_id: PageId,
        mut leaf: Node,
        slot: usize,
        bucket_id: PageId,
        mut bucket: Bucket,
        path: PathStack,
    ) -> Result<()> {
        let mid = bucket.len() / 2;
        let right_entries = bucket.entries.split_off(mid);
        let sep = right_entries[0].key.clone();

        let right_bucket_id = self.write_bucket(
            pager,
            None,
            &Bucket {
                entries: right_entries,
            },
        )?;
        self.write_bucket(pager, Some(bucket_id), &bucket)?;

        {
            let Node::Leaf { keys, buckets, .. } = &mut leaf else {
                bail!("bucket split on a non-leaf page {}", leaf_id);
            };
            keys.insert(slot + 1, sep);
            buckets.insert(slot + 1, right_bucket_id);
        }

        if leaf.key_count() <= self.layout.max_keys() {
            self.store_node(pager, leaf_id, &leaf)
        } else {
            let (sep, right_id) = self.split_leaf(pager, leaf_id, leaf)?;
            self.propagate(pager, path, leaf_id, sep, right_id)
        }
    }

    fn split_leaf(
        &mut self,
        pager: &mut Pager,
        leaf_id: PageId,
        mut node: Node,
    ) -> Result<(Vec<u8>, PageId)> {
        let Node::Leaf {
            keys,
            buckets,
            next_leaf,
        } = &mut node
        else {
            bail!("split_leaf called on a non-leaf node");
        };

        let mid = keys.len() / 2;
        let right_keys: Vec<Vec<u8>> = keys.split_off(mid);
        let right_buckets: Vec<PageId> = buckets.split_off(mid);
        let sep = right_keys[0].clone();

        let right_id = pager.allocate()?;
        let right = Node::Leaf {
            keys: right_keys,
            buckets: right_buckets,
            next_leaf: *next_leaf,
        };
        *next_leaf = right_id;

        self.store_node(pager, right_id, &right)?;
        self.store_node(pager, leaf_id, &node)?;
        Ok((sep, right_id))
    }

    fn propagate(
        &mut self,
        pager: &mut Pager,
        mut path: PathStack,
        mut left_id: PageId,
        mut sep: Vec<u8>,
        mut right_id: PageId,
    ) -> Result<()> {
        while let Some(parent_id) = path.pop() {
            let page = pager.page(parent_id)?;
            let mut node = Node::decode(page, TreeKind::Primary, self.layout.key_width)?;
            let Node::Internal { keys, children } = &mut node else {
                bail!("separator propagation hit a non-internal page {}", parent_id);
            };

            let pos = match find_slot(keys, &sep) {
                Ok(_) => bail!("separator already present in parent {}", parent_id),
                Err(pos) => pos,
            };
            keys.insert(pos, sep);
            children.insert(pos + 1, right_id);

            if keys.len() <= self.layout.max_keys() {
                return self.store_node(pager, parent_id, &node);
            }

            // Overfull internal node: promote the median, it does not stay
            // in either half.
            let mid = keys.len() / 2;
            let promoted = keys[mid].clone();
            let right_keys: Vec<Vec<u8>> = keys.drain(mid + 1..).collect();
            keys.truncate(mid);
            let right_children: Vec<PageId> = children.drain(mid + 1..).collect();

            let new_right = pager.allocate()?;
            self.store_node(
                pager,
                new_right,
                &Node::Internal {
                    keys: right_keys,
                    children: right_children,
                },
            )?;
            self.store_node(pager, parent_id, &node)?;

            left_id = parent_id;
            sep = promoted;
            right_id = new_right;
        }

        // The root split; the tree grows a level.
        let new_root = pager.allocate()?;
        self.store_node(
            pager,
            new_root,
            &Node::Internal {
                keys: vec![sep],
                children: vec![left_id, right_id],
            },
        )?;
        self.root = new_root;
        pager.set_root(new_root);
        Ok(())
    }

    fn descend(&self, pager: &mut Pager, key: &[u8]) -> Result<(PageId, PathStack)> {
        let mut path = PathStack::new();
        let mut cur = self.root;
        loop {
            let page = pager.page(cur)?;
            let node = Node::decode(page, TreeKind::Primary, self.layout.key_width)?;
            match node {
                Node::Internal { keys, children } => {
                    let idx = match find_slot(&keys, key) {
                        Ok(i) => i + 1,
                        Err(i) => i,
                    };
                    path.push(cur);
                    cur = children[idx];
                }
                Node::Leaf { .. } => return Ok((cur, path)),
            }
        }
    }

    fn store_node(&self, pager: &mut Pager, id: PageId, node: &Node) -> Result<()> {
        let page = pager.page_mut(id)?;
        node.encode(page, TreeKind::Primary, self.layout.key_width)
    }

    /// Encodes a bucket into `target`, or into a newly allocated page when
    /// `target` is `None`. Returns the page written.
    fn write_bucket(
        &self,
        pager: &mut Pager,
        target: Option<PageId>,
        bucket: &Bucket,
    ) -> Result<PageId> {
        let id = match target {
            Some(id) => id,
            None => pager.allocate()?,
        };
        let page = pager.page_mut(id)?;
        bucket.encode(page, self.layout.key_width)?;
        Ok(id)
    }
}

/// Streams every bucket entry in key order by walking the leaf chain.
#[derive(Debug)]
pub struct Cursor {
    key_width: usize,
    next_leaf: PageId,
    buckets: VecDeque<PageId>,
    entries: VecDeque<BucketEntry>,
}

impl Cursor {
    pub fn next(&mut self, pager: &mut Pager) -> Result<Option<BucketEntry>> {
        loop {
            if let Some(entry) = self.entries.pop_front() {
                return Ok(Some(entry));
            }
            if let Some(bucket_id) = self.buckets.pop_front() {
                let bucket = Bucket::decode(pager.page(bucket_id)?, self.key_width)?;
                self.entries.extend(bucket.entries);
                continue;
            }
            if self.next_leaf.is_null() {
                return Ok(None);
            }
            let page = pager.page(self.next_leaf)?;
            let node = Node::decode(page, TreeKind::Primary, self.key_width)?;
            let Node::Leaf {
                buckets, next_leaf, ..
            } = node
            else {
                bail!("leaf chain reached a non-leaf page {}", self.next_leaf);
            };
            self.buckets.extend(buckets);
            self.next_leaf = next_leaf;
        }
    }
}
