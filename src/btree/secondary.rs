//! # Secondary Trees
//!
//! A secondary tree is a key-only B+tree nested inside an index file. The
//! primary tree resolves a key to its first record; when the key occurs in
//! more than one record (or the field is keyword-like and every occurrence
//! is indexed through here), the bucket entry points at a secondary root
//! and the remaining occurrences live in this tree.
//!
//! Two key shapes pass through secondary trees:
//!
//! - identifier strings, for keyword-like fields (width = the identifier
//!   key length);
//! - 20-byte record-offset triples, for identifier-like fields, encoded
//!   big-endian so that byte order equals numeric order (see
//!   [`encode_offset_triple`]).
//!
//! Secondary trees never delete; the only operations are insert and an
//! in-order walk. Insert reports whether the key was new, which is what
//! drives duplicate counting in the bucket entries above.

use eyre::{bail, ensure, Result};
use smallvec::SmallVec;

use super::node::{find_slot, Node, TreeKind};
use crate::storage::{PageId, Pager};

/// Pages visited from root to leaf. Inline capacity of 8 levels covers any
/// realistic tree without heap allocation.
type PathStack = SmallVec<[PageId; 8]>;

/// Encodes a record location as a 20-byte key whose lexicographic order
/// matches (file_index, pri_off, sec_off) order.
pub fn encode_offset_triple(file_index: u32, pri_off: u64, sec_off: u64) -> [u8; 20] {
    let mut key = [0u8; 20];
    key[0..4].copy_from_slice(&file_index.to_be_bytes());
    key[4..12].copy_from_slice(&pri_off.to_be_bytes());
    key[12..20].copy_from_slice(&sec_off.to_be_bytes());
    key
}

pub fn decode_offset_triple(key: &[u8]) -> Result<(u32, u64, u64)> {
    ensure!(
        key.len() == 20,
        "offset triple must be 20 bytes, got {}",
        key.len()
    );
    let mut a = [0u8; 4];
    let mut b = [0u8; 8];
    let mut c = [0u8; 8];
    a.copy_from_slice(&key[0..4]);
    b.copy_from_slice(&key[4..12]);
    c.copy_from_slice(&key[12..20]);
    Ok((
        u32::from_be_bytes(a),
        u64::from_be_bytes(b),
        u64::from_be_bytes(c),
    ))
}

#[derive(Debug, Clone, Copy)]
pub struct SecondaryTree {
    root: PageId,
    key_width: usize,
    order: usize,
}

impl SecondaryTree {
    /// Allocates a fresh empty tree (a single leaf page).
    pub fn create(pager: &mut Pager, key_width: usize, order: usize) -> Result<Self> {
        let root = pager.allocate()?;
        let page = pager.page_mut(root)?;
        Node::empty_leaf().encode(page, TreeKind::Secondary, key_width)?;
        Ok(Self {
            root,
            key_width,
            order,
        })
    }

    /// Attaches to an existing tree by its root page.
    pub fn open(root: PageId, key_width: usize, order: usize) -> Result<Self> {
        ensure!(!root.is_null(), "secondary tree root cannot be null");
        Ok(Self {
            root,
            key_width,
            order,
        })
    }

    /// Current root. Splits can move it; callers that persist the root in
    /// a bucket entry must re-read this after every insert.
    pub fn root(&self) -> PageId {
        self.root
    }

    /// Inserts `key`, returning `true` if it was not already present.
    pub fn insert(&mut self, pager: &mut Pager, key: &[u8]) -> Result<bool> {
        ensure!(
            key.len() <= self.key_width,
            "secondary key of {} bytes exceeds width {}",
            key.len(),
            self.key_width
        );

        let (leaf_id, path) = self.descend(pager, key)?;
        let page = pager.page(leaf_id)?;
        let mut node = Node::decode(page, TreeKind::Secondary, self.key_width)?;

        let Node::Leaf { keys, .. } = &mut node else {
            bail!("descend landed on a non-leaf page {}", leaf_id);
        };
        let pos = match find_slot(keys, key) {
            Ok(_) => return Ok(false),
            Err(pos) => pos,
        };
        keys.insert(pos, key.to_vec());

        if node.key_count() <= self.order - 1 {
            let page = pager.page_mut(leaf_id)?;
            node.encode(page, TreeKind::Secondary, self.key_width)?;
        } else {
            let (sep, right_id) = self.split_leaf(pager, leaf_id, node)?;
            self.propagate(pager, path, leaf_id, sep, right_id)?;
        }
        Ok(true)
    }

    /// Walks the tree in key order, invoking `visit` for each key.
    pub fn walk<F>(&self, pager: &mut Pager, mut visit: F) -> Result<()>
    where
        F: FnMut(&[u8]) -> Result<()>,
    {
        let mut cur = self.root;
        loop {
            let page = pager.page(cur)?;
            let node = Node::decode(page, TreeKind::Secondary, self.key_width)?;
            match node {
                Node::Internal { children, .. } => cur = children[0],
                Node::Leaf { .. } => break,
            }
        }

        while !cur.is_null() {
            let page = pager.page(cur)?;
            let node = Node::decode(page, TreeKind::Secondary, self.key_width)?;
            let Node::Leaf {
                keys, next_leaf, ..
            } = node
            else {
                bail!("leaf chain reached a non-leaf page {}", cur);
            };
            for key in &keys {
                visit(key)?;
            }
            cur = next_leaf;
        }
        Ok(())
    }

    /// Collects all keys in order. Convenience over [`Self::walk`].
    pub fn keys(&self, pager: &mut Pager) -> Result<Vec<Vec<u8>>> {
        let mut out = Vec::new();
        self.walk(pager, |key| {
            out.push(key.to_vec());
            Ok(())
        })?;
        Ok(out)
    }

    fn descend(&self, pager: &mut Pager, key: &[u8]) -> Result<(PageId, PathStack)> {
        let mut path = PathStack::new();
        let mut cur = self.root;
        loop {
            let page = pager.page(cur)?;
            let node = Node::decode(page, TreeKind::Secondary, self.key_width)?;
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

    /// Splits an overfull leaf, returning the separator key and the new
    /// right sibling. The separator is the right half's lowest key.
    fn split_leaf(
        &mut self,
        pager: &mut Pager,
        leaf_id: PageId,
        mut node: Node,
    ) -> Result<(Vec<u8>, PageId)> {
        let Node::Leaf {
            keys, next_leaf, ..
        } = &mut node
        else {
            bail!("split_leaf called on a non-leaf node");
        };

        let mid = keys.len() / 2;
        let right_keys: Vec<Vec<u8>> = keys.split_off(mid);
        let sep = right_keys[0].clone();

        let right_id = pager.allocate()?;
        let right = Node::Leaf {
            keys: right_keys,
            buckets: Vec::new(),
            next_leaf: *next_leaf,
        };
        *next_leaf = right_id;

        let page = pager.page_mut(right_id)?;
        right.encode(page, TreeKind::Secondary, self.key_width)?;
        let page = pager.page_mut(leaf_id)?;
        node.encode(page, TreeKind::Secondary, self.key_width)?;

        Ok((sep, right_id))
    }

    /// Inserts a separator into the parents along `path`, splitting
    /// internal nodes as needed and growing a new root when the old root
    /// itself splits.
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
            let mut node = Node::decode(page, TreeKind::Secondary, self.key_width)?;
            let Node::Internal { keys, children } = &mut node else {
                bail!("separator propagation hit a non-internal page {}", parent_id);
            };

            let pos = match find_slot(keys, &sep) {
                Ok(_) => bail!("separator already present in parent {}", parent_id),
                Err(pos) => pos,
            };
            keys.insert(pos, sep);
            children.insert(pos + 1, right_id);

            if keys.len() <= self.order - 1 {
                let page = pager.page_mut(parent_id)?;
                node.encode(page, TreeKind::Secondary, self.key_width)?;
                return Ok(());
            }

            // Overfull internal node: promote the median, it does not stay
            // in either half.
            let mid = keys.len() / 2;
            let promoted = keys[mid].clone();
            let right_keys: Vec<Vec<u8>> = keys.drain(mid + 1..).collect();
            keys.truncate(mid);
            let right_children: Vec<PageId> = children.drain(mid + 1..).collect();

            let new_right = pager.allocate()?;
            let right = Node::Internal {
                keys: right_keys,
                children: right_children,
            };
            let page = pager.page_mut(new_right)?;
            right.encode(page, TreeKind::Secondary, self.key_width)?;
            let page = pager.page_mut(parent_id)?;
            node.encode(page, TreeKind::Secondary, self.key_width)?;

            left_id = parent_id;
            sep = promoted;
            right_id = new_right;
        }

        // The root itself split; grow the tree by one level.
        let new_root = pager.allocate()?;
        let root = Node::Internal {
            keys: vec![sep],
            children: vec![left_id, right_id],
        };
        let page = pager.page_mut(new_root)?;
        root.encode(page, TreeKind::Secondary, self.key_width)?;
        self.root = new_root;
        Ok(())
    }
}
