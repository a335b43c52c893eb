//! # Node Encoding
//!
//! `Node` is the decoded, heap-owned form of one tree page. Tree logic
//! operates entirely on decoded nodes; pages are decoded on read and
//! re-encoded before the page buffer goes back to the pager. Keeping the
//! serialization boundary at this one seam means the split and insert code
//! never does offset arithmetic.
//!
//! ## Internal Node Layout
//!
//! ```text
//! Offset              Size       Field
//! ------------------  ---------  ---------------------------------
//! 0                   16         PageHeader (key_count = n)
//! 16                  (n+1) * 8  Child page ids, little-endian u64
//! 16 + (n+1)*8        n * slot   Keys (see below)
//! ```
//!
//! ## Leaf Node Layout
//!
//! ```text
//! Offset              Size       Field
//! ------------------  ---------  ---------------------------------
//! 0                   16         PageHeader (key_count = n, next = next leaf)
//! 16                  n * 8      Bucket page ids (primary trees only)
//! 16 + n*8            n * slot   Keys
//! ```
//!
//! Secondary-tree leaves carry no bucket pointers; their keys start right
//! after the header.
//!
//! ## Key Slots
//!
//! Every key occupies a fixed slot of `2 + key_width` bytes: a u16 actual
//! length followed by the key bytes, zero-padded to `key_width`. Fixed
//! slots keep the per-page capacity a pure function of the layout, which
//! is what lets order and fill be derived arithmetically.

use eyre::{bail, ensure, Result};

use crate::config::PAGE_HEADER_SIZE;
use crate::storage::{PageHeader, PageId, PageType};

/// Which tree a page belongs to. Primary and secondary pages use distinct
/// page types so a dangling pointer into the wrong tree is caught at
/// decode time instead of producing garbage keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeKind {
    Primary,
    Secondary,
}

impl TreeKind {
    fn internal_type(self) -> PageType {
        match self {
            TreeKind::Primary => PageType::Internal,
            TreeKind::Secondary => PageType::SecInternal,
        }
    }

    fn leaf_type(self) -> PageType {
        match self {
            TreeKind::Primary => PageType::Leaf,
            TreeKind::Secondary => PageType::SecLeaf,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Internal {
        keys: Vec<Vec<u8>>,
        children: Vec<PageId>,
    },
    Leaf {
        keys: Vec<Vec<u8>>,
        /// One bucket per key. Empty in secondary trees.
        buckets: Vec<PageId>,
        next_leaf: PageId,
    },
}

impl Node {
    pub fn empty_leaf() -> Self {
        Node::Leaf {
            keys: Vec::new(),
            buckets: Vec::new(),
            next_leaf: PageId::NULL,
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, Node::Leaf { .. })
    }

    pub fn key_count(&self) -> usize {
        match self {
            Node::Internal { keys, .. } => keys.len(),
            Node::Leaf { keys, .. } => keys.len(),
        }
    }

    pub fn decode(data: &[u8], kind: TreeKind, key_width: usize) -> Result<Node> {
        let header = PageHeader::from_bytes(data)?;
        let n = header.key_count() as usize;
        let slot = 2 + key_width;

        let page_type = header.page_type();
        if page_type == kind.internal_type() {
            ensure!(n >= 1, "internal node with no separator keys");
            let keys_off = PAGE_HEADER_SIZE + (n + 1) * 8;
            ensure!(
                keys_off + n * slot <= data.len(),
                "internal node overflows page: {} keys of width {}",
                n,
                key_width
            );

            let mut children = Vec::with_capacity(n + 1);
            for i in 0..=n {
                children.push(read_page_id(data, PAGE_HEADER_SIZE + i * 8));
            }
            let mut keys = Vec::with_capacity(n);
            for i in 0..n {
                keys.push(read_key(data, keys_off + i * slot, key_width)?);
            }
            Ok(Node::Internal { keys, children })
        } else if page_type == kind.leaf_type() {
            let has_buckets = kind == TreeKind::Primary;
            let keys_off = if has_buckets {
                PAGE_HEADER_SIZE + n * 8
            } else {
                PAGE_HEADER_SIZE
            };
            ensure!(
                keys_off + n * slot <= data.len(),
                "leaf node overflows page: {} keys of width {}",
                n,
                key_width
            );

            let mut buckets = Vec::new();
            if has_buckets {
                buckets.reserve(n);
                for i in 0..n {
                    buckets.push(read_page_id(data, PAGE_HEADER_SIZE + i * 8));
                }
            }
            let mut keys = Vec::with_capacity(n);
            for i in 0..n {
                keys.push(read_key(data, keys_off + i * slot, key_width)?);
            }
            Ok(Node::Leaf {
                keys,
                buckets,
                next_leaf: header.next(),
            })
        } else {
            bail!(
                "expected a {:?} tree node, found page type {:?}",
                kind,
                page_type
            );
        }
    }

    pub fn encode(&self, data: &mut [u8], kind: TreeKind, key_width: usize) -> Result<()> {
        let slot = 2 + key_width;
        data.fill(0);

        match self {
            Node::Internal { keys, children } => {
                let n = keys.len();
                ensure!(n >= 1, "refusing to encode an internal node with no keys");
                ensure!(
                    children.len() == n + 1,
                    "internal node has {} keys but {} children",
                    n,
                    children.len()
                );
                let keys_off = PAGE_HEADER_SIZE + (n + 1) * 8;
                ensure!(
                    keys_off + n * slot <= data.len(),
                    "internal node does not fit in page: {} keys of width {}",
                    n,
                    key_width
                );

                let mut header = PageHeader::new(kind.internal_type());
                header.set_key_count(n as u16);
                header.write_to(data)?;

                for (i, child) in children.iter().enumerate() {
                    write_page_id(data, PAGE_HEADER_SIZE + i * 8, *child);
                }
                for (i, key) in keys.iter().enumerate() {
                    write_key(data, keys_off + i * slot, key, key_width)?;
                }
            }
            Node::Leaf {
                keys,
                buckets,
                next_leaf,
            } => {
                let n = keys.len();
                let has_buckets = kind == TreeKind::Primary;
                if has_buckets {
                    ensure!(
                        buckets.len() == n,
                        "leaf has {} keys but {} buckets",
                        n,
                        buckets.len()
                    );
                } else {
                    ensure!(
                        buckets.is_empty(),
                        "secondary leaf must not carry bucket pointers"
                    );
                }
                let keys_off = if has_buckets {
                    PAGE_HEADER_SIZE + n * 8
                } else {
                    PAGE_HEADER_SIZE
                };
                ensure!(
                    keys_off + n * slot <= data.len(),
                    "leaf node does not fit in page: {} keys of width {}",
                    n,
                    key_width
                );

                let mut header = PageHeader::new(kind.leaf_type());
                header.set_key_count(n as u16);
                header.set_next(*next_leaf);
                header.write_to(data)?;

                if has_buckets {
                    for (i, bucket) in buckets.iter().enumerate() {
                        write_page_id(data, PAGE_HEADER_SIZE + i * 8, *bucket);
                    }
                }
                for (i, key) in keys.iter().enumerate() {
                    write_key(data, keys_off + i * slot, key, key_width)?;
                }
            }
        }
        Ok(())
    }
}

/// Binary search over sorted keys. `Ok(i)` means `keys[i]` equals `key`;
/// `Err(i)` is the insertion point that keeps the slice sorted.
pub fn find_slot(keys: &[Vec<u8>], key: &[u8]) -> std::result::Result<usize, usize> {
    keys.binary_search_by(|probe| probe.as_slice().cmp(key))
}

fn read_page_id(data: &[u8], off: usize) -> PageId {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&data[off..off + 8]);
    PageId(u64::from_le_bytes(buf))
}

fn write_page_id(data: &mut [u8], off: usize, id: PageId) {
    data[off..off + 8].copy_from_slice(&id.0.to_le_bytes());
}

pub(crate) fn read_key(data: &[u8], off: usize, width: usize) -> Result<Vec<u8>> {
    let len = u16::from_le_bytes([data[off], data[off + 1]]) as usize;
    ensure!(
        len <= width,
        "key length {} exceeds slot width {}",
        len,
        width
    );
    Ok(data[off + 2..off + 2 + len].to_vec())
}

pub(crate) fn write_key(data: &mut [u8], off: usize, key: &[u8], width: usize) -> Result<()> {
    ensure!(
        key.len() <= width,
        "key length {} exceeds slot width {}",
        key.len(),
        width
    );
    data[off..off + 2].copy_from_slice(&(key.len() as u16).to_le_bytes());
    data[off + 2..off + 2 + key.len()].copy_from_slice(key);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const KW: usize = 15;
    const PAGE: usize = 512;

    fn keys(raw: &[&[u8]]) -> Vec<Vec<u8>> {
        raw.iter().map(|k| k.to_vec()).collect()
    }

    #[test]
    fn leaf_round_trips_with_buckets() {
        let node = Node::Leaf {
            keys: keys(&[b"ACA123", b"BDN019", b"XLR881"]),
            buckets: vec![PageId(4), PageId(7), PageId(9)],
            next_leaf: PageId(12),
        };

        let mut page = vec![0u8; PAGE];
        node.encode(&mut page, TreeKind::Primary, KW).unwrap();
        let back = Node::decode(&page, TreeKind::Primary, KW).unwrap();

        assert_eq!(back, node);
    }

    #[test]
    fn secondary_leaf_round_trips_without_buckets() {
        let node = Node::Leaf {
            keys: keys(&[b"HSERPINA1", b"MMALB2"]),
            buckets: vec![],
            next_leaf: PageId::NULL,
        };

        let mut page = vec![0u8; PAGE];
        node.encode(&mut page, TreeKind::Secondary, KW).unwrap();
        let back = Node::decode(&page, TreeKind::Secondary, KW).unwrap();

        assert_eq!(back, node);
    }

    #[test]
    fn internal_round_trips() {
        let node = Node::Internal {
            keys: keys(&[b"K0500", b"K1000"]),
            children: vec![PageId(2), PageId(5), PageId(8)],
        };

        let mut page = vec![0u8; PAGE];
        node.encode(&mut page, TreeKind::Primary, KW).unwrap();
        let back = Node::decode(&page, TreeKind::Primary, KW).unwrap();

        assert_eq!(back, node);
    }

    #[test]
    fn decode_rejects_wrong_tree_kind() {
        let node = Node::Leaf {
            keys: keys(&[b"A"]),
            buckets: vec![PageId(2)],
            next_leaf: PageId::NULL,
        };
        let mut page = vec![0u8; PAGE];
        node.encode(&mut page, TreeKind::Primary, KW).unwrap();

        let result = Node::decode(&page, TreeKind::Secondary, KW);
        assert!(result.is_err());
    }

    #[test]
    fn decode_rejects_unused_page() {
        let page = vec![0u8; PAGE];
        assert!(Node::decode(&page, TreeKind::Primary, KW).is_err());
    }

    #[test]
    fn encode_rejects_overlong_key() {
        let node = Node::Leaf {
            keys: keys(&[b"THISKEYISMUCHTOOLONGFORTHESLOT"]),
            buckets: vec![PageId(2)],
            next_leaf: PageId::NULL,
        };
        let mut page = vec![0u8; PAGE];
        assert!(node.encode(&mut page, TreeKind::Primary, KW).is_err());
    }

    #[test]
    fn encode_rejects_mismatched_buckets() {
        let node = Node::Leaf {
            keys: keys(&[b"A", b"B"]),
            buckets: vec![PageId(2)],
            next_leaf: PageId::NULL,
        };
        let mut page = vec![0u8; PAGE];
        assert!(node.encode(&mut page, TreeKind::Primary, KW).is_err());
    }

    #[test]
    fn find_slot_reports_match_and_insertion_point() {
        let ks = keys(&[b"B", b"D", b"F"]);

        assert_eq!(find_slot(&ks, b"D"), Ok(1));
        assert_eq!(find_slot(&ks, b"A"), Err(0));
        assert_eq!(find_slot(&ks, b"C"), Err(1));
        assert_eq!(find_slot(&ks, b"Z"), Err(3));
    }
}
