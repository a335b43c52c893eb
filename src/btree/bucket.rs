//! # Overflow Buckets
//!
//! Primary-tree leaves do not store record locations inline; each leaf key
//! points at a bucket page holding the full entries for the key range that
//! starts at that key. Buckets are where duplicate counts, record offsets
//! and secondary-tree roots actually live.
//!
//! ## Bucket Entry Layout
//!
//! Entries are fixed slots, sorted by key, packed after the page header:
//!
//! ```text
//! Offset          Size       Field
//! --------------  ---------  -----------------------------------------
//! 0               2          Actual key length (u16)
//! 2               key_width  Key bytes, zero-padded
//! 2 + kw          4          dup_count
//! 6 + kw          4          file_index (position in sorted input list)
//! 10 + kw         8          pri_off (byte offset of the record)
//! 18 + kw         8          sec_off (byte offset of the record's data)
//! 26 + kw         8          sec_root (secondary tree root, 0 = none)
//! ```
//!
//! Slot size is `key_width + 34`; the bucket fill factor is derived from
//! that in [`crate::btree::TreeLayout`].

use eyre::{bail, ensure, Result};

use super::node::{read_key, write_key};
use crate::config::{BUCKET_ENTRY_OVERHEAD, PAGE_HEADER_SIZE};
use crate::storage::{PageHeader, PageId, PageType};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketEntry {
    pub key: Vec<u8>,
    pub dup_count: u32,
    pub file_index: u32,
    pub pri_off: u64,
    pub sec_off: u64,
    pub sec_root: PageId,
}

impl BucketEntry {
    /// Entry for the first sighting of a key, with no secondary tree yet.
    pub fn first(key: Vec<u8>, file_index: u32, pri_off: u64, sec_off: u64) -> Self {
        Self {
            key,
            dup_count: 1,
            file_index,
            pri_off,
            sec_off,
            sec_root: PageId::NULL,
        }
    }
}

/// Decoded form of one bucket page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bucket {
    pub entries: Vec<BucketEntry>,
}

impl Bucket {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decode(data: &[u8], key_width: usize) -> Result<Bucket> {
        let header = PageHeader::from_bytes(data)?;
        if header.page_type() != PageType::Bucket {
            bail!(
                "expected a bucket page, found page type {:?}",
                header.page_type()
            );
        }

        let n = header.key_count() as usize;
        let slot = key_width + BUCKET_ENTRY_OVERHEAD;
        ensure!(
            PAGE_HEADER_SIZE + n * slot <= data.len(),
            "bucket overflows page: {} entries of width {}",
            n,
            slot
        );

        let mut entries = Vec::with_capacity(n);
        for i in 0..n {
            let off = PAGE_HEADER_SIZE + i * slot;
            let key = read_key(data, off, key_width)?;
            let off = off + 2 + key_width;
            entries.push(BucketEntry {
                key,
                dup_count: read_u32(data, off),
                file_index: read_u32(data, off + 4),
                pri_off: read_u64(data, off + 8),
                sec_off: read_u64(data, off + 16),
                sec_root: PageId(read_u64(data, off + 24)),
            });
        }
        Ok(Bucket { entries })
    }

    pub fn encode(&self, data: &mut [u8], key_width: usize) -> Result<()> {
        let n = self.entries.len();
        let slot = key_width + BUCKET_ENTRY_OVERHEAD;
        ensure!(
            PAGE_HEADER_SIZE + n * slot <= data.len(),
            "bucket does not fit in page: {} entries of width {}",
            n,
            slot
        );

        data.fill(0);
        let mut header = PageHeader::new(PageType::Bucket);
        header.set_key_count(n as u16);
        header.write_to(data)?;

        for (i, entry) in self.entries.iter().enumerate() {
            let off = PAGE_HEADER_SIZE + i * slot;
            write_key(data, off, &entry.key, key_width)?;
            let off = off + 2 + key_width;
            write_u32(data, off, entry.dup_count);
            write_u32(data, off + 4, entry.file_index);
            write_u64(data, off + 8, entry.pri_off);
            write_u64(data, off + 16, entry.sec_off);
            write_u64(data, off + 24, entry.sec_root.0);
        }
        Ok(())
    }

    /// Binary search by key; same contract as slice `binary_search`.
    pub fn find(&self, key: &[u8]) -> std::result::Result<usize, usize> {
        self.entries
            .binary_search_by(|entry| entry.key.as_slice().cmp(key))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn read_u32(data: &[u8], off: usize) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&data[off..off + 4]);
    u32::from_le_bytes(buf)
}

fn read_u64(data: &[u8], off: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&data[off..off + 8]);
    u64::from_le_bytes(buf)
}

fn write_u32(data: &mut [u8], off: usize, v: u32) {
    data[off..off + 4].copy_from_slice(&v.to_le_bytes());
}

fn write_u64(data: &mut [u8], off: usize, v: u64) {
    data[off..off + 8].copy_from_slice(&v.to_le_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    const KW: usize = 15;
    const PAGE: usize = 512;

    fn sample() -> Bucket {
        Bucket {
            entries: vec![
                BucketEntry {
                    key: b"ACA12345".to_vec(),
                    dup_count: 1,
                    file_index: 0,
                    pri_off: 128,
                    sec_off: 0,
                    sec_root: PageId::NULL,
                },
                BucketEntry {
                    key: b"KINASE".to_vec(),
                    dup_count: 2,
                    file_index: 1,
                    pri_off: 512,
                    sec_off: 80,
                    sec_root: PageId(6),
                },
            ],
        }
    }

    #[test]
    fn bucket_round_trips() {
        let bucket = sample();
        let mut page = vec![0u8; PAGE];
        bucket.encode(&mut page, KW).unwrap();

        let back = Bucket::decode(&page, KW).unwrap();
        assert_eq!(back, bucket);
    }

    #[test]
    fn bucket_decode_rejects_non_bucket_page() {
        let mut page = vec![0u8; PAGE];
        let mut header = PageHeader::new(PageType::Leaf);
        header.write_to(&mut page).unwrap();

        assert!(Bucket::decode(&page, KW).is_err());
    }

    #[test]
    fn bucket_find_locates_entries() {
        let bucket = sample();

        assert_eq!(bucket.find(b"KINASE"), Ok(1));
        assert_eq!(bucket.find(b"AAA"), Err(0));
        assert_eq!(bucket.find(b"ZZZ"), Err(2));
    }

    #[test]
    fn bucket_encode_rejects_overflow() {
        let slot = KW + BUCKET_ENTRY_OVERHEAD;
        let max = (PAGE - PAGE_HEADER_SIZE) / slot;
        let bucket = Bucket {
            entries: (0..=max)
                .map(|i| BucketEntry::first(format!("K{:04}", i).into_bytes(), i as u32, 0, 0))
                .collect(),
        };

        let mut page = vec![0u8; PAGE];
        assert!(bucket.encode(&mut page, KW).is_err());
    }

    #[test]
    fn first_entry_has_count_one_and_no_secondary() {
        let entry = BucketEntry::first(b"SV40".to_vec(), 3, 99, 7);

        assert_eq!(entry.dup_count, 1);
        assert_eq!(entry.file_index, 3);
        assert!(entry.sec_root.is_null());
    }
}
