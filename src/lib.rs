//! # flatidx - B+tree disk index engine for flat-file databases
//!
//! flatidx builds on-disk B+tree indexes over flat-file record databases:
//! collections of text files in which each record is identified by a string
//! ID and addressed by a byte offset. Format-specific front ends parse the
//! records; this crate owns everything below that line: the page cache, the
//! free-page list, the primary and secondary key trees, overflow buckets,
//! and the per-database build orchestration.
//!
//! ## Architecture
//!
//! The engine is layered, leaves first:
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │   IndexBuilder (per-database façade)     │
//! ├─────────────────────────────────────────┤
//! │  FieldDef / RsConfig (build parameters)  │
//! ├──────────────────┬──────────────────────┤
//! │   PrimaryTree    │    SecondaryTree      │
//! ├──────────────────┴──────────────────────┤
//! │     Node / Bucket (page codecs)          │
//! ├─────────────────────────────────────────┤
//! │   Pager (LRU page cache + freelist)      │
//! └─────────────────────────────────────────┘
//! ```
//!
//! ## Index layout on disk
//!
//! One database build produces one file per indexed field plus two small
//! text files:
//!
//! ```text
//! index_dir/
//! ├── embl.xid           # identifier tree
//! ├── embl.xac           # accession tree
//! ├── embl.xkw           # keyword tree
//! ├── embl.xid.param     # page size / order / fill / key length
//! ├── embl.xac.param
//! ├── embl.xkw.param
//! └── embl.ent           # source file manifest (file index -> filename)
//! ```
//!
//! Each tree file is a sequence of fixed-size pages. Page 0 carries the
//! CRC-protected file header; page 1 is the initial root. Primary-tree
//! leaves point at overflow bucket pages; each bucket entry may in turn
//! point at the root of a nested secondary tree resolving that key to its
//! set of referring records.
//!
//! ## Concurrency model
//!
//! Builds are single-threaded and batch-oriented. A [`storage::Pager`] is
//! exclusively owned for the duration of a build; `&mut self` access
//! replaces pin counts and locks, with the borrow checker guaranteeing no
//! page reference survives a later fetch.
//!
//! ## Quick start
//!
//! ```ignore
//! use std::path::Path;
//! use flatidx::index::{IndexBuilder, RsConfig};
//!
//! let mut b = IndexBuilder::new("embl")?;
//! b.set_fields(&["id", "acc", "key"])?;
//! b.set_db_info("emblrs", "142", "2026-08-01", "nucleotide",
//!               Path::new("/data"), Path::new("/idx"));
//! b.get_rs_info(&RsConfig::from_env()?)?;
//! b.get_files("*.dat", None)?;
//! b.open_caches()?;
//! // per record:
//! b.add_id("X56734");
//! b.add_token("acc", "X56734")?;
//! b.index_entry(1, 0, 0)?;
//! b.index_field("acc", 1, 0, 0)?;
//! // at end:
//! b.close_caches()?;
//! b.write_entry_file()?;
//! b.dump_parameters()?;
//! ```

pub mod btree;
pub mod config;
pub mod index;
pub mod storage;

pub use btree::{HybridKey, PrimaryTree, SecondaryTree, TreeLayout};
pub use index::{FieldDef, IndexBuilder, RsConfig};
pub use storage::{PageId, Pager};
