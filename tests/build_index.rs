//! End-to-end index build scenarios: configure, discover, feed records,
//! close, then reopen the produced files and verify what they contain.

use std::fs;
use std::path::Path;

use tempfile::TempDir;

use flatidx::btree::{decode_offset_triple, Cursor, Node, TreeKind};
use flatidx::index::{read_parameters, IndexBuilder, RsConfig};
use flatidx::storage::IndexFileHeader;
use flatidx::{PageId, Pager, PrimaryTree, SecondaryTree, TreeLayout};

fn collect(tree: &PrimaryTree, pager: &mut Pager) -> Vec<(Vec<u8>, u32, u64)> {
    let mut cursor: Cursor = tree.cursor(pager).unwrap();
    let mut out = Vec::new();
    while let Some(entry) = cursor.next(pager).unwrap() {
        out.push((entry.key, entry.dup_count, entry.pri_off));
    }
    out
}

fn write_source(dir: &Path, name: &str) {
    fs::write(dir.join(name), b"dummy record data\n").unwrap();
}

/// A builder pointed at `src` for input and `idx` for output, with the
/// identifier plus accession and keyword fields configured.
fn configured_builder(src: &Path, idx: &Path, config: &RsConfig) -> IndexBuilder {
    let mut builder = IndexBuilder::new("testdb").unwrap();
    builder.set_fields(&["id", "acc", "key"]).unwrap();
    builder.set_db_info("testrs", "1.0", "2026-08-30", "protein", src, idx);
    builder.get_rs_info(config).unwrap();
    builder
}

#[test]
fn identifiers_come_back_sorted() {
    let dir = TempDir::new().unwrap();
    let header = IndexFileHeader::new(512, 4, 2, 15, 12, 32, false);
    let mut pager = Pager::create(dir.path().join("t.xid"), header, 32).unwrap();
    let layout = TreeLayout {
        page_size: 512,
        order: 4,
        fill: 2,
        key_width: 15,
        sec_key_width: 12,
        sec_order: 4,
    };
    let mut tree = PrimaryTree::create(&mut pager, layout).unwrap();

    tree.insert_id(&mut pager, b"B", 1, 100, 0).unwrap();
    tree.insert_id(&mut pager, b"A", 1, 200, 0).unwrap();
    tree.insert_id(&mut pager, b"C", 1, 300, 0).unwrap();

    let entries = collect(&tree, &mut pager);
    assert_eq!(
        entries,
        vec![
            (b"A".to_vec(), 1, 200),
            (b"B".to_vec(), 1, 100),
            (b"C".to_vec(), 1, 300),
        ]
    );
}

#[test]
fn keyword_shared_by_two_records_builds_one_entry() {
    let src = TempDir::new().unwrap();
    let idx = TempDir::new().unwrap();
    write_source(src.path(), "db.dat");

    let config = RsConfig::default();
    let mut builder = configured_builder(src.path(), idx.path(), &config);
    builder.get_files("*.dat", None).unwrap();
    builder.open_caches().unwrap();

    builder.add_id("P00001");
    builder.add_token("key", "KINASE").unwrap();
    builder.index_entry(1, 0, 0).unwrap();
    builder.index_field("key", 1, 0, 0).unwrap();

    builder.add_id("P00002");
    builder.add_token("key", "KINASE").unwrap();
    builder.index_entry(1, 80, 0).unwrap();
    builder.index_field("key", 1, 80, 0).unwrap();

    builder.close_caches().unwrap();

    let mut pager = Pager::open(idx.path().join("testdb.xkw"), 32).unwrap();
    let tree = PrimaryTree::open(&pager).unwrap();

    let entries = collect(&tree, &mut pager);
    assert_eq!(entries.len(), 1, "exactly one primary entry for KINASE");

    let entry = tree.search(&mut pager, b"KINASE").unwrap().unwrap();
    assert_eq!(entry.dup_count, 2);

    let layout = tree.layout();
    let sec = SecondaryTree::open(entry.sec_root, layout.sec_key_width, layout.sec_order).unwrap();
    assert_eq!(
        sec.keys(&mut pager).unwrap(),
        vec![b"P00001".to_vec(), b"P00002".to_vec()]
    );
}

#[test]
fn long_identifier_is_truncated_not_rejected() {
    let src = TempDir::new().unwrap();
    let idx = TempDir::new().unwrap();
    write_source(src.path(), "db.dat");

    let config = RsConfig::default();
    assert_eq!(config.id_len, 12);
    let mut builder = configured_builder(src.path(), idx.path(), &config);
    builder.get_files("*.dat", None).unwrap();
    builder.open_caches().unwrap();

    let long_id: String = "ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789ABCD".to_owned();
    assert_eq!(long_id.len(), 40);
    builder.add_id(&long_id);
    builder.index_entry(1, 0, 0).unwrap();
    builder.close_caches().unwrap();

    assert_eq!(builder.id_field().truncated(), 1);
    assert_eq!(builder.id_field().max_len_seen(), 40);
    assert_eq!(builder.id_field().longest_seen(), long_id);
    builder.report_entry();

    let mut pager = Pager::open(idx.path().join("testdb.xid"), 32).unwrap();
    let tree = PrimaryTree::open(&pager).unwrap();
    let entry = tree.search(&mut pager, b"ABCDEFGHIJKL").unwrap().unwrap();
    assert_eq!(entry.key, long_id.as_bytes()[..12].to_vec());
}

#[test]
fn zero_matching_files_aborts_before_creating_indexes() {
    let src = TempDir::new().unwrap();
    let idx = TempDir::new().unwrap();
    write_source(src.path(), "unrelated.txt");

    let config = RsConfig::default();
    let mut builder = configured_builder(src.path(), idx.path(), &config);

    let result = builder.get_files("*.dat", None);
    assert!(result.is_err());
    assert!(result.unwrap_err().to_string().contains("no files"));
    assert_eq!(
        fs::read_dir(idx.path()).unwrap().count(),
        0,
        "a failed discovery must leave no index files"
    );
}

#[test]
fn file_index_assignment_is_deterministic() {
    let src = TempDir::new().unwrap();
    let idx = TempDir::new().unwrap();
    for name in ["zeta.dat", "alpha.dat", "mid.dat"] {
        write_source(src.path(), name);
    }

    let config = RsConfig::default();
    let mut first = configured_builder(src.path(), idx.path(), &config);
    first.get_files("*.dat", None).unwrap();
    let mut second = configured_builder(src.path(), idx.path(), &config);
    second.get_files("*.dat", None).unwrap();

    assert_eq!(first.files(), second.files());
    assert_eq!(first.files(), ["alpha.dat", "mid.dat", "zeta.dat"]);
}

#[test]
fn entry_manifest_lists_files_in_index_order() {
    let src = TempDir::new().unwrap();
    let idx = TempDir::new().unwrap();
    for name in ["b.dat", "a.dat"] {
        write_source(src.path(), name);
    }

    let config = RsConfig::default();
    let mut builder = configured_builder(src.path(), idx.path(), &config);
    builder.get_files("*.dat", None).unwrap();
    builder.write_entry_file().unwrap();

    let manifest = fs::read_to_string(idx.path().join("testdb.ent")).unwrap();
    let lines: Vec<&str> = manifest.lines().collect();
    assert_eq!(lines[0], "# Number of files: 2");
    assert_eq!(lines[1], "# Release: 1.0");
    assert_eq!(lines[2], "# Date: 2026-08-30");
    assert_eq!(&lines[3..], ["a.dat", "b.dat"]);
}

#[test]
fn parameter_files_reopen_the_tree_identically() {
    let src = TempDir::new().unwrap();
    let idx = TempDir::new().unwrap();
    write_source(src.path(), "db.dat");

    let mut config = RsConfig::default();
    config.page_size = 512;
    config.cache_pages = 16;

    let mut builder = configured_builder(src.path(), idx.path(), &config);
    builder.get_files("*.dat", None).unwrap();
    builder.open_caches().unwrap();

    for i in 0..500u32 {
        builder.add_id(&format!("ID{:05}", i));
        builder.index_entry(1, u64::from(i) * 64, 0).unwrap();
    }
    builder.close_caches().unwrap();
    builder.dump_parameters().unwrap();

    let params = read_parameters(idx.path(), "testdb", "xid").unwrap();
    let derived = TreeLayout::derive(params.page_size, params.key_len, params.sec_key_len).unwrap();
    assert_eq!(params.page_size, 512);
    assert_eq!(params.order, derived.order);
    assert_eq!(params.fill, derived.fill);
    assert!(!params.secondary);

    let mut pager = Pager::open(idx.path().join("testdb.xid"), params.cache_pages).unwrap();
    assert_eq!(pager.header().order() as usize, params.order);
    assert_eq!(pager.header().fill() as usize, params.fill);

    let tree = PrimaryTree::open(&pager).unwrap();
    let keys: Vec<Vec<u8>> = collect(&tree, &mut pager)
        .into_iter()
        .map(|(k, _, _)| k)
        .collect();
    assert_eq!(keys.len(), 500);
    assert!(keys.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn duplicate_identifiers_keep_every_occurrence() {
    let src = TempDir::new().unwrap();
    let idx = TempDir::new().unwrap();
    write_source(src.path(), "db.dat");

    let config = RsConfig::default();
    let mut builder = configured_builder(src.path(), idx.path(), &config);
    builder.get_files("*.dat", None).unwrap();
    builder.open_caches().unwrap();

    builder.add_id("SHARED");
    builder.index_entry(1, 0, 0).unwrap();
    builder.add_id("SHARED");
    builder.index_entry(1, 512, 0).unwrap();
    builder.add_id("SHARED");
    builder.index_entry(1, 1024, 0).unwrap();
    builder.close_caches().unwrap();

    let mut pager = Pager::open(idx.path().join("testdb.xid"), 32).unwrap();
    let tree = PrimaryTree::open(&pager).unwrap();
    let entry = tree.search(&mut pager, b"SHARED").unwrap().unwrap();

    assert_eq!(entry.dup_count, 3);
    assert_eq!(entry.pri_off, 0, "first occurrence stays inline");

    let triple_order = TreeLayout::order_for(tree.layout().page_size, 20).unwrap();
    let sec = SecondaryTree::open(entry.sec_root, 20, triple_order).unwrap();
    let triples = sec.keys(&mut pager).unwrap();
    assert_eq!(triples.len(), 2);
    assert_eq!(decode_offset_triple(&triples[0]).unwrap(), (1, 512, 0));
    assert_eq!(decode_offset_triple(&triples[1]).unwrap(), (1, 1024, 0));
}

/// Walks the primary tree structurally, checking node occupancy and that
/// each separator partitions its subtrees. Returns (min, max) key of the
/// subtree.
fn check_subtree(
    pager: &mut Pager,
    layout: &TreeLayout,
    id: PageId,
    is_root: bool,
) -> (Vec<u8>, Vec<u8>) {
    let page = pager.page(id).unwrap();
    let node = Node::decode(page, TreeKind::Primary, layout.key_width).unwrap();

    match node {
        Node::Leaf { keys, .. } => {
            assert!(keys.len() <= layout.order - 1);
            if !is_root {
                assert!(
                    keys.len() >= (layout.order - 1) / 2,
                    "underfull leaf {}: {} keys",
                    id,
                    keys.len()
                );
            }
            assert!(keys.windows(2).all(|w| w[0] < w[1]));
            (keys[0].clone(), keys[keys.len() - 1].clone())
        }
        Node::Internal { keys, children } => {
            assert!(keys.len() <= layout.order - 1);
            if !is_root {
                assert!(
                    keys.len() >= (layout.order - 1) / 2,
                    "underfull internal {}: {} keys",
                    id,
                    keys.len()
                );
            }
            let mut low = None;
            let mut prev_max: Option<Vec<u8>> = None;
            for (i, &child) in children.iter().enumerate() {
                let (cmin, cmax) = check_subtree(pager, layout, child, false);
                if i > 0 {
                    assert!(
                        cmin >= keys[i - 1],
                        "separator does not bound right subtree below"
                    );
                }
                if i < keys.len() {
                    assert!(cmax < keys[i], "separator does not bound left subtree above");
                }
                if let Some(pm) = prev_max {
                    assert!(pm < cmin, "sibling subtrees overlap");
                }
                prev_max = Some(cmax.clone());
                if low.is_none() {
                    low = Some(cmin);
                }
            }
            (low.unwrap(), prev_max.unwrap())
        }
    }
}

#[test]
fn bulk_build_keeps_tree_invariants() {
    let src = TempDir::new().unwrap();
    let idx = TempDir::new().unwrap();
    write_source(src.path(), "db.dat");

    let mut config = RsConfig::default();
    config.page_size = 512;
    config.cache_pages = 16;

    let mut builder = configured_builder(src.path(), idx.path(), &config);
    builder.get_files("*.dat", None).unwrap();
    builder.open_caches().unwrap();

    let mut expect = Vec::new();
    for i in 0..2000u32 {
        let id = format!("AC{:06}", (i * 7919) % 2000);
        builder.add_id(&id);
        builder.index_entry(1, u64::from(i) * 100, 0).unwrap();
        expect.push(id.into_bytes());
    }
    builder.close_caches().unwrap();
    expect.sort();
    expect.dedup();

    let mut pager = Pager::open(idx.path().join("testdb.xid"), 64).unwrap();
    let tree = PrimaryTree::open(&pager).unwrap();

    let keys: Vec<Vec<u8>> = collect(&tree, &mut pager)
        .into_iter()
        .map(|(k, _, _)| k)
        .collect();
    assert_eq!(keys, expect, "every inserted key survives, in sorted order");

    let layout = *tree.layout();
    let root = tree.root();
    check_subtree(&mut pager, &layout, root, true);
}
