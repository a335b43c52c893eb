//! # Index Builder
//!
//! `IndexBuilder` orchestrates one database's indexing run: configure the
//! field list and metadata, discover source files, open one index file per
//! field, feed it records, then close everything and write the manifest
//! and parameter files.
//!
//! ```text
//! CONFIGURE (set_fields, set_db_info, get_rs_info)
//!     → DISCOVER (get_files, pair_files)
//!     → open_caches
//!     → per record: add_id / add_token* → index_entry → index_field*
//!     → close_caches
//!     → write_entry_file, dump_parameters, report_*
//! ```
//!
//! The builder owns one pager + primary tree per open index and a single
//! reusable `HybridKey` scratch holding the current record's identifier.
//! Format parsing stays outside: callers hand in extracted, normalized
//! strings and record offsets.

use std::fs::{self, File};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use eyre::{bail, ensure, Result, WrapErr};
use tracing::{debug, warn};

use super::field::FieldDef;
use super::resource::RsConfig;
use crate::btree::{HybridKey, PrimaryTree, TreeLayout};
use crate::storage::{IndexFileHeader, Pager};

#[derive(Debug)]
struct OpenTree {
    pager: Pager,
    tree: PrimaryTree,
}

#[derive(Debug)]
pub struct IndexBuilder {
    dbname: String,
    resource: String,
    release: String,
    date: String,
    dbtype: String,
    directory: PathBuf,
    index_dir: PathBuf,
    files: Vec<String>,
    reffiles: Vec<String>,
    do_id: bool,
    id_field: FieldDef,
    fields: Vec<FieldDef>,
    config: RsConfig,
    id_tree: Option<OpenTree>,
    field_trees: Vec<OpenTree>,
    scratch: HybridKey,
}

impl IndexBuilder {
    pub fn new(dbname: &str) -> Result<Self> {
        Ok(Self {
            dbname: dbname.to_owned(),
            resource: String::new(),
            release: String::new(),
            date: String::new(),
            dbtype: String::new(),
            directory: PathBuf::from("."),
            index_dir: PathBuf::from("."),
            files: Vec::new(),
            reffiles: Vec::new(),
            do_id: false,
            id_field: FieldDef::known("id")?,
            fields: Vec::new(),
            config: RsConfig::default(),
            id_tree: None,
            field_trees: Vec::new(),
            scratch: HybridKey::default(),
        })
    }

    pub fn dbname(&self) -> &str {
        &self.dbname
    }

    /// Sorted source file list, valid after [`Self::get_files`].
    pub fn files(&self) -> &[String] {
        &self.files
    }

    /// The identifier field definition, including truncation statistics.
    pub fn id_field(&self) -> &FieldDef {
        &self.id_field
    }

    /// A configured field's definition, including truncation statistics.
    pub fn field(&self, name: &str) -> Result<&FieldDef> {
        let Some(def) = self.fields.iter().find(|f| f.name() == name) else {
            bail!("field '{}' is not configured for this build", name);
        };
        Ok(def)
    }

    /// Validates the requested field names against the supported set.
    /// `"id"` enables identifier indexing instead of adding a field.
    pub fn set_fields(&mut self, names: &[&str]) -> Result<()> {
        for &name in names {
            if name == "id" {
                self.do_id = true;
                continue;
            }
            ensure!(
                !self.fields.iter().any(|f| f.name() == name),
                "field '{}' requested twice",
                name
            );
            self.fields.push(FieldDef::known(name)?);
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub fn set_db_info(
        &mut self,
        resource: &str,
        release: &str,
        date: &str,
        dbtype: &str,
        directory: &Path,
        index_dir: &Path,
    ) {
        self.resource = resource.to_owned();
        self.release = release.to_owned();
        self.date = date.to_owned();
        self.dbtype = dbtype.to_owned();
        self.directory = directory.to_owned();
        self.index_dir = index_dir.to_owned();
    }

    /// Resolves page/cache sizes and per-field key lengths from the
    /// configuration resource and derives every tree's page geometry.
    pub fn get_rs_info(&mut self, config: &RsConfig) -> Result<()> {
        self.config = config.clone();

        self.id_field.key_len = config.id_len;
        self.id_field.layout =
            TreeLayout::derive(config.page_size, config.id_len, config.id_len)?;

        for field in &mut self.fields {
            if let Some(len) = config.field_len(field.name()) {
                field.key_len = len;
            }
            field.layout = TreeLayout::derive(config.page_size, field.key_len, config.id_len)?;
        }
        Ok(())
    }

    /// Enumerates source files matching `include` (shell-style `*`/`?`
    /// wildcards), drops any matching `exclude`, and sorts the survivors.
    /// The sorted position determines each file's 1-based file index, so
    /// identical inputs always index identically. Zero matches is fatal
    /// and leaves nothing behind.
    pub fn get_files(&mut self, include: &str, exclude: Option<&str>) -> Result<usize> {
        let mut names = Vec::new();
        let dir = fs::read_dir(&self.directory).wrap_err_with(|| {
            format!("cannot read source directory '{}'", self.directory.display())
        })?;

        for entry in dir {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if !wildcard_match(include, &name) {
                continue;
            }
            if exclude.is_some_and(|pattern| wildcard_match(pattern, &name)) {
                continue;
            }
            names.push(name);
        }

        ensure!(
            !names.is_empty(),
            "no files in '{}' match pattern '{}'",
            self.directory.display(),
            include
        );

        names.sort();
        self.files = names;
        self.reffiles.clear();
        Ok(self.files.len())
    }

    /// Pairs each source file with a reference file for dual-file formats
    /// by swapping the extension. Every reference file must exist.
    pub fn pair_files(&mut self, ref_ext: &str) -> Result<()> {
        let mut refs = Vec::with_capacity(self.files.len());
        for name in &self.files {
            let mut path = PathBuf::from(name);
            path.set_extension(ref_ext);
            let refname = path.to_string_lossy().into_owned();
            ensure!(
                self.directory.join(&refname).is_file(),
                "reference file '{}' for '{}' not found",
                refname,
                name
            );
            refs.push(refname);
        }
        self.reffiles = refs;
        Ok(())
    }

    /// Creates `<indexdir>/<dbname>.<ext>` for the identifier tree and
    /// every configured field.
    pub fn open_caches(&mut self) -> Result<()> {
        ensure!(
            self.id_tree.is_none() && self.field_trees.is_empty(),
            "caches are already open"
        );
        ensure!(
            self.do_id || !self.fields.is_empty(),
            "no fields configured; call set_fields first"
        );

        if self.do_id {
            self.id_tree = Some(open_tree(
                &self.index_dir,
                &self.dbname,
                &self.id_field,
                &self.config,
            )?);
        }
        for field in &self.fields {
            self.field_trees
                .push(open_tree(&self.index_dir, &self.dbname, field, &self.config)?);
        }
        Ok(())
    }

    /// Flushes and closes every open index file.
    pub fn close_caches(&mut self) -> Result<()> {
        if let Some(open) = self.id_tree.take() {
            open.pager.close()?;
        }
        for open in self.field_trees.drain(..) {
            open.pager.close()?;
        }
        Ok(())
    }

    /// Registers the current record's identifier. The clipped form becomes
    /// the pending key for `index_entry` and the identifier that keyword
    /// fields associate their terms with.
    pub fn add_id(&mut self, id: &str) {
        let clipped = self.id_field.truncate(id);
        self.scratch.reset();
        self.scratch.key = clipped;
    }

    /// Queues one token for `field`, clipping it to the field's key length.
    pub fn add_token(&mut self, field: &str, token: &str) -> Result<()> {
        let def = self.field_mut(field)?;
        let clipped = def.truncate(token);
        def.pending.push(clipped);
        Ok(())
    }

    /// Indexes the pending identifier at the given record location.
    pub fn index_entry(&mut self, file_index: u32, pri_off: u64, sec_off: u64) -> Result<()> {
        ensure!(
            !self.scratch.key.is_empty(),
            "no identifier pending; call add_id first"
        );
        let Some(open) = self.id_tree.as_mut() else {
            bail!("identifier cache is not open");
        };

        self.scratch.file_index = file_index;
        self.scratch.pri_off = pri_off;
        self.scratch.sec_off = sec_off;
        open.tree.insert_id(
            &mut open.pager,
            &self.scratch.key,
            file_index,
            pri_off,
            sec_off,
        )
    }

    /// Drains the field's queued tokens into its tree. Keyword-like fields
    /// associate each term with the pending identifier; identifier-like
    /// fields store the record location directly.
    pub fn index_field(
        &mut self,
        name: &str,
        file_index: u32,
        pri_off: u64,
        sec_off: u64,
    ) -> Result<()> {
        let Some(idx) = self.fields.iter().position(|f| f.name() == name) else {
            bail!("field '{}' is not configured for this build", name);
        };
        let tokens = std::mem::take(&mut self.fields[idx].pending);
        let secondary = self.fields[idx].secondary;
        let Some(open) = self.field_trees.get_mut(idx) else {
            bail!("cache for field '{}' is not open", name);
        };

        if secondary {
            ensure!(
                !self.scratch.key.is_empty(),
                "no identifier pending for keyword field '{}'",
                name
            );
            for token in &tokens {
                open.tree
                    .insert_term(&mut open.pager, token, &self.scratch.key)?;
            }
        } else {
            for token in &tokens {
                open.tree
                    .insert_id(&mut open.pager, token, file_index, pri_off, sec_off)?;
            }
        }
        Ok(())
    }

    /// Writes `<dbname>.ent`: file count, release, date, then one line per
    /// file index (filename, or `filename refname` for paired formats).
    pub fn write_entry_file(&self) -> Result<()> {
        let path = self.index_dir.join(format!("{}.ent", self.dbname));
        let mut out = File::create(&path)
            .wrap_err_with(|| format!("cannot create entry file '{}'", path.display()))?;

        writeln!(out, "# Number of files: {}", self.files.len())?;
        writeln!(out, "# Release: {}", self.release)?;
        writeln!(out, "# Date: {}", self.date)?;
        for (i, name) in self.files.iter().enumerate() {
            match self.reffiles.get(i) {
                Some(refname) => writeln!(out, "{} {}", name, refname)?,
                None => writeln!(out, "{}", name)?,
            }
        }
        Ok(())
    }

    /// Writes one `<dbname>.<ext>.param` file per tree. The derivation is
    /// deterministic, but queries must reopen with the exact values the
    /// build used, so they are spelled out rather than re-derived.
    pub fn dump_parameters(&self) -> Result<()> {
        if self.do_id {
            write_param_file(&self.index_dir, &self.dbname, &self.id_field, &self.config)?;
        }
        for field in &self.fields {
            write_param_file(&self.index_dir, &self.dbname, field, &self.config)?;
        }
        Ok(())
    }

    /// Truncation summary for the identifier field.
    pub fn report_entry(&self) {
        report(&self.id_field);
    }

    /// Truncation summary for one configured field.
    pub fn report_field(&self, name: &str) -> Result<()> {
        let Some(def) = self.fields.iter().find(|f| f.name() == name) else {
            bail!("field '{}' is not configured for this build", name);
        };
        report(def);
        Ok(())
    }

    fn field_mut(&mut self, name: &str) -> Result<&mut FieldDef> {
        let Some(def) = self.fields.iter_mut().find(|f| f.name() == name) else {
            bail!("field '{}' is not configured for this build", name);
        };
        Ok(def)
    }
}

fn open_tree(
    index_dir: &Path,
    dbname: &str,
    def: &FieldDef,
    config: &RsConfig,
) -> Result<OpenTree> {
    let path = index_dir.join(format!("{}.{}", dbname, def.extension()));
    let layout = def.layout;
    let header = IndexFileHeader::new(
        layout.page_size as u32,
        layout.order as u32,
        layout.fill as u32,
        layout.key_width as u32,
        layout.sec_key_width as u32,
        config.cache_pages as u32,
        def.secondary,
    );
    let mut pager = Pager::create(&path, header, config.cache_pages)?;
    let tree = PrimaryTree::create(&mut pager, layout)?;
    Ok(OpenTree { pager, tree })
}

fn report(def: &FieldDef) {
    if def.truncated() > 0 {
        warn!(
            field = def.name(),
            truncated = def.truncated(),
            longest = def.max_len_seen(),
            offender = def.longest_seen(),
            "keys were truncated to the stored width"
        );
    } else {
        debug!(field = def.name(), "no keys truncated");
    }
}

/// Reopen parameters for one tree, as recorded by `dump_parameters`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeParams {
    pub page_size: usize,
    pub cache_pages: usize,
    pub order: usize,
    pub fill: usize,
    pub key_len: usize,
    pub sec_key_len: usize,
    pub secondary: bool,
}

fn write_param_file(
    index_dir: &Path,
    dbname: &str,
    def: &FieldDef,
    config: &RsConfig,
) -> Result<()> {
    let path = index_dir.join(format!("{}.{}.param", dbname, def.extension()));
    let mut out = File::create(&path)
        .wrap_err_with(|| format!("cannot create parameter file '{}'", path.display()))?;

    let layout = def.layout;
    writeln!(out, "PAGESIZE {}", layout.page_size)?;
    writeln!(out, "CACHESIZE {}", config.cache_pages)?;
    writeln!(out, "ORDER {}", layout.order)?;
    writeln!(out, "FILL {}", layout.fill)?;
    writeln!(out, "KEYLEN {}", layout.key_width)?;
    writeln!(out, "SECKEYLEN {}", layout.sec_key_width)?;
    writeln!(out, "SECONDARY {}", u8::from(def.secondary))?;
    Ok(())
}

/// Reads a `<dbname>.<ext>.param` file back. Every key must be present
/// and numeric; a damaged parameter file makes the tree unopenable.
pub fn read_parameters(index_dir: &Path, dbname: &str, ext: &str) -> Result<TreeParams> {
    let path = index_dir.join(format!("{}.{}.param", dbname, ext));
    let file = File::open(&path)
        .wrap_err_with(|| format!("cannot open parameter file '{}'", path.display()))?;

    let mut fields: [Option<usize>; 7] = [None; 7];
    const NAMES: [&str; 7] = [
        "PAGESIZE",
        "CACHESIZE",
        "ORDER",
        "FILL",
        "KEYLEN",
        "SECKEYLEN",
        "SECONDARY",
    ];

    for line in BufReader::new(file).lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Some((name, value)) = line.split_once(' ') else {
            bail!("malformed line '{}' in '{}'", line, path.display());
        };
        let Some(slot) = NAMES.iter().position(|n| *n == name) else {
            bail!("unknown parameter '{}' in '{}'", name, path.display());
        };
        fields[slot] = Some(value.trim().parse::<usize>().wrap_err_with(|| {
            format!("malformed {} value in '{}'", name, path.display())
        })?);
    }

    let get = |slot: usize| -> Result<usize> {
        fields[slot]
            .ok_or_else(|| eyre::eyre!("missing {} in '{}'", NAMES[slot], path.display()))
    };

    Ok(TreeParams {
        page_size: get(0)?,
        cache_pages: get(1)?,
        order: get(2)?,
        fill: get(3)?,
        key_len: get(4)?,
        sec_key_len: get(5)?,
        secondary: get(6)? != 0,
    })
}

/// Shell-style wildcard match: `*` spans any run, `?` any single byte.
fn wildcard_match(pattern: &str, name: &str) -> bool {
    let (pattern, name) = (pattern.as_bytes(), name.as_bytes());
    let (mut p, mut n) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while n < name.len() {
        if p < pattern.len() && (pattern[p] == b'?' || pattern[p] == name[n]) {
            p += 1;
            n += 1;
        } else if p < pattern.len() && pattern[p] == b'*' {
            star = Some((p, n));
            p += 1;
        } else if let Some((sp, sn)) = star {
            p = sp + 1;
            n = sn + 1;
            star = Some((sp, sn + 1));
        } else {
            return false;
        }
    }
    while p < pattern.len() && pattern[p] == b'*' {
        p += 1;
    }
    p == pattern.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn wildcard_match_covers_star_and_question() {
        assert!(wildcard_match("*.dat", "embl1.dat"));
        assert!(wildcard_match("embl?.dat", "embl1.dat"));
        assert!(!wildcard_match("embl?.dat", "embl10.dat"));
        assert!(wildcard_match("*", "anything"));
        assert!(wildcard_match("a*b*c", "aXXbYYc"));
        assert!(!wildcard_match("a*b*c", "aXXbYY"));
        assert!(!wildcard_match("*.dat", "embl1.ref"));
        assert!(wildcard_match("exact", "exact"));
    }

    fn touch(dir: &TempDir, name: &str) {
        fs::write(dir.path().join(name), b"x").unwrap();
    }

    fn discover_builder(dir: &TempDir) -> IndexBuilder {
        let mut builder = IndexBuilder::new("embl").unwrap();
        builder.set_db_info("embl", "57", "2026-08-30", "nucleotide", dir.path(), dir.path());
        builder
    }

    #[test]
    fn get_files_sorts_and_excludes() {
        let dir = TempDir::new().unwrap();
        touch(&dir, "b.dat");
        touch(&dir, "a.dat");
        touch(&dir, "c.dat");
        touch(&dir, "old.dat.bak");
        touch(&dir, "notes.txt");

        let mut builder = discover_builder(&dir);
        let count = builder.get_files("*.dat*", Some("*.bak")).unwrap();

        assert_eq!(count, 3);
        assert_eq!(builder.files(), ["a.dat", "b.dat", "c.dat"]);
    }

    #[test]
    fn get_files_zero_matches_is_fatal() {
        let dir = TempDir::new().unwrap();
        touch(&dir, "notes.txt");

        let mut builder = discover_builder(&dir);
        let result = builder.get_files("*.dat", None);

        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("no files"));
    }

    #[test]
    fn pair_files_requires_existing_references() {
        let dir = TempDir::new().unwrap();
        touch(&dir, "db1.seq");
        touch(&dir, "db1.ref");
        touch(&dir, "db2.seq");

        let mut builder = discover_builder(&dir);
        builder.get_files("*.seq", None).unwrap();

        // db2.ref is missing.
        assert!(builder.pair_files("ref").is_err());

        touch(&dir, "db2.ref");
        builder.pair_files("ref").unwrap();
        builder.write_entry_file().unwrap();

        let ent = fs::read_to_string(dir.path().join("embl.ent")).unwrap();
        assert!(ent.contains("db1.seq db1.ref"));
        assert!(ent.contains("db2.seq db2.ref"));
    }

    #[test]
    fn set_fields_rejects_unknown_and_duplicate() {
        let mut builder = IndexBuilder::new("embl").unwrap();
        assert!(builder.set_fields(&["id", "acc", "key"]).is_ok());
        assert!(builder.set_fields(&["acc"]).is_err());
        assert!(IndexBuilder::new("x")
            .unwrap()
            .set_fields(&["bogus"])
            .is_err());
    }

    #[test]
    fn parameters_round_trip() {
        let dir = TempDir::new().unwrap();
        let mut builder = discover_builder(&dir);
        builder.set_fields(&["id", "key"]).unwrap();
        builder.get_rs_info(&RsConfig::default()).unwrap();
        builder.dump_parameters().unwrap();

        let id = read_parameters(dir.path(), "embl", "xid").unwrap();
        assert_eq!(id.page_size, 2048);
        assert_eq!(id.key_len, 12);
        assert!(!id.secondary);
        assert_eq!(id.order, builder.id_field.layout.order);

        let kw = read_parameters(dir.path(), "embl", "xkw").unwrap();
        assert_eq!(kw.key_len, 15);
        assert!(kw.secondary);
    }

    #[test]
    fn read_parameters_rejects_damage() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("embl.xid.param"),
            "PAGESIZE 2048\nORDER kaboom\n",
        )
        .unwrap();

        assert!(read_parameters(dir.path(), "embl", "xid").is_err());
    }

    #[test]
    fn add_id_clips_multibyte_identifiers_bytewise() {
        let dir = TempDir::new().unwrap();
        let mut builder = discover_builder(&dir);
        builder.set_fields(&["id"]).unwrap();
        builder.get_rs_info(&RsConfig::default()).unwrap();
        builder.open_caches().unwrap();

        // 'é' is two bytes (0xC3 0xA9) and straddles the 12-byte clip
        // point; the stored key must be the raw first 12 bytes, not a
        // re-decoded string.
        let id = "ABCDEFGHIJK\u{e9}LMNOP";
        builder.add_id(id);
        assert_eq!(builder.scratch.key, &id.as_bytes()[..12]);
        builder.index_entry(1, 64, 0).unwrap();
        builder.close_caches().unwrap();

        let mut pager = Pager::open(dir.path().join("embl.xid"), 32).unwrap();
        let tree = PrimaryTree::open(&pager).unwrap();
        let entry = tree.search(&mut pager, &id.as_bytes()[..12]).unwrap().unwrap();
        assert_eq!(entry.key, id.as_bytes()[..12].to_vec());
        assert_eq!(entry.pri_off, 64);
    }

    #[test]
    fn index_entry_without_pending_id_fails() {
        let dir = TempDir::new().unwrap();
        let mut builder = discover_builder(&dir);
        builder.set_fields(&["id"]).unwrap();
        builder.get_rs_info(&RsConfig::default()).unwrap();
        builder.open_caches().unwrap();

        assert!(builder.index_entry(1, 0, 0).is_err());
        builder.close_caches().unwrap();
    }
}
