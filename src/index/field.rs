//! # Field Definitions
//!
//! A field definition ties an indexable field name to its index file
//! extension, stored key length, and kind (identifier-like or
//! keyword-like). It also accumulates the per-field truncation statistics
//! that become the end-of-build report, and holds the pending token list
//! that `index_field` drains once per record.
//!
//! The supported field set is fixed. `"id"` is special: it names the
//! identifier index itself rather than an additional field.

use eyre::{bail, Result};

use crate::btree::TreeLayout;
use crate::config::{DEFAULT_ID_KEYLEN, DEFAULT_KEYLEN, DEFAULT_PAGE_SIZE};

/// (name, index file extension, default key length, keyword-like)
const KNOWN_FIELDS: &[(&str, &str, usize, bool)] = &[
    ("id", "xid", DEFAULT_ID_KEYLEN, false),
    ("acc", "xac", DEFAULT_KEYLEN, false),
    ("sv", "xsv", DEFAULT_KEYLEN, false),
    ("gi", "xgi", DEFAULT_KEYLEN, false),
    ("des", "xde", DEFAULT_KEYLEN, true),
    ("key", "xkw", DEFAULT_KEYLEN, true),
    ("org", "xtx", DEFAULT_KEYLEN, true),
];

#[derive(Debug, Clone)]
pub struct FieldDef {
    name: String,
    extension: String,
    pub key_len: usize,
    pub secondary: bool,
    pub layout: TreeLayout,
    /// Tokens queued by `add_token`, drained by `index_field`.
    pub pending: Vec<Vec<u8>>,
    truncated: u64,
    max_len_seen: usize,
    longest_seen: String,
}

impl FieldDef {
    /// Looks a field up in the supported set. Unknown names abort the
    /// build before any index file is created.
    pub fn known(name: &str) -> Result<Self> {
        let Some(&(_, extension, key_len, secondary)) =
            KNOWN_FIELDS.iter().find(|(n, ..)| *n == name)
        else {
            bail!("unknown index field '{}'", name);
        };

        Ok(Self {
            name: name.to_owned(),
            extension: extension.to_owned(),
            key_len,
            secondary,
            layout: TreeLayout::derive(DEFAULT_PAGE_SIZE, key_len, DEFAULT_ID_KEYLEN)?,
            pending: Vec::new(),
            truncated: 0,
            max_len_seen: 0,
            longest_seen: String::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// Clips a token to the stored key length, counting the truncation and
    /// remembering the longest original seen among clipped tokens. Never
    /// fails: oversized tokens must not abort a build.
    pub fn truncate(&mut self, token: &str) -> Vec<u8> {
        let bytes = token.as_bytes();
        if bytes.len() > self.key_len {
            self.truncated += 1;
            if bytes.len() > self.max_len_seen {
                self.max_len_seen = bytes.len();
                self.longest_seen = token.to_owned();
            }
            bytes[..self.key_len].to_vec()
        } else {
            bytes.to_vec()
        }
    }

    pub fn truncated(&self) -> u64 {
        self.truncated
    }

    pub fn longest_seen(&self) -> &str {
        &self.longest_seen
    }

    pub fn max_len_seen(&self) -> usize {
        self.max_len_seen
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_fields_resolve() {
        let acc = FieldDef::known("acc").unwrap();
        assert_eq!(acc.extension(), "xac");
        assert_eq!(acc.key_len, DEFAULT_KEYLEN);
        assert!(!acc.secondary);

        let kw = FieldDef::known("key").unwrap();
        assert_eq!(kw.extension(), "xkw");
        assert!(kw.secondary);

        let id = FieldDef::known("id").unwrap();
        assert_eq!(id.extension(), "xid");
        assert_eq!(id.key_len, DEFAULT_ID_KEYLEN);
    }

    #[test]
    fn unknown_field_is_fatal() {
        let result = FieldDef::known("smiles");
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("unknown index field"));
    }

    #[test]
    fn truncate_counts_and_remembers_worst_offender() {
        let mut def = FieldDef::known("id").unwrap();
        def.key_len = 12;

        assert_eq!(def.truncate("SHORT"), b"SHORT".to_vec());
        assert_eq!(def.truncated(), 0);

        let long = "X".repeat(40);
        assert_eq!(def.truncate(&long), long.as_bytes()[..12].to_vec());
        def.truncate("THIRTEENCHARS");

        assert_eq!(def.truncated(), 2);
        assert_eq!(def.max_len_seen(), 40);
        assert_eq!(def.longest_seen(), long);
    }
}
