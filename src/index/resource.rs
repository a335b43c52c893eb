//! # Resource Configuration
//!
//! `RsConfig` resolves the tunable build parameters: page size, cache
//! capacity, the identifier key length, and optional per-field key-length
//! overrides. Defaults come from `crate::config`; the environment can
//! override the three scalars:
//!
//! ```text
//! FLATIDX_PAGESIZE    page size in bytes
//! FLATIDX_CACHESIZE   cache capacity in pages
//! FLATIDX_IDLEN       stored identifier key length
//! ```
//!
//! A variable that is present but unparsable is a configuration error and
//! aborts the build; silently falling back to a default would bake the
//! wrong geometry into the index files.

use std::env;

use eyre::{Result, WrapErr};
use hashbrown::HashMap;

use crate::config::{DEFAULT_CACHE_PAGES, DEFAULT_ID_KEYLEN, DEFAULT_PAGE_SIZE};

pub const ENV_PAGESIZE: &str = "FLATIDX_PAGESIZE";
pub const ENV_CACHESIZE: &str = "FLATIDX_CACHESIZE";
pub const ENV_IDLEN: &str = "FLATIDX_IDLEN";

#[derive(Debug, Clone)]
pub struct RsConfig {
    pub page_size: usize,
    pub cache_pages: usize,
    pub id_len: usize,
    field_lens: HashMap<String, usize>,
}

impl Default for RsConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            cache_pages: DEFAULT_CACHE_PAGES,
            id_len: DEFAULT_ID_KEYLEN,
            field_lens: HashMap::new(),
        }
    }
}

impl RsConfig {
    /// Defaults with environment overrides applied.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    pub fn apply_env(&mut self) -> Result<()> {
        if let Some(v) = read_env(ENV_PAGESIZE)? {
            self.page_size = v;
        }
        if let Some(v) = read_env(ENV_CACHESIZE)? {
            self.cache_pages = v;
        }
        if let Some(v) = read_env(ENV_IDLEN)? {
            self.id_len = v;
        }
        Ok(())
    }

    /// Overrides the stored key length for one field.
    pub fn set_field_len(&mut self, field: &str, len: usize) {
        self.field_lens.insert(field.to_owned(), len);
    }

    pub fn field_len(&self, field: &str) -> Option<usize> {
        self.field_lens.get(field).copied()
    }
}

fn read_env(name: &str) -> Result<Option<usize>> {
    match env::var(name) {
        Ok(raw) => {
            let value = raw
                .trim()
                .parse::<usize>()
                .wrap_err_with(|| format!("malformed {} value '{}'", name, raw))?;
            Ok(Some(value))
        }
        Err(env::VarError::NotPresent) => Ok(None),
        Err(e) => Err(e).wrap_err_with(|| format!("cannot read {}", name)),
    }
}
