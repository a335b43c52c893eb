//! # Index Module
//!
//! The caller-facing layer: field configuration, resource parameters, and
//! the [`IndexBuilder`] façade that format-specific front ends drive once
//! per record. Everything below (trees, buckets, pages) is reached only
//! through the builder during a normal build.

mod builder;
mod field;
mod resource;

pub use builder::{read_parameters, IndexBuilder, TreeParams};
pub use field::FieldDef;
pub use resource::{RsConfig, ENV_CACHESIZE, ENV_IDLEN, ENV_PAGESIZE};
