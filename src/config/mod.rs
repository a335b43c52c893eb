//! Build-time configuration constants for the index engine.
//!
//! Everything in [`constants`] is re-exported here; import from
//! `crate::config` rather than redefining values locally.

mod constants;

pub use constants::*;
