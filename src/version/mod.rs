// src/version/mod.rs

//! Content-addressable versions.
//!
//! - [`hash`] holds the blake3 primitives used for files and fields.
//! - [`calculator`] turns an action's own inputs plus its dependencies'
//!   versions into a deterministic [`Version`], memoizing per graph build.

pub mod calculator;
pub mod hash;

pub use calculator::{Version, VersionCalculator, compute_self_hash, compute_version};
pub use hash::compute_file_hash;
