// src/version/hash.rs

//! Content hashing primitives (blake3).

use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use blake3::Hasher;

use crate::fs::FileSystem;

/// Compute the hash of a single file's contents.
pub fn compute_file_hash(fs: &dyn FileSystem, path: &Path) -> Result<String> {
    let mut hasher = Hasher::new();
    let mut file = fs
        .open_read(path)
        .with_context(|| format!("opening file for hashing: {:?}", path))?;
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().to_hex().to_string())
}

/// Feed a tagged, length-prefixed field into `hasher`.
///
/// Length prefixes keep `("ab", "c")` and `("a", "bc")` from colliding.
pub(crate) fn update_field(hasher: &mut Hasher, tag: &str, value: &str) {
    hasher.update(tag.as_bytes());
    hasher.update(&[0]);
    hasher.update(&(value.len() as u64).to_le_bytes());
    hasher.update(value.as_bytes());
}
