//! Small, dependency-light primitives shared by every other module:
//! sanitization, content hashing, token estimation, store discovery and
//! timestamp formatting.

use crate::error::{ConfigError, RagdagError, Result};
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// Name of the on-disk store directory.
pub const STORE_DIR: &str = ".ragdag";

/// Longest subsequence of `[a-z0-9._-]` in `input`, after lowercasing.
///
/// Used for domain names and document stems so they are always valid
/// path components across platforms.
pub fn sanitize(input: &str) -> String {
    input
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        .collect()
}

/// SHA-256 of a file's raw bytes, lowercase hex.
pub fn content_hash_of_file(path: &Path) -> Result<String> {
    use std::io::Read;
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex_lower(&hasher.finalize()))
}

/// SHA-256 of an in-memory byte slice, lowercase hex.
pub fn content_hash_of_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex_lower(&hasher.finalize())
}

fn hex_lower(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        s.push_str(&format!("{:02x}", b));
    }
    s
}

/// Integer token estimate: `words * 13 / 10`. Deliberately crude — used
/// only for context-budget accounting, never for billing.
pub fn estimate_tokens(text: &str) -> usize {
    let words = text.split_whitespace().count();
    words * 13 / 10
}

/// Walk `start` and its ancestors looking for a `.ragdag` child directory.
pub fn find_store(start: &Path) -> Result<PathBuf> {
    let mut dir = if start.is_absolute() {
        start.to_path_buf()
    } else {
        std::env::current_dir()?.join(start)
    };
    loop {
        let candidate = dir.join(STORE_DIR);
        if candidate.is_dir() {
            return Ok(candidate);
        }
        if !dir.pop() {
            return Err(RagdagError::Config(ConfigError::NotAStore(format!(
                "no {} found above {}",
                STORE_DIR,
                start.display()
            ))));
        }
    }
}

/// Current time as `YYYY-MM-DDThh:mm:ssZ`.
pub fn iso_timestamp() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}
