//! Binary embeddings format: a fixed 32-byte header followed by
//! row-major `count * dim` float32 vectors, plus a companion TSV
//! manifest enumerating chunk paths in the same order. Bit-exact and
//! mmap-friendly (fixed header, homogeneous payload, O(1) random
//! access).

use crate::compat::content_hash_of_bytes;
use crate::config::write_atomic;
use crate::error::{EmbeddingError, Result};
use memmap2::Mmap;
use std::fs::{self, File};
use std::io::Read;
use std::path::Path;
use tracing::debug;

pub const MAGIC: u32 = 0x52414744; // "RAGD" little-endian word
pub const FORMAT_VERSION: u32 = 1;
pub const HEADER_LEN: usize = 32;

pub const EMBEDDINGS_FILE: &str = "embeddings.bin";
pub const MANIFEST_FILE: &str = "manifest.tsv";

/// Parsed embeddings header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub version: u32,
    pub dimensions: u32,
    pub count: u32,
    pub model_hash: [u8; 8],
}

impl Header {
    fn encode(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[0..4].copy_from_slice(&MAGIC.to_le_bytes());
        buf[4..8].copy_from_slice(&self.version.to_le_bytes());
        buf[8..12].copy_from_slice(&self.dimensions.to_le_bytes());
        buf[12..16].copy_from_slice(&self.count.to_le_bytes());
        buf[16..24].copy_from_slice(&self.model_hash);
        // 24..32 reserved, zero
        buf
    }

    fn decode(buf: &[u8]) -> Result<Header> {
        if buf.len() < HEADER_LEN {
            return Err(EmbeddingError::CorruptEmbeddings("header truncated".into()).into());
        }
        let magic = u32::from_le_bytes(buf[0..4].try_into().unwrap());
        if magic != MAGIC {
            return Err(EmbeddingError::CorruptEmbeddings(format!(
                "bad magic: 0x{magic:08x}"
            ))
            .into());
        }
        let version = u32::from_le_bytes(buf[4..8].try_into().unwrap());
        if version != FORMAT_VERSION {
            return Err(EmbeddingError::CorruptEmbeddings(format!(
                "unsupported version {version}"
            ))
            .into());
        }
        let dimensions = u32::from_le_bytes(buf[8..12].try_into().unwrap());
        let count = u32::from_le_bytes(buf[12..16].try_into().unwrap());
        let mut model_hash = [0u8; 8];
        model_hash.copy_from_slice(&buf[16..24]);
        Ok(Header {
            version,
            dimensions,
            count,
            model_hash,
        })
    }
}

fn model_hash(model_id: &str) -> [u8; 8] {
    let full = content_hash_of_bytes(model_id.as_bytes());
    let bytes = hex::decode(&full[..16]).unwrap_or_default();
    let mut out = [0u8; 8];
    out.copy_from_slice(&bytes[..8.min(bytes.len())]);
    out
}

/// A decoded domain embeddings file: header + vectors + manifest rows.
#[derive(Debug, Clone)]
pub struct EmbeddingFile {
    pub header: Header,
    pub vectors: Vec<Vec<f32>>,
    pub manifest: Vec<String>,
}

/// Write (or append to) the `embeddings.bin`/`manifest.tsv` pair in `dir`.
///
/// `append`: if true and a valid file with matching magic/version/
/// dimensions/model exists, incoming chunk paths already present replace
/// their existing vector in place; new ones are appended. Otherwise a
/// fresh file is written from scratch.
pub fn write(
    dir: &Path,
    vectors: &[Vec<f32>],
    chunk_paths: &[String],
    model_id: &str,
    dimensions: usize,
    append: bool,
) -> Result<()> {
    assert_eq!(vectors.len(), chunk_paths.len());
    let bin_path = dir.join(EMBEDDINGS_FILE);
    let manifest_path = dir.join(MANIFEST_FILE);
    let hash = model_hash(model_id);

    let existing = if append { try_read(dir).ok() } else { None };

    let (mut all_vectors, mut all_manifest) = match &existing {
        Some(file)
            if file.header.dimensions as usize == dimensions
                && file.header.model_hash == hash =>
        {
            (file.vectors.clone(), file.manifest.clone())
        }
        _ => (Vec::new(), Vec::new()),
    };

    for (path, vector) in chunk_paths.iter().zip(vectors.iter()) {
        if let Some(pos) = all_manifest.iter().position(|p| p == path) {
            all_vectors[pos] = vector.clone();
        } else {
            all_manifest.push(path.clone());
            all_vectors.push(vector.clone());
        }
    }

    let header = Header {
        version: FORMAT_VERSION,
        dimensions: dimensions as u32,
        count: all_vectors.len() as u32,
        model_hash: hash,
    };

    let mut payload = Vec::with_capacity(HEADER_LEN + all_vectors.len() * dimensions * 4);
    payload.extend_from_slice(&header.encode());
    for v in &all_vectors {
        for f in v {
            payload.extend_from_slice(&f.to_le_bytes());
        }
    }
    write_atomic(&bin_path, &payload)?;

    let manifest_body: String = all_manifest
        .iter()
        .map(|p| format!("{p}\n"))
        .collect();
    write_atomic(&manifest_path, manifest_body.as_bytes())?;

    debug!(dir = %dir.display(), count = all_vectors.len(), "wrote embeddings");
    Ok(())
}

/// Read an embeddings file plus its manifest fully into memory.
pub fn read(dir: &Path) -> Result<EmbeddingFile> {
    try_read(dir)
}

fn try_read(dir: &Path) -> Result<EmbeddingFile> {
    let bin_path = dir.join(EMBEDDINGS_FILE);
    let mut file = File::open(&bin_path)?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf)?;
    let header = Header::decode(&buf)?;

    let dim = header.dimensions as usize;
    let count = header.count as usize;
    let expected_len = HEADER_LEN + count * dim * 4;
    if buf.len() < expected_len {
        return Err(EmbeddingError::CorruptEmbeddings(format!(
            "payload too short: expected {expected_len} bytes, got {}",
            buf.len()
        ))
        .into());
    }

    let mut vectors = Vec::with_capacity(count);
    let mut offset = HEADER_LEN;
    for _ in 0..count {
        let mut v = Vec::with_capacity(dim);
        for _ in 0..dim {
            let f = f32::from_le_bytes(buf[offset..offset + 4].try_into().unwrap());
            v.push(f);
            offset += 4;
        }
        vectors.push(v);
    }

    let manifest = read_manifest(dir)?;
    if manifest.len() != count {
        return Err(EmbeddingError::CorruptEmbeddings(format!(
            "manifest has {} rows, header declares {count} vectors",
            manifest.len()
        ))
        .into());
    }

    Ok(EmbeddingFile {
        header,
        vectors,
        manifest,
    })
}

/// Memory-map the binary file and copy out vectors without reading the
/// whole file into a growable buffer up front (useful for large domains).
pub fn mmap_read(dir: &Path) -> Result<EmbeddingFile> {
    let bin_path = dir.join(EMBEDDINGS_FILE);
    let file = File::open(&bin_path)?;
    let mmap = unsafe { Mmap::map(&file)? };
    let header = Header::decode(&mmap)?;
    let dim = header.dimensions as usize;
    let count = header.count as usize;
    let expected_len = HEADER_LEN + count * dim * 4;
    if mmap.len() < expected_len {
        return Err(EmbeddingError::CorruptEmbeddings("payload shorter than header declares".into()).into());
    }
    let mut vectors = Vec::with_capacity(count);
    let mut offset = HEADER_LEN;
    for _ in 0..count {
        let mut v = Vec::with_capacity(dim);
        for _ in 0..dim {
            let f = f32::from_le_bytes(mmap[offset..offset + 4].try_into().unwrap());
            v.push(f);
            offset += 4;
        }
        vectors.push(v);
    }
    let manifest = read_manifest(dir)?;
    Ok(EmbeddingFile {
        header,
        vectors,
        manifest,
    })
}

/// Load just the ordered chunk-path manifest, without the vector payload.
pub fn read_manifest(dir: &Path) -> Result<Vec<String>> {
    let path = dir.join(MANIFEST_FILE);
    if !path.exists() {
        return Ok(Vec::new());
    }
    let text = fs::read_to_string(path)?;
    Ok(text
        .lines()
        .map(|l| l.split('\t').next().unwrap_or("").to_string())
        .filter(|l| !l.is_empty())
        .collect())
}

mod hex {
    pub fn decode(s: &str) -> Option<Vec<u8>> {
        if s.len() % 2 != 0 {
            return None;
        }
        (0..s.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn roundtrip_write_read_preserves_vectors_and_order() {
        let dir = tempdir().unwrap();
        let vectors = vec![vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]];
        let paths = vec!["a/01.txt".to_string(), "a/02.txt".to_string()];
        write(dir.path(), &vectors, &paths, "model-x", 3, false).unwrap();

        let file = read(dir.path()).unwrap();
        assert_eq!(file.header.count, 2);
        assert_eq!(file.header.dimensions, 3);
        assert_eq!(file.vectors, vectors);
        assert_eq!(file.manifest, paths);
    }

    #[test]
    fn header_magic_and_version_are_bit_exact() {
        let dir = tempdir().unwrap();
        write(dir.path(), &[vec![0.0]], &["x".to_string()], "m", 1, false).unwrap();
        let bytes = fs::read(dir.path().join(EMBEDDINGS_FILE)).unwrap();
        let magic = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
        assert_eq!(magic, MAGIC);
        let version = u32::from_le_bytes(bytes[4..8].try_into().unwrap());
        assert_eq!(version, FORMAT_VERSION);
    }

    #[test]
    fn append_replaces_existing_row_and_appends_new() {
        let dir = tempdir().unwrap();
        write(
            dir.path(),
            &[vec![1.0, 1.0], vec![2.0, 2.0]],
            &["a".to_string(), "b".to_string()],
            "model",
            2,
            false,
        )
        .unwrap();
        write(
            dir.path(),
            &[vec![9.0, 9.0], vec![3.0, 3.0]],
            &["a".to_string(), "c".to_string()],
            "model",
            2,
            true,
        )
        .unwrap();
        let file = read(dir.path()).unwrap();
        assert_eq!(file.manifest, vec!["a", "b", "c"]);
        assert_eq!(file.vectors[0], vec![9.0, 9.0]);
        assert_eq!(file.vectors[1], vec![2.0, 2.0]);
        assert_eq!(file.vectors[2], vec![3.0, 3.0]);
    }

    #[test]
    fn append_with_model_mismatch_starts_fresh() {
        let dir = tempdir().unwrap();
        write(dir.path(), &[vec![1.0]], &["a".to_string()], "model-a", 1, false).unwrap();
        write(dir.path(), &[vec![2.0]], &["b".to_string()], "model-b", 1, true).unwrap();
        let file = read(dir.path()).unwrap();
        assert_eq!(file.manifest, vec!["b"]);
    }

    #[test]
    fn invalid_magic_is_corrupt() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(EMBEDDINGS_FILE), vec![0u8; 40]).unwrap();
        fs::write(dir.path().join(MANIFEST_FILE), "a\n").unwrap();
        let err = read(dir.path()).unwrap_err();
        assert_eq!(err.kind(), "corrupt_embeddings");
    }

    #[test]
    fn manifest_count_mismatch_is_corrupt() {
        let dir = tempdir().unwrap();
        write(dir.path(), &[vec![1.0], vec![2.0]], &["a".to_string(), "b".to_string()], "m", 1, false).unwrap();
        fs::write(dir.path().join(MANIFEST_FILE), "a\n").unwrap();
        let err = read(dir.path()).unwrap_err();
        assert_eq!(err.kind(), "corrupt_embeddings");
    }

    #[test]
    fn mmap_read_matches_plain_read() {
        let dir = tempdir().unwrap();
        write(
            dir.path(),
            &[vec![1.0, 2.0], vec![3.0, 4.0]],
            &["a".to_string(), "b".to_string()],
            "m",
            2,
            false,
        )
        .unwrap();
        let plain = read(dir.path()).unwrap();
        let mapped = mmap_read(dir.path()).unwrap();
        assert_eq!(plain.vectors, mapped.vectors);
        assert_eq!(plain.manifest, mapped.manifest);
    }

    proptest::proptest! {
        #[test]
        fn roundtrip_is_bit_identical_and_order_preserving(
            rows in proptest::collection::vec(
                proptest::collection::vec(-1000.0f32..1000.0, 4),
                1..12,
            )
        ) {
            let dir = tempdir().unwrap();
            let paths: Vec<String> = (0..rows.len()).map(|i| format!("d/{:02}.txt", i)).collect();
            write(dir.path(), &rows, &paths, "m", 4, false).unwrap();
            let file = read(dir.path()).unwrap();
            proptest::prop_assert_eq!(&file.vectors, &rows);
            proptest::prop_assert_eq!(&file.manifest, &paths);
        }
    }
}
