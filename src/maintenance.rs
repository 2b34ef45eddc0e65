//! verify / repair / gc / reindex — maintenance operations over the
//! same persisted invariants every other module relies on.

use crate::embedding::codec;
use crate::embedding::provider::EmbeddingProvider;
use crate::error::{MaintenanceError, Result};
use crate::store::Store;
use std::path::Path;
use tracing::info;
use walkdir::WalkDir;

/// A chunk-shaped path looks like `.../NN.txt`; these are the only edge
/// endpoints verify/repair/gc can check for existence.
fn is_chunk_shaped(node: &str) -> bool {
    node.ends_with(".txt")
        && node
            .rsplit('/')
            .next()
            .map(|name| name.trim_end_matches(".txt").chars().all(|c| c.is_ascii_digit()))
            .unwrap_or(false)
}

fn chunk_exists(store: &Store, node: &str) -> bool {
    store.root.join(node).is_file()
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct VerifyReport {
    pub chunks_scanned: usize,
    pub embeddings_ok: usize,
    pub embeddings_corrupt: Vec<String>,
    pub orphan_edges: usize,
    pub stale_processed: usize,
}

impl VerifyReport {
    pub fn has_issues(&self) -> bool {
        !self.embeddings_corrupt.is_empty() || self.orphan_edges > 0 || self.stale_processed > 0
    }
}

pub fn verify(store: &Store) -> Result<VerifyReport> {
    let mut report = VerifyReport::default();

    report.chunks_scanned = WalkDir::new(&store.root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.path().extension().and_then(|x| x.to_str()) == Some("txt"))
        .count();

    for dir in domain_dirs(store)? {
        let manifest_path = dir.join(codec::MANIFEST_FILE);
        if !manifest_path.exists() {
            continue;
        }
        let manifest = codec::read_manifest(&dir)?;
        match codec::read(&dir) {
            Ok(file) if file.header.count as usize == manifest.len() => {
                report.embeddings_ok += 1;
            }
            Ok(file) => {
                report.embeddings_corrupt.push(format!(
                    "{}: header count {} != manifest rows {}",
                    dir.display(),
                    file.header.count,
                    manifest.len()
                ));
            }
            Err(e) => {
                report.embeddings_corrupt.push(format!("{}: {}", dir.display(), e));
            }
        }
    }

    let edges = store.read_edges()?;
    for edge in &edges {
        if is_chunk_shaped(&edge.source) && !chunk_exists(store, &edge.source) {
            report.orphan_edges += 1;
        }
    }

    let processed = store.read_processed()?;
    for record in &processed {
        if !Path::new(&record.source_path).exists() {
            report.stale_processed += 1;
        }
    }

    info!(
        chunks = report.chunks_scanned,
        orphans = report.orphan_edges,
        stale = report.stale_processed,
        "verify complete"
    );
    Ok(report)
}

/// Rewrite `.edges` omitting rows whose chunk-shaped source no longer
/// exists. Non-chunk-shaped sources are preserved unconditionally since
/// they are not verifiable against the filesystem. Does not touch `.processed`.
pub fn repair(store: &Store) -> Result<usize> {
    let edges = store.read_edges()?;
    let before = edges.len();
    let kept: Vec<_> = edges
        .into_iter()
        .filter(|e| !is_chunk_shaped(&e.source) || chunk_exists(store, &e.source))
        .collect();
    let removed = before - kept.len();
    store.write_edges(&kept)?;
    info!(removed, "repair rewrote edge log");
    Ok(removed)
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GcReport {
    pub edges_removed: usize,
    pub processed_removed: usize,
}

/// Like `repair`, plus drops `.processed` rows whose source file is gone.
pub fn gc(store: &Store) -> Result<GcReport> {
    let edges_removed = repair(store)?;

    let processed = store.read_processed()?;
    let before = processed.len();
    let kept: Vec<_> = processed
        .into_iter()
        .filter(|r| Path::new(&r.source_path).exists())
        .collect();
    let processed_removed = before - kept.len();
    rewrite_processed(store, &kept)?;

    info!(edges_removed, processed_removed, "gc complete");
    Ok(GcReport {
        edges_removed,
        processed_removed,
    })
}

fn rewrite_processed(store: &Store, records: &[crate::store::ProcessedRecord]) -> Result<()> {
    let mut body = String::from(crate::store::PROCESSED_HEADER);
    body.push('\n');
    for r in records {
        body.push_str(&format!(
            "{}\t{}\t{}\t{}\n",
            r.source_path, r.content_hash, r.domain, r.timestamp
        ));
    }
    crate::config::write_atomic(&store.processed_path(), body.as_bytes())?;
    Ok(())
}

fn domain_dirs(store: &Store) -> Result<Vec<std::path::PathBuf>> {
    let mut dirs = vec![store.root.clone()];
    if store.root.is_dir() {
        for entry in std::fs::read_dir(&store.root)? {
            let entry = entry?;
            let path = entry.path();
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
            if path.is_dir() && !name.starts_with('.') {
                dirs.push(path);
            }
        }
    }
    Ok(dirs)
}

fn collect_chunk_paths(dir: &Path, max_depth: usize) -> Vec<std::path::PathBuf> {
    WalkDir::new(dir)
        .max_depth(max_depth)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.path().extension().and_then(|x| x.to_str()) == Some("txt"))
        .filter(|e| {
            !e.path()
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("")
                .starts_with('_')
        })
        .map(|e| e.path().to_path_buf())
        .collect()
}

/// Group every chunk under `store.root` by the domain directory
/// `embed_document` would have written its embeddings into: the root
/// itself for flat-mode chunks (`root/<doc>/NN.txt`), or `root/<domain>`
/// for domain-scoped chunks (`root/<domain>/<doc>/NN.txt`). This keeps
/// each chunk's embedding in exactly one `embeddings.bin`, matching
/// incremental embedding instead of double-counting chunks that a
/// root walk and a per-subdirectory walk would otherwise both collect.
fn group_chunks_by_domain_dir(store: &Store) -> Result<Vec<(std::path::PathBuf, Vec<std::path::PathBuf>)>> {
    use std::collections::BTreeMap;
    let mut groups: BTreeMap<std::path::PathBuf, Vec<std::path::PathBuf>> = BTreeMap::new();

    for path in collect_chunk_paths(&store.root, 3) {
        let rel = match path.strip_prefix(&store.root) {
            Ok(r) => r,
            Err(_) => continue,
        };
        let components: Vec<_> = rel.iter().collect();
        let domain_dir = if components.len() == 3 {
            store.root.join(components[0])
        } else {
            store.root.clone()
        };
        groups.entry(domain_dir).or_default().push(path);
    }

    Ok(groups.into_iter().collect())
}

/// Delete and rebuild `embeddings.bin`/`manifest.tsv` for one domain (or
/// every domain when `domain` is `None`) by re-embedding every chunk.
pub async fn reindex(
    store: &Store,
    domain: Option<&str>,
    provider: &dyn EmbeddingProvider,
) -> Result<usize> {
    if provider.model_name() == "none" {
        return Err(MaintenanceError::NoProvider.into());
    }

    let groups: Vec<(std::path::PathBuf, Vec<std::path::PathBuf>)> = match domain {
        Some(d) if !d.is_empty() => {
            let dir = store.domain_dir(d);
            vec![(dir.clone(), collect_chunk_paths(&dir, 2))]
        }
        _ => group_chunks_by_domain_dir(store)?,
    };

    let mut total = 0usize;
    for (dir, chunk_paths) in groups {
        let bin = dir.join(codec::EMBEDDINGS_FILE);
        let manifest = dir.join(codec::MANIFEST_FILE);
        if bin.exists() {
            std::fs::remove_file(&bin)?;
        }
        if manifest.exists() {
            std::fs::remove_file(&manifest)?;
        }

        if chunk_paths.is_empty() {
            continue;
        }

        let texts: Vec<String> = chunk_paths
            .iter()
            .map(|p| std::fs::read_to_string(p).unwrap_or_default())
            .collect();
        let vectors = provider.embed(&texts).await?;
        let rel_paths: Vec<String> = chunk_paths
            .iter()
            .map(|p| store.relative_path(p))
            .collect::<Result<Vec<_>>>()?;

        codec::write(
            &dir,
            &vectors,
            &rel_paths,
            provider.model_name(),
            provider.dimensions(),
            false,
        )?;
        total += rel_paths.len();
    }
    info!(chunks_embedded = total, "reindex complete");
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::provider::{LocalEmbeddingProvider, NoneProvider};
    use crate::store::Edge;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn verify_flags_orphan_edges_and_stale_processed() {
        let dir = tempdir().unwrap();
        let store = Store::init(dir.path()).unwrap();
        store
            .append_edges(&[Edge::chunked_from("a/01.txt", "/missing/source.md")])
            .unwrap();
        fs::write(
            store.processed_path(),
            format!(
                "{}\n/missing/source.md\thash\t\t2024-01-01T00:00:00Z\n",
                crate::store::PROCESSED_HEADER
            ),
        )
        .unwrap();

        let report = verify(&store).unwrap();
        assert_eq!(report.orphan_edges, 1);
        assert_eq!(report.stale_processed, 1);
        assert!(report.has_issues());
    }

    #[test]
    fn repair_drops_orphans_preserves_others() {
        let dir = tempdir().unwrap();
        let store = Store::init(dir.path()).unwrap();
        let doc = store.root.join("a");
        fs::create_dir_all(&doc).unwrap();
        fs::write(doc.join("01.txt"), "content").unwrap();
        store
            .append_edges(&[
                Edge::chunked_from("a/01.txt", "/src/a.md"),
                Edge::chunked_from("a/02.txt", "/src/a.md"), // orphan: 02.txt absent
                Edge {
                    source: "/external/node".into(),
                    target: "a/01.txt".into(),
                    edge_type: "references".into(),
                    metadata: String::new(),
                },
            ])
            .unwrap();

        let removed = repair(&store).unwrap();
        assert_eq!(removed, 1);
        let edges = store.read_edges().unwrap();
        assert_eq!(edges.len(), 2);
        assert!(edges.iter().any(|e| e.source == "/external/node"));
    }

    #[test]
    fn gc_drops_orphans_and_stale_processed() {
        let dir = tempdir().unwrap();
        let store = Store::init(dir.path()).unwrap();
        store
            .append_edges(&[Edge::chunked_from("a/01.txt", "/missing.md")])
            .unwrap();
        fs::write(
            store.processed_path(),
            format!(
                "{}\n/missing.md\thash\t\t2024-01-01T00:00:00Z\n",
                crate::store::PROCESSED_HEADER
            ),
        )
        .unwrap();

        let report = gc(&store).unwrap();
        assert_eq!(report.edges_removed, 1);
        assert_eq!(report.processed_removed, 1);
        assert!(store.read_edges().unwrap().is_empty());
        assert!(store.read_processed().unwrap().is_empty());
    }

    #[tokio::test]
    async fn reindex_requires_non_none_provider() {
        let dir = tempdir().unwrap();
        let store = Store::init(dir.path()).unwrap();
        let provider = NoneProvider;
        let err = reindex(&store, None, &provider).await.unwrap_err();
        assert_eq!(err.kind(), "maintenance_error");
    }

    #[tokio::test]
    async fn reindex_rebuilds_embeddings_for_all_chunks() {
        let dir = tempdir().unwrap();
        let store = Store::init(dir.path()).unwrap();
        let doc = store.root.join("a");
        fs::create_dir_all(&doc).unwrap();
        fs::write(doc.join("01.txt"), "hello").unwrap();
        fs::write(doc.join("02.txt"), "world").unwrap();

        let provider = LocalEmbeddingProvider::new(8);
        let count = reindex(&store, None, &provider).await.unwrap();
        assert_eq!(count, 2);
        let file = codec::read(&store.root).unwrap();
        assert_eq!(file.header.count, 2);
    }
}
