//! Graph operations over the append-only edge log: summary counts,
//! neighbor lookup, provenance trace, semantic relate, and manual link.

use crate::embedding::codec;
use crate::error::Result;
use crate::similarity::cosine_similarity;
use crate::store::{Edge, Store};
use std::collections::{HashMap, HashSet};
use tracing::info;
use walkdir::WalkDir;

/// Per-edge-type and aggregate counts for a store (or one domain).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GraphSummary {
    pub domains: usize,
    pub documents: usize,
    pub chunks: usize,
    pub edges: usize,
    pub edges_by_type: HashMap<String, usize>,
}

/// `graph(domain?)`. The domain filter is honored for the edge count
/// (edges whose source or target mentions the domain) but the
/// directory-count loop scans every first-level directory
/// unconditionally, matching the documented counting behavior rather
/// than silently changing semantics.
pub fn summary(store: &Store, domain: Option<&str>) -> Result<GraphSummary> {
    let mut out = GraphSummary::default();
    if store.root.is_dir() {
        for entry in std::fs::read_dir(&store.root)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
            if name.starts_with('.') {
                continue;
            }
            out.domains += 1;
            for doc_entry in std::fs::read_dir(&path)? {
                let doc_entry = doc_entry?;
                if doc_entry.path().is_dir() {
                    out.documents += 1;
                }
            }
        }
        out.chunks = WalkDir::new(&store.root)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter(|e| e.path().extension().and_then(|x| x.to_str()) == Some("txt"))
            .count();
    }

    let edges = store.read_edges()?;
    let scoped: Vec<&Edge> = match domain {
        Some(d) if !d.is_empty() => edges
            .iter()
            .filter(|e| e.source.starts_with(&format!("{d}/")) || e.target.starts_with(&format!("{d}/")))
            .collect(),
        _ => edges.iter().collect(),
    };
    out.edges = scoped.len();
    for e in scoped {
        *out.edges_by_type.entry(e.edge_type.clone()).or_insert(0) += 1;
    }
    Ok(out)
}

/// One endpoint of a `neighbors` result: the other node, edge type,
/// metadata, and direction arrow ("→" outgoing, "←" incoming).
#[derive(Debug, Clone, PartialEq)]
pub struct Neighbor {
    pub node: String,
    pub edge_type: String,
    pub metadata: String,
    pub direction: &'static str,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Neighbors {
    pub outgoing: Vec<Neighbor>,
    pub incoming: Vec<Neighbor>,
}

/// Scan `.edges` for rows touching `node`.
pub fn neighbors(store: &Store, node: &str) -> Result<Neighbors> {
    let edges = store.read_edges()?;
    let mut out = Neighbors::default();
    for e in edges {
        if e.source == node {
            out.outgoing.push(Neighbor {
                node: e.target,
                edge_type: e.edge_type,
                metadata: e.metadata,
                direction: "\u{2192}",
            });
        }
        if e.target == node {
            out.incoming.push(Neighbor {
                node: e.source,
                edge_type: e.edge_type,
                metadata: e.metadata,
                direction: "\u{2190}",
            });
        }
    }
    Ok(out)
}

const TRACE_DEPTH_CAP: usize = 20;

/// A single hop in a provenance trace; `None` target marks the origin.
#[derive(Debug, Clone, PartialEq)]
pub struct TraceHop {
    pub node: String,
    pub parent: Option<String>,
}

/// Walk backward through `chunked_from`/`derived_via` edges from `node`,
/// stopping at a revisit, a missing parent, or after 20 hops.
pub fn trace(store: &Store, node: &str) -> Result<Vec<TraceHop>> {
    let edges = store.read_edges()?;
    let parent_of: HashMap<&str, (&str, &str)> = edges
        .iter()
        .filter(|e| e.edge_type == "chunked_from" || e.edge_type == "derived_via")
        .map(|e| (e.source.as_str(), (e.target.as_str(), e.edge_type.as_str())))
        .collect();

    let mut hops = Vec::new();
    let mut visited = HashSet::new();
    let mut current = node.to_string();
    visited.insert(current.clone());

    loop {
        if hops.len() >= TRACE_DEPTH_CAP {
            break;
        }
        match parent_of.get(current.as_str()) {
            Some((parent, _kind)) => {
                hops.push(TraceHop {
                    node: current.clone(),
                    parent: Some(parent.to_string()),
                });
                if visited.contains(*parent) {
                    hops.push(TraceHop {
                        node: parent.to_string(),
                        parent: None,
                    });
                    break;
                }
                visited.insert(parent.to_string());
                current = parent.to_string();
            }
            None => {
                hops.push(TraceHop {
                    node: current.clone(),
                    parent: None,
                });
                break;
            }
        }
    }
    Ok(hops)
}

/// For each pair of chunks in scope whose embeddings are present, add a
/// `related_to` edge when cosine similarity is at or above `threshold`
/// and no such edge already exists in either direction. No-op (not an
/// error) when embeddings are absent.
pub fn relate(store: &Store, domain: Option<&str>, threshold: f32) -> Result<usize> {
    let dirs: Vec<std::path::PathBuf> = match domain {
        Some(d) if !d.is_empty() => vec![store.domain_dir(d)],
        _ => {
            // Mirrors `similarity::list_domain_dirs`: flat-mode embeddings
            // live in `store.root` itself, so it must be in scope too.
            let mut dirs = vec![store.root.clone()];
            for entry in std::fs::read_dir(&store.root)? {
                let entry = entry?;
                let path = entry.path();
                if path.is_dir() {
                    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
                    if !name.starts_with('.') {
                        dirs.push(path);
                    }
                }
            }
            dirs
        }
    };

    let mut paths = Vec::new();
    let mut vectors = Vec::new();
    for dir in dirs {
        if !dir.join(codec::EMBEDDINGS_FILE).exists() {
            continue;
        }
        let file = codec::read(&dir)?;
        paths.extend(file.manifest);
        vectors.extend(file.vectors);
    }

    if vectors.is_empty() {
        return Ok(0);
    }

    let existing_edges = store.read_edges()?;
    let mut existing_pairs: HashSet<(String, String)> = HashSet::new();
    for e in &existing_edges {
        if e.edge_type == "related_to" {
            existing_pairs.insert((e.source.clone(), e.target.clone()));
            existing_pairs.insert((e.target.clone(), e.source.clone()));
        }
    }

    let mut new_edges = Vec::new();
    for i in 0..paths.len() {
        let scores = cosine_similarity(&vectors[i], &vectors[i + 1..]);
        for (offset, score) in scores.into_iter().enumerate() {
            let j = i + 1 + offset;
            if score >= threshold && !existing_pairs.contains(&(paths[i].clone(), paths[j].clone())) {
                new_edges.push(Edge {
                    source: paths[i].clone(),
                    target: paths[j].clone(),
                    edge_type: "related_to".to_string(),
                    metadata: format!("score={score:.4}"),
                });
                existing_pairs.insert((paths[i].clone(), paths[j].clone()));
                existing_pairs.insert((paths[j].clone(), paths[i].clone()));
            }
        }
    }

    let added = new_edges.len();
    if added > 0 {
        store.append_edges(&new_edges)?;
        info!(added, "relate added edges");
    }
    Ok(added)
}

/// Append a single trusted edge; no existence check on either endpoint.
pub fn link(store: &Store, source: &str, target: &str, edge_type: Option<&str>) -> Result<()> {
    let edge = Edge {
        source: source.to_string(),
        target: target.to_string(),
        edge_type: edge_type.unwrap_or("references").to_string(),
        metadata: String::new(),
    };
    store.append_edges(&[edge])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::codec as ecodec;
    use crate::store::Store;
    use tempfile::tempdir;

    #[test]
    fn empty_store_yields_zero_summary() {
        let dir = tempdir().unwrap();
        let store = Store::init(dir.path()).unwrap();
        let summary = summary(&store, None).unwrap();
        assert_eq!(summary.domains, 0);
        assert_eq!(summary.documents, 0);
        assert_eq!(summary.chunks, 0);
        assert_eq!(summary.edges, 0);
    }

    #[test]
    fn summary_counts_domains_docs_chunks_edges() {
        let dir = tempdir().unwrap();
        let store = Store::init(dir.path()).unwrap();
        let doc = store.root.join("finance/report");
        std::fs::create_dir_all(&doc).unwrap();
        std::fs::write(doc.join("01.txt"), "x").unwrap();
        store
            .append_edges(&[Edge::chunked_from("finance/report/01.txt", "/src/report.md")])
            .unwrap();

        let summary = summary(&store, None).unwrap();
        assert_eq!(summary.domains, 1);
        assert_eq!(summary.documents, 1);
        assert_eq!(summary.chunks, 1);
        assert_eq!(summary.edges, 1);
        assert_eq!(summary.edges_by_type.get("chunked_from"), Some(&1));
    }

    #[test]
    fn neighbors_splits_outgoing_incoming() {
        let dir = tempdir().unwrap();
        let store = Store::init(dir.path()).unwrap();
        store
            .append_edges(&[
                Edge {
                    source: "a".into(),
                    target: "b".into(),
                    edge_type: "references".into(),
                    metadata: String::new(),
                },
                Edge {
                    source: "c".into(),
                    target: "a".into(),
                    edge_type: "related_to".into(),
                    metadata: String::new(),
                },
            ])
            .unwrap();
        let n = neighbors(&store, "a").unwrap();
        assert_eq!(n.outgoing.len(), 1);
        assert_eq!(n.outgoing[0].node, "b");
        assert_eq!(n.incoming.len(), 1);
        assert_eq!(n.incoming[0].node, "c");
    }

    #[test]
    fn trace_terminates_on_long_cyclic_chain() {
        let dir = tempdir().unwrap();
        let store = Store::init(dir.path()).unwrap();
        let mut edges = Vec::new();
        for i in 1..25 {
            edges.push(Edge {
                source: format!("c{i}"),
                target: format!("c{}", i + 1),
                edge_type: "chunked_from".into(),
                metadata: String::new(),
            });
        }
        store.append_edges(&edges).unwrap();
        let hops = trace(&store, "c1").unwrap();
        assert!(hops.len() <= 20);
    }

    #[test]
    fn trace_stops_at_origin() {
        let dir = tempdir().unwrap();
        let store = Store::init(dir.path()).unwrap();
        store
            .append_edges(&[Edge::chunked_from("c1", "/src/doc.md")])
            .unwrap();
        let hops = trace(&store, "c1").unwrap();
        assert_eq!(hops.len(), 2);
        assert_eq!(hops[1].node, "/src/doc.md");
        assert!(hops[1].parent.is_none());
    }

    #[test]
    fn relate_requires_embeddings_and_is_noop_without_them() {
        let dir = tempdir().unwrap();
        let store = Store::init(dir.path()).unwrap();
        let added = relate(&store, None, 0.8).unwrap();
        assert_eq!(added, 0);
    }

    #[test]
    fn relate_adds_edges_above_threshold_once() {
        let dir = tempdir().unwrap();
        let store = Store::init(dir.path()).unwrap();
        let domain_dir = store.root.join("a");
        std::fs::create_dir_all(&domain_dir).unwrap();
        ecodec::write(
            &domain_dir,
            &[vec![1.0, 0.0], vec![1.0, 0.0], vec![0.0, 1.0]],
            &["a/01.txt".into(), "a/02.txt".into(), "a/03.txt".into()],
            "m",
            2,
            false,
        )
        .unwrap();
        let added = relate(&store, Some("a"), 0.9).unwrap();
        assert_eq!(added, 1);
        let added_again = relate(&store, Some("a"), 0.9).unwrap();
        assert_eq!(added_again, 0);
    }

    #[test]
    fn link_appends_default_references_edge() {
        let dir = tempdir().unwrap();
        let store = Store::init(dir.path()).unwrap();
        link(&store, "a/01.txt", "b/01.txt", None).unwrap();
        let edges = store.read_edges().unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].edge_type, "references");
    }
}
