//! Store layout, atomic chunk placement, and the processed/edge logs.
//!
//! The three flat-file logs (`.processed`, `.edges`, `.domain-rules`) and
//! the chunk-directory-per-document layout are the store's persisted
//! contract; this module is the only writer of that contract.

use crate::compat::{iso_timestamp, STORE_DIR};
use crate::config::{write_atomic, ConfigStore};
use crate::error::{Result, StoreError};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const PROCESSED_HEADER: &str = "# source_path\tcontent_hash\tdomain\ttimestamp";
pub const EDGES_HEADER: &str = "# source\ttarget\tedge_type\tmetadata";

/// One record of `.processed`: the last-known ingest of one source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedRecord {
    pub source_path: String,
    pub content_hash: String,
    pub domain: String,
    pub timestamp: String,
}

/// One `.edges` row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    pub source: String,
    pub target: String,
    pub edge_type: String,
    pub metadata: String,
}

impl Edge {
    pub fn chunked_from(chunk_rel: &str, source_abs: &str) -> Edge {
        Edge {
            source: chunk_rel.to_string(),
            target: source_abs.to_string(),
            edge_type: "chunked_from".to_string(),
            metadata: String::new(),
        }
    }
}

/// Handle to a single `.ragdag` store directory.
#[derive(Debug, Clone)]
pub struct Store {
    pub root: PathBuf,
    pub config: ConfigStore,
}

impl Store {
    pub fn open(root: impl Into<PathBuf>) -> Store {
        let root = root.into();
        Store {
            config: ConfigStore::new(&root),
            root,
        }
    }

    /// Create `.ragdag/` at `base` with default config and empty logs.
    /// Idempotent: calling twice on the same directory is a no-op beyond
    /// filling in anything missing.
    pub fn init(base: &Path) -> Result<Store> {
        let root = base.join(STORE_DIR);
        fs::create_dir_all(&root)?;
        ConfigStore::init(&root)?;

        let processed = root.join(".processed");
        if !processed.exists() {
            write_atomic(&processed, format!("{PROCESSED_HEADER}\n").as_bytes())?;
        }
        let edges = root.join(".edges");
        if !edges.exists() {
            write_atomic(&edges, format!("{EDGES_HEADER}\n").as_bytes())?;
        }
        let rules = root.join(".domain-rules");
        if !rules.exists() {
            write_atomic(
                &rules,
                b"# <substring patterns, space separated> -> <domain>\n",
            )?;
        }
        info!(root = %root.display(), "store initialized");
        Ok(Store::open(root))
    }

    pub fn processed_path(&self) -> PathBuf {
        self.root.join(".processed")
    }

    pub fn edges_path(&self) -> PathBuf {
        self.root.join(".edges")
    }

    pub fn domain_rules_path(&self) -> PathBuf {
        self.root.join(".domain-rules")
    }

    /// Store-relative path to a domain directory, or the store root itself
    /// when `domain` is empty (flat mode).
    pub fn domain_dir(&self, domain: &str) -> PathBuf {
        if domain.is_empty() {
            self.root.clone()
        } else {
            self.root.join(domain)
        }
    }

    // ---- processed log -------------------------------------------------

    pub fn read_processed(&self) -> Result<Vec<ProcessedRecord>> {
        let path = self.processed_path();
        if !path.exists() {
            return Ok(Vec::new());
        }
        let text = fs::read_to_string(path)?;
        Ok(parse_processed(&text))
    }

    fn write_processed(&self, records: &[ProcessedRecord]) -> Result<()> {
        let mut body = String::from(PROCESSED_HEADER);
        body.push('\n');
        for r in records {
            body.push_str(&format!(
                "{}\t{}\t{}\t{}\n",
                r.source_path, r.content_hash, r.domain, r.timestamp
            ));
        }
        write_atomic(&self.processed_path(), body.as_bytes())?;
        Ok(())
    }

    /// Exact `(path, hash)` match — substring matches must not count.
    pub fn is_processed(&self, source_path: &str, content_hash: &str) -> Result<bool> {
        Ok(self
            .read_processed()?
            .iter()
            .any(|r| r.source_path == source_path && r.content_hash == content_hash))
    }

    fn upsert_processed(&self, record: ProcessedRecord) -> Result<()> {
        let mut records = self.read_processed()?;
        records.retain(|r| r.source_path != record.source_path);
        records.push(record);
        self.write_processed(&records)
    }

    // ---- edges log ------------------------------------------------------

    pub fn read_edges(&self) -> Result<Vec<Edge>> {
        let path = self.edges_path();
        if !path.exists() {
            return Ok(Vec::new());
        }
        let text = fs::read_to_string(path)?;
        Ok(parse_edges(&text))
    }

    pub fn write_edges(&self, edges: &[Edge]) -> Result<()> {
        let mut body = String::from(EDGES_HEADER);
        body.push('\n');
        for e in edges {
            body.push_str(&format!(
                "{}\t{}\t{}\t{}\n",
                e.source, e.target, e.edge_type, e.metadata
            ));
        }
        write_atomic(&self.edges_path(), body.as_bytes())?;
        Ok(())
    }

    pub fn append_edges(&self, new_edges: &[Edge]) -> Result<()> {
        let mut edges = self.read_edges()?;
        edges.extend_from_slice(new_edges);
        self.write_edges(&edges)
    }

    fn replace_chunked_from_edges(&self, source_abs: &str, new_edges: Vec<Edge>) -> Result<()> {
        let mut edges = self.read_edges()?;
        edges.retain(|e| !(e.edge_type == "chunked_from" && e.target == source_abs));
        edges.extend(new_edges);
        self.write_edges(&edges)
    }

    // ---- domain rules ---------------------------------------------------

    /// First rule whose pattern list contains a substring of the
    /// lowercased absolute source path; returns "" if none match.
    pub fn classify_domain(&self, source_abs: &Path) -> Result<String> {
        let path = self.domain_rules_path();
        if !path.exists() {
            return Ok(String::new());
        }
        let text = fs::read_to_string(path)?;
        let haystack = source_abs.to_string_lossy().to_lowercase();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((patterns, domain)) = line.split_once('\u{2192}') else {
                continue;
            };
            let domain = domain.trim();
            if patterns
                .split_whitespace()
                .any(|pat| haystack.contains(&pat.to_lowercase()))
            {
                return Ok(domain.to_string());
            }
        }
        Ok(String::new())
    }

    /// Ingest one already-extracted document: stage chunk files, replace
    /// the document directory atomically, then update processed/edges logs.
    /// Returns the store-relative document directory and chunk count.
    pub fn ingest_document(
        &self,
        source_abs: &Path,
        domain: &str,
        doc_name: &str,
        content_hash: &str,
        chunks: &[String],
    ) -> Result<(String, usize)> {
        let target_dir = self.domain_dir(domain).join(doc_name);
        let staging_dir = target_dir.with_extension(format!("new.{}", std::process::id()));

        if staging_dir.exists() {
            fs::remove_dir_all(&staging_dir)?;
        }
        fs::create_dir_all(&staging_dir).map_err(StoreError::Io)?;

        let width = (chunks.len().max(1)).to_string().len().max(2);
        for (idx, chunk) in chunks.iter().enumerate() {
            let trimmed = chunk.trim();
            if trimmed.is_empty() {
                continue;
            }
            let name = format!("{:0width$}.txt", idx + 1, width = width);
            fs::write(staging_dir.join(name), trimmed)?;
        }

        if target_dir.exists() {
            for entry in fs::read_dir(&target_dir)? {
                let entry = entry?;
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) == Some("txt") {
                    fs::remove_file(&path)?;
                }
            }
            for entry in fs::read_dir(&staging_dir)? {
                let entry = entry?;
                let dest = target_dir.join(entry.file_name());
                fs::rename(entry.path(), dest)?;
            }
            fs::remove_dir_all(&staging_dir)?;
        } else {
            if let Some(parent) = target_dir.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::rename(&staging_dir, &target_dir)?;
        }

        let written: usize = fs::read_dir(&target_dir)?
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().and_then(|x| x.to_str()) == Some("txt"))
            .count();

        let source_abs_str = source_abs.to_string_lossy().to_string();
        self.upsert_processed(ProcessedRecord {
            source_path: source_abs_str.clone(),
            content_hash: content_hash.to_string(),
            domain: domain.to_string(),
            timestamp: iso_timestamp(),
        })?;

        let rel_doc = self.relative_path(&target_dir)?;
        let mut new_edges = Vec::with_capacity(written);
        for entry in fs::read_dir(&target_dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("txt") {
                continue;
            }
            let name = path.file_name().unwrap().to_string_lossy().to_string();
            if name.starts_with('_') {
                continue;
            }
            let chunk_rel = format!("{}/{}", rel_doc, name);
            new_edges.push(Edge::chunked_from(&chunk_rel, &source_abs_str));
        }
        self.replace_chunked_from_edges(&source_abs_str, new_edges)?;

        debug!(doc = %rel_doc, chunks = written, "ingested document");
        Ok((rel_doc, written))
    }

    /// Path relative to the store root, using `/` separators regardless of platform.
    pub fn relative_path(&self, path: &Path) -> Result<String> {
        let rel = path.strip_prefix(&self.root).map_err(|_| {
            StoreError::InvalidPath(format!("{} is not under store root", path.display()))
        })?;
        Ok(rel.components().map(|c| c.as_os_str().to_string_lossy().into_owned()).collect::<Vec<_>>().join("/"))
    }
}

fn parse_processed(text: &str) -> Vec<ProcessedRecord> {
    text.lines()
        .filter(|l| !l.starts_with('#') && !l.trim().is_empty())
        .filter_map(|line| {
            let mut parts = line.splitn(4, '\t');
            Some(ProcessedRecord {
                source_path: parts.next()?.to_string(),
                content_hash: parts.next()?.to_string(),
                domain: parts.next().unwrap_or("").to_string(),
                timestamp: parts.next().unwrap_or("").to_string(),
            })
        })
        .collect()
}

fn parse_edges(text: &str) -> Vec<Edge> {
    text.lines()
        .filter(|l| !l.starts_with('#') && !l.trim().is_empty())
        .filter_map(|line| {
            let mut parts = line.splitn(4, '\t');
            Some(Edge {
                source: parts.next()?.to_string(),
                target: parts.next()?.to_string(),
                edge_type: parts.next().unwrap_or("").to_string(),
                metadata: parts.next().unwrap_or("").to_string(),
            })
        })
        .collect()
}
