//! `ragdag` — a flat-file knowledge-graph engine for retrieval-augmented
//! generation over a local corpus.
//!
//! The store is a single `.ragdag/` directory: plain chunk files
//! organized by domain, a content-addressed processed log, an
//! append-only edge log, and per-domain binary embeddings. This crate
//! is the library surface over that store — ingest, search, graph
//! operations, ask, and maintenance — fronted by optional HTTP and
//! JSON-RPC adapters.
//!
//! ```rust,no_run
//! use ragdag::Ragdag;
//!
//! #[tokio::main]
//! async fn main() -> ragdag::Result<()> {
//!     let rag = Ragdag::init(".").await?;
//!     let report = rag.add(&["README.md".into()], None, false, None).await?;
//!     println!("ingested {} files into {} chunks", report.files, report.chunks);
//!     Ok(())
//! }
//! ```

pub mod ask;
pub mod chunker;
pub mod compat;
pub mod config;
pub mod embedding;
pub mod error;
pub mod graph;
pub mod http;
pub mod llm;
pub mod maintenance;
pub mod parser;
pub mod rpc;
pub mod search;
pub mod similarity;
pub mod store;

pub use ask::{AskOptions, AskResult};
pub use embedding::provider::EmbeddingProvider;
pub use error::{RagdagError, Result};
pub use graph::{GraphSummary, Neighbors, TraceHop};
pub use llm::LlmProvider;
pub use search::{Mode as SearchMode, SearchResult};
pub use store::Store;

use chunker::Strategy;
use compat::{content_hash_of_file, find_store, sanitize, STORE_DIR};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};
use walkdir::WalkDir;

/// Counts returned by [`Ragdag::add`].
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct AddReport {
    pub files: usize,
    pub chunks: usize,
    pub skipped: usize,
}

/// Top-level facade. Holds a store handle and the two pluggable
/// capabilities (embedding, LLM); owns the per-store write-path mutex
/// so `add`/`link`/`relate`/`repair`/`gc`/`reindex` never interleave
/// on one store.
pub struct Ragdag {
    store: Store,
    embedding_provider: Box<dyn EmbeddingProvider>,
    llm_provider: Box<dyn LlmProvider>,
    write_lock: Arc<Mutex<()>>,
}

impl Ragdag {
    /// Create `.ragdag/` under `base` (idempotent), then open it.
    pub async fn init(base: impl AsRef<Path>) -> Result<Ragdag> {
        let store = Store::init(base.as_ref())?;
        Ragdag::from_store(store)
    }

    /// Open an existing store, discovered by walking up from `start`
    /// (or `RAGDAG_STORE` if set).
    pub fn open(start: impl AsRef<Path>) -> Result<Ragdag> {
        let root = match std::env::var("RAGDAG_STORE") {
            Ok(base) => PathBuf::from(base).join(STORE_DIR),
            Err(_) => find_store(start.as_ref())?,
        };
        Ragdag::from_store(Store::open(root))
    }

    fn from_store(store: Store) -> Result<Ragdag> {
        let embedding_name = store.config.get("embedding.provider", "none");
        let embedding_model = store.config.get("embedding.model", "text-embedding-3-small");
        let embedding_dims: usize = store.config.get_parsed("embedding.dimensions", 1536);
        let embedding_endpoint = non_empty(store.config.get("embedding.endpoint", ""));
        let embedding_provider = embedding::provider::build_provider(
            &embedding_name,
            embedding_endpoint,
            embedding_model,
            embedding_dims,
            30,
        )
        .unwrap_or_else(|e| {
            warn!(error = %e, "falling back to none embedding provider");
            Box::new(embedding::provider::NoneProvider)
        });

        let llm_name = store.config.get("llm.provider", "none");
        let llm_model = store.config.get("llm.model", "gpt-4o-mini");
        let llm_base_url = non_empty(store.config.get("llm.base_url", ""));
        let llm_provider = llm::build_provider(&llm_name, llm_base_url, llm_model, 60).unwrap_or_else(|e| {
            warn!(error = %e, "falling back to none llm provider");
            Box::new(llm::NoneLlmProvider) as Box<dyn LlmProvider>
        });

        Ok(Ragdag {
            store,
            embedding_provider,
            llm_provider,
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Ingest one or more files (or directories, expanded recursively).
    /// `domain`: explicit domain override; if `None`, domain rules are
    /// consulted, falling back to `unsorted` unless `flat` is set.
    /// `embed`: whether to embed new chunks immediately; defaults to
    /// whether an embedding provider is configured, so callers can pass
    /// `Some(false)` to ingest now and embed later via `reindex`.
    pub async fn add(
        &self,
        paths: &[PathBuf],
        domain: Option<&str>,
        flat: bool,
        embed: Option<bool>,
    ) -> Result<AddReport> {
        let _guard = self.write_lock.lock().await;
        let mut report = AddReport::default();

        let files = expand_paths(paths);
        let chunk_strategy_cfg = Strategy::parse(&self.store.config.get("general.chunk_strategy", "heading"));
        let chunk_size: usize = self.store.config.get_parsed("general.chunk_size", 1000);
        let chunk_overlap: usize = self.store.config.get_parsed("general.chunk_overlap", 100);
        let embed_after: bool = embed.unwrap_or(self.embedding_provider.model_name() != "none");

        for path in files {
            let abs = match path.canonicalize() {
                Ok(p) => p,
                Err(_) => path.clone(),
            };
            let content_hash = match content_hash_of_file(&abs) {
                Ok(h) => h,
                Err(e) => {
                    warn!(path = %abs.display(), error = %e, "skipping unreadable file");
                    report.skipped += 1;
                    continue;
                }
            };

            if self
                .store
                .is_processed(&abs.to_string_lossy(), &content_hash)
                .unwrap_or(false)
            {
                info!(path = %abs.display(), "already processed, skipping");
                continue;
            }

            let file_type = parser::detect(&abs);
            let text = match parser::parse(&abs, file_type) {
                Ok(t) => t,
                Err(e) => {
                    warn!(path = %abs.display(), error = %e, "parse failed, storing raw bytes");
                    match std::fs::read(&abs) {
                        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                        Err(_) => {
                            report.skipped += 1;
                            continue;
                        }
                    }
                }
            };

            let resolved_domain = if let Some(d) = domain {
                sanitize(d)
            } else if flat {
                String::new()
            } else {
                let classified = self.store.classify_domain(&abs).unwrap_or_default();
                if classified.is_empty() {
                    "unsorted".to_string()
                } else {
                    classified
                }
            };

            let strategy = Strategy::for_file_type(file_type, chunk_strategy_cfg);
            let chunks = chunker::chunk_text(&text, strategy, chunk_size, chunk_overlap);
            if chunks.is_empty() {
                report.skipped += 1;
                continue;
            }

            let doc_name = sanitize(
                abs.file_stem()
                    .and_then(|s| s.to_str())
                    .unwrap_or("document"),
            );
            let (rel_doc, count) = self
                .store
                .ingest_document(&abs, &resolved_domain, &doc_name, &content_hash, &chunks)?;

            if embed_after {
                if let Err(e) = self.embed_document(&rel_doc).await {
                    warn!(doc = %rel_doc, error = %e, "incremental embed failed, continuing");
                }
            }

            report.files += 1;
            report.chunks += count;
        }

        Ok(report)
    }

    async fn embed_document(&self, rel_doc: &str) -> Result<()> {
        let doc_dir = self.store.root.join(rel_doc);
        let mut rel_paths = Vec::new();
        let mut texts = Vec::new();
        for entry in WalkDir::new(&doc_dir)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if !entry.file_type().is_file() {
                continue;
            }
            if entry.path().extension().and_then(|x| x.to_str()) != Some("txt") {
                continue;
            }
            if entry
                .path()
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("")
                .starts_with('_')
            {
                continue;
            }
            rel_paths.push(self.store.relative_path(entry.path())?);
            texts.push(std::fs::read_to_string(entry.path())?);
        }
        if texts.is_empty() {
            return Ok(());
        }
        let vectors = self.embedding_provider.embed(&texts).await?;
        let domain_dir = match rel_doc.split('/').next() {
            Some(domain) if rel_doc.contains('/') => self.store.root.join(domain),
            _ => self.store.root.clone(),
        };
        embedding::codec::write(
            &domain_dir,
            &vectors,
            &rel_paths,
            self.embedding_provider.model_name(),
            self.embedding_provider.dimensions(),
            true,
        )?;
        Ok(())
    }

    /// Keyword, vector, or hybrid search (mode defaults from config).
    pub async fn search(
        &self,
        query: &str,
        mode: Option<SearchMode>,
        domain: Option<&str>,
        top_k: Option<usize>,
    ) -> Result<Vec<SearchResult>> {
        let top_k = top_k.unwrap_or_else(|| self.store.config.get_parsed("search.top_k", 10));
        let mode = mode.unwrap_or_else(|| SearchMode::parse(&self.store.config.get("search.default_mode", "hybrid")));
        match mode {
            SearchMode::Keyword => search::keyword(&self.store, query, domain, top_k),
            SearchMode::Vector => {
                search::vector(&self.store, query, domain, top_k, self.embedding_provider.as_ref()).await
            }
            SearchMode::Hybrid => {
                let kw_weight: f32 = self.store.config.get_parsed("search.keyword_weight", 0.3);
                let vec_weight: f32 = self.store.config.get_parsed("search.vector_weight", 0.7);
                search::hybrid(
                    &self.store,
                    query,
                    domain,
                    top_k,
                    self.embedding_provider.as_ref(),
                    kw_weight,
                    vec_weight,
                )
                .await
            }
        }
    }

    /// Retrieval + graph expansion + budgeted context assembly, with an
    /// optional LLM completion.
    pub async fn ask(&self, question: &str, domain: Option<&str>, use_llm: bool, top_k: Option<usize>) -> Result<AskResult> {
        let top_k = top_k.unwrap_or_else(|| self.store.config.get_parsed("search.top_k", 10));
        ask::ask(
            &self.store,
            AskOptions {
                question,
                domain,
                top_k,
                use_llm,
            },
            self.embedding_provider.as_ref(),
            self.llm_provider.as_ref(),
        )
        .await
    }

    pub fn graph(&self, domain: Option<&str>) -> Result<GraphSummary> {
        graph::summary(&self.store, domain)
    }

    pub fn neighbors(&self, node: &str) -> Result<Neighbors> {
        graph::neighbors(&self.store, node)
    }

    pub fn trace(&self, node: &str) -> Result<Vec<TraceHop>> {
        graph::trace(&self.store, node)
    }

    pub async fn relate(&self, domain: Option<&str>, threshold: Option<f32>) -> Result<usize> {
        let _guard = self.write_lock.lock().await;
        let threshold = threshold.unwrap_or_else(|| self.store.config.get_parsed("edges.relate_threshold", 0.8));
        graph::relate(&self.store, domain, threshold)
    }

    pub async fn link(&self, source: &str, target: &str, edge_type: Option<&str>) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        graph::link(&self.store, source, target, edge_type)
    }

    pub fn verify(&self) -> Result<maintenance::VerifyReport> {
        maintenance::verify(&self.store)
    }

    pub async fn repair(&self) -> Result<usize> {
        let _guard = self.write_lock.lock().await;
        maintenance::repair(&self.store)
    }

    pub async fn gc(&self) -> Result<maintenance::GcReport> {
        let _guard = self.write_lock.lock().await;
        maintenance::gc(&self.store)
    }

    pub async fn reindex(&self, domain: Option<&str>) -> Result<usize> {
        let _guard = self.write_lock.lock().await;
        maintenance::reindex(&self.store, domain, self.embedding_provider.as_ref()).await
    }
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

/// Expand a mix of file and directory paths into a flat file list.
fn expand_paths(paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut out = Vec::new();
    for path in paths {
        if path.is_dir() {
            for entry in WalkDir::new(path).into_iter().filter_map(|e| e.ok()) {
                if entry.file_type().is_file() {
                    out.push(entry.path().to_path_buf());
                }
            }
        } else {
            out.push(path.clone());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[tokio::test]
    async fn init_is_idempotent_and_creates_store() {
        let dir = tempdir().unwrap();
        let rag = Ragdag::init(dir.path()).await.unwrap();
        assert!(rag.store().root.ends_with(STORE_DIR));
        Ragdag::init(dir.path()).await.unwrap();
    }

    // Mutates the process-wide RAGDAG_STORE env var; serialized against
    // any other test that reads or sets it.
    #[test]
    #[serial_test::serial]
    fn open_honors_ragdag_store_env_override() {
        let dir = tempdir().unwrap();
        Store::init(dir.path()).unwrap();
        std::env::set_var("RAGDAG_STORE", dir.path());

        let elsewhere = tempdir().unwrap();
        let opened = Ragdag::open(elsewhere.path());

        std::env::remove_var("RAGDAG_STORE");
        assert!(opened.unwrap().store().root.starts_with(dir.path()));
    }

    #[tokio::test]
    async fn add_then_search_finds_unique_term() {
        let dir = tempdir().unwrap();
        let rag = Ragdag::init(dir.path()).await.unwrap();
        let file = dir.path().join("doc.md");
        fs::write(&file, "This document mentions xylophone uniquely.").unwrap();

        let report = rag.add(&[file.clone()], None, true, None).await.unwrap();
        assert_eq!(report.files, 1);
        assert!(report.chunks >= 1);

        let results = rag.search("xylophone", None, None, None).await.unwrap();
        assert!(!results.is_empty());
    }

    #[tokio::test]
    async fn add_is_idempotent_for_unchanged_content() {
        let dir = tempdir().unwrap();
        let rag = Ragdag::init(dir.path()).await.unwrap();
        let file = dir.path().join("doc.md");
        fs::write(&file, "stable content").unwrap();
        rag.add(&[file.clone()], None, true, None).await.unwrap();
        let report = rag.add(&[file], None, true, None).await.unwrap();
        assert_eq!(report.files, 0);
    }

    #[tokio::test]
    async fn graph_and_link_roundtrip() {
        let dir = tempdir().unwrap();
        let rag = Ragdag::init(dir.path()).await.unwrap();
        rag.link("a/01.txt", "b/01.txt", None).await.unwrap();
        let n = rag.neighbors("a/01.txt").unwrap();
        assert_eq!(n.outgoing.len(), 1);
    }
}
