//! Keyword, vector and hybrid search over a store.

use crate::embedding::provider::EmbeddingProvider;
use crate::error::Result;
use crate::similarity::search_vectors;
use crate::store::Store;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// Requested search mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Keyword,
    Vector,
    Hybrid,
}

impl Mode {
    pub fn parse(name: &str) -> Mode {
        match name {
            "keyword" => Mode::Keyword,
            "vector" => Mode::Vector,
            _ => Mode::Hybrid,
        }
    }
}

/// One search result, content loaded lazily by the caller if needed.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    pub path: String,
    pub score: f32,
    pub content: String,
    pub domain: String,
}

fn domain_of(rel_path: &str) -> String {
    rel_path.split('/').next().unwrap_or("").to_string()
}

fn scope_dir(store: &Store, domain: Option<&str>) -> PathBuf {
    match domain {
        Some(d) if !d.is_empty() => store.domain_dir(d),
        _ => store.root.clone(),
    }
}

/// Enumerate `*.txt` chunk files under `dir`, skipping reserved `_*` names.
fn iter_chunks(dir: &Path) -> Vec<PathBuf> {
    if !dir.is_dir() {
        return Vec::new();
    }
    WalkDir::new(dir)
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

/// `floor(total_matches * 10000 / content_length_chars)`.
fn keyword_score(content_lower: &str, tokens: &[String]) -> usize {
    let mut total_matches = 0usize;
    for token in tokens {
        total_matches += content_lower.matches(token.as_str()).count();
    }
    if total_matches == 0 {
        return 0;
    }
    let len = content_lower.chars().count().max(1);
    total_matches * 10000 / len
}

/// Keyword search: substring occurrence density over `*.txt` chunks.
pub fn keyword(store: &Store, query: &str, domain: Option<&str>, top_k: usize) -> Result<Vec<SearchResult>> {
    let tokens: Vec<String> = query
        .to_lowercase()
        .split_whitespace()
        .filter(|t| t.len() >= 2)
        .map(|t| t.to_string())
        .collect();
    if tokens.is_empty() {
        return Ok(Vec::new());
    }

    let dir = scope_dir(store, domain);
    let mut scored: Vec<(PathBuf, usize, String)> = Vec::new();
    for path in iter_chunks(&dir) {
        let content = std::fs::read_to_string(&path)?;
        let lower = content.to_lowercase();
        let score = keyword_score(&lower, &tokens);
        if score > 0 {
            scored.push((path, score, content));
        }
    }
    scored.sort_by(|a, b| b.1.cmp(&a.1));
    scored.truncate(top_k);

    let mut results = Vec::with_capacity(scored.len());
    for (path, score, content) in scored {
        let rel = store.relative_path(&path)?;
        results.push(SearchResult {
            domain: domain_of(&rel),
            path: rel,
            score: score as f32,
            content,
        });
    }
    Ok(results)
}

/// Vector search: embed the query via `provider`, then cosine search.
pub async fn vector(
    store: &Store,
    query: &str,
    domain: Option<&str>,
    top_k: usize,
    provider: &dyn EmbeddingProvider,
) -> Result<Vec<SearchResult>> {
    let query_vectors = provider.embed(&[query.to_string()]).await?;
    let query_vector = query_vectors.into_iter().next().unwrap_or_default();
    let hits = search_vectors(&store.root, &query_vector, domain, None, top_k)?;
    load_results(store, hits.into_iter().map(|h| (h.chunk_rel_path, h.score)).collect())
}

fn load_results(store: &Store, scored: Vec<(String, f32)>) -> Result<Vec<SearchResult>> {
    let mut results = Vec::with_capacity(scored.len());
    for (rel, score) in scored {
        let content = std::fs::read_to_string(store.root.join(&rel)).unwrap_or_default();
        results.push(SearchResult {
            domain: domain_of(&rel),
            path: rel,
            score,
            content,
        });
    }
    Ok(results)
}

/// Hybrid search: pre-filter by keyword, rank the candidates by cosine,
/// fuse the two scores. Degrades to keyword when the provider is `none`
/// or any runtime error occurs on the vector path.
pub async fn hybrid(
    store: &Store,
    query: &str,
    domain: Option<&str>,
    top_k: usize,
    provider: &dyn EmbeddingProvider,
    keyword_weight: f32,
    vector_weight: f32,
) -> Result<Vec<SearchResult>> {
    if provider.model_name() == "none" {
        debug!("hybrid search degrading to keyword: provider is none");
        return keyword(store, query, domain, top_k);
    }

    let prefilter = keyword(store, query, domain, top_k * 3)?;
    if prefilter.is_empty() {
        return Ok(Vec::new());
    }

    let fallback = || keyword(store, query, domain, top_k);

    let candidate_paths: Vec<String> = prefilter.iter().map(|r| r.path.clone()).collect();
    let query_vector = match provider.embed(&[query.to_string()]).await {
        Ok(mut v) => v.pop().unwrap_or_default(),
        Err(e) => {
            debug!(error = %e, "hybrid search falling back to keyword: embed failed");
            return fallback();
        }
    };

    let vector_hits = match search_vectors(&store.root, &query_vector, domain, Some(&candidate_paths), top_k * 3) {
        Ok(hits) => hits,
        Err(e) => {
            debug!(error = %e, "hybrid search falling back to keyword: similarity failed");
            return fallback();
        }
    };

    let max_kw = prefilter.iter().map(|r| r.score).fold(0f32, f32::max).max(1e-9);
    let vector_scores: std::collections::HashMap<String, f32> = vector_hits
        .into_iter()
        .map(|h| (h.chunk_rel_path, h.score))
        .collect();

    let mut fused: Vec<(String, f32)> = prefilter
        .iter()
        .map(|r| {
            let kw_norm = r.score / max_kw;
            let vec_score = *vector_scores.get(&r.path).unwrap_or(&0.0);
            let fused_score = keyword_weight * kw_norm + vector_weight * vec_score;
            (r.path.clone(), fused_score)
        })
        .collect();
    fused.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    fused.truncate(top_k);

    load_results(store, fused)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::provider::NoneProvider;
    use crate::store::Store;
    use std::fs;
    use tempfile::tempdir;

    fn init_store() -> (tempfile::TempDir, Store) {
        let dir = tempdir().unwrap();
        let store = Store::init(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn keyword_ranks_denser_chunk_first() {
        let (_dir, store) = init_store();
        let doc_a = store.root.join("a");
        let doc_b = store.root.join("b");
        fs::create_dir_all(&doc_a).unwrap();
        fs::create_dir_all(&doc_b).unwrap();
        fs::write(doc_a.join("01.txt"), "search search search search").unwrap();
        fs::write(
            doc_b.join("01.txt"),
            "search plus nineteen other totally irrelevant words that pad this chunk out to be long enough to dilute the score meaningfully across many characters of filler text here",
        )
        .unwrap();

        let results = keyword(&store, "search", None, 10).unwrap();
        assert_eq!(results[0].path, "a/01.txt");
    }

    #[test]
    fn keyword_skips_short_tokens() {
        let (_dir, store) = init_store();
        let doc = store.root.join("a");
        fs::create_dir_all(&doc).unwrap();
        fs::write(doc.join("01.txt"), "a long passage of words").unwrap();
        let results = keyword(&store, "of a", None, 10).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn keyword_ignores_reserved_underscore_files() {
        let (_dir, store) = init_store();
        let doc = store.root.join("a");
        fs::create_dir_all(&doc).unwrap();
        fs::write(doc.join("_scratch.txt"), "target target target").unwrap();
        let results = keyword(&store, "target", None, 10).unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn hybrid_degrades_to_keyword_when_provider_none() {
        let (_dir, store) = init_store();
        let doc = store.root.join("a");
        fs::create_dir_all(&doc).unwrap();
        fs::write(doc.join("01.txt"), "alpha beta gamma").unwrap();
        let provider = NoneProvider;
        let kw = keyword(&store, "alpha", None, 10).unwrap();
        let hy = hybrid(&store, "alpha", None, 10, &provider, 0.3, 0.7).await.unwrap();
        assert_eq!(kw.iter().map(|r| &r.path).collect::<Vec<_>>(), hy.iter().map(|r| &r.path).collect::<Vec<_>>());
    }
}
