//! Cosine similarity scoring over the binary embeddings format.

use crate::embedding::codec;
use crate::error::Result;
use std::path::Path;
use tracing::debug;

/// Small positive floor so a zero-magnitude vector never divides by zero
/// (and therefore never produces NaN).
const EPSILON: f32 = 1e-8;

/// Cosine similarity between `q` and every row of `matrix`.
pub fn cosine_similarity(q: &[f32], matrix: &[Vec<f32>]) -> Vec<f32> {
    let q_norm = magnitude(q);
    matrix
        .iter()
        .map(|row| {
            let dot: f32 = q.iter().zip(row.iter()).map(|(a, b)| a * b).sum();
            let row_norm = magnitude(row);
            dot / (q_norm.max(EPSILON) * row_norm.max(EPSILON))
        })
        .collect()
}

fn magnitude(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// One scored chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorHit {
    pub chunk_rel_path: String,
    pub score: f32,
}

/// Cosine search over one or all domains' `embeddings.bin`.
///
/// `domain`: restrict to a single domain directory under `store_root`, or
/// search every domain subdirectory with an `embeddings.bin` when `None`.
/// `candidate_paths`: if given, only those manifest rows are scored;
/// others are excluded entirely (not merely scored 0). Missing
/// embeddings files yield an empty result, not an error.
pub fn search_vectors(
    store_root: &Path,
    query_vector: &[f32],
    domain: Option<&str>,
    candidate_paths: Option<&[String]>,
    top_k: usize,
) -> Result<Vec<VectorHit>> {
    let dirs = match domain {
        Some(d) => vec![store_root.join(d)],
        None => list_domain_dirs(store_root)?,
    };

    let mut paths = Vec::new();
    let mut vectors = Vec::new();
    for dir in dirs {
        if !dir.join(codec::EMBEDDINGS_FILE).exists() {
            continue;
        }
        let file = match codec::read(&dir) {
            Ok(f) => f,
            Err(e) => {
                debug!(dir = %dir.display(), error = %e, "skipping unreadable embeddings file");
                continue;
            }
        };
        for (path, vector) in file.manifest.into_iter().zip(file.vectors.into_iter()) {
            paths.push(path);
            vectors.push(vector);
        }
    }

    if let Some(candidates) = candidate_paths {
        let allowed: std::collections::HashSet<&String> = candidates.iter().collect();
        let mut filtered_paths = Vec::new();
        let mut filtered_vectors = Vec::new();
        for (path, vector) in paths.into_iter().zip(vectors.into_iter()) {
            if allowed.contains(&path) {
                filtered_paths.push(path);
                filtered_vectors.push(vector);
            }
        }
        paths = filtered_paths;
        vectors = filtered_vectors;
    }

    if vectors.is_empty() {
        return Ok(Vec::new());
    }

    let scores = cosine_similarity(query_vector, &vectors);
    let mut hits: Vec<VectorHit> = paths
        .into_iter()
        .zip(scores.into_iter())
        .map(|(chunk_rel_path, score)| VectorHit {
            chunk_rel_path,
            score,
        })
        .collect();
    hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    hits.truncate(top_k);
    Ok(hits)
}

fn list_domain_dirs(store_root: &Path) -> Result<Vec<std::path::PathBuf>> {
    let mut dirs = vec![store_root.to_path_buf()];
    if store_root.is_dir() {
        for entry in std::fs::read_dir(store_root)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() {
                let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
                if !name.starts_with('.') {
                    dirs.push(path);
                }
            }
        }
    }
    Ok(dirs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::codec as ecodec;

    #[test]
    fn identical_vectors_score_one() {
        let v = vec![1.0, 2.0, 3.0];
        let scores = cosine_similarity(&v, &[v.clone()]);
        assert!((scores[0] - 1.0).abs() < 1e-5);
    }

    #[test]
    fn opposite_vectors_score_minus_one() {
        let v = vec![1.0, 2.0, 3.0];
        let neg: Vec<f32> = v.iter().map(|x| -x).collect();
        let scores = cosine_similarity(&v, &[neg]);
        assert!((scores[0] - (-1.0)).abs() < 1e-5);
    }

    #[test]
    fn orthogonal_vectors_score_zero() {
        let scores = cosine_similarity(&[1.0, 0.0], &[vec![0.0, 1.0]]);
        assert!(scores[0].abs() < 1e-5);
    }

    #[test]
    fn zero_vector_does_not_produce_nan() {
        let scores = cosine_similarity(&[0.0, 0.0], &[vec![0.0, 0.0]]);
        assert!(!scores[0].is_nan());
    }

    #[test]
    fn search_vectors_restricted_to_candidates() {
        let dir = tempfile::tempdir().unwrap();
        let domain_dir = dir.path().join("a");
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

        let hits = search_vectors(
            dir.path(),
            &[1.0, 0.0],
            Some("a"),
            Some(&["a/01.txt".to_string()]),
            10,
        )
        .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk_rel_path, "a/01.txt");
    }

    #[test]
    fn missing_embeddings_file_returns_empty_not_error() {
        let dir = tempfile::tempdir().unwrap();
        let hits = search_vectors(dir.path(), &[1.0, 0.0], Some("nope"), None, 5).unwrap();
        assert!(hits.is_empty());
    }

    proptest::proptest! {
        #[test]
        fn cosine_of_vector_with_itself_is_one(
            v in proptest::collection::vec(-100.0f32..100.0, 1..8)
                .prop_filter("non-zero", |v| v.iter().any(|x| *x != 0.0))
        ) {
            let scores = cosine_similarity(&v, &[v.clone()]);
            proptest::prop_assert!((scores[0] - 1.0).abs() < 1e-3);
        }

        #[test]
        fn cosine_never_produces_nan(
            v in proptest::collection::vec(-100.0f32..100.0, 1..8),
            w in proptest::collection::vec(-100.0f32..100.0, 1..8)
        ) {
            let len = v.len().min(w.len());
            let scores = cosine_similarity(&v[..len], &[w[..len].to_vec()]);
            proptest::prop_assert!(!scores[0].is_nan());
        }
    }
}
