//! Embedding provider capability: `embed(texts) -> vectors`.
//!
//! An `async_trait` over a thin `reqwest` client, credentials read from
//! the environment, never from `.config`. Three implementations: a
//! sentinel `none`, an API-backed HTTP provider, and a local in-process
//! provider that derives a deterministic feature vector from character
//! n-gram hashing instead of pulling in a model-loading runtime.

use crate::error::{ProviderError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// Embedding-producing capability. Implementations may perform network
/// or local-model I/O; callers pass a deadline via `timeout`.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
    fn dimensions(&self) -> usize;
    fn model_name(&self) -> &str;
}

/// `embedding.provider = none`: ingest skips embedding silently, hybrid
/// search degrades to keyword.
pub struct NoneProvider;

#[async_trait]
impl EmbeddingProvider for NoneProvider {
    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Err(ProviderError::Unavailable("embedding.provider is 'none'".into()).into())
    }
    fn dimensions(&self) -> usize {
        0
    }
    fn model_name(&self) -> &str {
        "none"
    }
}

/// HTTP API-backed provider. Reads its credential from
/// `RAGDAG_EMBEDDING_API_KEY`, never from the store's `.config`.
pub struct ApiEmbeddingProvider {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    dimensions: usize,
    timeout: Duration,
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbedResponse {
    data: Vec<EmbedDatum>,
}

#[derive(Deserialize)]
struct EmbedDatum {
    embedding: Vec<f32>,
}

impl ApiEmbeddingProvider {
    pub fn new(endpoint: String, model: String, dimensions: usize, timeout_secs: u64) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
            model,
            dimensions,
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    fn api_key() -> Option<String> {
        std::env::var("RAGDAG_EMBEDDING_API_KEY").ok()
    }
}

#[async_trait]
impl EmbeddingProvider for ApiEmbeddingProvider {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let key = Self::api_key().ok_or_else(|| {
            ProviderError::Unavailable("RAGDAG_EMBEDDING_API_KEY is not set".into())
        })?;
        debug!(endpoint = %self.endpoint, count = texts.len(), "requesting embeddings");
        let request = self
            .client
            .post(&self.endpoint)
            .bearer_auth(key)
            .json(&EmbedRequest {
                model: &self.model,
                input: texts,
            });

        let response = tokio::time::timeout(self.timeout, request.send())
            .await
            .map_err(|_| ProviderError::Timeout(self.timeout))?
            .map_err(|e| ProviderError::Failure(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!(%status, body = %body, "embedding provider returned an error");
            return Err(ProviderError::Failure(format!("HTTP {status}: {body}")).into());
        }

        let parsed: EmbedResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Failure(e.to_string()))?;
        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Local in-process provider: a deterministic fixed-width feature vector
/// built from character trigram hashing. Acts as the "loads a model
/// file" capability slot without pulling in a heavyweight ML runtime;
/// swappable behind the same trait.
pub struct LocalEmbeddingProvider {
    dimensions: usize,
}

impl LocalEmbeddingProvider {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions];
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();
        if chars.is_empty() {
            return vector;
        }
        for window in chars.windows(3.min(chars.len()).max(1)) {
            let gram: String = window.iter().collect();
            let bucket = fnv1a(&gram) as usize % self.dimensions;
            vector[bucket] += 1.0;
        }
        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for LocalEmbeddingProvider {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        "local-ngram-hash"
    }
}

fn fnv1a(s: &str) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for b in s.as_bytes() {
        hash ^= *b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

/// Build the configured provider by name. Unknown names are refused
/// rather than silently defaulting to a fallback provider.
pub fn build_provider(
    name: &str,
    endpoint: Option<String>,
    model: String,
    dimensions: usize,
    timeout_secs: u64,
) -> Result<Box<dyn EmbeddingProvider>> {
    match name {
        "none" => Ok(Box::new(NoneProvider)),
        "api" => {
            let endpoint = endpoint.ok_or_else(|| {
                ProviderError::Unavailable("api embedding provider requires an endpoint".into())
            })?;
            Ok(Box::new(ApiEmbeddingProvider::new(
                endpoint,
                model,
                dimensions,
                timeout_secs,
            )))
        }
        "local" => Ok(Box::new(LocalEmbeddingProvider::new(dimensions))),
        other => Err(ProviderError::Unavailable(format!("unknown embedding provider {other:?}")).into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn none_provider_is_unavailable() {
        let provider = NoneProvider;
        assert!(provider.embed(&["x".to_string()]).await.is_err());
    }

    #[tokio::test]
    async fn local_provider_is_deterministic() {
        let provider = LocalEmbeddingProvider::new(16);
        let a = provider.embed(&["hello world".to_string()]).await.unwrap();
        let b = provider.embed(&["hello world".to_string()]).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a[0].len(), 16);
    }

    #[tokio::test]
    async fn local_provider_differs_for_different_text() {
        let provider = LocalEmbeddingProvider::new(32);
        let a = provider.embed(&["apples and oranges".to_string()]).await.unwrap();
        let b = provider.embed(&["quantum computing".to_string()]).await.unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn build_provider_rejects_unknown_name() {
        assert!(build_provider("bogus", None, "m".into(), 8, 5).is_err());
    }
}
