//! LLM capability used by the ask pipeline's optional answer step.
//!
//! Mirrors [`crate::embedding::provider`]'s shape: a `none` sentinel and
//! an Ollama-compatible HTTP provider. Credentials come from
//! `RAGDAG_LLM_API_KEY`, never from `.config`.

use crate::error::{ProviderError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;
    fn model_name(&self) -> &str;
}

/// `llm.provider = none`: ask returns context-only, no answer text.
pub struct NoneLlmProvider;

#[async_trait]
impl LlmProvider for NoneLlmProvider {
    async fn complete(&self, _prompt: &str) -> Result<String> {
        Err(ProviderError::Unavailable("llm.provider is 'none'".into()).into())
    }
    fn model_name(&self) -> &str {
        "none"
    }
}

#[derive(Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Deserialize)]
struct OllamaResponse {
    response: String,
}

/// Ollama-compatible HTTP provider (also works against any server that
/// mirrors `/api/generate`'s request/response shape).
pub struct OllamaLikeProvider {
    client: reqwest::Client,
    base_url: String,
    model: String,
    timeout: Duration,
}

impl OllamaLikeProvider {
    pub fn new(base_url: String, model: String, timeout_secs: u64) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
            model,
            timeout: Duration::from_secs(timeout_secs),
        }
    }
}

#[async_trait]
impl LlmProvider for OllamaLikeProvider {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let url = format!("{}/api/generate", self.base_url.trim_end_matches('/'));
        debug!(url = %url, "requesting llm completion");
        let mut request = self.client.post(&url).json(&OllamaRequest {
            model: &self.model,
            prompt,
            stream: false,
        });
        if let Ok(key) = std::env::var("RAGDAG_LLM_API_KEY") {
            request = request.bearer_auth(key);
        }

        let response = tokio::time::timeout(self.timeout, request.send())
            .await
            .map_err(|_| ProviderError::Timeout(self.timeout))?
            .map_err(|e| ProviderError::Failure(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Failure(format!("HTTP {status}: {body}")).into());
        }

        let parsed: OllamaResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Failure(e.to_string()))?;
        Ok(parsed.response)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Build the configured LLM provider by name.
pub fn build_provider(name: &str, base_url: Option<String>, model: String, timeout_secs: u64) -> Result<Box<dyn LlmProvider>> {
    match name {
        "none" => Ok(Box::new(NoneLlmProvider)),
        "ollama" => {
            let base_url = base_url.unwrap_or_else(|| "http://localhost:11434".to_string());
            Ok(Box::new(OllamaLikeProvider::new(base_url, model, timeout_secs)))
        }
        other => Err(ProviderError::Unavailable(format!("unknown llm provider {other:?}")).into()),
    }
}
