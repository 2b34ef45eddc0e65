//! Candidate retrieval, 1-hop graph expansion, budgeted context
//! assembly and optional LLM invocation.

use crate::compat::{estimate_tokens, iso_timestamp};
use crate::embedding::provider::EmbeddingProvider;
use crate::error::{AskError, Result};
use crate::llm::LlmProvider;
use crate::search::{self, Mode, SearchResult};
use crate::store::{Edge, Store};
use std::collections::HashSet;
use tracing::debug;

pub const DEFAULT_PROMPT_TEMPLATE: &str = "Answer the question using only the context below.\n\n\
Context:\n{context}\n\nQuestion: {question}\n\nAnswer:";

/// One chunk included in the assembled context.
#[derive(Debug, Clone, PartialEq)]
pub struct Source {
    pub path: String,
    pub score: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AskResult {
    pub context: String,
    pub sources: Vec<Source>,
    pub answer: Option<String>,
}

/// Options for one `ask` call.
pub struct AskOptions<'a> {
    pub question: &'a str,
    pub domain: Option<&'a str>,
    pub top_k: usize,
    pub use_llm: bool,
}

/// Run the full ask pipeline: retrieve, expand, assemble, (optionally) answer, (optionally) record.
pub async fn ask(
    store: &Store,
    opts: AskOptions<'_>,
    embedding_provider: &dyn EmbeddingProvider,
    llm_provider: &dyn LlmProvider,
) -> Result<AskResult> {
    let mode_name = store.config.get("search.default_mode", "hybrid");
    let mode = if mode_name == "keyword" { Mode::Keyword } else { Mode::Hybrid };

    let kw_weight: f32 = store.config.get_parsed("search.keyword_weight", 0.3);
    let vec_weight: f32 = store.config.get_parsed("search.vector_weight", 0.7);

    let primary = match mode {
        Mode::Keyword => search::keyword(store, opts.question, opts.domain, opts.top_k)?,
        _ => {
            search::hybrid(
                store,
                opts.question,
                opts.domain,
                opts.top_k,
                embedding_provider,
                kw_weight,
                vec_weight,
            )
            .await?
        }
    };

    let primary_paths: HashSet<String> = primary.iter().map(|r| r.path.clone()).collect();
    let mut working: Vec<SearchResult> = primary.clone();

    // 1-hop expansion via outgoing related_to/references edges.
    let edges = store.read_edges()?;
    let mut seen: HashSet<String> = primary_paths.clone();
    for candidate in &primary {
        for edge in &edges {
            if edge.source != candidate.path {
                continue;
            }
            if edge.edge_type != "related_to" && edge.edge_type != "references" {
                continue;
            }
            if seen.contains(&edge.target) {
                continue;
            }
            seen.insert(edge.target.clone());
            let content = std::fs::read_to_string(store.root.join(&edge.target)).unwrap_or_default();
            working.push(SearchResult {
                domain: edge.target.split('/').next().unwrap_or("").to_string(),
                path: edge.target.clone(),
                score: candidate.score * 0.5,
                content,
            });
        }
    }

    working.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

    let max_context: usize = store.config.get_parsed("llm.max_context", 8000);
    let mut context = String::new();
    let mut sources = Vec::new();
    let mut budget_used = 0usize;
    let mut included: HashSet<String> = HashSet::new();

    for result in &working {
        if included.contains(&result.path) {
            continue;
        }
        let header = format!("--- Source: {} (score: {:.4}) ---\n", result.path, result.score);
        let block = format!("{header}{}\n\n", result.content);
        let tokens = estimate_tokens(&block);
        if budget_used + tokens > max_context {
            break;
        }
        budget_used += tokens;
        context.push_str(&block);
        included.insert(result.path.clone());
        sources.push(Source {
            path: result.path.clone(),
            score: result.score,
        });
    }

    let llm_provider_name = store.config.get("llm.provider", "none");
    let answer = if !opts.use_llm || llm_provider_name == "none" {
        None
    } else {
        let template = load_prompt_template(store)?;
        let prompt = template
            .replace("{context}", &context)
            .replace("{question}", opts.question);
        match llm_provider.complete(&prompt).await {
            Ok(text) => Some(text),
            Err(e) => return Err(AskError::LlmFailure(e.to_string()).into()),
        }
    };

    let record_queries: bool = store.config.get_parsed("edges.record_queries", false);
    if record_queries {
        let node = format!("query_{}", iso_timestamp());
        let ts = iso_timestamp();
        let new_edges: Vec<Edge> = primary
            .iter()
            .map(|r| Edge {
                source: node.clone(),
                target: r.path.clone(),
                edge_type: "retrieved".to_string(),
                metadata: ts.clone(),
            })
            .collect();
        if !new_edges.is_empty() {
            store.append_edges(&new_edges)?;
            debug!(node = %node, count = new_edges.len(), "recorded query edges");
        }
    }

    Ok(AskResult {
        context,
        sources,
        answer,
    })
}

fn load_prompt_template(store: &Store) -> Result<String> {
    let custom_path = store.root.join("prompt.txt");
    let template = if custom_path.exists() {
        std::fs::read_to_string(&custom_path)?
    } else {
        DEFAULT_PROMPT_TEMPLATE.to_string()
    };
    if !template.contains("{context}") {
        return Err(AskError::BadTemplate("{context}").into());
    }
    if !template.contains("{question}") {
        return Err(AskError::BadTemplate("{question}").into());
    }
    Ok(template)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::provider::NoneProvider;
    use crate::llm::NoneLlmProvider;
    use std::fs;
    use tempfile::tempdir;

    #[tokio::test]
    async fn ask_without_llm_returns_context_only() {
        let dir = tempdir().unwrap();
        let store = Store::init(dir.path()).unwrap();
        let doc = store.root.join("a");
        fs::create_dir_all(&doc).unwrap();
        fs::write(doc.join("01.txt"), "Rust is a systems programming language.").unwrap();

        let embedding = NoneProvider;
        let llm = NoneLlmProvider;
        let result = ask(
            &store,
            AskOptions {
                question: "Rust",
                domain: None,
                top_k: 5,
                use_llm: false,
            },
            &embedding,
            &llm,
        )
        .await
        .unwrap();

        assert!(result.context.contains("Rust is a systems programming language."));
        assert!(result.answer.is_none());
        assert_eq!(result.sources.len(), 1);
    }

    #[tokio::test]
    async fn ask_expands_one_hop_via_references() {
        let dir = tempdir().unwrap();
        let store = Store::init(dir.path()).unwrap();
        let a = store.root.join("a");
        let b = store.root.join("b");
        fs::create_dir_all(&a).unwrap();
        fs::create_dir_all(&b).unwrap();
        fs::write(a.join("01.txt"), "alpha content here").unwrap();
        fs::write(b.join("01.txt"), "unrelated expanded text").unwrap();
        store
            .append_edges(&[Edge {
                source: "a/01.txt".into(),
                target: "b/01.txt".into(),
                edge_type: "references".into(),
                metadata: String::new(),
            }])
            .unwrap();

        let embedding = NoneProvider;
        let llm = NoneLlmProvider;
        let result = ask(
            &store,
            AskOptions {
                question: "alpha",
                domain: None,
                top_k: 5,
                use_llm: false,
            },
            &embedding,
            &llm,
        )
        .await
        .unwrap();

        assert!(result.context.contains("unrelated expanded text"));
    }

    #[tokio::test]
    async fn ask_budget_stops_before_exceeding_max_context() {
        let dir = tempdir().unwrap();
        let store = Store::init(dir.path()).unwrap();
        store.config.set("llm.max_context", "5").unwrap();
        let a = store.root.join("a");
        fs::create_dir_all(&a).unwrap();
        fs::write(a.join("01.txt"), "word ".repeat(50)).unwrap();

        let embedding = NoneProvider;
        let llm = NoneLlmProvider;
        let result = ask(
            &store,
            AskOptions {
                question: "word",
                domain: None,
                top_k: 5,
                use_llm: false,
            },
            &embedding,
            &llm,
        )
        .await
        .unwrap();
        assert!(result.sources.is_empty());
        assert!(result.context.is_empty());
    }

    #[test]
    fn custom_prompt_template_requires_placeholders() {
        let dir = tempdir().unwrap();
        let store = Store::init(dir.path()).unwrap();
        fs::write(store.root.join("prompt.txt"), "no placeholders here").unwrap();
        let err = load_prompt_template(&store).unwrap_err();
        assert_eq!(err.kind(), "ask_error");
    }

    mockall::mock! {
        pub Llm {}

        #[async_trait::async_trait]
        impl LlmProvider for Llm {
            async fn complete(&self, prompt: &str) -> Result<String>;
            fn model_name(&self) -> &str;
        }
    }

    #[tokio::test]
    async fn llm_provider_failure_is_wrapped_as_ask_error() {
        let dir = tempdir().unwrap();
        let store = Store::init(dir.path()).unwrap();
        store.config.set("llm.provider", "mock").unwrap();
        let doc = store.root.join("a");
        fs::create_dir_all(&doc).unwrap();
        fs::write(doc.join("01.txt"), "content for the mock provider to retrieve").unwrap();

        let mut llm = MockLlm::new();
        llm.expect_complete()
            .returning(|_| Err(crate::error::ProviderError::Failure("mock outage".into()).into()));
        llm.expect_model_name().return_const("mock".to_string());

        let embedding = NoneProvider;
        let err = ask(
            &store,
            AskOptions {
                question: "content",
                domain: None,
                top_k: 5,
                use_llm: true,
            },
            &embedding,
            &llm,
        )
        .await
        .unwrap_err();

        assert_eq!(err.kind(), "ask_error");
    }
}
