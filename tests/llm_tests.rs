//! Integration tests for the embedding/LLM provider capabilities,
//! exercised through `Ragdag` against mock HTTP servers.

use ragdag::Ragdag;
use serial_test::serial;
use std::fs;
use tempfile::tempdir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn write_config(store_dir: &std::path::Path, body: &str) {
    fs::create_dir_all(store_dir).unwrap();
    fs::write(store_dir.join(".config"), body).unwrap();
}

#[tokio::test]
async fn ask_with_ollama_like_provider_returns_mocked_answer() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "response": "Rust is a systems programming language focused on safety."
        })))
        .mount(&server)
        .await;

    let dir = tempdir().unwrap();
    write_config(
        &dir.path().join(".ragdag"),
        &format!(
            "[llm]\nprovider = ollama\nmodel = llama3.2\nmax_context = 8000\nbase_url = {}\n",
            server.uri()
        ),
    );
    let rag = Ragdag::init(dir.path()).await.unwrap();

    let doc = dir.path().join("rust.md");
    fs::write(&doc, "Rust is a systems programming language.").unwrap();
    rag.add(&[doc], Some("docs"), false, None).await.unwrap();

    let result = rag.ask("What is Rust?", None, true, None).await.unwrap();
    assert_eq!(
        result.answer.as_deref(),
        Some("Rust is a systems programming language focused on safety.")
    );
}

#[tokio::test]
async fn ask_with_llm_failure_surfaces_ask_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let dir = tempdir().unwrap();
    write_config(
        &dir.path().join(".ragdag"),
        &format!("[llm]\nprovider = ollama\nmodel = llama3.2\nbase_url = {}\n", server.uri()),
    );
    let rag = Ragdag::init(dir.path()).await.unwrap();

    let doc = dir.path().join("a.txt");
    fs::write(&doc, "some content").unwrap();
    rag.add(&[doc], Some("docs"), false, None).await.unwrap();

    let err = rag.ask("question", None, true, None).await.unwrap_err();
    assert_eq!(err.kind(), "ask_error");
}

// Mutates the process-wide RAGDAG_EMBEDDING_API_KEY env var; serialized
// against any other test that reads or sets it.
#[tokio::test]
#[serial]
async fn add_and_search_use_configured_api_embedding_provider() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "data": [{ "embedding": vec![0.1f32; 8] }]
        })))
        .mount(&server)
        .await;

    std::env::set_var("RAGDAG_EMBEDDING_API_KEY", "test-key");

    let dir = tempdir().unwrap();
    write_config(
        &dir.path().join(".ragdag"),
        &format!(
            "[embedding]\nprovider = api\nmodel = test-embed\ndimensions = 8\nendpoint = {}/v1/embeddings\n",
            server.uri()
        ),
    );
    let rag = Ragdag::init(dir.path()).await.unwrap();

    let doc = dir.path().join("doc.txt");
    fs::write(&doc, "vector search content").unwrap();
    let report = rag.add(&[doc], Some("docs"), false, None).await.unwrap();
    assert_eq!(report.files, 1);

    let results = rag
        .search("vector search content", Some(ragdag::SearchMode::Vector), None, None)
        .await
        .unwrap();
    assert!(!results.is_empty());

    std::env::remove_var("RAGDAG_EMBEDDING_API_KEY");
}
