//! REST surface over [`Ragdag`]: an `AppState`/`Router` construction
//! (shared state behind an `Arc`, `tower-http` trace/cors layers,
//! `utoipa` schemas on the DTOs).
//!
//! The store handle is constructed once by the caller and threaded
//! through `AppState`, rather than cached behind a lazily-initialized
//! global keyed by `RAGDAG_STORE`.

use crate::{AddReport, AskResult, GraphSummary, Neighbors, Ragdag, SearchMode, SearchResult, TraceHop};
use axum::extract::{Path as AxumPath, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::error;
use utoipa::{OpenApi, ToSchema};

/// Shared application state: one store handle per process.
#[derive(Clone)]
pub struct AppState {
    pub rag: Arc<Ragdag>,
}

impl AppState {
    pub fn new(rag: Ragdag) -> Self {
        Self { rag: Arc::new(rag) }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    pub kind: String,
    pub detail: String,
}

fn error_response(err: crate::RagdagError) -> Response {
    error!(kind = err.kind(), "request failed: {}", err);
    let status = match err.kind() {
        "not_a_store" | "bad_config" => StatusCode::UNPROCESSABLE_ENTITY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(ErrorBody {
            kind: err.kind().to_string(),
            detail: err.to_string(),
        }),
    )
        .into_response()
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AddRequest {
    pub paths: Vec<String>,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub flat: bool,
    #[serde(default)]
    pub embed: Option<bool>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AddResponseBody {
    pub files: usize,
    pub chunks: usize,
    pub skipped: usize,
}

impl From<AddReport> for AddResponseBody {
    fn from(r: AddReport) -> Self {
        Self {
            files: r.files,
            chunks: r.chunks,
            skipped: r.skipped,
        }
    }
}

async fn add_handler(State(state): State<AppState>, Json(req): Json<AddRequest>) -> Response {
    if req.paths.is_empty() {
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(ErrorBody {
                kind: "bad_request".into(),
                detail: "paths must not be empty".into(),
            }),
        )
            .into_response();
    }
    let paths: Vec<PathBuf> = req.paths.iter().map(PathBuf::from).collect();
    match state.rag.add(&paths, req.domain.as_deref(), req.flat, req.embed).await {
        Ok(report) => Json(AddResponseBody::from(report)).into_response(),
        Err(e) => error_response(e),
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub top_k: Option<usize>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SearchResultBody {
    pub path: String,
    pub score: f32,
    pub content: String,
    pub domain: String,
}

impl From<SearchResult> for SearchResultBody {
    fn from(r: SearchResult) -> Self {
        Self {
            path: r.path,
            score: r.score,
            content: r.content,
            domain: r.domain,
        }
    }
}

async fn search_handler(State(state): State<AppState>, Json(req): Json<SearchRequest>) -> Response {
    if req.query.trim().is_empty() {
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(ErrorBody {
                kind: "bad_request".into(),
                detail: "query must not be empty".into(),
            }),
        )
            .into_response();
    }
    let mode = req.mode.as_deref().map(SearchMode::parse);
    match state
        .rag
        .search(&req.query, mode, req.domain.as_deref(), req.top_k)
        .await
    {
        Ok(results) => Json(results.into_iter().map(SearchResultBody::from).collect::<Vec<_>>()).into_response(),
        Err(e) => error_response(e),
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AskRequest {
    pub question: String,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub use_llm: bool,
    #[serde(default)]
    pub top_k: Option<usize>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AskResponseBody {
    pub context: String,
    pub sources: Vec<String>,
    pub answer: Option<String>,
}

impl From<AskResult> for AskResponseBody {
    fn from(r: AskResult) -> Self {
        Self {
            context: r.context,
            sources: r.sources.into_iter().map(|s| s.path).collect(),
            answer: r.answer,
        }
    }
}

async fn ask_handler(State(state): State<AppState>, Json(req): Json<AskRequest>) -> Response {
    if req.question.trim().is_empty() {
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(ErrorBody {
                kind: "bad_request".into(),
                detail: "question must not be empty".into(),
            }),
        )
            .into_response();
    }
    match state
        .rag
        .ask(&req.question, req.domain.as_deref(), req.use_llm, req.top_k)
        .await
    {
        Ok(result) => Json(AskResponseBody::from(result)).into_response(),
        Err(e) => error_response(e),
    }
}

async fn graph_handler(State(state): State<AppState>) -> Response {
    match state.rag.graph(None) {
        Ok(summary) => Json(summary_body(summary)).into_response(),
        Err(e) => error_response(e),
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct GraphSummaryBody {
    pub domains: usize,
    pub documents: usize,
    pub chunks: usize,
    pub edges: usize,
}

fn summary_body(s: GraphSummary) -> GraphSummaryBody {
    GraphSummaryBody {
        domains: s.domains,
        documents: s.documents,
        chunks: s.chunks,
        edges: s.edges,
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct NeighborsBody {
    pub outgoing: Vec<String>,
    pub incoming: Vec<String>,
}

fn neighbors_body(n: Neighbors) -> NeighborsBody {
    NeighborsBody {
        outgoing: n.outgoing.into_iter().map(|x| format!("{} {} {}", x.direction, x.edge_type, x.node)).collect(),
        incoming: n.incoming.into_iter().map(|x| format!("{} {} {}", x.direction, x.edge_type, x.node)).collect(),
    }
}

async fn neighbors_handler(State(state): State<AppState>, AxumPath(node): AxumPath<String>) -> Response {
    match state.rag.neighbors(&node) {
        Ok(n) => Json(neighbors_body(n)).into_response(),
        Err(e) => error_response(e),
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TraceHopBody {
    pub node: String,
    pub parent: Option<String>,
}

impl From<TraceHop> for TraceHopBody {
    fn from(h: TraceHop) -> Self {
        Self {
            node: h.node,
            parent: h.parent,
        }
    }
}

async fn trace_handler(State(state): State<AppState>, AxumPath(node): AxumPath<String>) -> Response {
    match state.rag.trace(&node) {
        Ok(hops) => Json(hops.into_iter().map(TraceHopBody::from).collect::<Vec<_>>()).into_response(),
        Err(e) => error_response(e),
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct LinkRequest {
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub edge_type: Option<String>,
}

async fn link_handler(State(state): State<AppState>, Json(req): Json<LinkRequest>) -> Response {
    match state.rag.link(&req.source, &req.target, req.edge_type.as_deref()).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => error_response(e),
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RelateRequest {
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub threshold: Option<f32>,
}

async fn relate_handler(State(state): State<AppState>, Json(req): Json<RelateRequest>) -> Response {
    match state.rag.relate(req.domain.as_deref(), req.threshold).await {
        Ok(added) => Json(serde_json::json!({ "edges_added": added })).into_response(),
        Err(e) => error_response(e),
    }
}

async fn health_handler() -> &'static str {
    "ok"
}

#[derive(OpenApi)]
#[openapi(paths(), components(schemas(ErrorBody, AddResponseBody, SearchResultBody, AskResponseBody)))]
pub struct ApiDoc;

/// Build the router exposing the library's operations over HTTP.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/add", post(add_handler))
        .route("/search", post(search_handler))
        .route("/ask", post(ask_handler))
        .route("/graph", get(graph_handler))
        .route("/neighbors/{*node}", get(neighbors_handler))
        .route("/trace/{*node}", get(trace_handler))
        .route("/link", post(link_handler))
        .route("/relate", post(relate_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tempfile::tempdir;
    use tower::ServiceExt;

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let dir = tempdir().unwrap();
        let rag = Ragdag::init(dir.path()).await.unwrap();
        let app = router(AppState::new(rag));

        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn search_rejects_empty_query() {
        let dir = tempdir().unwrap();
        let rag = Ragdag::init(dir.path()).await.unwrap();
        let app = router(AppState::new(rag));

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/search")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"query": ""}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }
}
