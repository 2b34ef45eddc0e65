//! Tool-call JSON-RPC surface over stdio, one method per library
//! operation. Uses MCP-shaped request/response types
//! (`ToolCall`/`ToolResult`/`ToolContent`) on the server side: this
//! crate is the thing an MCP-style tool client would call into.
//!
//! Requests are newline-delimited JSON-RPC 2.0 objects on stdin;
//! responses are written newline-delimited to stdout. This is the
//! default entry point for `ragdag-rpc`.

use crate::{Ragdag, RagdagError, SearchMode};
use jsonrpc_core::{IoHandler, Params, Value};
use serde::{Deserialize, Serialize};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Content block in a tool result, matching MCP's text/image/resource shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ToolContent {
    #[serde(rename = "text")]
    Text { text: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolResult {
    pub content: Vec<ToolContent>,
    pub is_error: bool,
}

impl ToolResult {
    /// Wrap a human-readable text block as a successful tool result.
    fn ok_text(text: String) -> Value {
        serde_json::to_value(ToolResult {
            content: vec![ToolContent::Text { text }],
            is_error: false,
        })
        .unwrap_or(Value::Null)
    }

    fn err_text(err: &RagdagError) -> Value {
        serde_json::to_value(ToolResult {
            content: vec![ToolContent::Text {
                text: format!("Error ({}): {}", err.kind(), err),
            }],
            is_error: true,
        })
        .unwrap_or(Value::Null)
    }
}

/// Numbered-list / markdown-style formatting for each operation's result:
/// numbered search results, markdown-style sources in ask.
mod format {
    use crate::ask::AskResult;
    use crate::graph::{GraphSummary, Neighbors, TraceHop};
    use crate::maintenance::{GcReport, VerifyReport};
    use crate::search::SearchResult;
    use crate::AddReport;

    pub fn add_report(r: &AddReport) -> String {
        format!(
            "Ingested {} file(s) into {} chunk(s) ({} skipped).",
            r.files, r.chunks, r.skipped
        )
    }

    pub fn search_results(results: &[SearchResult]) -> String {
        if results.is_empty() {
            return "No results.".to_string();
        }
        let mut out = String::new();
        for (idx, r) in results.iter().enumerate() {
            let preview: String = r.content.chars().take(200).collect();
            out.push_str(&format!(
                "{}. {} (score: {:.4}, domain: {})\n   {}\n\n",
                idx + 1,
                r.path,
                r.score,
                r.domain,
                preview.replace('\n', " ")
            ));
        }
        out.trim_end().to_string()
    }

    pub fn ask_result(r: &AskResult) -> String {
        let mut out = String::new();
        if let Some(answer) = &r.answer {
            out.push_str("## Answer\n");
            out.push_str(answer);
            out.push_str("\n\n");
        }
        out.push_str("## Sources\n");
        if r.sources.is_empty() {
            out.push_str("(none)\n");
        } else {
            for s in &r.sources {
                out.push_str(&format!("- {} (score: {:.4})\n", s.path, s.score));
            }
        }
        out.push_str("\n## Context\n");
        out.push_str(&r.context);
        out.trim_end().to_string()
    }

    pub fn graph_summary(s: &GraphSummary) -> String {
        let mut out = format!(
            "Domains: {}\nDocuments: {}\nChunks: {}\nEdges: {}\n",
            s.domains, s.documents, s.chunks, s.edges
        );
        let mut types: Vec<(&String, &usize)> = s.edges_by_type.iter().collect();
        types.sort_by_key(|(k, _)| k.clone());
        for (edge_type, count) in types {
            out.push_str(&format!("  {}: {}\n", edge_type, count));
        }
        out.trim_end().to_string()
    }

    pub fn neighbors(node: &str, n: &Neighbors) -> String {
        let mut out = format!("Neighbors of {node}:\n\nOutgoing:\n");
        if n.outgoing.is_empty() {
            out.push_str("  (none)\n");
        }
        for e in &n.outgoing {
            out.push_str(&format!("  {} {} {}\n", e.direction, e.edge_type, e.node));
        }
        out.push_str("\nIncoming:\n");
        if n.incoming.is_empty() {
            out.push_str("  (none)\n");
        }
        for e in &n.incoming {
            out.push_str(&format!("  {} {} {}\n", e.direction, e.edge_type, e.node));
        }
        out.trim_end().to_string()
    }

    pub fn trace(hops: &[TraceHop]) -> String {
        if hops.is_empty() {
            return "(no hops)".to_string();
        }
        let mut out = String::new();
        for (idx, hop) in hops.iter().enumerate() {
            match &hop.parent {
                Some(parent) => out.push_str(&format!("{}. {} -> {}\n", idx + 1, hop.node, parent)),
                None => out.push_str(&format!("{}. {} (origin)\n", idx + 1, hop.node)),
            }
        }
        out.trim_end().to_string()
    }

    pub fn verify_report(r: &VerifyReport) -> String {
        let mut out = format!(
            "Chunks scanned: {}\nEmbeddings OK: {}\nOrphan edges: {}\nStale processed: {}\n",
            r.chunks_scanned, r.embeddings_ok, r.orphan_edges, r.stale_processed
        );
        if !r.embeddings_corrupt.is_empty() {
            out.push_str("Corrupt embeddings:\n");
            for c in &r.embeddings_corrupt {
                out.push_str(&format!("  - {c}\n"));
            }
        }
        if r.has_issues() {
            out.push_str("\nIssues found.");
        } else {
            out.push_str("\nNo issues found.");
        }
        out
    }

    pub fn gc_report(r: &GcReport) -> String {
        format!(
            "Removed {} edge(s) and {} processed record(s).",
            r.edges_removed, r.processed_removed
        )
    }
}

fn param_str(params: &serde_json::Map<String, Value>, key: &str) -> Option<String> {
    params.get(key).and_then(|v| v.as_str()).map(|s| s.to_string())
}

fn as_map(params: Params) -> serde_json::Map<String, Value> {
    match params.parse::<Value>() {
        Ok(Value::Object(map)) => map,
        _ => serde_json::Map::new(),
    }
}

/// Build the JSON-RPC method table: one method per `Ragdag` operation,
/// each accepting a JSON object of named parameters and returning an
/// MCP-shaped `ToolResult`.
pub fn build_handler(rag: Arc<Ragdag>) -> IoHandler {
    let mut io = IoHandler::new();

    {
        let rag = rag.clone();
        io.add_method("ragdag.add", move |params: Params| {
            let rag = rag.clone();
            async move {
                let map = as_map(params);
                let paths: Vec<PathBuf> = map
                    .get("paths")
                    .and_then(|v| v.as_array())
                    .map(|arr| arr.iter().filter_map(|p| p.as_str()).map(PathBuf::from).collect())
                    .unwrap_or_default();
                let domain = param_str(&map, "domain");
                let flat = map.get("flat").and_then(|v| v.as_bool()).unwrap_or(false);
                let embed = map.get("embed").and_then(|v| v.as_bool());
                match rag.add(&paths, domain.as_deref(), flat, embed).await {
                    Ok(report) => Ok(ToolResult::ok_text(format::add_report(&report))),
                    Err(e) => {
                        error!(error = %e, "ragdag.add failed");
                        Ok(ToolResult::err_text(&e))
                    }
                }
            }
        });
    }

    {
        let rag = rag.clone();
        io.add_method("ragdag.search", move |params: Params| {
            let rag = rag.clone();
            async move {
                let map = as_map(params);
                let query = param_str(&map, "query").unwrap_or_default();
                let mode = param_str(&map, "mode").map(|m| SearchMode::parse(&m));
                let domain = param_str(&map, "domain");
                let top_k = map.get("top_k").and_then(|v| v.as_u64()).map(|n| n as usize);
                match rag.search(&query, mode, domain.as_deref(), top_k).await {
                    Ok(results) => Ok(ToolResult::ok_text(format::search_results(&results))),
                    Err(e) => {
                        error!(error = %e, "ragdag.search failed");
                        Ok(ToolResult::err_text(&e))
                    }
                }
            }
        });
    }

    {
        let rag = rag.clone();
        io.add_method("ragdag.ask", move |params: Params| {
            let rag = rag.clone();
            async move {
                let map = as_map(params);
                let question = param_str(&map, "question").unwrap_or_default();
                let domain = param_str(&map, "domain");
                let use_llm = map.get("use_llm").and_then(|v| v.as_bool()).unwrap_or(false);
                let top_k = map.get("top_k").and_then(|v| v.as_u64()).map(|n| n as usize);
                match rag.ask(&question, domain.as_deref(), use_llm, top_k).await {
                    Ok(result) => Ok(ToolResult::ok_text(format::ask_result(&result))),
                    Err(e) => {
                        error!(error = %e, "ragdag.ask failed");
                        Ok(ToolResult::err_text(&e))
                    }
                }
            }
        });
    }

    {
        let rag = rag.clone();
        io.add_method("ragdag.graph", move |params: Params| {
            let rag = rag.clone();
            async move {
                let map = as_map(params);
                let domain = param_str(&map, "domain");
                match rag.graph(domain.as_deref()) {
                    Ok(summary) => Ok(ToolResult::ok_text(format::graph_summary(&summary))),
                    Err(e) => Ok(ToolResult::err_text(&e)),
                }
            }
        });
    }

    {
        let rag = rag.clone();
        io.add_method("ragdag.neighbors", move |params: Params| {
            let rag = rag.clone();
            async move {
                let map = as_map(params);
                let node = param_str(&map, "node").unwrap_or_default();
                match rag.neighbors(&node) {
                    Ok(n) => Ok(ToolResult::ok_text(format::neighbors(&node, &n))),
                    Err(e) => Ok(ToolResult::err_text(&e)),
                }
            }
        });
    }

    {
        let rag = rag.clone();
        io.add_method("ragdag.trace", move |params: Params| {
            let rag = rag.clone();
            async move {
                let map = as_map(params);
                let node = param_str(&map, "node").unwrap_or_default();
                match rag.trace(&node) {
                    Ok(hops) => Ok(ToolResult::ok_text(format::trace(&hops))),
                    Err(e) => Ok(ToolResult::err_text(&e)),
                }
            }
        });
    }

    {
        let rag = rag.clone();
        io.add_method("ragdag.link", move |params: Params| {
            let rag = rag.clone();
            async move {
                let map = as_map(params);
                let source = param_str(&map, "source").unwrap_or_default();
                let target = param_str(&map, "target").unwrap_or_default();
                let edge_type = param_str(&map, "edge_type");
                match rag.link(&source, &target, edge_type.as_deref()).await {
                    Ok(()) => Ok(ToolResult::ok_text(format!(
                        "Linked {source} -> {target} ({}).",
                        edge_type.as_deref().unwrap_or("references")
                    ))),
                    Err(e) => Ok(ToolResult::err_text(&e)),
                }
            }
        });
    }

    {
        let rag = rag.clone();
        io.add_method("ragdag.relate", move |params: Params| {
            let rag = rag.clone();
            async move {
                let map = as_map(params);
                let domain = param_str(&map, "domain");
                let threshold = map.get("threshold").and_then(|v| v.as_f64()).map(|f| f as f32);
                match rag.relate(domain.as_deref(), threshold).await {
                    Ok(added) => Ok(ToolResult::ok_text(format!("Added {added} related_to edge(s)."))),
                    Err(e) => Ok(ToolResult::err_text(&e)),
                }
            }
        });
    }

    {
        let rag = rag.clone();
        io.add_method("ragdag.verify", move |_params: Params| {
            let rag = rag.clone();
            async move {
                match rag.verify() {
                    Ok(report) => Ok(ToolResult::ok_text(format::verify_report(&report))),
                    Err(e) => Ok(ToolResult::err_text(&e)),
                }
            }
        });
    }

    {
        let rag = rag.clone();
        io.add_method("ragdag.repair", move |_params: Params| {
            let rag = rag.clone();
            async move {
                match rag.repair().await {
                    Ok(removed) => Ok(ToolResult::ok_text(format!("Removed {removed} orphaned edge(s)."))),
                    Err(e) => Ok(ToolResult::err_text(&e)),
                }
            }
        });
    }

    {
        let rag = rag.clone();
        io.add_method("ragdag.gc", move |_params: Params| {
            let rag = rag.clone();
            async move {
                match rag.gc().await {
                    Ok(report) => Ok(ToolResult::ok_text(format::gc_report(&report))),
                    Err(e) => Ok(ToolResult::err_text(&e)),
                }
            }
        });
    }

    {
        let rag = rag.clone();
        io.add_method("ragdag.reindex", move |params: Params| {
            let rag = rag.clone();
            async move {
                let map = as_map(params);
                let domain = param_str(&map, "domain");
                match rag.reindex(domain.as_deref()).await {
                    Ok(count) => Ok(ToolResult::ok_text(format!("Re-embedded {count} chunk(s)."))),
                    Err(e) => Ok(ToolResult::err_text(&e)),
                }
            }
        });
    }

    io
}

/// Read JSON-RPC requests line by line from stdin, dispatch through
/// `handler`, write the response line to stdout. Blocks until stdin
/// closes (EOF), matching a long-lived tool-server process.
pub async fn serve_stdio(rag: Arc<Ragdag>) -> crate::Result<()> {
    let handler = build_handler(rag);
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    info!("ragdag rpc server listening on stdio");
    for line in stdin.lock().lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        debug!(request = %line, "rpc request");
        let response = handler.handle_request(&line).await;
        if let Some(response) = response {
            writeln!(stdout, "{response}")?;
            stdout.flush()?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn graph_method_returns_zero_summary_for_empty_store() {
        let dir = tempdir().unwrap();
        let rag = Arc::new(Ragdag::init(dir.path()).await.unwrap());
        let handler = build_handler(rag);
        let request = r#"{"jsonrpc":"2.0","method":"ragdag.graph","params":{},"id":1}"#;
        let response = handler.handle_request(request).await.unwrap();
        assert!(response.contains("\"result\""));
        assert!(!response.contains("\"error\""));
    }

    #[tokio::test]
    async fn link_then_neighbors_round_trips_through_rpc() {
        let dir = tempdir().unwrap();
        let rag = Arc::new(Ragdag::init(dir.path()).await.unwrap());
        let handler = build_handler(rag);
        let link_req = r#"{"jsonrpc":"2.0","method":"ragdag.link","params":{"source":"a/01.txt","target":"b/01.txt"},"id":1}"#;
        handler.handle_request(link_req).await.unwrap();

        let neighbors_req = r#"{"jsonrpc":"2.0","method":"ragdag.neighbors","params":{"node":"a/01.txt"},"id":2}"#;
        let response = handler.handle_request(neighbors_req).await.unwrap();
        assert!(response.contains("b/01.txt"));
    }

    #[tokio::test]
    async fn unknown_method_is_rejected() {
        let dir = tempdir().unwrap();
        let rag = Arc::new(Ragdag::init(dir.path()).await.unwrap());
        let handler = build_handler(rag);
        let request = r#"{"jsonrpc":"2.0","method":"ragdag.bogus","params":{},"id":1}"#;
        let response = handler.handle_request(request).await.unwrap();
        assert!(response.contains("\"error\""));
    }
}
