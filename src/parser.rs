//! File-type detection and text extraction.
//!
//! Native formats (text, markdown, csv, json, code, config) are parsed
//! in-process. PDF/HTML/DOCX are delegated to external decoders invoked
//! by name, treated as pluggable capabilities — this crate never links
//! a PDF or DOCX parsing library.

use crate::error::{ParseError, Result};
use regex::Regex;
use std::path::Path;
use std::process::Command;
use std::sync::OnceLock;
use tracing::{debug, warn};

/// Detected document type, used to pick a chunking strategy and a parse path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileType {
    Markdown,
    Text,
    Pdf,
    Html,
    Docx,
    Csv,
    Json,
    Code,
    Config,
    Unknown,
}

impl FileType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileType::Markdown => "markdown",
            FileType::Text => "text",
            FileType::Pdf => "pdf",
            FileType::Html => "html",
            FileType::Docx => "docx",
            FileType::Csv => "csv",
            FileType::Json => "json",
            FileType::Code => "code",
            FileType::Config => "config",
            FileType::Unknown => "unknown",
        }
    }
}

const CODE_EXTS: &[&str] = &[
    "rs", "py", "js", "ts", "tsx", "jsx", "go", "java", "c", "h", "cpp", "hpp", "cc", "rb", "php",
    "sh", "bash", "zsh", "swift", "kt", "scala", "lua", "pl", "sql",
];
const CONFIG_EXTS: &[&str] = &["ini", "toml", "cfg", "conf", "env"];

/// Identify the file type from its path. Unknown extensions fall back to
/// a best-effort MIME probe; absence of that tool is tolerated.
pub fn detect(path: &Path) -> FileType {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();
    match ext.as_str() {
        "md" | "markdown" => return FileType::Markdown,
        "txt" => return FileType::Text,
        "pdf" => return FileType::Pdf,
        "html" | "htm" => return FileType::Html,
        "docx" => return FileType::Docx,
        "csv" => return FileType::Csv,
        "json" => return FileType::Json,
        _ => {}
    }
    if CODE_EXTS.contains(&ext.as_str()) {
        return FileType::Code;
    }
    if CONFIG_EXTS.contains(&ext.as_str()) {
        return FileType::Config;
    }
    probe_mime(path).unwrap_or(FileType::Unknown)
}

/// Best-effort MIME probe via the `file` command. Missing tool is not an error.
fn probe_mime(path: &Path) -> Option<FileType> {
    let output = Command::new("file")
        .arg("--mime-type")
        .arg("-b")
        .arg(path)
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let mime = String::from_utf8_lossy(&output.stdout).trim().to_string();
    match mime.as_str() {
        m if m.starts_with("text/") => Some(FileType::Text),
        "application/json" => Some(FileType::Json),
        "application/pdf" => Some(FileType::Pdf),
        _ => None,
    }
}

/// Extract `path`'s text according to `file_type`.
pub fn parse(path: &Path, file_type: FileType) -> Result<String> {
    match file_type {
        FileType::Text | FileType::Code | FileType::Config => read_lossy(path),
        FileType::Markdown => {
            let raw = read_lossy(path)?;
            Ok(strip_frontmatter(&raw))
        }
        FileType::Csv => parse_csv(path),
        FileType::Json => parse_json(path),
        FileType::Pdf => run_external("pdftotext", &["-layout", path_str(path)?, "-"]),
        FileType::Docx => run_external("pandoc", &["-t", "plain", path_str(path)?]),
        FileType::Html => parse_html(path),
        FileType::Unknown => Err(ParseError::Unsupported(format!("{}", path.display())).into()),
    }
}

fn path_str(path: &Path) -> Result<&str> {
    path.to_str()
        .ok_or_else(|| ParseError::Decode(format!("non-utf8 path {}", path.display())).into())
}

fn read_lossy(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path).map_err(|e| ParseError::Io {
        path: path.display().to_string(),
        source: e,
    })?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Strip a leading `---`...`---` YAML frontmatter block, if present.
fn strip_frontmatter(text: &str) -> String {
    let mut lines = text.lines();
    match lines.next() {
        Some(first) if first.trim() == "---" => {}
        _ => return text.to_string(),
    }
    let rest: Vec<&str> = lines.collect();
    if let Some(end_idx) = rest.iter().position(|l| l.trim() == "---") {
        rest[end_idx + 1..].join("\n")
    } else {
        text.to_string()
    }
}

fn parse_csv(path: &Path) -> Result<String> {
    let raw = read_lossy(path)?;
    let mut lines = raw.lines();
    let header_line = match lines.next() {
        Some(h) => h,
        None => return Ok(String::new()),
    };
    let headers: Vec<String> = split_csv_row(header_line)
        .into_iter()
        .map(|s| unquote(&s))
        .collect();

    let mut out = String::new();
    for (idx, line) in lines.enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        out.push_str(&format!("--- Record {} ---\n", idx + 1));
        let fields = split_csv_row(line);
        for (i, field) in fields.iter().enumerate() {
            let header = headers.get(i).cloned().unwrap_or_else(|| format!("col{}", i));
            out.push_str(&format!("{}: {}\n", header, unquote(field)));
        }
        out.push('\n');
    }
    Ok(out)
}

fn split_csv_row(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' => {
                if in_quotes && chars.peek() == Some(&'"') {
                    current.push('"');
                    chars.next();
                } else {
                    in_quotes = !in_quotes;
                }
            }
            ',' if !in_quotes => {
                fields.push(std::mem::take(&mut current));
            }
            _ => current.push(c),
        }
    }
    fields.push(current);
    fields
}

fn unquote(field: &str) -> String {
    let trimmed = field.trim();
    if trimmed.len() >= 2 && trimmed.starts_with('"') && trimmed.ends_with('"') {
        trimmed[1..trimmed.len() - 1].to_string()
    } else {
        trimmed.to_string()
    }
}

fn parse_json(path: &Path) -> Result<String> {
    let raw = read_lossy(path)?;
    match serde_json::from_str::<serde_json::Value>(&raw) {
        Ok(value) => {
            let mut out = String::new();
            flatten_json(&value, String::new(), &mut out);
            Ok(out)
        }
        Err(_) => Ok(raw),
    }
}

fn flatten_json(value: &serde_json::Value, prefix: String, out: &mut String) {
    match value {
        serde_json::Value::Object(map) => {
            for (k, v) in map {
                let path = if prefix.is_empty() {
                    k.clone()
                } else {
                    format!("{}.{}", prefix, k)
                };
                flatten_json(v, path, out);
            }
        }
        serde_json::Value::Array(items) => {
            for (i, v) in items.iter().enumerate() {
                let path = format!("{}[{}]", prefix, i);
                flatten_json(v, path, out);
            }
        }
        leaf => {
            out.push_str(&format!("{}: {}\n", prefix, leaf_to_string(leaf)));
        }
    }
}

fn leaf_to_string(v: &serde_json::Value) -> String {
    match v {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

fn parse_html(path: &Path) -> Result<String> {
    if tool_available("pandoc") {
        return run_external("pandoc", &["-t", "plain", path_str(path)?]);
    }
    // Fallback: crude tag stripping, good enough when pandoc is absent.
    let raw = read_lossy(path)?;
    Ok(strip_tags(&raw))
}

fn tag_pattern() -> &'static Regex {
    static TAG: OnceLock<Regex> = OnceLock::new();
    TAG.get_or_init(|| Regex::new(r"<[^>]*>").expect("static tag pattern"))
}

fn strip_tags(html: &str) -> String {
    let mut out = tag_pattern().replace_all(html, "").into_owned();
    out.retain(|c| c != '\r');
    out
}

fn run_external(tool: &str, args: &[&str]) -> Result<String> {
    if !tool_available(tool) {
        return Err(ParseError::Unavailable {
            kind: tool.to_string(),
            reason: format!("`{}` not found on PATH", tool),
        }
        .into());
    }
    let output = Command::new(tool).args(args).output().map_err(|e| {
        ParseError::Unavailable {
            kind: tool.to_string(),
            reason: e.to_string(),
        }
    })?;
    if !output.status.success() {
        warn!(tool, status = ?output.status, "external decoder exited non-zero");
        return Err(ParseError::Decode(format!(
            "{} exited with {:?}",
            tool, output.status
        ))
        .into());
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Cache per-process whether a tool is on PATH, so batch ingest doesn't
/// re-spawn a probe process for every file.
fn tool_available(tool: &str) -> bool {
    static PDFTOTEXT: OnceLock<bool> = OnceLock::new();
    static PANDOC: OnceLock<bool> = OnceLock::new();
    let cell = match tool {
        "pdftotext" => &PDFTOTEXT,
        "pandoc" => &PANDOC,
        _ => {
            debug!(tool, "tool_available: unrecognized tool, probing uncached");
            return probe_tool(tool);
        }
    };
    *cell.get_or_init(|| probe_tool(tool))
}

fn probe_tool(tool: &str) -> bool {
    Command::new(tool)
        .arg("-v")
        .output()
        .map(|o| o.status.success() || !o.stdout.is_empty() || !o.stderr.is_empty())
        .unwrap_or(false)
}
