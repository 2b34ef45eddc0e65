//! Splitting extracted text into sequential `NN.txt` chunk files.
//!
//! Four strategies share a flush-on-boundary / overlap-from-tail-of-
//! previous-chunk core. Length is measured in Unicode scalars
//! (`chars().count()`), not raw bytes, so multi-byte UTF-8 content
//! chunks consistently.

use crate::parser::FileType;
use regex::Regex;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;
use tracing::warn;

/// One of the four chunking strategies named in the store format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Heading,
    Paragraph,
    Fixed,
    Function,
}

impl Strategy {
    pub fn parse(name: &str) -> Strategy {
        match name {
            "heading" => Strategy::Heading,
            "paragraph" => Strategy::Paragraph,
            "fixed" => Strategy::Fixed,
            "function" => Strategy::Function,
            other => {
                warn!(strategy = other, "unknown chunk strategy, falling back to fixed");
                Strategy::Fixed
            }
        }
    }

    /// Strategy auto-selected for a detected file type.
    pub fn for_file_type(file_type: FileType, configured_default: Strategy) -> Strategy {
        match file_type {
            FileType::Markdown => Strategy::Heading,
            FileType::Code => Strategy::Function,
            _ => configured_default,
        }
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Take the last `n` characters of `s` (by scalar count, not bytes).
fn tail_chars(s: &str, n: usize) -> String {
    if n == 0 {
        return String::new();
    }
    let total = char_len(s);
    if total <= n {
        return s.to_string();
    }
    s.chars().skip(total - n).collect()
}

fn function_boundary_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^\s*(?:pub\s+)?(?:async\s+)?(?:def|class|function|func|fn|export)\s+\w+")
            .expect("static function boundary pattern")
    })
}

fn looks_like_function_boundary(line: &str) -> bool {
    if function_boundary_pattern().is_match(line) {
        return true;
    }
    // bash-style `name() {` header
    let trimmed = line.trim_start();
    if let Some(paren) = trimmed.find("()") {
        let head = &trimmed[..paren];
        if !head.is_empty() && head.chars().all(|c| c.is_alphanumeric() || c == '_') {
            return true;
        }
    }
    false
}

/// Split `text` into chunks per `strategy` and write them as sequential
/// `NN.txt` files under `out_dir`. Returns the number of chunks written.
/// Empty-after-trim chunks are never written — the sequence number does
/// not advance for them.
pub fn chunk_to_dir(
    text: &str,
    out_dir: &Path,
    strategy: Strategy,
    chunk_size: usize,
    overlap: usize,
) -> std::io::Result<usize> {
    let pieces = chunk_text(text, strategy, chunk_size, overlap);
    fs::create_dir_all(out_dir)?;
    let width = digit_width(pieces.len());
    let mut count = 0usize;
    for piece in &pieces {
        count += 1;
        let name = format!("{:0width$}.txt", count, width = width);
        fs::write(out_dir.join(name), piece)?;
    }
    Ok(count)
}

fn digit_width(count: usize) -> usize {
    // Always at least 2 digits; widen only when more chunks demand it,
    // remaining compatible with readers expecting 2-digit names.
    let digits = count.to_string().len();
    digits.max(2)
}

/// Pure in-memory chunking, split out from `chunk_to_dir` for testability.
pub fn chunk_text(text: &str, strategy: Strategy, chunk_size: usize, overlap: usize) -> Vec<String> {
    match strategy {
        Strategy::Heading => chunk_heading(text, chunk_size, overlap),
        Strategy::Paragraph => chunk_paragraph(text, chunk_size, overlap),
        Strategy::Fixed => chunk_fixed(text, chunk_size, overlap),
        Strategy::Function => chunk_function(text, chunk_size, overlap),
    }
}

fn push_with_overlap(chunks: &mut Vec<String>, buffer: &mut String, overlap: usize) {
    let trimmed = buffer.trim();
    if !trimmed.is_empty() {
        chunks.push(trimmed.to_string());
    }
    *buffer = tail_chars(trimmed, overlap);
    if !buffer.is_empty() {
        buffer.push('\n');
    }
}

fn chunk_heading(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut buffer = String::new();
    for line in text.lines() {
        if line.starts_with('#') && !buffer.trim().is_empty() {
            push_with_overlap(&mut chunks, &mut buffer, overlap);
        }
        buffer.push_str(line);
        buffer.push('\n');
        if char_len(&buffer) >= chunk_size {
            push_with_overlap(&mut chunks, &mut buffer, overlap);
        }
    }
    if !buffer.trim().is_empty() {
        chunks.push(buffer.trim().to_string());
    }
    chunks
}

fn chunk_paragraph(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let paragraphs: Vec<&str> = text.split("\n\n").collect();
    let mut chunks = Vec::new();
    let mut buffer = String::new();
    for para in paragraphs {
        if para.trim().is_empty() {
            continue;
        }
        let candidate_len = char_len(&buffer) + if buffer.is_empty() { 0 } else { 2 } + char_len(para);
        if !buffer.is_empty() && candidate_len > chunk_size {
            push_with_overlap(&mut chunks, &mut buffer, overlap);
        }
        if !buffer.is_empty() {
            buffer.push_str("\n\n");
        }
        buffer.push_str(para);
    }
    if !buffer.trim().is_empty() {
        chunks.push(buffer.trim().to_string());
    }
    chunks
}

fn chunk_fixed(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut buffer = String::new();
    for line in text.lines() {
        buffer.push_str(line);
        buffer.push('\n');
        if char_len(&buffer) >= chunk_size {
            push_with_overlap(&mut chunks, &mut buffer, overlap);
        }
    }
    if !buffer.trim().is_empty() {
        chunks.push(buffer.trim().to_string());
    }
    chunks
}

fn chunk_function(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let defensive_limit = chunk_size * 2;
    let mut chunks = Vec::new();
    let mut buffer = String::new();
    for line in text.lines() {
        if looks_like_function_boundary(line) && !buffer.trim().is_empty() {
            push_with_overlap(&mut chunks, &mut buffer, overlap);
        }
        buffer.push_str(line);
        buffer.push('\n');
        if char_len(&buffer) >= defensive_limit {
            push_with_overlap(&mut chunks, &mut buffer, overlap);
        }
    }
    if !buffer.trim().is_empty() {
        chunks.push(buffer.trim().to_string());
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn heading_doc() -> String {
        let body = "word ".repeat(60);
        format!(
            "# Heading One\n{body}\n# Heading Two\n{body}\n# Heading Three\n{body}",
            body = body.trim()
        )
    }

    #[test]
    fn heading_strategy_splits_on_headers() {
        let doc = heading_doc();
        let chunks = chunk_text(&doc, Strategy::Heading, 1000, 0);
        assert_eq!(chunks.len(), 3);
        assert!(chunks[0].starts_with("# Heading One"));
        assert!(chunks[1].starts_with("# Heading Two"));
        assert!(chunks[2].starts_with("# Heading Three"));
    }

    #[test]
    fn fixed_strategy_flushes_on_size() {
        let doc = "a".repeat(250);
        let lines: String = doc
            .as_bytes()
            .chunks(10)
            .map(|c| std::str::from_utf8(c).unwrap())
            .collect::<Vec<_>>()
            .join("\n");
        let chunks = chunk_text(&lines, Strategy::Fixed, 50, 0);
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(char_len(c) > 0);
        }
    }

    #[test]
    fn paragraph_strategy_joins_with_blank_line() {
        let doc = "Para one.\n\nPara two.\n\nPara three.";
        let chunks = chunk_text(doc, Strategy::Paragraph, 1000, 0);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0], "Para one.\n\nPara two.\n\nPara three.");
    }

    #[test]
    fn paragraph_strategy_flushes_when_exceeding_size() {
        let doc = format!("{}\n\n{}", "a".repeat(40), "b".repeat(40));
        let chunks = chunk_text(&doc, Strategy::Paragraph, 50, 0);
        assert_eq!(chunks.len(), 2);
    }

    #[test]
    fn function_strategy_splits_on_fn_boundaries() {
        let doc = "fn one() {\n  body\n}\nfn two() {\n  body\n}\n";
        let chunks = chunk_text(doc, Strategy::Function, 1000, 0);
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].starts_with("fn one"));
        assert!(chunks[1].starts_with("fn two"));
    }

    #[test]
    fn unknown_strategy_falls_back_to_fixed() {
        assert_eq!(Strategy::parse("bogus"), Strategy::Fixed);
    }

    #[test]
    fn empty_chunks_are_never_emitted() {
        let chunks = chunk_text("\n\n\n   \n", Strategy::Fixed, 10, 0);
        assert!(chunks.is_empty());
    }

    #[test]
    fn overlap_carries_tail_into_next_chunk() {
        let doc = format!("{}\n{}\n", "x".repeat(30), "y".repeat(30));
        let chunks = chunk_text(&doc, Strategy::Fixed, 30, 10);
        assert!(chunks.len() >= 2);
        let tail_of_first = tail_chars(chunks[0].trim(), 10);
        assert!(chunks[1].starts_with(&tail_of_first));
    }

    #[test]
    fn chunk_to_dir_writes_sequential_files() {
        let dir = tempfile::tempdir().unwrap();
        let doc = heading_doc();
        let count = chunk_to_dir(&doc, dir.path(), Strategy::Heading, 1000, 0).unwrap();
        assert_eq!(count, 3);
        assert!(dir.path().join("01.txt").exists());
        assert!(dir.path().join("02.txt").exists());
        assert!(dir.path().join("03.txt").exists());
    }

    #[test]
    fn for_file_type_auto_selects() {
        assert_eq!(
            Strategy::for_file_type(FileType::Markdown, Strategy::Fixed),
            Strategy::Heading
        );
        assert_eq!(
            Strategy::for_file_type(FileType::Code, Strategy::Fixed),
            Strategy::Function
        );
        assert_eq!(
            Strategy::for_file_type(FileType::Text, Strategy::Paragraph),
            Strategy::Paragraph
        );
    }
}
