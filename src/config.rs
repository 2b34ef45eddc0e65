//! Sectioned INI configuration store for a `.ragdag` directory.
//!
//! The on-disk `.config` file is a small hand-rolled INI dialect:
//! section headers, `key = value` lines, `#`/`;` comments. Its exact
//! semantics (last-key-wins, atomic rewrite, comment handling) are
//! part of the store's format, so this is a hand-rolled parser rather
//! than a serde/ini-crate layer.

use crate::error::Result;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// One `(section.key, default)` pair created by `init`.
pub const DEFAULTS: &[(&str, &str)] = &[
    ("general.chunk_strategy", "heading"),
    ("general.chunk_size", "1000"),
    ("general.chunk_overlap", "100"),
    ("embedding.provider", "none"),
    ("embedding.model", "text-embedding-3-small"),
    ("embedding.dimensions", "1536"),
    ("embedding.endpoint", ""),
    ("llm.provider", "none"),
    ("llm.model", "gpt-4o-mini"),
    ("llm.max_context", "8000"),
    ("llm.base_url", ""),
    ("search.default_mode", "hybrid"),
    ("search.top_k", "10"),
    ("search.keyword_weight", "0.3"),
    ("search.vector_weight", "0.7"),
    ("edges.auto_relate", "false"),
    ("edges.relate_threshold", "0.8"),
    ("edges.record_queries", "false"),
];

/// A parsed line of the INI file, kept around so `set` can rewrite the
/// file while preserving comments, blank lines and key order.
#[derive(Debug, Clone)]
enum Line {
    Blank,
    Comment(String),
    Section(String),
    KeyValue { key: String, value: String },
    Other(String),
}

/// Handle to a store's `.config` file.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    /// Open (without requiring existence) the config file at `store_root/.config`.
    pub fn new(store_root: &Path) -> Self {
        Self {
            path: store_root.join(".config"),
        }
    }

    /// Create the file with every default in [`DEFAULTS`] if it does not exist yet.
    pub fn init(store_root: &Path) -> Result<Self> {
        let store = Self::new(store_root);
        if !store.path.exists() {
            let mut body = String::new();
            let mut section = String::new();
            for (dotted, value) in DEFAULTS {
                let (sec, key) = split_dotted(dotted).expect("built-in default key");
                if sec != section {
                    if !section.is_empty() {
                        body.push('\n');
                    }
                    body.push_str(&format!("[{}]\n", sec));
                    section = sec.to_string();
                }
                body.push_str(&format!("{} = {}\n", key, value));
            }
            write_atomic(&store.path, body.as_bytes())?;
        }
        Ok(store)
    }

    /// Get `section.key`, or `default` if the section/key is absent.
    /// Repeated keys in a section resolve to the last occurrence.
    pub fn get(&self, dotted: &str, default: &str) -> String {
        let (section, key) = match split_dotted(dotted) {
            Some(parts) => parts,
            None => return default.to_string(),
        };
        let lines = match self.read_lines() {
            Ok(lines) => lines,
            Err(_) => return default.to_string(),
        };
        let mut current = String::new();
        let mut found: Option<String> = None;
        for line in &lines {
            match line {
                Line::Section(name) => current = name.clone(),
                Line::KeyValue { key: k, value } if current == section && k == key => {
                    found = Some(value.clone());
                }
                _ => {}
            }
        }
        found.unwrap_or_else(|| default.to_string())
    }

    /// Convenience: parse the value as any `FromStr` type, falling back
    /// to `default` if the value is missing or unparsable.
    pub fn get_parsed<T: std::str::FromStr>(&self, dotted: &str, default: T) -> T {
        let raw = self.get(dotted, "");
        if raw.is_empty() {
            return default;
        }
        raw.parse().unwrap_or(default)
    }

    /// Set `section.key = value`, rewriting the section/key in place, or
    /// inserting the key (creating the section if needed). Atomic rewrite.
    pub fn set(&self, dotted: &str, value: &str) -> Result<()> {
        let (section, key) = split_dotted(dotted).ok_or_else(|| {
            crate::error::ConfigError::BadKey(dotted.to_string())
        })?;
        let mut lines = self.read_lines().unwrap_or_default();

        let mut section_start: Option<usize> = None;
        for (idx, line) in lines.iter().enumerate() {
            if let Line::Section(name) = line {
                if *name == section {
                    section_start = Some(idx);
                    break;
                }
            }
        }

        // Replace the first matching key within the section, if present.
        let mut replaced = false;
        let mut in_section = false;
        for line in lines.iter_mut() {
            match line {
                Line::Section(name) => in_section = *name == section,
                Line::KeyValue { key: k, value: v } if in_section && *k == key && !replaced => {
                    *v = value.to_string();
                    replaced = true;
                }
                _ => {}
            }
        }

        if !replaced {
            if let Some(start) = section_start {
                // Section exists, key doesn't: insert right before the next
                // section header (or EOF), i.e. at `section_end`.
                let insert_at = find_section_end(&lines, start);
                lines.insert(
                    insert_at,
                    Line::KeyValue {
                        key: key.to_string(),
                        value: value.to_string(),
                    },
                );
            } else {
                // Section itself is absent: append at EOF.
                if !lines.is_empty() {
                    lines.push(Line::Blank);
                }
                lines.push(Line::Section(section.clone()));
                lines.push(Line::KeyValue {
                    key: key.to_string(),
                    value: value.to_string(),
                });
            }
        }

        let body = render(&lines);
        write_atomic(&self.path, body.as_bytes())?;
        debug!(section = %section, key = %key, "config set");
        Ok(())
    }

    fn read_lines(&self) -> Result<Vec<Line>> {
        let text = fs::read_to_string(&self.path)?;
        Ok(parse_lines(&text))
    }
}

fn find_section_end(lines: &[Line], section_idx: usize) -> usize {
    for (idx, line) in lines.iter().enumerate().skip(section_idx + 1) {
        if matches!(line, Line::Section(_)) {
            return idx;
        }
    }
    lines.len()
}

fn split_dotted(dotted: &str) -> Option<(String, String)> {
    let mut parts = dotted.splitn(2, '.');
    let section = parts.next()?;
    let key = parts.next()?;
    if section.is_empty() || key.is_empty() {
        return None;
    }
    Some((section.to_string(), key.to_string()))
}

fn parse_lines(text: &str) -> Vec<Line> {
    text.lines()
        .map(|raw| {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                Line::Blank
            } else if trimmed.starts_with('#') || trimmed.starts_with(';') {
                Line::Comment(raw.to_string())
            } else if trimmed.starts_with('[') && trimmed.ends_with(']') {
                Line::Section(trimmed[1..trimmed.len() - 1].trim().to_string())
            } else if let Some(eq) = trimmed.find('=') {
                let key = trimmed[..eq].trim().to_string();
                let value = trimmed[eq + 1..].trim().to_string();
                if key.is_empty() {
                    Line::Other(raw.to_string())
                } else {
                    Line::KeyValue { key, value }
                }
            } else {
                Line::Other(raw.to_string())
            }
        })
        .collect()
}

fn render(lines: &[Line]) -> String {
    let mut out = String::new();
    for line in lines {
        match line {
            Line::Blank => out.push('\n'),
            Line::Comment(s) | Line::Other(s) => {
                out.push_str(s);
                out.push('\n');
            }
            Line::Section(name) => {
                out.push_str(&format!("[{}]\n", name));
            }
            Line::KeyValue { key, value } => {
                out.push_str(&format!("{} = {}\n", key, value));
            }
        }
    }
    out
}

/// Write `bytes` to `path` via a sibling temp file + rename, so a crash
/// mid-write never leaves a half-written config/log file.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;
    let tmp = dir.join(format!(
        ".{}.tmp.{}",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("file"),
        std::process::id()
    ));
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)?;
    Ok(())
}
