//! Storage efficiency figures for record files.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use aicf_format::Category;
use regex::Regex;
use serde::Serialize;
use tracing::debug;

use crate::store::INDEX_FILE;

/// Rough per-token byte cost of the same content as pretty JSON.
const JSON_BYTES_PER_TOKEN: usize = 15;

fn token_split_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[\s\W]+").expect("token split regex is valid"))
}

fn block_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"@[A-Z_]+").expect("semantic block regex is valid"))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileStats {
    pub path: String,
    /// Non-blank lines.
    pub lines: usize,
    /// Approximate tokens: word runs separated by whitespace or punctuation.
    pub tokens: usize,
    pub bytes: usize,
    /// Section headers (`@NAME`).
    pub semantic_blocks: usize,
    pub token_byte_ratio: f64,
}

/// Totals over a set of files.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    pub files: Vec<FileStats>,
    pub total_tokens: usize,
    pub total_bytes: usize,
    pub total_semantic_blocks: usize,
    pub estimated_json_bytes: usize,
    /// Percentage saved against `estimated_json_bytes`; 0 when there is nothing
    /// to compare.
    pub compression_vs_json: f64,
}

pub fn count_tokens(text: &str) -> usize {
    token_split_regex()
        .split(text)
        .filter(|word| !word.is_empty())
        .count()
}

pub fn analyze_text(path: &str, text: &str) -> FileStats {
    let bytes = text.len();
    let tokens = count_tokens(text);
    FileStats {
        path: path.to_string(),
        lines: text.lines().filter(|l| !l.trim().is_empty()).count(),
        tokens,
        bytes,
        semantic_blocks: block_regex().find_iter(text).count(),
        token_byte_ratio: if bytes == 0 {
            0.0
        } else {
            tokens as f64 / bytes as f64
        },
    }
}

pub fn analyze_file(path: &Path) -> io::Result<FileStats> {
    let text = fs::read_to_string(path)?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    Ok(analyze_text(&name, &text))
}

/// Analyse the index and every category record under `records_dir`.
/// Missing files are skipped.
pub fn analyze_store(records_dir: &Path) -> io::Result<StoreStats> {
    let candidates: Vec<PathBuf> = std::iter::once(records_dir.join(INDEX_FILE))
        .chain(Category::ALL.iter().map(|c| records_dir.join(c.file_name())))
        .collect();

    let mut files = Vec::new();
    for path in candidates {
        match analyze_file(&path) {
            Ok(stats) => files.push(stats),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "record file missing; skipped");
            }
            Err(e) => return Err(e),
        }
    }

    let total_tokens = files.iter().map(|f| f.tokens).sum();
    let total_bytes = files.iter().map(|f| f.bytes).sum();
    let total_semantic_blocks = files.iter().map(|f| f.semantic_blocks).sum();
    let estimated_json_bytes = total_tokens * JSON_BYTES_PER_TOKEN;
    let compression_vs_json = if estimated_json_bytes == 0 {
        0.0
    } else {
        (estimated_json_bytes as f64 - total_bytes as f64) / estimated_json_bytes as f64 * 100.0
    };

    Ok(StoreStats {
        files,
        total_tokens,
        total_bytes,
        total_semantic_blocks,
        estimated_json_bytes,
        compression_vs_json,
    })
}
