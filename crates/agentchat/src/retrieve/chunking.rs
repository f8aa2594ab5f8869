//! Document discovery and line-packed chunking

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

use super::tokenizer::Tokenizer;

/// File extensions read as plain text
pub const TEXT_FORMATS: &[&str] = &[
    "txt", "json", "csv", "tsv", "md", "html", "htm", "rtf", "rst", "jsonl", "log", "xml", "yaml",
    "yml",
];

/// A piece of a source document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocChunk {
    pub source: PathBuf,
    pub content: String,
}

/// Text files under `docs_path` (or the file itself), sorted
pub fn collect_files(docs_path: &Path) -> Result<Vec<PathBuf>> {
    if docs_path.is_file() {
        return Ok(vec![docs_path.to_path_buf()]);
    }
    if !docs_path.is_dir() {
        anyhow::bail!("docs_path does not exist: {}", docs_path.display());
    }

    let mut files: Vec<PathBuf> = WalkDir::new(docs_path)
        .follow_links(true)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| is_text_file(p))
        .collect();
    files.sort();

    debug!(files = files.len(), path = %docs_path.display(), "Collected documents");
    Ok(files)
}

fn is_text_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| TEXT_FORMATS.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Pack whole lines into chunks of at most `max_tokens`.
///
/// A line longer than the budget is cut at token boundaries on its own.
/// Whitespace-only chunks are dropped.
pub fn split_text_to_chunks(text: &str, max_tokens: usize, tokenizer: &Tokenizer) -> Vec<String> {
    let max_tokens = max_tokens.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_tokens = 0;

    for line in text.lines() {
        let line_tokens = tokenizer.count_tokens(line) + 1;

        if line_tokens > max_tokens {
            push_chunk(&mut chunks, &mut current);
            current_tokens = 0;
            warn!(line_tokens, max_tokens, "Line exceeds chunk size, splitting it");
            chunks.extend(
                split_long_line(line, max_tokens, tokenizer)
                    .into_iter()
                    .filter(|piece| !piece.trim().is_empty()),
            );
            continue;
        }

        if current_tokens + line_tokens > max_tokens {
            push_chunk(&mut chunks, &mut current);
            current_tokens = 0;
        }

        if !current.is_empty() {
            current.push('\n');
        }
        current.push_str(line);
        current_tokens += line_tokens;
    }
    push_chunk(&mut chunks, &mut current);

    chunks
}

fn split_long_line(line: &str, max_tokens: usize, tokenizer: &Tokenizer) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut rest = line;

    while !rest.is_empty() {
        let mut piece = tokenizer.truncate_to_tokens(rest, max_tokens);
        if piece.is_empty() || !rest.starts_with(&piece) {
            piece = rest.chars().take(max_tokens.max(1)).collect();
        }
        rest = &rest[piece.len()..];
        pieces.push(piece);
    }

    pieces
}

fn push_chunk(chunks: &mut Vec<String>, current: &mut String) {
    if !current.trim().is_empty() {
        chunks.push(std::mem::take(current));
    } else {
        current.clear();
    }
}

/// Read and chunk every file
pub fn split_files_to_chunks(files: &[PathBuf], max_tokens: usize, tokenizer: &Tokenizer) -> Result<Vec<DocChunk>> {
    let mut chunks = Vec::new();

    for file in files {
        let bytes = fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;
        let text = String::from_utf8_lossy(&bytes);
        for content in split_text_to_chunks(&text, max_tokens, tokenizer) {
            chunks.push(DocChunk {
                source: file.clone(),
                content,
            });
        }
    }

    debug!(files = files.len(), chunks = chunks.len(), "Split documents into chunks");
    Ok(chunks)
}
