//! Splits normalized document text into overlapping word windows, and the
//! chunk record that ends up in the metadata store.
//!
//! Purely positional: no sentence or paragraph awareness.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default window size, in words.
pub const DEFAULT_MAX_WORDS: usize = 1000;
/// Default number of words shared by consecutive windows.
pub const DEFAULT_OVERLAP: usize = 100;

/// One retrievable unit of text, index-aligned with its vector in the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub url: String,
    /// Position of this chunk within its source document (0, 1, 2, …).
    pub chunk_index: usize,
    pub content: String,
    /// Row of the source document in the input it was read from.
    pub source_row: usize,
}

/// Splits `text` on whitespace runs and returns windows of `max_words` words,
/// each starting `max_words - overlap` words after the previous one.
///
/// Windows keep coming until the start offset reaches the word count, so the
/// last window may lie entirely inside the previous one's overlap.
pub fn chunk_words(
    text: &str,
    max_words: usize,
    overlap: usize,
) -> Result<Vec<String>, ChunkError> {
    if max_words == 0 || overlap >= max_words {
        return Err(ChunkError::InvalidConfiguration { max_words, overlap });
    }
    let words: Vec<&str> = text.split_whitespace().collect();
    let stride = max_words - overlap;
    Ok((0..words.len())
        .step_by(stride)
        .map(|start| words[start..words.len().min(start + max_words)].join(" "))
        .collect())
}

/// Reads a chunks file (JSON array of [`ChunkRecord`]).
pub fn read_chunks(path: &Path) -> Result<Vec<ChunkRecord>, ChunkFileError> {
    let s = std::fs::read_to_string(path).map_err(|e| ChunkFileError::Read(path.to_path_buf(), e))?;
    serde_json::from_str(&s).map_err(|e| ChunkFileError::Parse(path.to_path_buf(), e))
}

/// Writes chunks as a pretty JSON array, creating parent directories.
pub fn write_chunks(path: &Path, chunks: &[ChunkRecord]) -> Result<(), ChunkFileError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| ChunkFileError::Write(path.to_path_buf(), e))?;
    }
    let s = serde_json::to_string_pretty(chunks)
        .map_err(|e| ChunkFileError::Parse(path.to_path_buf(), e))?;
    std::fs::write(path, s).map_err(|e| ChunkFileError::Write(path.to_path_buf(), e))
}

#[derive(Debug, Error)]
pub enum ChunkError {
    #[error("invalid chunking configuration: overlap {overlap} must be less than max_words {max_words}")]
    InvalidConfiguration { max_words: usize, overlap: usize },
}

#[derive(Debug, Error)]
pub enum ChunkFileError {
    #[error("failed to read chunks from {0}: {1}")]
    Read(PathBuf, std::io::Error),
    #[error("failed to write chunks to {0}: {1}")]
    Write(PathBuf, std::io::Error),
    #[error("invalid chunks JSON in {0}: {1}")]
    Parse(PathBuf, serde_json::Error),
}
