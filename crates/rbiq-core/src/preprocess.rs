//! Document cleaning and conversion of raw documents into chunk records.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::chunks::{chunk_words, ChunkError, ChunkRecord, DEFAULT_MAX_WORDS, DEFAULT_OVERLAP};
use crate::documents::RawDocument;
use crate::ledger::content_hash;

pub const DEFAULT_MIN_CHUNK_CHARS: usize = 20;
pub const DEFAULT_MIN_CONTENT_CHARS: usize = 50;
pub const DEFAULT_MAX_CONTENT_CHARS: usize = 50_000;
pub const TRUNCATION_MARKER: &str = "... [Content truncated]";

/// How documents are cleaned, bounded and split. Serialized as the `[chunking]` config section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingOptions {
    pub max_words: usize,
    pub overlap: usize,
    /// Chunks shorter than this (in characters, after trimming) are dropped.
    pub min_chunk_chars: usize,
    /// Documents shorter than this, raw or cleaned, are skipped.
    pub min_content_chars: usize,
    pub max_content_chars: usize,
    /// Replace non-ASCII characters with spaces while cleaning.
    pub ascii_only: bool,
}

impl Default for ChunkingOptions {
    fn default() -> Self {
        Self {
            max_words: DEFAULT_MAX_WORDS,
            overlap: DEFAULT_OVERLAP,
            min_chunk_chars: DEFAULT_MIN_CHUNK_CHARS,
            min_content_chars: DEFAULT_MIN_CONTENT_CHARS,
            max_content_chars: DEFAULT_MAX_CONTENT_CHARS,
            ascii_only: true,
        }
    }
}

impl ChunkingOptions {
    /// Fails with `InvalidConfiguration` when the window stride would not be positive.
    pub fn validate(&self) -> Result<(), ChunkError> {
        if self.max_words == 0 || self.overlap >= self.max_words {
            return Err(ChunkError::InvalidConfiguration {
                max_words: self.max_words,
                overlap: self.overlap,
            });
        }
        Ok(())
    }
}

/// Collapses whitespace runs (non-breaking spaces included) to one space and trims.
/// With `ascii_only`, every non-ASCII character becomes a space first.
pub fn clean_text(text: &str, ascii_only: bool) -> String {
    let mapped: String = text
        .chars()
        .map(|c| if ascii_only && !c.is_ascii() { ' ' } else { c })
        .collect();
    mapped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Cuts `content` to `max_chars` characters and appends [`TRUNCATION_MARKER`].
pub fn truncate_content(content: &str, max_chars: usize) -> String {
    match content.char_indices().nth(max_chars) {
        Some((byte_pos, _)) => format!("{}{}", &content[..byte_pos], TRUNCATION_MARKER),
        None => content.to_string(),
    }
}

/// Cleans and chunks one document. Returns `(chunk_index, content)` pairs;
/// empty when the document is too short. Chunk indices keep their window
/// position even when a short window in between is dropped.
pub fn prepare_document(
    doc: &RawDocument,
    opts: &ChunkingOptions,
) -> Result<Vec<(usize, String)>, ChunkError> {
    opts.validate()?;
    let content = doc.content.trim();
    if content.chars().count() < opts.min_content_chars {
        return Ok(Vec::new());
    }
    let content = truncate_content(content, opts.max_content_chars);
    let cleaned = clean_text(&content, opts.ascii_only);
    if cleaned.chars().count() < opts.min_content_chars {
        return Ok(Vec::new());
    }
    Ok(chunk_words(&cleaned, opts.max_words, opts.overlap)?
        .into_iter()
        .enumerate()
        .map(|(i, c)| (i, c.trim().to_string()))
        .filter(|(_, c)| c.chars().count() >= opts.min_chunk_chars)
        .collect())
}

/// Builds the metadata record for one chunk of `doc`.
pub fn chunk_record(
    doc: &RawDocument,
    id: String,
    source_row: usize,
    chunk_index: usize,
    content: String,
) -> ChunkRecord {
    let title = doc.title.trim();
    ChunkRecord {
        id,
        title: if title.is_empty() {
            format!("RBI Document {source_row}")
        } else {
            title.to_string()
        },
        url: doc.url.trim().to_string(),
        chunk_index,
        content,
        source_row,
    }
}

/// Result of preprocessing a document collection for a full build.
#[derive(Debug, Default)]
pub struct Preprocessed {
    pub chunks: Vec<ChunkRecord>,
    pub processed_documents: usize,
    pub skipped_documents: usize,
}

/// Turns a document collection into chunk records for a full build.
///
/// Ids are `doc_{row}_chunk_{index}`. A chunk whose content already appeared
/// earlier in the collection is dropped; a document that contributes no
/// chunk counts as skipped.
pub fn preprocess_documents(
    docs: &[RawDocument],
    opts: &ChunkingOptions,
) -> Result<Preprocessed, ChunkError> {
    opts.validate()?;
    let mut seen = HashSet::new();
    let mut out = Preprocessed::default();
    for (row, doc) in docs.iter().enumerate() {
        let before = out.chunks.len();
        for (chunk_index, content) in prepare_document(doc, opts)? {
            if !seen.insert(content_hash(&content)) {
                continue;
            }
            let id = format!("doc_{row}_chunk_{chunk_index}");
            out.chunks.push(chunk_record(doc, id, row, chunk_index, content));
        }
        if out.chunks.len() > before {
            out.processed_documents += 1;
            if out.processed_documents % 50 == 0 {
                tracing::info!(
                    documents = out.processed_documents,
                    chunks = out.chunks.len(),
                    "preprocessing"
                );
            }
        } else {
            tracing::debug!(row, title = %doc.title, "document skipped: no usable chunks");
            out.skipped_documents += 1;
        }
    }
    Ok(out)
}

/// Corpus statistics written next to the chunks file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkSummary {
    pub total_chunks: usize,
    pub unique_documents: usize,
    pub average_chunk_length: f64,
    pub unique_topics: usize,
    pub max_chunk_length: usize,
    pub min_chunk_length: usize,
}

impl ChunkSummary {
    pub fn from_chunks(chunks: &[ChunkRecord]) -> Self {
        let lengths: Vec<usize> = chunks.iter().map(|c| c.content.chars().count()).collect();
        let total: usize = lengths.iter().sum();
        let average_chunk_length = if chunks.is_empty() {
            0.0
        } else {
            total as f64 / chunks.len() as f64
        };
        Self {
            total_chunks: chunks.len(),
            unique_documents: chunks.iter().map(|c| c.source_row).collect::<HashSet<_>>().len(),
            average_chunk_length,
            unique_topics: chunks.iter().map(|c| c.title.as_str()).collect::<HashSet<_>>().len(),
            max_chunk_length: lengths.iter().copied().max().unwrap_or(0),
            min_chunk_length: lengths.iter().copied().min().unwrap_or(0),
        }
    }

    /// Path of the summary for a chunks file: `chunks.json` → `chunks_summary.json`.
    pub fn path_for(chunks_path: &Path) -> std::path::PathBuf {
        let stem = chunks_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "chunks".to_string());
        chunks_path.with_file_name(format!("{stem}_summary.json"))
    }

    pub fn write(&self, path: &Path) -> std::io::Result<()> {
        let s = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(path, s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn long_text(words: usize) -> String {
        (0..words).map(|i| format!("word{i}")).collect::<Vec<_>>().join(" ")
    }

    #[test]
    fn clean_text_collapses_whitespace_and_strips_non_ascii() {
        assert_eq!(clean_text("  Repo\u{a0}rate\n\n is\t6.5%  ", true), "Repo rate is 6.5%");
        assert_eq!(clean_text("₹500 crore", true), "500 crore");
        assert_eq!(clean_text("₹500  crore", false), "₹500 crore");
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_content("ab₹cd", 3), format!("ab₹{TRUNCATION_MARKER}"));
        assert_eq!(truncate_content("short", 10), "short");
    }

    #[test]
    fn short_documents_yield_nothing() {
        let doc = RawDocument::new("t", "", "too short");
        assert!(prepare_document(&doc, &ChunkingOptions::default()).unwrap().is_empty());
    }

    #[test]
    fn short_trailing_window_is_dropped() {
        let opts = ChunkingOptions {
            max_words: 10,
            overlap: 0,
            ..ChunkingOptions::default()
        };
        let doc = RawDocument::new("t", "", format!("{} x", long_text(10)));
        let chunks = prepare_document(&doc, &opts).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].0, 0);
    }

    #[test]
    fn invalid_options_fail() {
        let opts = ChunkingOptions {
            max_words: 100,
            overlap: 100,
            ..ChunkingOptions::default()
        };
        let doc = RawDocument::new("t", "", long_text(300));
        assert!(matches!(
            prepare_document(&doc, &opts),
            Err(ChunkError::InvalidConfiguration { .. })
        ));
    }

    #[test]
    fn preprocess_assigns_ids_titles_and_drops_duplicates() {
        let body = long_text(30);
        let docs = vec![
            RawDocument::new("", "https://rbi.org.in/x", body.clone()),
            RawDocument::new("Dup", "", body),
            RawDocument::new("Tiny", "", "nothing"),
        ];
        let out = preprocess_documents(&docs, &ChunkingOptions::default()).unwrap();
        assert_eq!(out.chunks.len(), 1);
        assert_eq!(out.chunks[0].id, "doc_0_chunk_0");
        assert_eq!(out.chunks[0].title, "RBI Document 0");
        assert_eq!(out.chunks[0].url, "https://rbi.org.in/x");
        assert_eq!(out.processed_documents, 1);
        assert_eq!(out.skipped_documents, 2);
    }

    #[test]
    fn summary_statistics() {
        let doc = RawDocument::new("A", "", "");
        let chunks = vec![
            chunk_record(&doc, "a".into(), 0, 0, "x".repeat(30)),
            chunk_record(&doc, "b".into(), 0, 1, "y".repeat(10)),
            chunk_record(&RawDocument::new("B", "", ""), "c".into(), 1, 0, "z".repeat(20)),
        ];
        let s = ChunkSummary::from_chunks(&chunks);
        assert_eq!(s.total_chunks, 3);
        assert_eq!(s.unique_documents, 2);
        assert_eq!(s.unique_topics, 2);
        assert_eq!(s.max_chunk_length, 30);
        assert_eq!(s.min_chunk_length, 10);
        assert!((s.average_chunk_length - 20.0).abs() < 1e-9);
        assert_eq!(
            ChunkSummary::path_for(Path::new("data/chunks.json")),
            Path::new("data/chunks_summary.json")
        );
    }
}
