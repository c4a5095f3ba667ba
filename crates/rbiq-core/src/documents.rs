//! Raw scraped documents: reading them from a JSON export or an inbox directory.
//!
//! The crawler is an external collaborator; we only read what it left behind.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

/// A document as produced by the crawler, before cleaning and chunking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDocument {
    #[serde(default, alias = "Topic", alias = "Title")]
    pub title: String,
    #[serde(default, alias = "URL", alias = "Url")]
    pub url: String,
    #[serde(alias = "Content", alias = "text")]
    pub content: String,
}

impl RawDocument {
    pub fn new(
        title: impl Into<String>,
        url: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            url: url.into(),
            content: content.into(),
        }
    }
}

/// Loads documents from `path`.
///
/// A `.json` file holds an array of documents. A `.txt` or `.md` file is one
/// document titled after its file stem. A directory is walked (hidden entries
/// skipped, file-name order) and every such file in it is loaded.
pub fn load_documents(path: &Path) -> Result<Vec<RawDocument>, DocumentError> {
    if path.is_file() {
        return load_file(path);
    }
    if !path.is_dir() {
        return Err(DocumentError::NotFound(path.to_path_buf()));
    }
    let mut docs = Vec::new();
    for entry in WalkDir::new(path)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_hidden(e))
    {
        let entry = entry.map_err(|e| DocumentError::Walk(e.to_string()))?;
        let p = entry.path();
        if p.is_file() && is_document_file(p) {
            docs.extend(load_file(p)?);
        }
    }
    Ok(docs)
}

fn load_file(path: &Path) -> Result<Vec<RawDocument>, DocumentError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| DocumentError::Read(path.to_path_buf(), e))?;
    match extension(path).as_deref() {
        Some("json") => {
            serde_json::from_str(&raw).map_err(|e| DocumentError::Parse(path.to_path_buf(), e))
        }
        _ => {
            let title = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            Ok(vec![RawDocument::new(title, String::new(), raw)])
        }
    }
}

fn extension(path: &Path) -> Option<String> {
    path.extension().map(|e| e.to_string_lossy().to_ascii_lowercase())
}

fn is_document_file(path: &Path) -> bool {
    matches!(extension(path).as_deref(), Some("json" | "txt" | "md"))
}

fn is_hidden(entry: &walkdir::DirEntry) -> bool {
    entry.depth() > 0
        && entry
            .file_name()
            .to_str()
            .map(|s| s.starts_with('.'))
            .unwrap_or(false)
}

#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("no such file or directory: {0}")]
    NotFound(PathBuf),
    #[error("walk error: {0}")]
    Walk(String),
    #[error("read error for {0}: {1}")]
    Read(PathBuf, std::io::Error),
    #[error("invalid documents JSON in {0}: {1}")]
    Parse(PathBuf, serde_json::Error),
}
