//! Processed-ids ledger: content hashes of every document already indexed by
//! an incremental update. Stored as a JSON array of hex strings.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::snapshot::atomic_write;

/// Hex SHA-256 of `text`, the identity of a document's raw content.
pub fn content_hash(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

/// Set of processed content hashes, kept sorted so the file is stable across runs.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ProcessedIds {
    ids: BTreeSet<String>,
}

impl ProcessedIds {
    /// Loads the ledger; a missing file is an empty ledger.
    pub fn load(path: &Path) -> Result<Self, LedgerError> {
        let s = match std::fs::read_to_string(path) {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(LedgerError::Read(path.to_path_buf(), e)),
        };
        let ids: Vec<String> =
            serde_json::from_str(&s).map_err(|e| LedgerError::Parse(path.to_path_buf(), e))?;
        Ok(Self {
            ids: ids.into_iter().collect(),
        })
    }

    /// Rewrites the ledger atomically.
    pub fn save(&self, path: &Path) -> Result<(), LedgerError> {
        let ids: Vec<&String> = self.ids.iter().collect();
        let s = serde_json::to_vec(&ids).map_err(|e| LedgerError::Parse(path.to_path_buf(), e))?;
        atomic_write(path, &s).map_err(|e| LedgerError::Write(path.to_path_buf(), e))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    /// Returns false if the id was already present.
    pub fn insert(&mut self, id: String) -> bool {
        self.ids.insert(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("failed to read ledger {0}: {1}")]
    Read(PathBuf, std::io::Error),
    #[error("failed to write ledger {0}: {1}")]
    Write(PathBuf, std::io::Error),
    #[error("invalid ledger JSON in {0}: {1}")]
    Parse(PathBuf, serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_stable_hex_sha256() {
        assert_eq!(
            content_hash("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn missing_ledger_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ProcessedIds::load(&dir.path().join("processed_ids.json")).unwrap().is_empty());
    }

    #[test]
    fn save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("processed_ids.json");
        let mut ids = ProcessedIds::default();
        assert!(ids.insert(content_hash("doc one")));
        assert!(!ids.insert(content_hash("doc one")));
        ids.insert(content_hash("doc two"));
        ids.save(&path).unwrap();

        let loaded = ProcessedIds::load(&path).unwrap();
        assert_eq!(loaded, ids);
        assert!(loaded.contains(&content_hash("doc two")));
        let text = std::fs::read_to_string(&path).unwrap();
        let raw: Vec<String> = serde_json::from_str(&text).unwrap();
        assert_eq!(raw.len(), 2);
    }

    #[test]
    fn malformed_ledger_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("processed_ids.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(ProcessedIds::load(&path), Err(LedgerError::Parse(..))));
    }
}
