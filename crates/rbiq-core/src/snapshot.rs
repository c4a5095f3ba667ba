//! Durable snapshots of a [`VectorStore`].
//!
//! Two layouts share one directory: the split pair (`rbi_index.bin` +
//! `metadata.json`) that builds and updates write, and the single-file
//! bundle (`snapshot.bin`) used for serving. Every file goes through
//! [`atomic_write`], and writers hold [`WriterLock`] for their whole run.
//!
//! The split pair is committed by `manifest.json`, renamed into place last.
//! It records the SHA-256 of both halves, so a load that sees an index and
//! metadata from different writes fails instead of serving mismatched rows.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::chunks::ChunkRecord;
use crate::flat::{FlatIndexError, FlatL2Index};
use crate::store::{StoreError, VectorStore};

pub const INDEX_FILENAME: &str = "rbi_index.bin";
pub const METADATA_FILENAME: &str = "metadata.json";
pub const LEDGER_FILENAME: &str = "processed_ids.json";
pub const BUNDLE_FILENAME: &str = "snapshot.bin";
pub const MANIFEST_FILENAME: &str = "manifest.json";
const LOCK_FILENAME: &str = ".lock";

const BUNDLE_MAGIC: [u8; 8] = *b"RBIQSNAP";
const BUNDLE_VERSION: u32 = 1;
const BUNDLE_HEADER_LEN: usize = 8 + 4 + 8;

/// File locations inside one snapshot directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotLayout {
    dir: PathBuf,
}

impl SnapshotLayout {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn index_path(&self) -> PathBuf {
        self.dir.join(INDEX_FILENAME)
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.dir.join(METADATA_FILENAME)
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.dir.join(LEDGER_FILENAME)
    }

    pub fn bundle_path(&self) -> PathBuf {
        self.dir.join(BUNDLE_FILENAME)
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.dir.join(MANIFEST_FILENAME)
    }

    /// True when both halves of the split snapshot and their manifest are present.
    pub fn exists(&self) -> bool {
        [self.index_path(), self.metadata_path(), self.manifest_path()]
            .iter()
            .all(|p| p.is_file())
    }

    /// Takes the exclusive writer lock for this directory, creating it if needed.
    pub fn lock(&self) -> Result<WriterLock, SnapshotError> {
        std::fs::create_dir_all(&self.dir).map_err(|e| SnapshotError::Write(self.dir.clone(), e))?;
        let path = self.dir.join(LOCK_FILENAME);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|e| SnapshotError::Write(path.clone(), e))?;
        FileExt::try_lock_exclusive(&file).map_err(|_| SnapshotError::Locked(self.dir.clone()))?;
        Ok(WriterLock { file })
    }

    /// Writes the split snapshot: index, then metadata, then the manifest that
    /// commits them.
    pub fn write(&self, store: &VectorStore, _lock: &WriterLock) -> Result<(), SnapshotError> {
        let index = store.index().to_bytes();
        let metadata = serde_json::to_vec_pretty(store.metadata())
            .map_err(|e| SnapshotError::Metadata(self.metadata_path(), e))?;
        let manifest = Manifest {
            version: MANIFEST_VERSION,
            vectors: store.len(),
            index_sha256: sha256_hex(&index),
            metadata_sha256: sha256_hex(&metadata),
        };
        let manifest = serde_json::to_vec_pretty(&manifest)
            .map_err(|e| SnapshotError::Metadata(self.manifest_path(), e))?;

        for (path, bytes) in [
            (self.index_path(), &index),
            (self.metadata_path(), &metadata),
            (self.manifest_path(), &manifest),
        ] {
            atomic_write(&path, bytes).map_err(|e| SnapshotError::Write(path, e))?;
        }
        Ok(())
    }

    /// Loads the split snapshot. Missing files are `NotFound`, never an empty
    /// store; halves that do not match the manifest are `Torn`.
    pub fn load(&self) -> Result<VectorStore, SnapshotError> {
        let index_path = self.index_path();
        let index_bytes = read(&index_path)?;
        let metadata_path = self.metadata_path();
        let raw = read(&metadata_path)?;
        let manifest_path = self.manifest_path();
        let manifest: Manifest = match read(&manifest_path) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| SnapshotError::Metadata(manifest_path, e))?,
            Err(SnapshotError::NotFound(_)) => return Err(SnapshotError::Torn(self.dir.clone())),
            Err(e) => return Err(e),
        };
        if manifest.version != MANIFEST_VERSION
            || manifest.index_sha256 != sha256_hex(&index_bytes)
            || manifest.metadata_sha256 != sha256_hex(&raw)
        {
            return Err(SnapshotError::Torn(self.dir.clone()));
        }

        let index = FlatL2Index::from_bytes(&index_bytes)
            .map_err(|e| SnapshotError::Index(index_path, e))?;
        let metadata: Vec<ChunkRecord> =
            serde_json::from_slice(&raw).map_err(|e| SnapshotError::Metadata(metadata_path, e))?;
        let store = VectorStore::from_parts(index, metadata)?;
        if store.len() != manifest.vectors {
            return Err(SnapshotError::Torn(self.dir.clone()));
        }
        Ok(store)
    }

    /// Loads the split snapshot, or `None` if there is none yet.
    pub fn load_if_exists(&self) -> Result<Option<VectorStore>, SnapshotError> {
        let paths = [self.index_path(), self.metadata_path(), self.manifest_path()];
        if !paths.iter().any(|p| p.exists()) {
            return Ok(None);
        }
        self.load().map(Some)
    }
}

const MANIFEST_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct Manifest {
    version: u32,
    vectors: usize,
    index_sha256: String,
    metadata_sha256: String,
}

fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Exclusive advisory lock on a snapshot directory. Released on drop.
#[derive(Debug)]
pub struct WriterLock {
    file: File,
}

impl Drop for WriterLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

/// Serializes a store as a single bundle: magic, version, index length, index
/// bytes, metadata JSON.
pub fn encode_bundle(store: &VectorStore) -> Result<Vec<u8>, serde_json::Error> {
    let index = store.index().to_bytes();
    let metadata = serde_json::to_vec(store.metadata())?;
    let mut buffer = Vec::with_capacity(BUNDLE_HEADER_LEN + index.len() + metadata.len());
    buffer.extend_from_slice(&BUNDLE_MAGIC);
    buffer.extend_from_slice(&BUNDLE_VERSION.to_le_bytes());
    buffer.extend_from_slice(&(index.len() as u64).to_le_bytes());
    buffer.extend_from_slice(&index);
    buffer.extend_from_slice(&metadata);
    Ok(buffer)
}

pub fn decode_bundle(bytes: &[u8], path: &Path) -> Result<VectorStore, SnapshotError> {
    let corrupt = |msg: &str| SnapshotError::Bundle(path.to_path_buf(), msg.to_string());
    if bytes.len() < BUNDLE_HEADER_LEN || bytes[0..8] != BUNDLE_MAGIC {
        return Err(corrupt("not a snapshot bundle"));
    }
    let mut version = [0u8; 4];
    version.copy_from_slice(&bytes[8..12]);
    if u32::from_le_bytes(version) != BUNDLE_VERSION {
        return Err(corrupt("unsupported bundle version"));
    }
    let mut len = [0u8; 8];
    len.copy_from_slice(&bytes[12..20]);
    let index_end = usize::try_from(u64::from_le_bytes(len))
        .ok()
        .and_then(|n| n.checked_add(BUNDLE_HEADER_LEN))
        .filter(|&end| end <= bytes.len())
        .ok_or_else(|| corrupt("index length exceeds file size"))?;
    let index = FlatL2Index::from_bytes(&bytes[BUNDLE_HEADER_LEN..index_end])
        .map_err(|e| SnapshotError::Index(path.to_path_buf(), e))?;
    let metadata: Vec<ChunkRecord> = serde_json::from_slice(&bytes[index_end..])
        .map_err(|e| SnapshotError::Metadata(path.to_path_buf(), e))?;
    Ok(VectorStore::from_parts(index, metadata)?)
}

/// Writes a store as a bundle file.
pub fn write_bundle(path: &Path, store: &VectorStore) -> Result<(), SnapshotError> {
    let bytes = encode_bundle(store).map_err(|e| SnapshotError::Metadata(path.to_path_buf(), e))?;
    atomic_write(path, &bytes).map_err(|e| SnapshotError::Write(path.to_path_buf(), e))
}

pub fn load_bundle(path: &Path) -> Result<VectorStore, SnapshotError> {
    let bytes = read(path)?;
    decode_bundle(&bytes, path)
}

/// Atomic write: write to a `.tmp` sibling, fsync, then rename into place.
/// Readers see either the old file or the new one, never a partial write.
pub fn atomic_write(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);
    let mut file = File::create(&tmp)?;
    file.write_all(contents)?;
    file.sync_all()?;
    drop(file);
    std::fs::rename(&tmp, path)
}

fn read(path: &Path) -> Result<Vec<u8>, SnapshotError> {
    std::fs::read(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => SnapshotError::NotFound(path.to_path_buf()),
        _ => SnapshotError::Read(path.to_path_buf(), e),
    })
}

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("snapshot file not found: {0}")]
    NotFound(PathBuf),
    #[error("failed to read {0}: {1}")]
    Read(PathBuf, std::io::Error),
    #[error("failed to write {0}: {1}")]
    Write(PathBuf, std::io::Error),
    #[error("invalid index in {0}: {1}")]
    Index(PathBuf, FlatIndexError),
    #[error("invalid metadata in {0}: {1}")]
    Metadata(PathBuf, serde_json::Error),
    #[error("invalid bundle {0}: {1}")]
    Bundle(PathBuf, String),
    #[error("snapshot out of sync: {0}")]
    Store(#[from] StoreError),
    #[error("snapshot directory {0} is locked by another writer")]
    Locked(PathBuf),
    #[error("snapshot in {0} is incomplete: index and metadata are not from the same write")]
    Torn(PathBuf),
}
