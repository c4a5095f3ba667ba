//! Persisted config (snapshot location, chunking, embedder) as TOML.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::app_data;
use crate::embeddings::{
    EmbedError, Embedder, HashingEmbedder, DEFAULT_BATCH_SIZE, DEFAULT_DIMENSION,
};
use crate::index::IndexOptions;
use crate::ollama::{
    OllamaClient, OllamaError, DEFAULT_BASE_URL, DEFAULT_EMBED_MODEL, DEFAULT_TIMEOUT_SECS,
};
use crate::preprocess::ChunkingOptions;
use crate::retriever::DEFAULT_TOP_K;
use crate::snapshot::SnapshotLayout;

const CONFIG_FILENAME: &str = "config.toml";

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Snapshot directory. Defaults to `faiss_index/` under the app data dir.
    pub index_dir: Option<String>,
    /// Also write the single-file bundle after every build or update.
    pub write_bundle: bool,
    pub chunking: ChunkingOptions,
    pub embedder: EmbedderConfig,
    pub retrieval: RetrievalConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbedderBackend {
    Ollama,
    /// Local feature hashing; no model server needed.
    Hashing,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbedderConfig {
    pub backend: EmbedderBackend,
    pub base_url: String,
    pub model: String,
    pub dimension: usize,
    pub batch_size: usize,
    pub timeout_secs: u64,
}

impl Default for EmbedderConfig {
    fn default() -> Self {
        Self {
            backend: EmbedderBackend::Ollama,
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_EMBED_MODEL.to_string(),
            dimension: DEFAULT_DIMENSION,
            batch_size: DEFAULT_BATCH_SIZE,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl EmbedderConfig {
    /// Builds the configured embedder. Built once by the entry point and shared.
    pub fn build(&self) -> Result<Arc<dyn Embedder>, ConfigError> {
        Ok(match self.backend {
            EmbedderBackend::Hashing => Arc::new(HashingEmbedder::new(self.dimension)?),
            EmbedderBackend::Ollama => Arc::new(
                OllamaClient::from_url(&self.base_url)?
                    .with_embed_model(self.model.clone())
                    .with_timeout(Duration::from_secs(self.timeout_secs))
                    .with_dimension(self.dimension),
            ),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self { top_k: DEFAULT_TOP_K }
    }
}

impl Config {
    /// Resolved snapshot directory.
    pub fn index_dir(&self) -> Result<PathBuf, ConfigError> {
        match self.index_dir.as_deref().filter(|s| !s.is_empty()) {
            Some(dir) => Ok(PathBuf::from(dir)),
            None => app_data::default_index_dir().ok_or(ConfigError::NoDataDir),
        }
    }

    pub fn layout(&self) -> Result<SnapshotLayout, ConfigError> {
        self.index_dir().map(SnapshotLayout::new)
    }

    /// Points the config at `dir`, creating it if needed. Stores the canonical path.
    pub fn set_index_dir(&mut self, dir: &Path) -> Result<PathBuf, ConfigError> {
        std::fs::create_dir_all(dir).map_err(|e| ConfigError::IndexDir(dir.to_path_buf(), e))?;
        let dir = dir.canonicalize().map_err(|e| ConfigError::IndexDir(dir.to_path_buf(), e))?;
        self.index_dir = Some(dir.to_string_lossy().into_owned());
        Ok(dir)
    }

    /// Index options derived from the chunking and embedder sections.
    pub fn index_options(&self) -> IndexOptions {
        IndexOptions {
            chunking: self.chunking.clone(),
            batch_size: self.embedder.batch_size,
            write_bundle: self.write_bundle,
        }
    }
}

/// Load config from the app data directory. Returns default config if missing or invalid.
pub fn load_config() -> Config {
    let Some(data_dir) = app_data::app_data_dir() else {
        return Config::default();
    };
    let path = data_dir.join(CONFIG_FILENAME);
    if !path.is_file() {
        return Config::default();
    }
    load_config_from(&path).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "ignoring config, using defaults");
        Config::default()
    })
}

/// Load config from an explicit file.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let s = std::fs::read_to_string(path).map_err(|e| ConfigError::Read(path.to_path_buf(), e))?;
    toml::from_str(&s).map_err(|e| ConfigError::Parse(path.to_path_buf(), e))
}

/// Save config to the app data directory.
pub fn save_config(config: &Config) -> Result<(), ConfigError> {
    let data_dir = app_data::app_data_dir().ok_or(ConfigError::NoDataDir)?;
    save_config_to(&data_dir.join(CONFIG_FILENAME), config)
}

pub fn save_config_to(path: &Path, config: &Config) -> Result<(), ConfigError> {
    let s = toml::to_string_pretty(config).map_err(ConfigError::Serialize)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(ConfigError::Write)?;
    }
    std::fs::write(path, s).map_err(ConfigError::Write)
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not determine app data directory")]
    NoDataDir,
    #[error("failed to read config {0}: {1}")]
    Read(PathBuf, std::io::Error),
    #[error("invalid config {0}: {1}")]
    Parse(PathBuf, toml::de::Error),
    #[error("failed to serialize config: {0}")]
    Serialize(toml::ser::Error),
    #[error("failed to write config: {0}")]
    Write(std::io::Error),
    #[error("cannot use {0} as snapshot directory: {1}")]
    IndexDir(PathBuf, std::io::Error),
    #[error("embedder setup: {0}")]
    Ollama(#[from] OllamaError),
    #[error("embedder setup: {0}")]
    Embedder(#[from] EmbedError),
}
