//! Query-time retrieval over a loaded snapshot.
//!
//! A [`Retriever`] is built once by the process entry point and shared by
//! handle. Its snapshot is loaded wholesale at construction and never changes;
//! picking up a newer snapshot means building a new retriever.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::embeddings::{embed_one, EmbedError, Embedder};
use crate::snapshot::{load_bundle, SnapshotError, SnapshotLayout};
use crate::store::{StoreError, VectorStore};

pub const DEFAULT_TOP_K: usize = 4;

/// A retrieved chunk. `score` is the squared L2 distance: lower is more relevant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedChunk {
    pub content: String,
    pub score: f32,
    /// Source URL of the chunk, empty if unknown.
    pub source: String,
    pub title: String,
}

pub struct Retriever {
    store: VectorStore,
    embedder: Arc<dyn Embedder>,
}

impl Retriever {
    pub fn new(store: VectorStore, embedder: Arc<dyn Embedder>) -> Self {
        Self { store, embedder }
    }

    /// Loads the split snapshot in `layout`. Fails fast if it is missing.
    pub fn open(
        layout: &SnapshotLayout,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self, RetrieveError> {
        let store = layout.load()?;
        tracing::info!(
            chunks = store.len(),
            dir = %layout.dir().display(),
            "retriever loaded snapshot"
        );
        Ok(Self::new(store, embedder))
    }

    /// Loads a single-file bundle.
    pub fn open_bundle(path: &Path, embedder: Arc<dyn Embedder>) -> Result<Self, RetrieveError> {
        let store = load_bundle(path)?;
        tracing::info!(chunks = store.len(), bundle = %path.display(), "retriever loaded bundle");
        Ok(Self::new(store, embedder))
    }

    pub fn store(&self) -> &VectorStore {
        &self.store
    }

    /// Embeds `query` and returns up to `top_k` chunks, nearest first.
    pub async fn retrieve(
        &self,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<RetrievedChunk>, RetrieveError> {
        let query_embedding = embed_one(self.embedder.as_ref(), query).await?;
        if query_embedding.len() != self.store.dimension() {
            return Err(RetrieveError::DimensionMismatch {
                expected: self.store.dimension(),
                actual: query_embedding.len(),
            });
        }
        let hits = self.store.search(&query_embedding, top_k)?;
        Ok(hits
            .into_iter()
            .map(|hit| RetrievedChunk {
                content: hit.record.content.clone(),
                score: hit.distance,
                source: hit.record.url.clone(),
                title: hit.record.title.clone(),
            })
            .collect())
    }
}

/// Joins retrieved contents into the grounding context handed to the answer generator.
pub fn grounding_context(chunks: &[RetrievedChunk]) -> String {
    chunks
        .iter()
        .map(|c| c.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[derive(Debug, thiserror::Error)]
pub enum RetrieveError {
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
    #[error("embedding error: {0}")]
    Embedding(#[from] EmbedError),
    #[error("query dimension {actual} does not match index dimension {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error(transparent)]
    Store(#[from] StoreError),
}
