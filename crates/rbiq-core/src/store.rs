//! Vector store: the flat index plus its metadata records, slot `i` of one
//! always describing slot `i` of the other.
use crate::chunks::ChunkRecord;
use crate::flat::{FlatIndexError, FlatL2Index};

/// A metadata record matched by a search, with its squared L2 distance (lower is closer).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredChunk<'a> {
    pub position: usize,
    pub record: &'a ChunkRecord,
    pub distance: f32,
}

/// Index and metadata, only ever appended to together.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorStore {
    index: FlatL2Index,
    metadata: Vec<ChunkRecord>,
}

impl VectorStore {
    pub fn new(dimension: usize) -> Result<Self, StoreError> {
        Ok(Self {
            index: FlatL2Index::new(dimension)?,
            metadata: Vec::new(),
        })
    }

    /// Pairs a loaded index with its metadata. Fails if their lengths differ.
    pub fn from_parts(index: FlatL2Index, metadata: Vec<ChunkRecord>) -> Result<Self, StoreError> {
        if index.len() != metadata.len() {
            return Err(StoreError::Misaligned {
                vectors: index.len(),
                records: metadata.len(),
            });
        }
        Ok(Self { index, metadata })
    }

    /// Appends records and their embeddings. Everything is validated before
    /// either side is touched, so a failure leaves the store unchanged.
    pub fn append(
        &mut self,
        records: Vec<ChunkRecord>,
        embeddings: Vec<Vec<f32>>,
    ) -> Result<(), StoreError> {
        if records.len() != embeddings.len() {
            return Err(StoreError::CountMismatch {
                records: records.len(),
                embeddings: embeddings.len(),
            });
        }
        self.index.add(&embeddings)?;
        self.metadata.extend(records);
        Ok(())
    }

    /// Up to `k` records closest to `query_embedding`, nearest first.
    /// Hits without a metadata record are skipped, so fewer than `k` may come back.
    pub fn search(
        &self,
        query_embedding: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredChunk<'_>>, StoreError> {
        let hits = self.index.search(query_embedding, k)?;
        Ok(hits
            .into_iter()
            .filter_map(|n| {
                self.metadata.get(n.index).map(|record| ScoredChunk {
                    position: n.index,
                    record,
                    distance: n.distance,
                })
            })
            .collect())
    }

    pub fn index(&self) -> &FlatL2Index {
        &self.index
    }

    pub fn metadata(&self) -> &[ChunkRecord] {
        &self.metadata
    }

    pub fn dimension(&self) -> usize {
        self.index.dimension()
    }

    /// Number of indexed chunks.
    pub fn len(&self) -> usize {
        self.metadata.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metadata.is_empty()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Index(#[from] FlatIndexError),
    #[error("{records} records but {embeddings} embeddings")]
    CountMismatch { records: usize, embeddings: usize },
    #[error("index holds {vectors} vectors but metadata has {records} records")]
    Misaligned { vectors: usize, records: usize },
}
