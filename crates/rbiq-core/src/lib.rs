//! Retrieval and incremental indexing for question answering over scraped RBI documents.
//!
//! Documents are cleaned and split into overlapping word windows, embedded,
//! and stored in a flat L2 index whose slots line up one-to-one with a
//! metadata store. Snapshots of the pair are persisted in the app data
//! directory (see [app_data]) or a configured directory, updated incrementally,
//! and served by a [`Retriever`].

pub mod app_data;
pub mod chunks;
pub mod config;
pub mod documents;
pub mod embeddings;
pub mod flat;
pub mod index;
pub mod ledger;
pub mod ollama;
pub mod preprocess;
pub mod retriever;
pub mod snapshot;
pub mod store;
pub mod watcher;

pub use app_data::{app_data_dir, default_index_dir};
pub use chunks::{
    chunk_words, read_chunks, write_chunks, ChunkError, ChunkRecord, DEFAULT_MAX_WORDS,
    DEFAULT_OVERLAP,
};
pub use config::{
    load_config, load_config_from, save_config, save_config_to, Config, ConfigError,
    EmbedderBackend,
};
pub use documents::{load_documents, DocumentError, RawDocument};
pub use embeddings::{EmbedError, Embedder, Embedding, HashingEmbedder};
pub use flat::{FlatL2Index, Neighbor};
pub use index::{
    build_index, build_index_from_documents, export_bundle, update_index, IndexError, IndexOptions,
};
pub use ledger::{content_hash, ProcessedIds};
pub use ollama::{OllamaClient, OllamaError};
pub use preprocess::{preprocess_documents, ChunkSummary, ChunkingOptions};
pub use retriever::{grounding_context, RetrieveError, RetrievedChunk, Retriever, DEFAULT_TOP_K};
pub use snapshot::{SnapshotError, SnapshotLayout};
pub use store::{StoreError, VectorStore};
pub use watcher::{watch_inbox, WatchError};
