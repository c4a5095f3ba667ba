//! Index pipeline: chunks → embeddings → vector store → snapshot on disk.
//!
//! Two entry points: [`build_index`] replaces the snapshot from a full chunk
//! collection, [`update_index`] appends documents not seen before. Both embed
//! everything first and only then touch the snapshot, under the writer lock.
//! The processed-ids ledger always describes the snapshot beside it: a full
//! build rewrites it along with the snapshot.

use std::collections::HashSet;

use crate::chunks::{ChunkError, ChunkRecord};
use crate::documents::RawDocument;
use crate::embeddings::{embed_all, EmbedError, Embedder, Embedding, DEFAULT_BATCH_SIZE};
use crate::ledger::{content_hash, LedgerError, ProcessedIds};
use crate::preprocess::{chunk_record, prepare_document, preprocess_documents, ChunkingOptions};
use crate::snapshot::{write_bundle, SnapshotError, SnapshotLayout, WriterLock};
use crate::store::{StoreError, VectorStore};

/// Knobs shared by full builds and incremental updates.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexOptions {
    pub chunking: ChunkingOptions,
    pub batch_size: usize,
    /// Also refresh the single-file bundle next to the split snapshot.
    pub write_bundle: bool,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            chunking: ChunkingOptions::default(),
            batch_size: DEFAULT_BATCH_SIZE,
            write_bundle: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildReport {
    pub chunks: usize,
    pub dimension: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateReport {
    pub new_documents: usize,
    /// Documents already in the ledger, or repeated within this batch.
    pub skipped_documents: usize,
    pub appended_chunks: usize,
    pub total_chunks: usize,
}

/// Embeds every chunk and writes a fresh snapshot, replacing any previous one.
///
/// The ledger is cleared, since the chunks carry no document hashes. Use
/// [`build_index_from_documents`] to keep later updates from re-adding the
/// same documents.
pub async fn build_index(
    chunks: Vec<ChunkRecord>,
    embedder: &dyn Embedder,
    layout: &SnapshotLayout,
    options: &IndexOptions,
) -> Result<BuildReport, IndexError> {
    rebuild(chunks, ProcessedIds::default(), embedder, layout, options).await
}

/// Preprocesses raw documents and runs a full build over the result. The
/// ledger is rewritten to hold exactly these documents.
pub async fn build_index_from_documents(
    documents: &[RawDocument],
    embedder: &dyn Embedder,
    layout: &SnapshotLayout,
    options: &IndexOptions,
) -> Result<BuildReport, IndexError> {
    let prepared = preprocess_documents(documents, &options.chunking)?;
    tracing::info!(
        processed = prepared.processed_documents,
        skipped = prepared.skipped_documents,
        chunks = prepared.chunks.len(),
        "preprocessed documents"
    );
    let mut processed = ProcessedIds::default();
    for doc in documents {
        processed.insert(content_hash(&doc.content));
    }
    rebuild(prepared.chunks, processed, embedder, layout, options).await
}

async fn rebuild(
    chunks: Vec<ChunkRecord>,
    processed: ProcessedIds,
    embedder: &dyn Embedder,
    layout: &SnapshotLayout,
    options: &IndexOptions,
) -> Result<BuildReport, IndexError> {
    if chunks.is_empty() {
        return Err(IndexError::EmptyCorpus);
    }
    let lock = layout.lock()?;
    let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
    let embeddings = embed_all(embedder, &texts, options.batch_size).await?;

    let dimension = embeddings.first().map(Vec::len).unwrap_or_default();
    let mut store = VectorStore::new(dimension)?;
    append(&mut store, chunks, embeddings)?;
    commit(layout, &store, &lock, options)?;
    processed.save(&layout.ledger_path())?;

    tracing::info!(
        chunks = store.len(),
        dimension,
        documents = processed.len(),
        dir = %layout.dir().display(),
        "built index"
    );
    Ok(BuildReport {
        chunks: store.len(),
        dimension,
    })
}

/// Appends the documents whose content hash is not yet in the ledger.
///
/// Loads the existing snapshot (or starts a new one), embeds the new chunks,
/// appends vectors and metadata together, rewrites the snapshot, and only
/// then records the new hashes. If anything fails before the snapshot write,
/// nothing on disk changes. No snapshot is written when there is nothing to
/// append.
pub async fn update_index(
    documents: Vec<RawDocument>,
    embedder: &dyn Embedder,
    layout: &SnapshotLayout,
    options: &IndexOptions,
) -> Result<UpdateReport, IndexError> {
    options.chunking.validate()?;
    let lock = layout.lock()?;
    let mut processed = ProcessedIds::load(&layout.ledger_path())?;
    let existing = layout.load_if_exists()?;
    let first_row = existing
        .as_ref()
        .and_then(|s| s.metadata().iter().map(|r| r.source_row + 1).max())
        .unwrap_or(0);

    let mut report = UpdateReport::default();
    let mut new_hashes = Vec::new();
    let mut batch_seen = HashSet::new();
    let mut records = Vec::new();
    for doc in &documents {
        let hash = content_hash(&doc.content);
        if processed.contains(&hash) || !batch_seen.insert(hash.clone()) {
            report.skipped_documents += 1;
            continue;
        }
        let row = first_row + new_hashes.len();
        for (chunk_index, content) in prepare_document(doc, &options.chunking)? {
            let id = format!("{hash}_chunk_{chunk_index}");
            records.push(chunk_record(doc, id, row, chunk_index, content));
        }
        new_hashes.push(hash);
    }
    report.new_documents = new_hashes.len();

    if new_hashes.is_empty() {
        report.total_chunks = existing.as_ref().map_or(0, VectorStore::len);
        tracing::info!(skipped = report.skipped_documents, "no new documents");
        return Ok(report);
    }

    if records.is_empty() {
        // Nothing to embed; the hashes are still recorded so these documents
        // are not re-examined on every run.
        record_hashes(&mut processed, new_hashes, layout)?;
        report.total_chunks = existing.as_ref().map_or(0, VectorStore::len);
        tracing::info!(new_documents = report.new_documents, "new documents yielded no chunks");
        return Ok(report);
    }

    let texts: Vec<String> = records.iter().map(|r| r.content.clone()).collect();
    let embeddings = embed_all(embedder, &texts, options.batch_size).await?;

    // An empty store has no vectors to stay compatible with, so it takes the
    // dimension of the first real embeddings.
    let mut store = match existing {
        Some(store) if !store.is_empty() => store,
        _ => VectorStore::new(embeddings.first().map(Vec::len).unwrap_or_default())?,
    };
    report.appended_chunks = records.len();
    append(&mut store, records, embeddings)?;
    commit(layout, &store, &lock, options)?;
    record_hashes(&mut processed, new_hashes, layout)?;

    report.total_chunks = store.len();
    tracing::info!(
        new_documents = report.new_documents,
        skipped = report.skipped_documents,
        appended = report.appended_chunks,
        total = report.total_chunks,
        "updated index"
    );
    Ok(report)
}

/// Writes the current split snapshot out as a single bundle file.
pub fn export_bundle(layout: &SnapshotLayout, path: &std::path::Path) -> Result<usize, IndexError> {
    let _lock = layout.lock()?;
    let store = layout.load()?;
    write_bundle(path, &store)?;
    Ok(store.len())
}

fn record_hashes(
    processed: &mut ProcessedIds,
    hashes: Vec<String>,
    layout: &SnapshotLayout,
) -> Result<(), IndexError> {
    for hash in hashes {
        processed.insert(hash);
    }
    processed.save(&layout.ledger_path())?;
    Ok(())
}

fn append(
    store: &mut VectorStore,
    records: Vec<ChunkRecord>,
    embeddings: Vec<Embedding>,
) -> Result<(), IndexError> {
    if let Some(v) = embeddings.iter().find(|v| v.len() != store.dimension()) {
        return Err(IndexError::DimensionMismatch {
            expected: store.dimension(),
            actual: v.len(),
        });
    }
    store.append(records, embeddings)?;
    Ok(())
}

fn commit(
    layout: &SnapshotLayout,
    store: &VectorStore,
    lock: &WriterLock,
    options: &IndexOptions,
) -> Result<(), IndexError> {
    layout.write(store, lock)?;
    if options.write_bundle {
        write_bundle(&layout.bundle_path(), store)?;
    }
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error(transparent)]
    Chunking(#[from] ChunkError),
    #[error("embedding error: {0}")]
    Embedding(#[from] EmbedError),
    #[error("embedding dimension {actual} does not match index dimension {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("no chunks to index")]
    EmptyCorpus,
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::embeddings::HashingEmbedder;

    /// Succeeds for `ok_calls` calls, then fails.
    struct FlakyEmbedder {
        inner: HashingEmbedder,
        ok_calls: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Embedder for FlakyEmbedder {
        async fn encode(&self, texts: &[String]) -> Result<Vec<Embedding>, EmbedError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) >= self.ok_calls {
                return Err(EmbedError::Provider("connection reset".into()));
            }
            self.inner.encode(texts).await
        }
    }

    fn doc(topic: &str) -> RawDocument {
        RawDocument::new(
            topic,
            format!("https://rbi.org.in/{topic}"),
            format!(
                "The Reserve Bank of India issued a circular about {topic} \
                 to all scheduled commercial banks today."
            ),
        )
    }

    fn options() -> IndexOptions {
        IndexOptions {
            batch_size: 2,
            ..IndexOptions::default()
        }
    }

    fn embedder() -> HashingEmbedder {
        HashingEmbedder::new(64).unwrap()
    }

    #[tokio::test]
    async fn update_creates_snapshot_then_appends_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let layout = SnapshotLayout::new(dir.path());
        let e = embedder();

        // Topics of different word counts, so no two vectors can coincide.
        let first = vec![doc("repo"), doc("kyc norms")];
        let r1 = update_index(first, &e, &layout, &options()).await.unwrap();
        assert_eq!((r1.new_documents, r1.appended_chunks, r1.total_chunks), (2, 2, 2));
        let second = vec![doc("forex reserve data")];
        let r2 = update_index(second, &e, &layout, &options()).await.unwrap();
        assert_eq!((r2.appended_chunks, r2.total_chunks), (1, 3));

        let store = layout.load().unwrap();
        let titles: Vec<&str> = store.metadata().iter().map(|r| r.title.as_str()).collect();
        assert_eq!(titles, vec!["repo", "kyc norms", "forex reserve data"]);
        assert_eq!(store.metadata()[2].source_row, 2);
        for (i, record) in store.metadata().iter().enumerate() {
            let q = e.embed_text(&record.content);
            assert_eq!(store.search(&q, 1).unwrap()[0].position, i);
        }
        assert!(store.metadata()[0].id.ends_with("_chunk_0"));
    }

    #[tokio::test]
    async fn resubmitted_documents_add_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let layout = SnapshotLayout::new(dir.path());
        let e = embedder();
        update_index(vec![doc("repo")], &e, &layout, &options()).await.unwrap();
        let before = std::fs::read(layout.index_path()).unwrap();

        let r = update_index(vec![doc("repo"), doc("repo")], &e, &layout, &options())
            .await
            .unwrap();
        assert_eq!(
            r,
            UpdateReport {
                new_documents: 0,
                skipped_documents: 2,
                appended_chunks: 0,
                total_chunks: 1
            }
        );
        assert_eq!(std::fs::read(layout.index_path()).unwrap(), before);
        assert_eq!(ProcessedIds::load(&layout.ledger_path()).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn duplicates_within_one_batch_are_indexed_once() {
        let dir = tempfile::tempdir().unwrap();
        let layout = SnapshotLayout::new(dir.path());
        let docs = vec![doc("repo"), doc("repo")];
        let r = update_index(docs, &embedder(), &layout, &options()).await.unwrap();
        assert_eq!((r.new_documents, r.skipped_documents, r.total_chunks), (1, 1, 1));
    }

    #[tokio::test]
    async fn failed_embedding_commits_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let layout = SnapshotLayout::new(dir.path());
        update_index(vec![doc("repo")], &embedder(), &layout, &options()).await.unwrap();
        let index_before = std::fs::read(layout.index_path()).unwrap();
        let meta_before = std::fs::read(layout.metadata_path()).unwrap();
        let ledger_before = std::fs::read(layout.ledger_path()).unwrap();

        let flaky = FlakyEmbedder {
            inner: embedder(),
            ok_calls: 1,
            calls: AtomicUsize::new(0),
        };
        let docs = vec![doc("kyc"), doc("forex"), doc("nbfc")];
        let err = update_index(docs, &flaky, &layout, &options()).await.unwrap_err();
        assert!(matches!(err, IndexError::Embedding(EmbedError::Provider(_))));
        assert_eq!(std::fs::read(layout.index_path()).unwrap(), index_before);
        assert_eq!(std::fs::read(layout.metadata_path()).unwrap(), meta_before);
        assert_eq!(std::fs::read(layout.ledger_path()).unwrap(), ledger_before);
    }

    #[tokio::test]
    async fn dimension_change_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let layout = SnapshotLayout::new(dir.path());
        update_index(vec![doc("repo")], &embedder(), &layout, &options()).await.unwrap();
        let wider = HashingEmbedder::new(128).unwrap();
        let err = update_index(vec![doc("kyc")], &wider, &layout, &options()).await.unwrap_err();
        assert!(matches!(err, IndexError::DimensionMismatch { expected: 64, actual: 128 }));
        assert_eq!(layout.load().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn concurrent_writer_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let layout = SnapshotLayout::new(dir.path());
        let _held = layout.lock().unwrap();
        let err = update_index(vec![doc("repo")], &embedder(), &layout, &options())
            .await
            .unwrap_err();
        assert!(matches!(err, IndexError::Snapshot(SnapshotError::Locked(_))));
    }

    #[tokio::test]
    async fn full_build_overwrites_and_writes_bundle() {
        let dir = tempfile::tempdir().unwrap();
        let layout = SnapshotLayout::new(dir.path());
        let e = embedder();
        update_index(vec![doc("repo"), doc("kyc")], &e, &layout, &options()).await.unwrap();

        let opts = IndexOptions {
            write_bundle: true,
            ..options()
        };
        let report = build_index_from_documents(&[doc("forex")], &e, &layout, &opts).await.unwrap();
        assert_eq!(report, BuildReport { chunks: 1, dimension: 64 });
        let store = layout.load().unwrap();
        assert_eq!(store.metadata()[0].id, "doc_0_chunk_0");
        assert_eq!(crate::snapshot::load_bundle(&layout.bundle_path()).unwrap(), store);
    }

    #[tokio::test]
    async fn empty_build_and_bad_chunking_are_errors() {
        let dir = tempfile::tempdir().unwrap();
        let layout = SnapshotLayout::new(dir.path());
        assert!(matches!(
            build_index(Vec::new(), &embedder(), &layout, &options()).await,
            Err(IndexError::EmptyCorpus)
        ));
        let mut opts = options();
        opts.chunking.overlap = opts.chunking.max_words;
        assert!(matches!(
            update_index(vec![doc("repo")], &embedder(), &layout, &opts).await,
            Err(IndexError::Chunking(ChunkError::InvalidConfiguration { .. }))
        ));
    }

    #[tokio::test]
    async fn export_bundle_matches_split_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let layout = SnapshotLayout::new(dir.path());
        update_index(vec![doc("repo")], &embedder(), &layout, &options()).await.unwrap();
        let out = dir.path().join("serve.bin");
        assert_eq!(export_bundle(&layout, &out).unwrap(), 1);
        assert_eq!(crate::snapshot::load_bundle(&out).unwrap(), layout.load().unwrap());
    }

    fn hintless(inner: HashingEmbedder) -> FlakyEmbedder {
        FlakyEmbedder {
            inner,
            ok_calls: usize::MAX,
            calls: AtomicUsize::new(0),
        }
    }

    #[tokio::test]
    async fn chunkless_first_update_does_not_fix_a_dimension() {
        let dir = tempfile::tempdir().unwrap();
        let layout = SnapshotLayout::new(dir.path());
        let e = hintless(embedder());
        let short = RawDocument::new("stub", "", "Too short to index.");

        let r = update_index(vec![short], &e, &layout, &options()).await.unwrap();
        assert_eq!((r.new_documents, r.appended_chunks, r.total_chunks), (1, 0, 0));
        assert!(layout.load_if_exists().unwrap().is_none());
        assert_eq!(ProcessedIds::load(&layout.ledger_path()).unwrap().len(), 1);

        let r = update_index(vec![doc("repo")], &e, &layout, &options()).await.unwrap();
        assert_eq!(r.total_chunks, 1);
        assert_eq!(layout.load().unwrap().dimension(), 64);
    }

    #[tokio::test]
    async fn empty_snapshot_takes_dimension_of_first_vectors() {
        let dir = tempfile::tempdir().unwrap();
        let layout = SnapshotLayout::new(dir.path());
        let lock = layout.lock().unwrap();
        layout.write(&VectorStore::new(384).unwrap(), &lock).unwrap();
        drop(lock);

        let r = update_index(vec![doc("repo")], &embedder(), &layout, &options()).await.unwrap();
        assert_eq!(r.total_chunks, 1);
        assert_eq!(layout.load().unwrap().dimension(), 64);
    }

    #[tokio::test]
    async fn full_build_resets_the_ledger() {
        let dir = tempfile::tempdir().unwrap();
        let layout = SnapshotLayout::new(dir.path());
        let e = embedder();
        update_index(vec![doc("kyc norms")], &e, &layout, &options()).await.unwrap();

        // Rebuild from a corpus that no longer has the updated document.
        build_index_from_documents(&[doc("repo")], &e, &layout, &options()).await.unwrap();
        let ledger = ProcessedIds::load(&layout.ledger_path()).unwrap();
        assert_eq!(ledger.len(), 1);
        assert!(ledger.contains(&content_hash(&doc("repo").content)));

        let docs = vec![doc("kyc norms"), doc("repo")];
        let r = update_index(docs, &e, &layout, &options()).await.unwrap();
        assert_eq!((r.new_documents, r.skipped_documents, r.total_chunks), (1, 1, 2));
        let store = layout.load().unwrap();
        let titles: Vec<&str> = store.metadata().iter().map(|r| r.title.as_str()).collect();
        assert_eq!(titles, vec!["repo", "kyc norms"]);
    }

    #[tokio::test]
    async fn build_from_chunks_clears_the_ledger() {
        let dir = tempfile::tempdir().unwrap();
        let layout = SnapshotLayout::new(dir.path());
        let e = embedder();
        update_index(vec![doc("repo")], &e, &layout, &options()).await.unwrap();

        let chunks = preprocess_documents(&[doc("kyc norms")], &ChunkingOptions::default())
            .unwrap()
            .chunks;
        build_index(chunks, &e, &layout, &options()).await.unwrap();
        assert!(ProcessedIds::load(&layout.ledger_path()).unwrap().is_empty());

        let r = update_index(vec![doc("repo")], &e, &layout, &options()).await.unwrap();
        assert_eq!((r.new_documents, r.total_chunks), (1, 2));
    }
}
