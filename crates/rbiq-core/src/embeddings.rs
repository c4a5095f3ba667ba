//! Embedding providers.
//!
//! An [`Embedder`] maps an ordered batch of texts to vectors of one fixed
//! dimension, output `i` belonging to input `i`. The core never retries or
//! times out on its own; a provider that talks to the network must bound its
//! own calls so that `encode` either returns or fails.

use async_trait::async_trait;
use thiserror::Error;

/// Dimension of the reference sentence-embedding model (MiniLM).
pub const DEFAULT_DIMENSION: usize = 384;
/// Texts sent per `encode` call by [`embed_all`].
pub const DEFAULT_BATCH_SIZE: usize = 64;

pub type Embedding = Vec<f32>;

#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embeds `texts`, preserving order. Deterministic for a fixed model.
    async fn encode(&self, texts: &[String]) -> Result<Vec<Embedding>, EmbedError>;

    /// Output dimension, when known without calling the model.
    fn dimension(&self) -> Option<usize> {
        None
    }
}

/// Embeds `texts` in batches of `batch_size` and returns every vector, or the
/// first error. Nothing is returned until all batches have succeeded.
pub async fn embed_all(
    embedder: &dyn Embedder,
    texts: &[String],
    batch_size: usize,
) -> Result<Vec<Embedding>, EmbedError> {
    let mut out = Vec::with_capacity(texts.len());
    for (n, batch) in texts.chunks(batch_size.max(1)).enumerate() {
        let vectors = embedder.encode(batch).await?;
        if vectors.len() != batch.len() {
            return Err(EmbedError::CountMismatch {
                expected: batch.len(),
                actual: vectors.len(),
            });
        }
        tracing::debug!(batch = n, size = batch.len(), "embedded batch");
        out.extend(vectors);
    }
    Ok(out)
}

/// Embeds a single query string.
pub async fn embed_one(embedder: &dyn Embedder, text: &str) -> Result<Embedding, EmbedError> {
    let mut vectors = embedder.encode(&[text.to_string()]).await?;
    if vectors.len() != 1 {
        return Err(EmbedError::CountMismatch {
            expected: 1,
            actual: vectors.len(),
        });
    }
    Ok(vectors.remove(0))
}

/// Local embeddings by feature hashing.
///
/// Lowercased alphanumeric tokens are hashed (FNV-1a, stable across builds and
/// platforms) into `dimension` buckets; the term-frequency vector is then
/// L2-normalized. Same text, same vector, with no model to load.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Result<Self, EmbedError> {
        if dimension == 0 {
            return Err(EmbedError::Provider("hashing embedder needs a positive dimension".into()));
        }
        Ok(Self { dimension })
    }

    pub fn embed_text(&self, text: &str) -> Embedding {
        let mut tf = vec![0.0f32; self.dimension];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let bucket = (fnv1a(&token.to_lowercase()) % self.dimension as u64) as usize;
            tf[bucket] += 1.0;
        }
        let norm: f32 = tf.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut tf {
                *x /= norm;
            }
        }
        tf
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self {
            dimension: DEFAULT_DIMENSION,
        }
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    async fn encode(&self, texts: &[String]) -> Result<Vec<Embedding>, EmbedError> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }

    fn dimension(&self) -> Option<usize> {
        Some(self.dimension)
    }
}

fn fnv1a(s: &str) -> u64 {
    s.bytes().fold(0xcbf2_9ce4_8422_2325, |h, b| (h ^ u64::from(b)).wrapping_mul(0x0100_0000_01b3))
}

#[derive(Debug, Error)]
pub enum EmbedError {
    #[error("embedding provider failed: {0}")]
    Provider(String),
    #[error("embedding provider returned {actual} vectors for {expected} texts")]
    CountMismatch { expected: usize, actual: usize },
    #[error("embedding request timed out after {0}s")]
    Timeout(u64),
}
