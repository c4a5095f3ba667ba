//! Ollama client for embeddings. Wraps ollama-rs behind the [`Embedder`] trait.

use std::time::Duration;

use async_trait::async_trait;
use ollama_rs::generation::embeddings::request::{EmbeddingsInput, GenerateEmbeddingsRequest};
use ollama_rs::Ollama;
use thiserror::Error;

use crate::embeddings::{EmbedError, Embedder, Embedding};

pub const DEFAULT_EMBED_MODEL: &str = "all-minilm";
pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Thin wrapper around Ollama's embedding endpoint.
#[derive(Debug, Clone)]
pub struct OllamaClient {
    inner: Ollama,
    embed_model: String,
    timeout: Duration,
    dimension: Option<usize>,
}

impl OllamaClient {
    /// Create from URL string, e.g. `http://localhost:11434`.
    pub fn from_url(url: &str) -> Result<Self, OllamaError> {
        let inner = Ollama::try_new(url).map_err(OllamaError::ParseUrl)?;
        Ok(Self {
            inner,
            embed_model: DEFAULT_EMBED_MODEL.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            dimension: None,
        })
    }

    /// Set the embedding model (e.g. `all-minilm`, `nomic-embed-text`).
    pub fn with_embed_model(mut self, model: impl Into<String>) -> Self {
        self.embed_model = model.into();
        self
    }

    /// Upper bound for one embedding request.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Declares the model's output dimension so empty indexes can be sized up front.
    pub fn with_dimension(mut self, dimension: usize) -> Self {
        self.dimension = Some(dimension);
        self
    }

    pub fn embed_model(&self) -> &str {
        &self.embed_model
    }

    /// Embed multiple strings in one call. Returns one embedding per input.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>, OllamaError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let req = GenerateEmbeddingsRequest::new(
            self.embed_model.clone(),
            EmbeddingsInput::Multiple(texts.to_vec()),
        );
        let res = tokio::time::timeout(self.timeout, self.inner.generate_embeddings(req))
            .await
            .map_err(|_| OllamaError::Timeout(self.timeout))?
            .map_err(OllamaError::Request)?;
        if res.embeddings.len() != texts.len() {
            return Err(OllamaError::Count {
                expected: texts.len(),
                actual: res.embeddings.len(),
            });
        }
        Ok(res.embeddings)
    }
}

#[async_trait]
impl Embedder for OllamaClient {
    async fn encode(&self, texts: &[String]) -> Result<Vec<Embedding>, EmbedError> {
        self.embed_batch(texts).await.map_err(EmbedError::from)
    }

    fn dimension(&self) -> Option<usize> {
        self.dimension
    }
}

#[derive(Debug, Error)]
pub enum OllamaError {
    #[error("invalid Ollama URL: {0}")]
    ParseUrl(#[from] url::ParseError),
    #[error("Ollama request failed: {0}")]
    Request(#[from] ollama_rs::error::OllamaError),
    #[error("Ollama request timed out after {0:?}")]
    Timeout(Duration),
    #[error("Ollama returned {actual} embeddings for {expected} inputs")]
    Count { expected: usize, actual: usize },
}

impl From<OllamaError> for EmbedError {
    fn from(e: OllamaError) -> Self {
        match e {
            OllamaError::Timeout(d) => EmbedError::Timeout(d.as_secs()),
            OllamaError::Count { expected, actual } => {
                EmbedError::CountMismatch { expected, actual }
            }
            other => EmbedError::Provider(other.to_string()),
        }
    }
}
