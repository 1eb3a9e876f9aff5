use crate::bm25::tokenize;
use async_trait::async_trait;
use recall_core::{RecallError, RecallResult};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Trait for computing text embeddings (vector representations).
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Compute one embedding per input text, preserving order.
    async fn embed_batch(&self, texts: &[String]) -> RecallResult<Vec<Vec<f32>>>;

    /// Compute the embedding for a single text.
    async fn embed(&self, text: &str) -> RecallResult<Vec<f32>> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        match vectors.len() {
            1 => Ok(vectors.remove(0)),
            n => Err(RecallError::Embedding(format!(
                "provider returned {n} vectors for 1 input"
            ))),
        }
    }

    /// Dimension of the embedding vectors produced by this provider.
    fn dimension(&self) -> usize;
}

/// Embedding capability handed to the retrieval memory.
///
/// Whether embedding is available is decided at construction time and queried
/// with [`Embedder::supports_embedding`], never discovered mid-call.
#[derive(Clone, Default)]
pub enum Embedder {
    /// No embedding provider is configured. Indexing always embeds, so such a
    /// memory can only answer queries on an empty session.
    #[default]
    Unsupported,
    /// Embeddings are computed by the wrapped provider.
    Provider(Arc<dyn EmbeddingProvider>),
}

impl Embedder {
    pub fn new(provider: Arc<dyn EmbeddingProvider>) -> Self {
        Self::Provider(provider)
    }

    pub fn supports_embedding(&self) -> bool {
        matches!(self, Self::Provider(_))
    }

    /// Vector dimension of the configured provider, if any.
    pub fn dimension(&self) -> Option<usize> {
        match self {
            Self::Unsupported => None,
            Self::Provider(p) => Some(p.dimension()),
        }
    }

    /// Embed a batch of texts, checking that one vector comes back per input.
    pub async fn embed_batch(&self, texts: &[String]) -> RecallResult<Vec<Vec<f32>>> {
        let provider = self.provider()?;
        let vectors = provider.embed_batch(texts).await?;
        if vectors.len() != texts.len() {
            return Err(RecallError::Embedding(format!(
                "provider returned {} vectors for {} inputs",
                vectors.len(),
                texts.len()
            )));
        }
        Ok(vectors)
    }

    /// Embed a single text.
    pub async fn embed(&self, text: &str) -> RecallResult<Vec<f32>> {
        self.provider()?.embed(text).await
    }

    fn provider(&self) -> RecallResult<&Arc<dyn EmbeddingProvider>> {
        match self {
            Self::Provider(p) => Ok(p),
            Self::Unsupported => Err(RecallError::CapabilityUnsupported(
                "no embedding provider is configured".to_string(),
            )),
        }
    }
}

impl fmt::Debug for Embedder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unsupported => f.write_str("Embedder::Unsupported"),
            Self::Provider(p) => f
                .debug_struct("Embedder::Provider")
                .field("dimension", &p.dimension())
                .finish(),
        }
    }
}

/// Local feature-hashing embedding (no external API needed).
///
/// Each token's term frequency is added to a few hashed, signed buckets and the
/// result is L2-normalized. Texts sharing vocabulary end up close under cosine
/// similarity, which is enough for offline use and tests.
pub struct LocalEmbedding {
    dimension: usize,
}

impl LocalEmbedding {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    fn embed_text(&self, text: &str) -> RecallResult<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(RecallError::Embedding("Cannot embed empty text".to_string()));
        }

        let mut vector = vec![0.0f32; self.dimension];
        let tokens = tokenize(text);
        if tokens.is_empty() {
            return Ok(vector);
        }

        let mut freq: HashMap<&str, f32> = HashMap::new();
        for token in &tokens {
            *freq.entry(token.as_str()).or_insert(0.0) += 1.0;
        }

        let total = tokens.len() as f32;
        for (token, count) in freq {
            let tf = count / total;
            for (seed, weight) in [(0u8, 1.0f32), (1, 0.7), (2, 0.5)] {
                let hash = fnv1a(token.as_bytes(), seed);
                let bucket = hash as usize % self.dimension;
                let sign = if hash & 0x8000_0000 == 0 { 1.0 } else { -1.0 };
                vector[bucket] += sign * tf * weight;
            }
        }

        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        Ok(vector)
    }
}

impl Default for LocalEmbedding {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl EmbeddingProvider for LocalEmbedding {
    async fn embed_batch(&self, texts: &[String]) -> RecallResult<Vec<Vec<f32>>> {
        texts.iter().map(|t| self.embed_text(t)).collect()
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// FNV-1a over `data` followed by a seed byte.
fn fnv1a(data: &[u8], seed: u8) -> u32 {
    let mut hash: u32 = 2166136261;
    for &byte in data.iter().chain(std::iter::once(&seed)) {
        hash ^= byte as u32;
        hash = hash.wrapping_mul(16777619);
    }
    hash
}
