//! Embedding provider trait and vector helpers
//!
//! Vectors are unit-normalized f32 of a fixed dimension and persisted as
//! little-endian byte blobs. The actual model runtime lives behind the
//! [`EmbeddingProvider`] trait; a fastembed-backed implementation is gated
//! behind the `local-embeddings` feature.

use crate::types::StoreError;

/// Dimension of the default embedding model (all-MiniLM-L6-v2)
pub const DEFAULT_EMBEDDING_DIMENSION: usize = 384;

/// Contract for embedding backends.
///
/// Implementations must return L2-normalized vectors of `dimension()` floats.
/// Failure to embed is non-fatal to callers: rows are stored with a null
/// vector and skipped by similarity search.
pub trait EmbeddingProvider: Send + Sync {
    fn embed(&self, text: &str) -> Result<Vec<f32>, StoreError>;

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, StoreError> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    fn dimension(&self) -> usize {
        DEFAULT_EMBEDDING_DIMENSION
    }
}

/// Normalize a vector to unit L2 norm in place. Zero vectors are left as-is.
pub fn l2_normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

/// Cosine similarity between two vectors. Mismatched lengths or zero vectors
/// score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 { 0.0 } else { dot / (norm_a * norm_b) }
}

/// Serialize an embedding to little-endian f32 bytes for SQLite storage.
pub fn serialize_embedding(v: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(v.len() * 4);
    for x in v {
        out.extend_from_slice(&x.to_le_bytes());
    }
    out
}

/// Deserialize little-endian f32 bytes back to a vector.
pub fn deserialize_embedding(data: &[u8]) -> Vec<f32> {
    data.chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

#[cfg(feature = "local-embeddings")]
pub use local::FastembedProvider;

#[cfg(feature = "local-embeddings")]
mod local {
    use super::{DEFAULT_EMBEDDING_DIMENSION, EmbeddingProvider, l2_normalize};
    use crate::types::StoreError;
    use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
    use std::sync::Mutex;

    /// Local embeddings via fastembed (all-MiniLM-L6-v2, 384 dims).
    pub struct FastembedProvider {
        model: Mutex<TextEmbedding>,
    }

    impl FastembedProvider {
        pub fn new() -> Result<Self, StoreError> {
            let model = TextEmbedding::try_new(InitOptions::new(EmbeddingModel::AllMiniLML6V2))
                .map_err(|e| StoreError::Embedding(format!("failed to initialize embedding model: {e}")))?;
            Ok(Self {
                model: Mutex::new(model),
            })
        }
    }

    impl EmbeddingProvider for FastembedProvider {
        fn embed(&self, text: &str) -> Result<Vec<f32>, StoreError> {
            let mut model = self.model.lock().expect("embedding model lock poisoned");
            let mut vectors = model
                .embed(vec![text.to_string()], None)
                .map_err(|e| StoreError::Embedding(e.to_string()))?;
            let mut v = vectors
                .pop()
                .ok_or_else(|| StoreError::Embedding("no embedding generated".to_string()))?;
            if v.len() != DEFAULT_EMBEDDING_DIMENSION {
                return Err(StoreError::Embedding(format!(
                    "dimension mismatch: expected {DEFAULT_EMBEDDING_DIMENSION}, got {}",
                    v.len()
                )));
            }
            l2_normalize(&mut v);
            Ok(v)
        }
    }
}
