//! Pluggable embedders.
//!
//! The engine never mandates a model: anything producing fixed-dimension,
//! L2-normalized vectors works. [`HashEmbedder`] is the deterministic
//! fallback (feature hashing over the code tokenizer) used by tests and
//! offline setups; the `fastembed` cargo feature adds a real ONNX model.

use crate::store::fts;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("Failed to initialize embedding model: {0}")]
    ModelInit(String),

    #[error("Failed to generate embedding: {0}")]
    Embedding(String),
}

/// Capability consumed by the store and retriever.
pub trait Embedder: Send + Sync {
    /// Fixed output dimension.
    fn dimension(&self) -> usize;

    /// Embed a batch of texts into L2-normalized vectors, one per input.
    fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError>;
}

/// Feature-hashing embedder: tokens hash into buckets, the bucket
/// histogram is L2-normalized. Fully deterministic and dependency-free;
/// lexical overlap approximates similarity well enough for tests and
/// air-gapped machines.
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(8),
        }
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(64)
    }
}

impl Embedder for HashEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts
            .iter()
            .map(|text| {
                let mut vector = vec![0.0f32; self.dimension];
                for token in fts::tokenize(text) {
                    let bucket = fnv1a(token.as_bytes()) as usize % self.dimension;
                    vector[bucket] += 1.0;
                }
                let magnitude: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
                if magnitude > 0.0 {
                    for value in &mut vector {
                        *value /= magnitude;
                    }
                }
                vector
            })
            .collect())
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in bytes {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

/// Real embedding model behind the `fastembed` feature.
#[cfg(feature = "fastembed")]
pub mod model {
    use super::{Embedder, EmbeddingError};
    use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
    use std::sync::Mutex;

    /// AllMiniLM-L6-v2 through fastembed (384 dimensions).
    pub struct FastEmbedder {
        model: Mutex<TextEmbedding>,
        dimension: usize,
    }

    impl FastEmbedder {
        pub fn new() -> Result<Self, EmbeddingError> {
            let mut model = TextEmbedding::try_new(
                InitOptions::new(EmbeddingModel::AllMiniLML6V2).with_show_download_progress(false),
            )
            .map_err(|e| EmbeddingError::ModelInit(e.to_string()))?;

            let probe = model
                .embed(vec!["probe"], None)
                .map_err(|e| EmbeddingError::Embedding(e.to_string()))?;
            let dimension = probe
                .into_iter()
                .next()
                .map(|v| v.len())
                .ok_or_else(|| EmbeddingError::ModelInit("empty probe embedding".to_string()))?;

            Ok(Self {
                model: Mutex::new(model),
                dimension,
            })
        }
    }

    impl Embedder for FastEmbedder {
        fn dimension(&self) -> usize {
            self.dimension
        }

        fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            let mut model = self
                .model
                .lock()
                .map_err(|_| EmbeddingError::Embedding("embedder mutex poisoned".to_string()))?;
            model
                .embed(texts.to_vec(), None)
                .map_err(|e| EmbeddingError::Embedding(e.to_string()))
        }
    }
}
