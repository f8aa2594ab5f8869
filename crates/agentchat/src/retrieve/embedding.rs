//! Embedding functions for the vector store
//!
//! The default is a deterministic feature-hashing embedding that needs no
//! model download. With the `embeddings` feature, fastembed's
//! all-MiniLM-L6-v2 sentence transformer is used instead.

use anyhow::Result;
#[cfg(feature = "embeddings")]
use anyhow::Context;
use tracing::warn;

#[cfg(feature = "embeddings")]
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};

/// Embedding vector type
pub type Embedding = Vec<f32>;

/// Dimensions of the hashing embedding
pub const DEFAULT_HASH_DIMS: usize = 384;

/// Turns text into vectors
pub trait EmbeddingFunction: Send + Sync {
    /// Stored with each collection so mismatched functions are detected
    fn name(&self) -> &str;

    fn embed(&self, texts: &[&str]) -> Result<Vec<Embedding>>;
}

/// Bag-of-words feature hashing with signed buckets, L2-normalised
#[derive(Debug, Clone)]
pub struct HashingEmbedding {
    dims: usize,
    name: String,
}

impl HashingEmbedding {
    pub fn new(dims: usize) -> Self {
        let dims = dims.max(1);
        Self {
            dims,
            name: format!("hashing-{}", dims),
        }
    }

    fn embed_one(&self, text: &str) -> Embedding {
        let mut v = vec![0.0f32; self.dims];

        for word in text
            .split(|c: char| !c.is_alphanumeric() && c != '_')
            .filter(|w| !w.is_empty())
        {
            let h = fnv1a(word.to_lowercase().as_bytes());
            let bucket = (h % self.dims as u64) as usize;
            let sign = if (h >> 63) == 0 { 1.0 } else { -1.0 };
            v[bucket] += sign;
        }

        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            v.iter_mut().for_each(|x| *x /= norm);
        }
        v
    }
}

impl Default for HashingEmbedding {
    fn default() -> Self {
        Self::new(DEFAULT_HASH_DIMS)
    }
}

impl EmbeddingFunction for HashingEmbedding {
    fn name(&self) -> &str {
        &self.name
    }

    fn embed(&self, texts: &[&str]) -> Result<Vec<Embedding>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for b in bytes {
        hash ^= *b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

/// all-MiniLM-L6-v2 via fastembed
#[cfg(feature = "embeddings")]
pub struct SentenceTransformerEmbedding {
    model: TextEmbedding,
}

#[cfg(feature = "embeddings")]
impl SentenceTransformerEmbedding {
    pub fn new() -> Result<Self> {
        let model = TextEmbedding::try_new(InitOptions::new(EmbeddingModel::AllMiniLML6V2))
            .context("Failed to initialize embedding model")?;
        Ok(Self { model })
    }
}

#[cfg(feature = "embeddings")]
impl EmbeddingFunction for SentenceTransformerEmbedding {
    fn name(&self) -> &str {
        "all-MiniLM-L6-v2"
    }

    fn embed(&self, texts: &[&str]) -> Result<Vec<Embedding>> {
        self.model
            .embed(texts.to_vec(), None)
            .context("Failed to generate embeddings")
    }
}

/// Best available embedding function
pub fn default_embedding_function() -> Box<dyn EmbeddingFunction> {
    #[cfg(feature = "embeddings")]
    {
        match SentenceTransformerEmbedding::new() {
            Ok(model) => return Box::new(model),
            Err(e) => warn!(error = %e, "Falling back to hashing embeddings"),
        }
    }

    if cfg!(not(feature = "embeddings")) {
        tracing::debug!("Built without the embeddings feature, using hashing embeddings");
    }
    Box::new(HashingEmbedding::default())
}

/// Cosine similarity; 0 for empty or mismatched vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || b.is_empty() || a.len() != b.len() {
        if !a.is_empty() && !b.is_empty() {
            warn!(a = a.len(), b = b.len(), "Embedding dimensions differ");
        }
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }

    dot / (mag_a * mag_b)
}
