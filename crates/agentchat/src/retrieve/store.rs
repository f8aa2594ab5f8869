//! On-disk vector store: one bincode file per collection

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use tracing::{debug, info};

use super::embedding::{cosine_similarity, Embedding};

const COLLECTION_EXT: &str = "bin";

/// An embedded chunk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredChunk {
    pub id: String,
    pub source: String,
    pub content: String,
    pub embedding: Embedding,
}

/// A query match, best first
#[derive(Debug, Clone, PartialEq)]
pub struct QueryHit {
    pub id: String,
    pub source: String,
    pub content: String,
    pub score: f32,
}

/// Named set of embedded chunks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Collection {
    pub name: String,
    /// Name of the embedding function that produced the vectors
    pub embedding_function: String,
    chunks: Vec<StoredChunk>,
}

impl Collection {
    fn new(name: &str, embedding_function: &str) -> Self {
        Self {
            name: name.to_string(),
            embedding_function: embedding_function.to_string(),
            chunks: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// Insert chunks, replacing any with the same id
    pub fn upsert(&mut self, chunks: Vec<StoredChunk>) {
        for chunk in chunks {
            match self.chunks.iter_mut().find(|c| c.id == chunk.id) {
                Some(existing) => *existing = chunk,
                None => self.chunks.push(chunk),
            }
        }
    }

    /// Top `n_results` chunks by cosine similarity, optionally restricted to
    /// chunks containing `search_string`
    pub fn query(&self, embedding: &[f32], n_results: usize, search_string: Option<&str>) -> Vec<QueryHit> {
        let mut hits: Vec<QueryHit> = self
            .chunks
            .iter()
            .filter(|c| match search_string {
                Some(s) if !s.is_empty() => c.content.contains(s),
                _ => true,
            })
            .map(|c| QueryHit {
                id: c.id.clone(),
                source: c.source.clone(),
                content: c.content.clone(),
                score: cosine_similarity(embedding, &c.embedding),
            })
            .collect();

        hits.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
        hits.truncate(n_results);
        hits
    }
}

/// Directory of persisted collections
#[derive(Debug, Clone)]
pub struct VectorStore {
    root: PathBuf,
}

impl VectorStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .with_context(|| format!("Failed to create vector store at {}", root.display()))?;
        Ok(Self { root })
    }

    fn collection_path(&self, name: &str) -> Result<PathBuf> {
        validate_name(name)?;
        Ok(self.root.join(format!("{}.{}", name, COLLECTION_EXT)))
    }

    pub fn collection_exists(&self, name: &str) -> bool {
        self.collection_path(name).map(|p| p.is_file()).unwrap_or(false)
    }

    /// Create a collection. An existing one is returned only with `get_or_create`.
    pub fn create_collection(&self, name: &str, embedding_function: &str, get_or_create: bool) -> Result<Collection> {
        if self.collection_exists(name) {
            if !get_or_create {
                bail!("Collection `{}` already exists", name);
            }
            return self.get_collection(name);
        }

        let collection = Collection::new(name, embedding_function);
        self.save(&collection)?;
        info!(collection = name, "Created collection");
        Ok(collection)
    }

    pub fn get_collection(&self, name: &str) -> Result<Collection> {
        let path = self.collection_path(name)?;
        if !path.is_file() {
            bail!("Collection `{}` doesn't exist", name);
        }

        let bytes = fs::read(&path).with_context(|| format!("Failed to read {}", path.display()))?;
        let collection: Collection =
            bincode::deserialize(&bytes).with_context(|| format!("Corrupt collection file {}", path.display()))?;
        debug!(collection = name, chunks = collection.len(), "Loaded collection");
        Ok(collection)
    }

    pub fn save(&self, collection: &Collection) -> Result<()> {
        let path = self.collection_path(&collection.name)?;
        let bytes = bincode::serialize(collection).context("Failed to serialize collection")?;

        // write-then-rename so readers never see a partial file
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, bytes).with_context(|| format!("Failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &path).with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
        bail!("Invalid collection name `{}`: use letters, digits, '-' or '_'", name);
    }
    Ok(())
}
