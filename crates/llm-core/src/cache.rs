//! Seed-keyed on-disk response cache
//!
//! Completions live under `<root>/<seed>/<sha256>.json`. The same request with
//! the same seed is answered from disk, which makes reruns reproducible.

use anyhow::{Context, Result};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::openai::Completion;

#[derive(Debug, Clone)]
pub struct ResponseCache {
    dir: PathBuf,
}

impl ResponseCache {
    pub fn new(root: impl AsRef<Path>, seed: u64) -> Self {
        Self {
            dir: root.as_ref().join(seed.to_string()),
        }
    }

    /// Cache directory for this seed
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Hash of the serialized request
    pub fn key<T: Serialize>(request: &T) -> Result<String> {
        let body = serde_json::to_vec(request).context("Failed to serialize request for cache")?;
        let mut hasher = Sha256::new();
        hasher.update(&body);
        Ok(format!("{:x}", hasher.finalize()))
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }

    pub fn get(&self, key: &str) -> Option<Completion> {
        let path = self.entry_path(key);
        if !path.exists() {
            return None;
        }

        match fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<Completion>(&content) {
                Ok(mut completion) => {
                    completion.cached = true;
                    Some(completion)
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Ignoring corrupt cache entry");
                    None
                }
            },
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read cache entry");
                None
            }
        }
    }

    pub fn put(&self, key: &str, completion: &Completion) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create {}", self.dir.display()))?;
        let path = self.entry_path(key);
        fs::write(&path, serde_json::to_string_pretty(completion)?)?;
        debug!(path = %path.display(), "Cached completion");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn completion(text: &str) -> Completion {
        Completion {
            content: Some(text.to_string()),
            model: "gpt-4".to_string(),
            usage: None,
            cached: false,
        }
    }

    #[test]
    fn test_put_then_get() {
        let dir = TempDir::new().unwrap();
        let cache = ResponseCache::new(dir.path(), 42);
        let key = ResponseCache::key(&serde_json::json!({"q": 1})).unwrap();

        assert!(cache.get(&key).is_none());
        cache.put(&key, &completion("hello")).unwrap();

        let hit = cache.get(&key).unwrap();
        assert!(hit.cached);
        assert_eq!(hit.content.as_deref(), Some("hello"));
        assert!(cache.dir().ends_with("42"));
    }

    #[test]
    fn test_seeds_are_isolated() {
        let dir = TempDir::new().unwrap();
        let key = ResponseCache::key(&"same request").unwrap();
        ResponseCache::new(dir.path(), 1)
            .put(&key, &completion("one"))
            .unwrap();

        assert!(ResponseCache::new(dir.path(), 2).get(&key).is_none());
    }

    #[test]
    fn test_corrupt_entry_is_a_miss() {
        let dir = TempDir::new().unwrap();
        let cache = ResponseCache::new(dir.path(), 42);
        fs::create_dir_all(cache.dir()).unwrap();
        fs::write(cache.dir().join("bad.json"), "not json").unwrap();
        assert!(cache.get("bad").is_none());
    }
}
