//! Retrieval settings

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const DEFAULT_COLLECTION: &str = "autogen-docs";
pub const DEFAULT_CHUNK_TOKEN_SIZE: usize = 2000;
pub const DEFAULT_DB_PATH: &str = "/tmp/chromadb";
pub const DEFAULT_N_RESULTS: usize = 20;

/// Settings for the retrieval proxy agent and the `index` command
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrieveConfig {
    /// Documents to index; without it the collection must already exist
    pub docs_path: Option<PathBuf>,
    pub collection_name: String,
    pub chunk_token_size: usize,
    /// Context budget per prompt; 0 means twice `chunk_token_size`
    pub context_max_tokens: usize,
    /// Model name used to pick the tokenizer
    pub model: String,
    pub db_path: PathBuf,
    /// Reuse an existing collection instead of failing
    pub get_or_create: bool,
    pub n_results: usize,
    /// Template with `{input_question}` and `{input_context}` placeholders
    pub customized_prompt: Option<String>,
    /// Let the assistant ask for more context with `UPDATE CONTEXT`
    pub update_context: bool,
}

impl Default for RetrieveConfig {
    fn default() -> Self {
        Self {
            docs_path: None,
            collection_name: DEFAULT_COLLECTION.to_string(),
            chunk_token_size: DEFAULT_CHUNK_TOKEN_SIZE,
            context_max_tokens: 0,
            model: llm_core::config::DEFAULT_MODEL.to_string(),
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            get_or_create: false,
            n_results: DEFAULT_N_RESULTS,
            customized_prompt: None,
            update_context: true,
        }
    }
}

impl RetrieveConfig {
    pub fn with_docs_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.docs_path = Some(path.into());
        self
    }

    pub fn with_db_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.db_path = path.into();
        self
    }

    pub fn with_chunk_token_size(mut self, size: usize) -> Self {
        self.chunk_token_size = size;
        self
    }

    pub fn with_get_or_create(mut self, get_or_create: bool) -> Self {
        self.get_or_create = get_or_create;
        self
    }

    /// Effective context budget
    pub fn context_budget(&self) -> usize {
        if self.context_max_tokens > 0 {
            self.context_max_tokens
        } else {
            self.chunk_token_size * 2
        }
    }
}
