//! Endpoint configuration and config-list loading

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default chat model when an endpoint entry does not name one
pub const DEFAULT_MODEL: &str = "gpt-4";

/// One reachable model endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Protocol family (only "openai" is spoken)
    #[serde(default = "default_api_type")]
    pub api_type: String,
    /// Base address; `/chat/completions` is appended
    #[serde(alias = "base_url")]
    pub api_base: String,
    /// Credential; "NULL" or empty means no Authorization header
    #[serde(default = "default_api_key")]
    pub api_key: String,
    /// Model name sent with each request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// Settings shared by every agent that talks to the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Endpoints tried in order
    #[serde(default = "default_config_list")]
    pub config_list: Vec<EndpointConfig>,
    /// Request timeout in seconds
    #[serde(default = "default_request_timeout", alias = "timeout")]
    pub request_timeout: u64,
    /// Cache seed; `None` disables the response cache
    #[serde(default = "default_seed")]
    pub seed: Option<u64>,
    /// Sampling temperature
    #[serde(default)]
    pub temperature: f32,
    /// Directory holding one cache subdirectory per seed
    #[serde(default = "default_cache_root")]
    pub cache_root: PathBuf,
}

fn default_api_type() -> String {
    "openai".to_string()
}

fn default_api_key() -> String {
    "NULL".to_string()
}

fn default_config_list() -> Vec<EndpointConfig> {
    vec![EndpointConfig::local()]
}

fn default_request_timeout() -> u64 {
    1200
}

fn default_seed() -> Option<u64> {
    Some(42)
}

fn default_cache_root() -> PathBuf {
    PathBuf::from(".cache")
}

impl EndpointConfig {
    /// The local text-generation server on port 7860
    pub fn local() -> Self {
        Self {
            api_type: default_api_type(),
            api_base: "http://localhost:7860".to_string(),
            api_key: default_api_key(),
            model: None,
        }
    }

    /// Model to request from this endpoint
    pub fn model_name(&self) -> &str {
        self.model.as_deref().unwrap_or(DEFAULT_MODEL)
    }

    /// Full chat completions URL
    pub fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.api_base.trim_end_matches('/'))
    }

    /// Whether a bearer token should be sent
    pub fn has_credential(&self) -> bool {
        !self.api_key.is_empty() && self.api_key != "NULL"
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            config_list: default_config_list(),
            request_timeout: default_request_timeout(),
            seed: default_seed(),
            temperature: 0.0,
            cache_root: default_cache_root(),
        }
    }
}

impl LlmConfig {
    /// Build from an explicit endpoint list, keeping the other defaults
    pub fn with_config_list(config_list: Vec<EndpointConfig>) -> Self {
        Self {
            config_list,
            ..Default::default()
        }
    }

    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_request_timeout(mut self, secs: u64) -> Self {
        self.request_timeout = secs;
        self
    }

    pub fn with_cache_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.cache_root = root.into();
        self
    }

    /// Model of the first endpoint
    pub fn primary_model(&self) -> &str {
        self.config_list
            .first()
            .map(|e| e.model_name())
            .unwrap_or(DEFAULT_MODEL)
    }
}

/// Load an endpoint list from JSON.
///
/// If an environment variable named `env_or_file` exists its value is parsed
/// as the JSON list, otherwise `file_location/env_or_file` is read. When
/// `filter_models` is non-empty only entries whose model is listed are kept.
pub fn config_list_from_json(
    env_or_file: &str,
    file_location: impl AsRef<Path>,
    filter_models: &[&str],
) -> Result<Vec<EndpointConfig>> {
    let json = match std::env::var(env_or_file) {
        Ok(value) if !value.trim().is_empty() => value,
        _ => {
            let path = file_location.as_ref().join(env_or_file);
            std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?
        }
    };

    let list: Vec<EndpointConfig> =
        serde_json::from_str(&json).with_context(|| format!("Failed to parse {}", env_or_file))?;

    Ok(filter_config_list(list, filter_models))
}

/// Keep entries whose model is in `models`; an empty filter keeps everything
pub fn filter_config_list(list: Vec<EndpointConfig>, models: &[&str]) -> Vec<EndpointConfig> {
    if models.is_empty() {
        return list;
    }

    list.into_iter()
        .filter(|e| e.model.as_deref().map_or(false, |m| models.contains(&m)))
        .collect()
}
