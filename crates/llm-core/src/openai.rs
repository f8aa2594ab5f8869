//! OpenAI-compatible chat completions client

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use crate::cache::ResponseCache;
use crate::config::{EndpointConfig, LlmConfig};

/// Message author role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A single chat message.
///
/// `content` is optional: some replies carry no text at all.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(content.into()),
            name: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// A message with no content field
    pub fn empty(role: Role) -> Self {
        Self {
            role,
            content: None,
            name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Content, or "" when absent
    pub fn text(&self) -> &str {
        self.content.as_deref().unwrap_or("")
    }
}

/// Token accounting reported by the server
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
}

/// A finished completion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    pub content: Option<String>,
    pub model: String,
    #[serde(default)]
    pub usage: Option<Usage>,
    /// Served from the response cache
    #[serde(skip)]
    pub cached: bool,
}

/// Something that can turn a message list into a reply
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<Completion>;
}

/// Request body sent to `/chat/completions`
#[derive(Debug, Clone, Serialize)]
pub struct CompletionRequest<'a> {
    pub model: &'a str,
    pub messages: &'a [ChatMessage],
    pub temperature: f32,
    pub stream: bool,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    model: Option<String>,
    choices: Vec<CompletionChoice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

/// Client for the endpoints of one [`LlmConfig`]
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    config: Arc<LlmConfig>,
    client: reqwest::Client,
    cache: Option<ResponseCache>,
}

impl OpenAiClient {
    /// Create a client; the HTTP timeout comes from `request_timeout`
    pub fn new(config: Arc<LlmConfig>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout))
            .build()
            .context("Failed to create HTTP client")?;

        let cache = config
            .seed
            .map(|seed| ResponseCache::new(&config.cache_root, seed));

        Ok(Self {
            config,
            client,
            cache,
        })
    }

    /// Shared configuration
    pub fn config(&self) -> &LlmConfig {
        &self.config
    }

    async fn request(
        &self,
        endpoint: &EndpointConfig,
        request: &CompletionRequest<'_>,
    ) -> Result<Completion> {
        if endpoint.api_type != "openai" {
            bail!("Unsupported api_type: {}", endpoint.api_type);
        }

        let url = endpoint.completions_url();
        let mut builder = self.client.post(&url).json(request);
        if endpoint.has_credential() {
            builder = builder.bearer_auth(&endpoint.api_key);
        }

        let resp = builder
            .send()
            .await
            .with_context(|| format!("Failed to connect to {}", url))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorResponse>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);
            bail!("Endpoint {} returned {}: {}", url, status, message);
        }

        let parsed: CompletionResponse = resp
            .json()
            .await
            .context("Failed to parse completion response")?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("Completion response from {} has no choices", url))?;

        Ok(Completion {
            content: choice.message.content,
            model: parsed.model.unwrap_or_else(|| request.model.to_string()),
            usage: parsed.usage,
            cached: false,
        })
    }
}

#[async_trait]
impl ChatBackend for OpenAiClient {
    #[instrument(skip(self, messages), fields(messages = messages.len()))]
    async fn complete(&self, messages: &[ChatMessage]) -> Result<Completion> {
        let mut last_error = None;

        for endpoint in &self.config.config_list {
            let request = CompletionRequest {
                model: endpoint.model_name(),
                messages,
                temperature: self.config.temperature,
                stream: false,
            };

            let key = match self.cache {
                Some(_) => Some(ResponseCache::key(&request)?),
                None => None,
            };

            if let (Some(cache), Some(key)) = (&self.cache, &key) {
                if let Some(hit) = cache.get(key) {
                    debug!(model = %hit.model, "Serving completion from cache");
                    return Ok(hit);
                }
            }

            match self.request(endpoint, &request).await {
                Ok(completion) => {
                    if let (Some(cache), Some(key)) = (&self.cache, &key) {
                        if let Err(e) = cache.put(key, &completion) {
                            warn!(error = %e, "Failed to write response cache");
                        }
                    }
                    return Ok(completion);
                }
                Err(e) => {
                    warn!(endpoint = %endpoint.api_base, error = %e, "Endpoint failed");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| anyhow!("config_list is empty")))
    }
}
