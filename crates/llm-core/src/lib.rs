//! llm-core: Shared library for OpenAI-compatible LLM endpoints
//!
//! Provides:
//! - Endpoint configuration and config-list loading
//! - Chat completions client
//! - Seed-keyed response cache

pub mod cache;
pub mod config;
pub mod openai;

pub use cache::ResponseCache;
pub use config::{config_list_from_json, filter_config_list, EndpointConfig, LlmConfig};
pub use openai::{ChatBackend, ChatMessage, Completion, CompletionRequest, OpenAiClient, Role, Usage};
