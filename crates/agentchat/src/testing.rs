//! Test doubles shared by the module tests

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use llm_core::{ChatBackend, ChatMessage, Completion};
use parking_lot::Mutex;
use std::collections::VecDeque;

use crate::human::HumanInput;

/// Model stand-in that replays canned replies and records every call
#[derive(Debug, Default)]
pub struct ScriptedBackend {
    replies: Mutex<VecDeque<String>>,
    fallback: Option<String>,
    calls: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedBackend {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: Mutex::new(replies.into_iter().map(Into::into).collect()),
            fallback: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Reply used once the script runs out
    pub fn with_fallback(mut self, reply: impl Into<String>) -> Self {
        self.fallback = Some(reply.into());
        self
    }

    pub fn calls(&self) -> Vec<Vec<ChatMessage>> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl ChatBackend for ScriptedBackend {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<Completion> {
        self.calls.lock().push(messages.to_vec());
        let content = self
            .replies
            .lock()
            .pop_front()
            .or_else(|| self.fallback.clone())
            .ok_or_else(|| anyhow!("model endpoint unreachable"))?;

        Ok(Completion {
            content: Some(content),
            model: "scripted".to_string(),
            usage: None,
            cached: false,
        })
    }
}

/// Pre-recorded answers; runs dry as empty strings
#[derive(Debug, Default)]
pub struct ScriptedInput {
    answers: Mutex<VecDeque<String>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedInput {
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            answers: Mutex::new(answers.into_iter().map(Into::into).collect()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Prompts shown so far
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }
}

#[async_trait]
impl HumanInput for ScriptedInput {
    async fn prompt(&self, prompt: &str) -> Result<String> {
        self.prompts.lock().push(prompt.to_string());
        Ok(self.answers.lock().pop_front().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_input() {
        let input = ScriptedInput::new(["first", "exit"]);
        assert_eq!(input.prompt("a? ").await.unwrap(), "first");
        assert_eq!(input.prompt("b? ").await.unwrap(), "exit");
        assert_eq!(input.prompt("c? ").await.unwrap(), "");
        assert_eq!(input.prompts().len(), 3);
    }

    #[tokio::test]
    async fn test_scripted_backend_runs_dry() {
        let backend = ScriptedBackend::new(["one"]);
        let messages = [ChatMessage::user("hi")];
        assert_eq!(backend.complete(&messages).await.unwrap().content.as_deref(), Some("one"));
        assert!(backend.complete(&messages).await.is_err());
        assert_eq!(backend.calls().len(), 2);
    }
}
