//! Transcript persistence
//!
//! A transcript holds every chat of one run and is saved as pretty JSON,
//! either to an explicit path or under the data directory.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::chat::ChatResult;

const TITLE_MAX_CHARS: usize = 60;

/// Record of one run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transcript {
    pub id: String,
    /// Taken from the first task
    pub title: String,
    /// Model of the first configured endpoint
    pub model: String,
    pub chats: Vec<ChatResult>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transcript {
    pub fn new(model: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            title: "Untitled run".to_string(),
            model: model.into(),
            chats: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn add_chat(&mut self, chat: ChatResult) {
        if self.chats.is_empty() {
            if let Some(first) = chat.history.first() {
                self.title = truncate_title(first.text());
            }
        }
        self.chats.push(chat);
        self.updated_at = Utc::now();
    }

    /// Default location: `<data dir>/agentchat/transcripts/<id>.json`
    pub fn default_path(&self) -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("agentchat")
            .join("transcripts")
            .join(format!("{}.json", self.id))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
        }

        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content).with_context(|| format!("Failed to write transcript {}", path.display()))?;
        Ok(())
    }
}

fn truncate_title(text: &str) -> String {
    let line = text.trim().lines().next().unwrap_or("").trim();
    if line.chars().count() <= TITLE_MAX_CHARS {
        line.to_string()
    } else {
        let cut: String = line.chars().take(TITLE_MAX_CHARS - 3).collect();
        format!("{}...", cut)
    }
}
