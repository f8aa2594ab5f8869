//! Human input for agents that ask a person before replying

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io::{stdout, BufRead, Write};

/// When an agent asks a human for its reply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HumanInputMode {
    /// Before every reply
    #[default]
    Always,
    /// Only when a termination message arrives or the auto-reply budget is spent
    Terminate,
    /// Never; the agent replies on its own
    Never,
}

impl std::fmt::Display for HumanInputMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HumanInputMode::Always => write!(f, "ALWAYS"),
            HumanInputMode::Terminate => write!(f, "TERMINATE"),
            HumanInputMode::Never => write!(f, "NEVER"),
        }
    }
}

impl std::str::FromStr for HumanInputMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "ALWAYS" => Ok(Self::Always),
            "TERMINATE" => Ok(Self::Terminate),
            "NEVER" => Ok(Self::Never),
            other => anyhow::bail!("Unknown human input mode: {}", other),
        }
    }
}

/// Source of human replies
#[async_trait]
pub trait HumanInput: Send + Sync {
    async fn prompt(&self, prompt: &str) -> Result<String>;
}

/// Reads one line from stdin per prompt
pub struct StdinInput;

#[async_trait]
impl HumanInput for StdinInput {
    async fn prompt(&self, prompt: &str) -> Result<String> {
        print!("{}", prompt);
        stdout().flush()?;

        tokio::task::spawn_blocking(|| {
            let mut line = String::new();
            std::io::stdin()
                .lock()
                .read_line(&mut line)
                .context("Failed to read from stdin")?;
            Ok(line.trim().to_string())
        })
        .await
        .context("stdin reader panicked")?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_parse_and_display() {
        assert_eq!("never".parse::<HumanInputMode>().unwrap(), HumanInputMode::Never);
        assert_eq!(HumanInputMode::Terminate.to_string(), "TERMINATE");
        assert!("sometimes".parse::<HumanInputMode>().is_err());
    }

    #[test]
    fn test_mode_serde() {
        #[derive(Deserialize)]
        struct Wrapper {
            mode: HumanInputMode,
        }
        let w: Wrapper = toml::from_str(r#"mode = "NEVER""#).unwrap();
        assert_eq!(w.mode, HumanInputMode::Never);
    }
}
