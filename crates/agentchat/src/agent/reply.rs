//! Reply outcomes and pluggable reply handlers

use anyhow::Result;
use async_trait::async_trait;
use llm_core::ChatMessage;
use serde::{Deserialize, Serialize};

/// Why a chat stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The termination predicate fired
    Terminated,
    /// The auto-reply budget ran out
    MaxAutoReply,
    /// A human typed `exit`
    HumanExit,
    /// The replying agent had nothing to answer
    NoReply,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StopReason::Terminated => write!(f, "terminated"),
            StopReason::MaxAutoReply => write!(f, "max auto reply reached"),
            StopReason::HumanExit => write!(f, "human exit"),
            StopReason::NoReply => write!(f, "no reply"),
        }
    }
}

/// What an agent does with its turn
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Message(String),
    /// Both sides forget their history with each other, then this is sent
    Restart(String),
    Stop(StopReason),
}

/// Result of one reply handler
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerOutcome {
    /// Not handled; try the next step
    Pass,
    /// Send this reply
    Reply(String),
    /// Forget the history with the sender, then send this reply
    Restart(String),
    /// End the chat
    Stop(StopReason),
}

/// What a handler gets to look at
#[derive(Debug, Clone, Copy)]
pub struct ReplyContext<'a> {
    pub agent: &'a str,
    pub sender: &'a str,
    pub messages: &'a [ChatMessage],
}

impl<'a> ReplyContext<'a> {
    pub fn last_message(&self) -> Option<&'a ChatMessage> {
        self.messages.last()
    }
}

/// Custom reply step that runs after the termination check and before code
/// execution and the LLM.
#[async_trait]
pub trait ReplyHandler: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(&self, ctx: ReplyContext<'_>) -> Result<HandlerOutcome>;
}
