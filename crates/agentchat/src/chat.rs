//! Two-party chat loop

use anyhow::Result;
use llm_core::ChatMessage;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::agent::{ConversableAgent, Reply, StopReason};

// ANSI colors
const YELLOW: &str = "\x1b[93m";
const DIM: &str = "\x1b[2m";
const RESET: &str = "\x1b[0m";

const SEPARATOR_WIDTH: usize = 80;

/// Options for one chat
#[derive(Debug, Clone)]
pub struct ChatOptions {
    /// Forget earlier messages between the two agents
    pub clear_history: bool,
    /// Do not print messages as they are delivered
    pub silent: bool,
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self {
            clear_history: true,
            silent: false,
        }
    }
}

/// Outcome of a finished chat
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResult {
    pub sender: String,
    pub recipient: String,
    /// History from the initiating agent's point of view
    pub history: Vec<ChatMessage>,
    /// Replies exchanged after the opening message
    pub replies: usize,
    pub reason: StopReason,
}

impl ChatResult {
    /// Last message in the chat
    pub fn last_message(&self) -> Option<&ChatMessage> {
        self.history.last()
    }
}

/// Start a chat from `sender` to `recipient` and run it until one side stops
/// replying.
#[instrument(skip_all, fields(sender = %sender.name(), recipient = %recipient.name()))]
pub async fn initiate_chat(
    sender: &mut ConversableAgent,
    recipient: &mut ConversableAgent,
    message: impl Into<String>,
    options: &ChatOptions,
) -> Result<ChatResult> {
    sender.prepare_chat(recipient.name(), options.clear_history);
    recipient.prepare_chat(sender.name(), options.clear_history);

    let mut content = message.into();
    let mut replies = 0;
    let mut from = &mut *sender;
    let mut to = &mut *recipient;

    let reason = loop {
        deliver(from, to, &content, options.silent);

        match to.generate_reply(from.name()).await? {
            Reply::Message(next) => {
                replies += 1;
                debug!(replies, speaker = %to.name(), "Reply generated");
                content = next;
                std::mem::swap(&mut from, &mut to);
            }
            Reply::Restart(next) => {
                replies += 1;
                debug!(replies, speaker = %to.name(), "Conversation restarted");
                from.clear_history(Some(to.name()));
                content = next;
                std::mem::swap(&mut from, &mut to);
            }
            Reply::Stop(reason) => break reason,
        }
    };

    info!(replies, %reason, "Chat finished");

    Ok(ChatResult {
        sender: sender.name().to_string(),
        recipient: recipient.name().to_string(),
        history: sender.history_with(recipient.name()).to_vec(),
        replies,
        reason,
    })
}

fn deliver(from: &mut ConversableAgent, to: &mut ConversableAgent, content: &str, silent: bool) {
    from.record_sent(to.name(), content);
    to.receive(from.name(), content);

    if !silent {
        print_message(from.name(), to.name(), content);
    }
}

fn print_message(from: &str, to: &str, content: &str) {
    println!("{}{}{} (to {}):\n", YELLOW, from, RESET, to);
    println!("{}", content);
    println!("\n{}{}{}", DIM, "-".repeat(SEPARATOR_WIDTH), RESET);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentConfig;
    use crate::human::HumanInputMode;
    use crate::termination::{ends_with_terminate, predicate};
    use crate::testing::ScriptedBackend;
    use llm_core::Role;
    use std::sync::Arc;

    fn quiet() -> ChatOptions {
        ChatOptions {
            silent: true,
            ..Default::default()
        }
    }

    fn pair(script: Vec<&str>, proxy_script: Vec<&str>, max: usize) -> (ConversableAgent, ConversableAgent) {
        let assistant = ConversableAgent::new(AgentConfig::assistant("assistant"))
            .with_llm(Arc::new(ScriptedBackend::new(script)));
        let proxy = ConversableAgent::new(
            AgentConfig::new("user_proxy")
                .with_human_input_mode(HumanInputMode::Never)
                .with_max_consecutive_auto_reply(max),
        )
        .with_termination(predicate(ends_with_terminate))
        .with_llm(Arc::new(ScriptedBackend::new(proxy_script)));
        (proxy, assistant)
    }

    #[tokio::test]
    async fn test_chat_ends_on_terminate() {
        let (mut proxy, mut assistant) = pair(
            vec!["Here is a plan", "Done. TERMINATE"],
            vec!["CONTINUE"],
            10,
        );

        let result = initiate_chat(&mut proxy, &mut assistant, "task", &quiet()).await.unwrap();
        assert_eq!(result.reason, StopReason::Terminated);
        assert_eq!(result.replies, 3);
        assert_eq!(result.history.len(), 4);
        assert_eq!(result.history[0].role, Role::Assistant);
        assert_eq!(result.history[0].text(), "task");
        assert_eq!(result.last_message().unwrap().text(), "Done. TERMINATE");
        assert_eq!(result.last_message().unwrap().role, Role::User);
    }

    #[tokio::test]
    async fn test_chat_respects_auto_reply_budget() {
        let assistant_backend = ScriptedBackend::new(Vec::<String>::new()).with_fallback("still working");
        let mut assistant = ConversableAgent::new(AgentConfig::assistant("assistant"))
            .with_llm(Arc::new(assistant_backend));
        let proxy_backend = Arc::new(ScriptedBackend::new(Vec::<String>::new()).with_fallback("CONTINUE"));
        let mut proxy = ConversableAgent::new(
            AgentConfig::new("user_proxy")
                .with_human_input_mode(HumanInputMode::Never)
                .with_max_consecutive_auto_reply(10),
        )
        .with_termination(predicate(ends_with_terminate))
        .with_llm(proxy_backend.clone());

        let result = initiate_chat(&mut proxy, &mut assistant, "task", &quiet()).await.unwrap();
        assert_eq!(result.reason, StopReason::MaxAutoReply);
        assert_eq!(proxy_backend.calls().len(), 10);
        // opening message + 11 assistant replies + 10 proxy replies
        assert_eq!(result.history.len(), 22);
    }

    #[tokio::test]
    async fn test_second_chat_clears_history() {
        let (mut proxy, mut assistant) = pair(vec!["TERMINATE", "TERMINATE"], vec![], 10);

        initiate_chat(&mut proxy, &mut assistant, "first", &quiet()).await.unwrap();
        let result = initiate_chat(&mut proxy, &mut assistant, "second", &quiet()).await.unwrap();
        assert_eq!(result.history.len(), 2);
        assert_eq!(result.history[0].text(), "second");
    }

    #[tokio::test]
    async fn test_keep_history_between_chats() {
        let (mut proxy, mut assistant) = pair(vec!["TERMINATE", "TERMINATE"], vec![], 10);
        let keep = ChatOptions {
            clear_history: false,
            silent: true,
        };

        initiate_chat(&mut proxy, &mut assistant, "first", &keep).await.unwrap();
        let result = initiate_chat(&mut proxy, &mut assistant, "second", &keep).await.unwrap();
        assert_eq!(result.history.len(), 4);
    }

    #[tokio::test]
    async fn test_transport_failure_propagates() {
        let (mut proxy, mut assistant) = pair(vec![], vec![], 10);
        let result = initiate_chat(&mut proxy, &mut assistant, "task", &quiet()).await;
        assert!(result.is_err());
    }
}
