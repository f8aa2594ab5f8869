//! Conversable agent: keeps per-peer history and decides each reply

use anyhow::Result;
use llm_core::{ChatBackend, ChatMessage};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use super::config::AgentConfig;
use super::reply::{HandlerOutcome, Reply, ReplyContext, ReplyHandler, StopReason};
use crate::code_exec::{extract_code, CodeExecutor};
use crate::human::{HumanInput, HumanInputMode, StdinInput};
use crate::termination::{exact_terminate, predicate, TerminationPredicate};

const EXIT: &str = "exit";

/// An agent that can take part in a two-party chat
pub struct ConversableAgent {
    config: AgentConfig,
    llm: Option<Arc<dyn ChatBackend>>,
    is_termination_msg: TerminationPredicate,
    human: Arc<dyn HumanInput>,
    executor: Option<CodeExecutor>,
    handlers: Vec<Box<dyn ReplyHandler>>,
    histories: HashMap<String, Vec<ChatMessage>>,
    auto_reply_counter: HashMap<String, usize>,
}

impl std::fmt::Debug for ConversableAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversableAgent")
            .field("config", &self.config)
            .field("has_llm", &self.llm.is_some())
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

impl ConversableAgent {
    pub fn new(config: AgentConfig) -> Self {
        let executor = config.code_execution.clone().map(CodeExecutor::new);
        Self {
            config,
            llm: None,
            is_termination_msg: predicate(exact_terminate),
            human: Arc::new(StdinInput),
            executor,
            handlers: Vec::new(),
            histories: HashMap::new(),
            auto_reply_counter: HashMap::new(),
        }
    }

    /// Back replies with a model
    pub fn with_llm(mut self, llm: Arc<dyn ChatBackend>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn with_termination(mut self, is_termination_msg: TerminationPredicate) -> Self {
        self.is_termination_msg = is_termination_msg;
        self
    }

    pub fn with_human_input(mut self, human: Arc<dyn HumanInput>) -> Self {
        self.human = human;
        self
    }

    /// Add a reply handler; handlers run in registration order
    pub fn register_reply(&mut self, handler: Box<dyn ReplyHandler>) {
        debug!(agent = %self.config.name, handler = handler.name(), "Registered reply handler");
        self.handlers.push(handler);
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Messages exchanged with `peer`, from this agent's point of view
    pub fn history_with(&self, peer: &str) -> &[ChatMessage] {
        self.histories.get(peer).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn last_message_from(&self, peer: &str) -> Option<&ChatMessage> {
        self.history_with(peer).last()
    }

    pub fn auto_reply_count(&self, peer: &str) -> usize {
        self.auto_reply_counter.get(peer).copied().unwrap_or(0)
    }

    /// Forget the history with `peer`, or with everyone
    pub fn clear_history(&mut self, peer: Option<&str>) {
        match peer {
            Some(peer) => {
                self.histories.remove(peer);
            }
            None => self.histories.clear(),
        }
    }

    /// Called on both sides before a new chat starts
    pub fn prepare_chat(&mut self, peer: &str, clear_history: bool) {
        self.auto_reply_counter.insert(peer.to_string(), 0);
        if clear_history {
            self.clear_history(Some(peer));
        }
    }

    /// Store a message this agent sent to `peer`
    pub fn record_sent(&mut self, peer: &str, content: &str) {
        self.histories
            .entry(peer.to_string())
            .or_default()
            .push(ChatMessage::assistant(content));
    }

    /// Store a message received from `sender`
    pub fn receive(&mut self, sender: &str, content: &str) {
        self.histories
            .entry(sender.to_string())
            .or_default()
            .push(ChatMessage::user(content).with_name(sender));
    }

    /// Decide the reply to the latest message from `sender`
    pub async fn generate_reply(&mut self, sender: &str) -> Result<Reply> {
        let Some(last) = self.last_message_from(sender).cloned() else {
            return Ok(Reply::Stop(StopReason::NoReply));
        };

        if let Some(reply) = self.check_termination_and_human_reply(sender, &last).await? {
            return Ok(reply);
        }

        let outcome = self.run_handlers(sender).await?;
        match outcome {
            HandlerOutcome::Pass => {}
            HandlerOutcome::Reply(text) => return Ok(Reply::Message(text)),
            HandlerOutcome::Restart(text) => {
                self.clear_history(Some(sender));
                return Ok(Reply::Restart(text));
            }
            HandlerOutcome::Stop(reason) => return Ok(Reply::Stop(reason)),
        }

        if let Some(reply) = self.code_execution_reply(sender).await? {
            return Ok(Reply::Message(reply));
        }

        if let Some(reply) = self.llm_reply(sender).await? {
            return Ok(Reply::Message(reply));
        }

        Ok(Reply::Message(self.config.default_auto_reply.clone()))
    }

    async fn check_termination_and_human_reply(
        &mut self,
        sender: &str,
        last: &ChatMessage,
    ) -> Result<Option<Reply>> {
        let mode = self.config.human_input_mode;
        let max = self.config.max_consecutive_auto_reply;
        let count = self.auto_reply_count(sender);
        let terminating = (self.is_termination_msg)(last);

        let mut reply = String::new();
        let mut reason = StopReason::HumanExit;

        match mode {
            HumanInputMode::Always => {
                reply = self
                    .human
                    .prompt(&format!(
                        "Provide feedback to {}. Press enter to skip and use auto-reply, or type 'exit' to end the conversation: ",
                        sender
                    ))
                    .await?;
                if reply.is_empty() && terminating {
                    reply = EXIT.to_string();
                    reason = StopReason::Terminated;
                }
            }
            HumanInputMode::Never => {
                if terminating {
                    reply = EXIT.to_string();
                    reason = StopReason::Terminated;
                } else if count >= max {
                    reply = EXIT.to_string();
                    reason = StopReason::MaxAutoReply;
                }
            }
            HumanInputMode::Terminate => {
                if count >= max || terminating {
                    let prompt = if terminating {
                        format!(
                            "Please give feedback to {}. Press enter or type 'exit' to stop the conversation: ",
                            sender
                        )
                    } else {
                        format!(
                            "Please give feedback to {}. Press enter to skip and use auto-reply, or type 'exit' to stop the conversation: ",
                            sender
                        )
                    };
                    reply = self.human.prompt(&prompt).await?;
                    if reply.is_empty() && terminating {
                        reply = EXIT.to_string();
                        reason = StopReason::Terminated;
                    }
                }
            }
        }

        if reply == EXIT {
            info!(agent = %self.config.name, sender, %reason, "Ending conversation");
            self.auto_reply_counter.insert(sender.to_string(), 0);
            return Ok(Some(Reply::Stop(reason)));
        }

        if !reply.is_empty() || max == 0 {
            self.auto_reply_counter.insert(sender.to_string(), 0);
            return Ok(Some(Reply::Message(reply)));
        }

        self.auto_reply_counter.insert(sender.to_string(), count + 1);
        if mode != HumanInputMode::Never {
            info!(agent = %self.config.name, "Using auto reply");
        }
        Ok(None)
    }

    async fn run_handlers(&self, sender: &str) -> Result<HandlerOutcome> {
        let ctx = ReplyContext {
            agent: &self.config.name,
            sender,
            messages: self.history_with(sender),
        };

        for handler in &self.handlers {
            let outcome = handler.generate(ctx).await?;
            if outcome != HandlerOutcome::Pass {
                debug!(handler = handler.name(), "Reply handler produced the reply");
                return Ok(outcome);
            }
        }
        Ok(HandlerOutcome::Pass)
    }

    async fn code_execution_reply(&self, sender: &str) -> Result<Option<String>> {
        let Some(executor) = &self.executor else {
            return Ok(None);
        };

        let messages = self.history_with(sender);
        let scan = executor.config().last_n_messages.min(messages.len());
        for message in messages.iter().rev().take(scan) {
            let blocks = extract_code(message.text());
            if blocks.is_empty() {
                continue;
            }
            let outcome = executor.execute_blocks(&blocks).await?;
            return Ok(Some(outcome.to_reply()));
        }
        Ok(None)
    }

    async fn llm_reply(&self, sender: &str) -> Result<Option<String>> {
        let Some(llm) = &self.llm else {
            return Ok(None);
        };

        let history = self.history_with(sender);
        let mut messages = Vec::with_capacity(history.len() + 1);
        messages.push(ChatMessage::system(self.config.system_message.clone()));
        messages.extend(history.iter().cloned());

        let completion = llm.complete(&messages).await?;
        debug!(
            agent = %self.config.name,
            cached = completion.cached,
            model = %completion.model,
            "LLM replied"
        );
        Ok(Some(completion.content.unwrap_or_default()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::code_exec::CodeExecutionConfig;
    use crate::termination::ends_with_terminate;
    use crate::testing::{ScriptedBackend, ScriptedInput};
    use llm_core::Role;
    use tempfile::TempDir;

    fn proxy(mode: HumanInputMode, max: usize) -> ConversableAgent {
        ConversableAgent::new(
            AgentConfig::new("user_proxy")
                .with_human_input_mode(mode)
                .with_max_consecutive_auto_reply(max),
        )
        .with_termination(predicate(ends_with_terminate))
    }

    #[tokio::test]
    async fn test_never_stops_on_terminate() {
        let mut agent = proxy(HumanInputMode::Never, 10);
        agent.receive("assistant", "Done. TERMINATE");
        assert_eq!(
            agent.generate_reply("assistant").await.unwrap(),
            Reply::Stop(StopReason::Terminated)
        );
    }

    #[tokio::test]
    async fn test_never_uses_default_reply_and_counts() {
        let mut agent = proxy(HumanInputMode::Never, 2);
        agent.receive("assistant", "CONTINUE, more work needed");
        assert_eq!(agent.generate_reply("assistant").await.unwrap(), Reply::Message(String::new()));
        assert_eq!(agent.auto_reply_count("assistant"), 1);

        agent.receive("assistant", "still going");
        agent.generate_reply("assistant").await.unwrap();
        assert_eq!(agent.auto_reply_count("assistant"), 2);

        agent.receive("assistant", "and more");
        assert_eq!(
            agent.generate_reply("assistant").await.unwrap(),
            Reply::Stop(StopReason::MaxAutoReply)
        );
        assert_eq!(agent.auto_reply_count("assistant"), 0);
    }

    #[tokio::test]
    async fn test_no_history_means_no_reply() {
        let mut agent = proxy(HumanInputMode::Never, 10);
        assert_eq!(
            agent.generate_reply("nobody").await.unwrap(),
            Reply::Stop(StopReason::NoReply)
        );
    }

    #[tokio::test]
    async fn test_always_mode_human_reply_and_exit() {
        let human = Arc::new(ScriptedInput::new(["try again", "exit"]));
        let mut agent = proxy(HumanInputMode::Always, 10).with_human_input(human.clone());

        agent.receive("assistant", "first answer");
        assert_eq!(
            agent.generate_reply("assistant").await.unwrap(),
            Reply::Message("try again".to_string())
        );

        agent.receive("assistant", "second answer");
        assert_eq!(
            agent.generate_reply("assistant").await.unwrap(),
            Reply::Stop(StopReason::HumanExit)
        );
        assert!(human.prompts()[0].starts_with("Provide feedback to assistant."));
    }

    #[tokio::test]
    async fn test_terminate_mode_only_asks_on_termination() {
        let human = Arc::new(ScriptedInput::new(Vec::<String>::new()));
        let mut agent = proxy(HumanInputMode::Terminate, 10).with_human_input(human.clone());

        agent.receive("assistant", "working on it");
        agent.generate_reply("assistant").await.unwrap();
        assert!(human.prompts().is_empty());

        agent.receive("assistant", "TERMINATE");
        assert_eq!(
            agent.generate_reply("assistant").await.unwrap(),
            Reply::Stop(StopReason::Terminated)
        );
        assert_eq!(human.prompts().len(), 1);
    }

    #[tokio::test]
    async fn test_llm_reply_includes_system_message() {
        let backend = Arc::new(ScriptedBackend::new(["print me"]));
        let mut agent = ConversableAgent::new(
            AgentConfig::assistant("assistant").with_system_message("You are a coder specializing in python"),
        )
        .with_llm(backend.clone());

        agent.receive("user_proxy", "write code");
        assert_eq!(
            agent.generate_reply("user_proxy").await.unwrap(),
            Reply::Message("print me".to_string())
        );

        let calls = backend.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0][0].role, Role::System);
        assert_eq!(calls[0][0].text(), "You are a coder specializing in python");
        assert_eq!(calls[0][1].name.as_deref(), Some("user_proxy"));
    }

    #[tokio::test]
    async fn test_code_execution_before_llm() {
        let dir = TempDir::new().unwrap();
        let backend = Arc::new(ScriptedBackend::new(Vec::<String>::new()));
        let mut agent = ConversableAgent::new(
            AgentConfig::new("user_proxy")
                .with_human_input_mode(HumanInputMode::Never)
                .with_code_execution(Some(CodeExecutionConfig::new(dir.path()).with_timeout(5))),
        )
        .with_llm(backend.clone());

        agent.receive("assistant", "```sh\n# filename: out.sh\necho 42\n```");
        let reply = agent.generate_reply("assistant").await.unwrap();
        match reply {
            Reply::Message(text) => {
                assert!(text.starts_with("exitcode: 0 (execution succeeded)"));
                assert!(text.contains("42"));
            }
            other => panic!("unexpected reply: {:?}", other),
        }
        assert!(backend.calls().is_empty());
        assert!(dir.path().join("out.sh").exists());
    }

    #[tokio::test]
    async fn test_llm_error_propagates() {
        let backend = Arc::new(ScriptedBackend::new(Vec::<String>::new()));
        let mut agent = ConversableAgent::new(AgentConfig::assistant("assistant")).with_llm(backend);
        agent.receive("user_proxy", "hello");
        assert!(agent.generate_reply("user_proxy").await.is_err());
    }

    struct Echo;

    #[async_trait::async_trait]
    impl ReplyHandler for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        async fn generate(&self, ctx: ReplyContext<'_>) -> Result<HandlerOutcome> {
            let text = ctx.last_message().map(|m| m.text()).unwrap_or("");
            if text.starts_with("echo ") {
                Ok(HandlerOutcome::Restart(text[5..].to_string()))
            } else {
                Ok(HandlerOutcome::Pass)
            }
        }
    }

    #[tokio::test]
    async fn test_handler_restart_clears_history() {
        let mut agent = proxy(HumanInputMode::Never, 10);
        agent.register_reply(Box::new(Echo));

        agent.receive("assistant", "echo hi");
        assert_eq!(
            agent.generate_reply("assistant").await.unwrap(),
            Reply::Restart("hi".to_string())
        );
        assert!(agent.history_with("assistant").is_empty());

        agent.receive("assistant", "plain");
        assert_eq!(agent.generate_reply("assistant").await.unwrap(), Reply::Message(String::new()));
    }
}
