//! The multi-agent session: a user proxy that hands tasks to assistants one
//! after another

use anyhow::{bail, Result};
use llm_core::{ChatBackend, LlmConfig, OpenAiClient};
use std::sync::Arc;
use tracing::info;

use crate::agent::{AgentConfig, ConversableAgent};
use crate::chat::{initiate_chat, ChatOptions, ChatResult};
use crate::code_exec::CodeExecutionConfig;
use crate::config::{SessionConfig, TaskConfig};
use crate::human::HumanInput;
use crate::termination::{ends_with_terminate, predicate};

pub const USER_PROXY: &str = "user_proxy";
pub const ASSISTANT: &str = "assistant";
pub const CHAOS_AGENT: &str = "chaosAgent";

pub struct Session {
    llm_config: Arc<LlmConfig>,
    user_proxy: ConversableAgent,
    agents: Vec<ConversableAgent>,
    tasks: Vec<TaskConfig>,
    options: ChatOptions,
}

impl Session {
    /// Build the agents; every one of them shares `llm_config` and `backend`
    pub fn new(llm_config: Arc<LlmConfig>, backend: Arc<dyn ChatBackend>, config: &SessionConfig) -> Self {
        let code_execution = CodeExecutionConfig::new(&config.work_dir).with_docker(config.use_docker);

        let user_proxy = ConversableAgent::new(
            AgentConfig::new(USER_PROXY)
                .with_system_message(config.user_proxy_system_message.clone())
                .with_human_input_mode(config.human_input_mode)
                .with_max_consecutive_auto_reply(config.max_consecutive_auto_reply)
                .with_code_execution(Some(code_execution)),
        )
        .with_termination(predicate(ends_with_terminate))
        .with_llm(backend.clone());

        let assistant = ConversableAgent::new(
            AgentConfig::assistant(ASSISTANT).with_system_message(config.assistant_system_message.clone()),
        )
        .with_llm(backend.clone());

        let chaos_agent = ConversableAgent::new(
            AgentConfig::assistant(CHAOS_AGENT).with_system_message(config.chaos_system_message.clone()),
        )
        .with_llm(backend);

        Self {
            llm_config,
            user_proxy,
            agents: vec![assistant, chaos_agent],
            tasks: config.tasks.clone(),
            options: ChatOptions::default(),
        }
    }

    /// Session talking to the configured OpenAI-compatible endpoints
    pub fn from_config(llm_config: LlmConfig, config: &SessionConfig) -> Result<Self> {
        let llm_config = Arc::new(llm_config);
        let client = OpenAiClient::new(llm_config.clone())?;
        Ok(Self::new(llm_config, Arc::new(client), config))
    }

    /// Where the proxy gets human replies from
    pub fn with_human_input(mut self, human: Arc<dyn HumanInput>) -> Self {
        self.user_proxy = self.user_proxy.with_human_input(human);
        self
    }

    pub fn with_options(mut self, options: ChatOptions) -> Self {
        self.options = options;
        self
    }

    /// Replace the configured tasks
    pub fn with_tasks(mut self, tasks: Vec<TaskConfig>) -> Self {
        self.tasks = tasks;
        self
    }

    pub fn llm_config(&self) -> &LlmConfig {
        &self.llm_config
    }

    pub fn tasks(&self) -> &[TaskConfig] {
        &self.tasks
    }

    pub fn agent(&self, name: &str) -> Option<&ConversableAgent> {
        if name == USER_PROXY {
            return Some(&self.user_proxy);
        }
        self.agents.iter().find(|a| a.name() == name)
    }

    /// Run every task in order. A task starts only after the previous chat
    /// has finished.
    pub async fn run(&mut self) -> Result<Vec<ChatResult>> {
        for task in &self.tasks {
            if !self.agents.iter().any(|a| a.name() == task.recipient) {
                bail!("Unknown recipient `{}` for task: {}", task.recipient, task.message.trim());
            }
        }

        let mut results = Vec::with_capacity(self.tasks.len());

        for (i, task) in self.tasks.iter().enumerate() {
            let Some(recipient) = self.agents.iter_mut().find(|a| a.name() == task.recipient) else {
                bail!("Unknown recipient `{}`", task.recipient);
            };

            info!(task = i + 1, recipient = %task.recipient, "Starting task");
            let result = initiate_chat(&mut self.user_proxy, recipient, task.message.clone(), &self.options).await?;
            info!(task = i + 1, replies = result.replies, reason = %result.reason, "Task finished");
            results.push(result);
        }

        Ok(results)
    }
}
