//! Agent construction settings

use crate::code_exec::CodeExecutionConfig;
use crate::human::HumanInputMode;

/// Auto-reply budget used when none is given
pub const MAX_CONSECUTIVE_AUTO_REPLY: usize = 100;

/// System message for assistants that are not given one
pub const DEFAULT_ASSISTANT_SYSTEM_MESSAGE: &str = "You are a helpful AI assistant.
Solve tasks using your coding and language skills.
When you need code to be run, put it in a ```python or ```sh block and the user will execute it.
If you want the user to save the code in a file before executing it, put # filename: <filename> as the first line of the block.
Do not ask the user to edit or copy code; return complete code.
When the task is done and verified, reply TERMINATE.";

/// Configuration for a conversable agent
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Name other agents address this one by
    pub name: String,
    /// System message prepended to every LLM call
    pub system_message: String,
    /// When to ask a human
    pub human_input_mode: HumanInputMode,
    /// Consecutive automatic replies allowed per peer
    pub max_consecutive_auto_reply: usize,
    /// Run code found in received messages
    pub code_execution: Option<CodeExecutionConfig>,
    /// Reply used when nothing else produces one
    pub default_auto_reply: String,
}

impl AgentConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            system_message: String::new(),
            human_input_mode: HumanInputMode::Terminate,
            max_consecutive_auto_reply: MAX_CONSECUTIVE_AUTO_REPLY,
            code_execution: None,
            default_auto_reply: String::new(),
        }
    }

    /// LLM-backed assistant: never asks a human, never runs code
    pub fn assistant(name: impl Into<String>) -> Self {
        Self::new(name)
            .with_system_message(DEFAULT_ASSISTANT_SYSTEM_MESSAGE)
            .with_human_input_mode(HumanInputMode::Never)
    }

    /// Stand-in for a human: asks every time and runs code
    pub fn user_proxy(name: impl Into<String>) -> Self {
        Self::new(name)
            .with_human_input_mode(HumanInputMode::Always)
            .with_code_execution(Some(CodeExecutionConfig::default()))
    }

    pub fn with_system_message(mut self, message: impl Into<String>) -> Self {
        self.system_message = message.into();
        self
    }

    pub fn with_human_input_mode(mut self, mode: HumanInputMode) -> Self {
        self.human_input_mode = mode;
        self
    }

    pub fn with_max_consecutive_auto_reply(mut self, max: usize) -> Self {
        self.max_consecutive_auto_reply = max;
        self
    }

    pub fn with_code_execution(mut self, config: Option<CodeExecutionConfig>) -> Self {
        self.code_execution = config;
        self
    }
}
